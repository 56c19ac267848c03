//! In-process ephemeral store.
//!
//! Correct for a single instance and for tests. Multi-instance
//! deployments use the Redis store so that sessions and revocations are
//! visible everywhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gatehouse_core::ephemeral::EphemeralStore;
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
}

/// `HashMap` behind a mutex, with lazy expiry on access.
#[derive(Debug, Clone, Default)]
pub struct MemoryEphemeralStore {
    inner: Arc<Inner>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `DependencyUnavailable`
    /// until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> GatehouseResult<usize> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }

    fn lock(&self) -> GatehouseResult<MutexGuard<'_, HashMap<String, Entry>>> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(GatehouseError::unavailable("ephemeral store", "store offline"));
        }
        self.inner
            .entries
            .lock()
            .map_err(|_| GatehouseError::Internal("ephemeral store mutex poisoned".into()))
    }

    /// Live entry under `key`; an expired one is removed on the way.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

impl EphemeralStore for MemoryEphemeralStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> GatehouseResult<()> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> GatehouseResult<Option<String>> {
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, Instant::now()).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> GatehouseResult<bool> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> GatehouseResult<bool> {
        let mut entries = self.lock()?;
        let matches =
            Self::live(&mut entries, key, Instant::now()).is_some_and(|e| e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> GatehouseResult<u64> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                let next = entry.value.parse::<u64>().map_err(|_| {
                    GatehouseError::Internal(format!("counter {key} holds a non-integer value"))
                })? + 1;
                entry.value = next.to_string();
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".into(),
                        expires_at: now + ttl,
                    },
                );
                Ok(1)
            }
        }
    }

    async fn ttl(&self, key: &str) -> GatehouseResult<Option<Duration>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        Ok(Self::live(&mut entries, key, now).map(|e| e.expires_at - now))
    }
}
