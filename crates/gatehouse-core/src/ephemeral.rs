//! Contract for the shared, TTL-capable key/value store.
//!
//! MFA sessions, the revoked-token index and rate-limit counters all
//! live here so that no instance needs sticky routing. Implementations
//! report connectivity problems as `DependencyUnavailable`; callers on
//! security-sensitive paths treat that as a denial.

use std::time::Duration;

use crate::error::GatehouseResult;

pub trait EphemeralStore: Send + Sync {
    /// Write `value` under `key`, replacing any previous value.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = GatehouseResult<Option<String>>> + Send;

    /// Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> impl Future<Output = GatehouseResult<bool>> + Send;

    /// Remove `key` only if it currently holds `expected`. Exactly one
    /// of several concurrent callers can observe `true`.
    fn compare_and_delete(
        &self,
        key: &str,
        expected: &str,
    ) -> impl Future<Output = GatehouseResult<bool>> + Send;

    /// Atomically increment a counter. The TTL is applied when the
    /// counter is created and is not extended by later increments.
    fn increment(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = GatehouseResult<u64>> + Send;

    /// Remaining lifetime of a live entry.
    fn ttl(&self, key: &str) -> impl Future<Output = GatehouseResult<Option<Duration>>> + Send;
}

/// Key layout shared by every store implementation.
pub mod keys {
    use uuid::Uuid;

    pub fn mfa_session(session_id: Uuid) -> String {
        format!("mfa:session:{session_id}")
    }

    pub fn mfa_attempts(session_id: Uuid) -> String {
        format!("mfa:attempts:{session_id}")
    }

    pub fn revoked_token(jti: Uuid) -> String {
        format!("revoked:jti:{jti}")
    }

    pub fn revoked_before_user(user_id: Uuid) -> String {
        format!("revoked:user:{user_id}")
    }

    pub fn revoked_before_tenant(tenant_id: Uuid) -> String {
        format!("revoked:tenant:{tenant_id}")
    }

    pub fn login_rate(tenant_id: Option<Uuid>, identifier: &str, window: i64) -> String {
        let scope = tenant_id.map_or_else(|| "system".to_string(), |t| t.to_string());
        format!("rate:login:{scope}:{}:{window}", identifier.to_lowercase())
    }
}
