//! Redis-backed ephemeral store shared by every instance.
//!
//! Compare-and-delete and the windowed counter run as Lua scripts so
//! each is a single atomic step on the server.

use std::time::Duration;

use gatehouse_core::ephemeral::EphemeralStore;
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Script};
use tracing::info;

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const INCREMENT_WITH_TTL: &str = r"
local value = redis.call('INCR', KEYS[1])
if value == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return value
";

fn unavailable(err: RedisError) -> GatehouseError {
    GatehouseError::unavailable("redis", err.to_string())
}

/// Millisecond TTL, at least 1 so a zero duration still expires.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[derive(Clone)]
pub struct RedisEphemeralStore {
    conn: MultiplexedConnection,
    compare_and_delete: Script,
    increment: Script,
}

impl RedisEphemeralStore {
    pub async fn connect(url: &str) -> GatehouseResult<Self> {
        info!(url, "Connecting to Redis");
        let client = Client::open(url).map_err(unavailable)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(unavailable)?;
        Ok(Self {
            conn,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            increment: Script::new(INCREMENT_WITH_TTL),
        })
    }
}

impl EphemeralStore for RedisEphemeralStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> GatehouseResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> GatehouseResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> GatehouseResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> GatehouseResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(removed > 0)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> GatehouseResult<u64> {
        let mut conn = self.conn.clone();
        self.increment
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn ttl(&self, key: &str) -> GatehouseResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        // -2: missing, -1: no expiry (never written by this store)
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }
}
