//! [`EphemeralStore`](gatehouse_core::ephemeral::EphemeralStore)
//! implementations.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::MemoryEphemeralStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisEphemeralStore;
