//! Gatehouse Database — SurrealDB repositories, schema migrations and
//! the ephemeral store implementations.
//!
//! This crate provides:
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Repository implementations for the `gatehouse-core` traits,
//!   bundled as [`SurrealRepositories`]
//! - Ephemeral stores: [`MemoryEphemeralStore`] and, with the `redis`
//!   feature, `RedisEphemeralStore`

mod connection;
mod ephemeral;
mod error;
mod password;
pub mod repository;
mod schema;

pub use connection::{DbConfig, DbManager};
#[cfg(feature = "redis")]
pub use ephemeral::RedisEphemeralStore;
pub use ephemeral::MemoryEphemeralStore;
pub use error::DbError;
pub use password::{hash_password, verify_password};
pub use repository::SurrealRepositories;
pub use schema::{run_migrations, schema_v1};
