//! Domain models for Gatehouse.
//!
//! These are the core types shared across all crates.

pub mod audit;
pub mod capability;
pub mod permission;
pub mod role;
pub mod seed;
pub mod session;
pub mod tenant;
pub mod user;
