//! Gatehouse Core — domain model, error taxonomy and the store
//! contracts shared by every other crate.

pub mod deadline;
pub mod ephemeral;
pub mod error;
pub mod events;
pub mod models;
pub mod repository;

pub use error::{CapabilityLayer, GatehouseError, GatehouseResult};
