//! Gatehouse Authz — role/permission resolution, capability
//! evaluation and tenant provisioning.

pub mod audit;
pub mod capability;
pub mod initializer;
pub mod provisioning;
pub mod rbac;

pub use capability::{CapabilityEvaluation, CapabilityEvaluator};
pub use initializer::{InitResult, TenantInitializer};
pub use provisioning::Provisioner;
pub use rbac::{EffectiveAccess, PermissionResolver};
