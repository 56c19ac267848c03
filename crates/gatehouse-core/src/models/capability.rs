//! Capability layers: system support, tenant grant, tenant feature
//! enablement and per-user enrollment.
//!
//! Inheritance is strictly downward. A lower layer can narrow what the
//! layer above allows but never widen it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Capability key gating the second login factor.
pub const MFA_CAPABILITY: &str = "mfa";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCapability {
    pub key: String,
    pub enabled: bool,
    /// Whether a user must enroll before the capability can be used.
    pub requires_enrollment: bool,
    pub default_config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCapabilityGrant {
    pub tenant_id: Uuid,
    pub key: String,
    pub enabled: bool,
    /// Bounded by [`SystemCapability::default_config`].
    pub config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantFeature {
    pub tenant_id: Uuid,
    pub key: String,
    pub enabled: bool,
    /// Bounded by [`TenantCapabilityGrant::config`].
    pub config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCapabilityState {
    pub user_id: Uuid,
    pub key: String,
    pub enrolled: bool,
    /// Opaque per-capability payload, e.g. a pending encrypted secret.
    pub state: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertSystemCapability {
    pub key: String,
    pub enabled: bool,
    pub requires_enrollment: bool,
    pub default_config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertCapabilityGrant {
    pub tenant_id: Uuid,
    pub key: String,
    pub enabled: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertTenantFeature {
    pub tenant_id: Uuid,
    pub key: String,
    pub enabled: bool,
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertUserCapabilityState {
    pub user_id: Uuid,
    pub key: String,
    pub enrolled: bool,
    pub state: serde_json::Value,
}
