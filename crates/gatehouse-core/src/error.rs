//! Error types for the Gatehouse core.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// The capability layer that rejected an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityLayer {
    Supported,
    Allowed,
    Enabled,
    Enrolled,
}

impl fmt::Display for CapabilityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CapabilityLayer::Supported => "system",
            CapabilityLayer::Allowed => "tenant grant",
            CapabilityLayer::Enabled => "tenant feature",
            CapabilityLayer::Enrolled => "user enrollment",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum GatehouseError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Entity already exists: {entity}")]
    AlreadyExists { entity: String },

    #[error("Permission key '{key}' is outside the namespaces allowed for tenants")]
    InvalidNamespace { key: String },

    #[error("Role '{role}' is a system role and cannot be modified")]
    ImmutableRole { role: String },

    #[error("Tenant {tenant_id} must keep at least one owner")]
    LastOwnerProtected { tenant_id: Uuid },

    #[error("Capability denied at {layer} layer: {reason}")]
    CapabilityDenied {
        layer: CapabilityLayer,
        reason: String,
    },

    #[error("Capability '{key}' setting '{field}' exceeds the bound of the layer above")]
    CapabilityBoundExceeded { key: String, field: String },

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is locked")]
    AccountLocked { until: Option<DateTime<Utc>> },

    #[error("account is {status}")]
    AccountInactive { status: String },

    #[error("tenant {tenant_id} is not active")]
    TenantInactive { tenant_id: Uuid },

    #[error("Forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("MFA session not found")]
    SessionNotFound,

    #[error("MFA session has expired")]
    SessionExpired,

    #[error("maximum MFA attempts exceeded")]
    MaxAttemptsExceeded,

    #[error("invalid MFA code")]
    InvalidMfaCode,

    #[error("refresh token was not issued through MFA")]
    MfaNotVerified,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid token signature: {0}")]
    InvalidSignature(String),

    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatehouseError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatehouseError::Validation {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        GatehouseError::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn unavailable(dependency: impl Into<String>, reason: impl ToString) -> Self {
        GatehouseError::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatehouseError::DependencyUnavailable { .. })
    }

    /// Whether this error means "reject the presented token".
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            GatehouseError::TokenRevoked
                | GatehouseError::TokenExpired
                | GatehouseError::InvalidSignature(_)
                | GatehouseError::DependencyUnavailable { .. }
        )
    }
}

pub type GatehouseResult<T> = Result<T, GatehouseError>;
