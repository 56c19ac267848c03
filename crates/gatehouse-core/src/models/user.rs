//! User (principal) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatehouseError, GatehouseResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    /// Platform-scoped; never carries a tenant id.
    System,
    /// Organization-scoped; always carries a tenant id.
    Tenant,
}

impl PrincipalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalKind::System => "System",
            PrincipalKind::Tenant => "Tenant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "System" => Some(PrincipalKind::System),
            "Tenant" => Some(PrincipalKind::Tenant),
            _ => None,
        }
    }

    /// Check the tenant-id invariant for this kind of principal.
    pub fn check_scope(&self, tenant_id: Option<Uuid>) -> GatehouseResult<()> {
        match (self, tenant_id) {
            (PrincipalKind::System, None) | (PrincipalKind::Tenant, Some(_)) => Ok(()),
            (PrincipalKind::System, Some(_)) => Err(GatehouseError::validation(
                "a system principal cannot carry a tenant id",
            )),
            (PrincipalKind::Tenant, None) => Err(GatehouseError::validation(
                "a tenant principal requires a tenant id",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Disabled,
    Locked,
    Pending,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "Active",
            UserStatus::Disabled => "Disabled",
            UserStatus::Locked => "Locked",
            UserStatus::Pending => "Pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(UserStatus::Active),
            "Disabled" => Some(UserStatus::Disabled),
            "Locked" => Some(UserStatus::Locked),
            "Pending" => Some(UserStatus::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub kind: PrincipalKind,
    pub tenant_id: Option<Uuid>,
    /// Unique within scope, case-sensitive.
    pub username: String,
    /// Unique within scope, compared case-insensitively.
    pub email: String,
    pub password_hash: String,
    pub status: UserStatus,
    pub mfa_enabled: bool,
    /// AES-256-GCM encrypted TOTP secret (if MFA is enrolled).
    pub mfa_secret: Option<String>,
    /// SHA-256 hashes of unused recovery codes.
    pub recovery_code_hashes: Vec<String>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// Number of lockouts so far; scales the next lockout duration.
    pub lockout_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A reference to this user usable by the resolver and claims builder.
    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.id,
            kind: self.kind,
            tenant_id: self.tenant_id,
        }
    }

    /// Whether a lock has lapsed and may be lifted automatically.
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == UserStatus::Locked && self.locked_until.is_some_and(|until| until <= now)
    }
}

/// The identity half of a user: who, and in which plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Principal {
    pub user_id: Uuid,
    pub kind: PrincipalKind,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub kind: PrincipalKind,
    pub tenant_id: Option<Uuid>,
    pub username: String,
    pub email: String,
    /// Raw password (hashed with Argon2id before storage).
    pub password: String,
    /// Initial status; defaults to `Pending`.
    pub status: Option<UserStatus>,
}

impl CreateUser {
    pub fn validate(&self) -> GatehouseResult<()> {
        self.kind.check_scope(self.tenant_id)?;
        if self.username.trim().is_empty() {
            return Err(GatehouseError::validation("username must not be empty"));
        }
        if !self.email.contains('@') {
            return Err(GatehouseError::validation("email must contain '@'"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub status: Option<UserStatus>,
    pub mfa_enabled: Option<bool>,
    /// `Some(Some(val))` = set, `Some(None)` = clear, `None` = no change.
    pub mfa_secret: Option<Option<String>>,
    pub recovery_code_hashes: Option<Vec<String>>,
}

/// Normalized form used for the case-insensitive email uniqueness index.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_principal_rejects_tenant_id() {
        assert!(
            PrincipalKind::System
                .check_scope(Some(Uuid::new_v4()))
                .is_err()
        );
        assert!(PrincipalKind::System.check_scope(None).is_ok());
    }

    #[test]
    fn tenant_principal_requires_tenant_id() {
        assert!(PrincipalKind::Tenant.check_scope(None).is_err());
        assert!(PrincipalKind::Tenant.check_scope(Some(Uuid::new_v4())).is_ok());
    }

    #[test]
    fn email_normalization_is_case_insensitive() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }
}
