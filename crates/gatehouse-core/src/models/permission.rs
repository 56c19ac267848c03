//! Permission domain model and namespace rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatehouseError, GatehouseResult};

/// Prefixes a tenant may create permissions under.
pub const TENANT_NAMESPACES: &[&str] = &["tenant.", "app.", "resource."];

/// Prefixes reserved for the system plane.
pub const SYSTEM_NAMESPACES: &[&str] = &["system.", "platform."];

/// Keys every tenant is seeded with. Administrative operations check
/// the caller against these.
pub mod predefined {
    pub const USERS_READ: &str = "tenant.users.read";
    pub const USERS_CREATE: &str = "tenant.users.create";
    pub const USERS_UPDATE: &str = "tenant.users.update";
    pub const USERS_DELETE: &str = "tenant.users.delete";
    pub const ROLES_READ: &str = "tenant.roles.read";
    pub const ROLES_CREATE: &str = "tenant.roles.create";
    pub const ROLES_UPDATE: &str = "tenant.roles.update";
    pub const ROLES_DELETE: &str = "tenant.roles.delete";
    pub const ROLES_ASSIGN: &str = "tenant.roles.assign";
    pub const PERMISSIONS_READ: &str = "tenant.permissions.read";
    pub const PERMISSIONS_CREATE: &str = "tenant.permissions.create";
    pub const PERMISSIONS_DELETE: &str = "tenant.permissions.delete";
    pub const SETTINGS_READ: &str = "tenant.settings.read";
    pub const SETTINGS_UPDATE: &str = "tenant.settings.update";
    pub const AUDIT_READ: &str = "tenant.audit.read";
    pub const MFA_RESET: &str = "tenant.mfa.reset";
    pub const SESSIONS_READ: &str = "tenant.sessions.read";
    pub const SESSIONS_REVOKE: &str = "tenant.sessions.revoke";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    /// `None` only for system-namespace permissions.
    pub tenant_id: Option<Uuid>,
    /// Namespace-qualified key, e.g. `tenant.users.read`.
    pub key: String,
    pub description: String,
    /// Seeded by the tenant initializer; cannot be deleted.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePermission {
    pub tenant_id: Option<Uuid>,
    pub key: String,
    pub description: String,
}

/// Check the key shape shared by both planes: dot-separated,
/// lowercase segments, at least two segments.
fn check_key_shape(key: &str) -> GatehouseResult<()> {
    let segments: Vec<&str> = key.split('.').collect();
    let well_formed = segments.len() >= 2
        && segments.iter().all(|s| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        });
    if well_formed {
        Ok(())
    } else {
        Err(GatehouseError::validation(format!(
            "malformed permission key '{key}'"
        )))
    }
}

/// The namespace is the first segment, compared case-insensitively so
/// `SYSTEM.x` is refused as reserved rather than as malformed.
fn check_namespace(key: &str, allowed: &[&str]) -> GatehouseResult<()> {
    let namespace = key.split('.').next().unwrap_or_default().to_ascii_lowercase();
    if allowed
        .iter()
        .any(|ns| ns.strip_suffix('.') == Some(namespace.as_str()))
    {
        Ok(())
    } else {
        Err(GatehouseError::InvalidNamespace {
            key: key.to_string(),
        })
    }
}

/// Validate a key a tenant wants to create.
pub fn validate_tenant_key(key: &str) -> GatehouseResult<()> {
    check_namespace(key, TENANT_NAMESPACES)?;
    check_key_shape(key)
}

/// Validate a key for the system plane.
pub fn validate_system_key(key: &str) -> GatehouseResult<()> {
    check_namespace(key, SYSTEM_NAMESPACES)?;
    check_key_shape(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_namespaces_are_accepted() {
        for key in ["tenant.reports.generate", "app.billing.view", "resource.doc.edit"] {
            validate_tenant_key(key).unwrap();
        }
    }

    #[test]
    fn reserved_namespaces_are_rejected_for_tenants() {
        for key in ["system.users.create", "platform.tenants.delete", "billing.view"] {
            assert!(matches!(
                validate_tenant_key(key),
                Err(GatehouseError::InvalidNamespace { .. })
            ));
        }
    }

    #[test]
    fn malformed_keys_are_validation_errors() {
        for key in ["tenant", "tenant..x", "Tenant.Users", "tenant.users.*"] {
            assert!(matches!(
                validate_tenant_key(key),
                Err(GatehouseError::Validation { .. })
            ));
        }
    }

    #[test]
    fn reserved_prefixes_win_over_casing() {
        for key in ["SYSTEM.users.create", "System.x", "Platform.Tenants.delete"] {
            assert!(matches!(
                validate_tenant_key(key),
                Err(GatehouseError::InvalidNamespace { .. })
            ));
        }
        assert!(matches!(
            validate_system_key("SYSTEM.users.create"),
            Err(GatehouseError::Validation { .. })
        ));
    }

    #[test]
    fn system_keys_stay_in_system_namespaces() {
        validate_system_key("system.tenants.create").unwrap();
        assert!(validate_system_key("tenant.users.read").is_err());
    }
}
