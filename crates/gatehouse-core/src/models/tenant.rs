//! Tenant domain model.
//!
//! Tenants are the isolation boundary. Every tenant-scoped entity
//! (users, roles, permissions, capability grants) carries a tenant id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatehouseError, GatehouseResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "Active",
            TenantStatus::Suspended => "Suspended",
            TenantStatus::Deleted => "Deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Active" => Some(TenantStatus::Active),
            "Suspended" => Some(TenantStatus::Suspended),
            "Deleted" => Some(TenantStatus::Deleted),
            _ => None,
        }
    }
}

/// System-wide maxima that bound every tenant setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemLimits {
    pub max_access_token_ttl_secs: u64,
    pub max_refresh_token_ttl_secs: u64,
    pub max_id_token_ttl_secs: u64,
    pub max_remember_me_access_token_ttl_secs: u64,
    pub max_remember_me_refresh_token_ttl_secs: u64,
    /// Tenants may raise the minimum password length, never lower it.
    pub min_password_length: usize,
    pub max_failed_login_attempts: u32,
    pub max_lockout_duration_secs: u64,
    pub max_login_rate_limit_per_minute: u32,
}

impl Default for SystemLimits {
    fn default() -> Self {
        Self {
            max_access_token_ttl_secs: 3_600,
            max_refresh_token_ttl_secs: 2_592_000,
            max_id_token_ttl_secs: 3_600,
            max_remember_me_access_token_ttl_secs: 7_200,
            max_remember_me_refresh_token_ttl_secs: 7_776_000,
            min_password_length: 12,
            max_failed_login_attempts: 10,
            max_lockout_duration_secs: 3_600,
            max_login_rate_limit_per_minute: 120,
        }
    }
}

/// Per-tenant policy. Every field is bounded by [`SystemLimits`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantSettings {
    pub access_token_ttl_secs: u64,
    pub refresh_token_ttl_secs: u64,
    pub id_token_ttl_secs: u64,
    pub remember_me_access_token_ttl_secs: u64,
    pub remember_me_refresh_token_ttl_secs: u64,
    pub password_min_length: usize,
    pub mfa_required: bool,
    pub max_failed_login_attempts: u32,
    pub lockout_duration_secs: u64,
    pub login_rate_limit_per_minute: u32,
    /// Revoke every outstanding token when the tenant is suspended.
    pub revoke_tokens_on_suspend: bool,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 2_592_000,
            id_token_ttl_secs: 900,
            remember_me_access_token_ttl_secs: 3_600,
            remember_me_refresh_token_ttl_secs: 7_776_000,
            password_min_length: 12,
            mfa_required: false,
            max_failed_login_attempts: 5,
            lockout_duration_secs: 300,
            login_rate_limit_per_minute: 30,
            revoke_tokens_on_suspend: false,
        }
    }
}

impl TenantSettings {
    /// Reject settings that exceed the system maxima.
    ///
    /// Called on every write; reads never clamp.
    pub fn validate(&self, limits: &SystemLimits) -> GatehouseResult<()> {
        fn bounded(name: &str, value: u64, max: u64) -> GatehouseResult<()> {
            if value == 0 {
                return Err(GatehouseError::validation(format!(
                    "{name} must be greater than zero"
                )));
            }
            if value > max {
                return Err(GatehouseError::validation(format!(
                    "{name} ({value}) exceeds the system maximum ({max})"
                )));
            }
            Ok(())
        }

        bounded(
            "access_token_ttl_secs",
            self.access_token_ttl_secs,
            limits.max_access_token_ttl_secs,
        )?;
        bounded(
            "refresh_token_ttl_secs",
            self.refresh_token_ttl_secs,
            limits.max_refresh_token_ttl_secs,
        )?;
        bounded(
            "id_token_ttl_secs",
            self.id_token_ttl_secs,
            limits.max_id_token_ttl_secs,
        )?;
        bounded(
            "remember_me_access_token_ttl_secs",
            self.remember_me_access_token_ttl_secs,
            limits.max_remember_me_access_token_ttl_secs,
        )?;
        bounded(
            "remember_me_refresh_token_ttl_secs",
            self.remember_me_refresh_token_ttl_secs,
            limits.max_remember_me_refresh_token_ttl_secs,
        )?;
        bounded(
            "max_failed_login_attempts",
            u64::from(self.max_failed_login_attempts),
            u64::from(limits.max_failed_login_attempts),
        )?;
        bounded(
            "lockout_duration_secs",
            self.lockout_duration_secs,
            limits.max_lockout_duration_secs,
        )?;
        bounded(
            "login_rate_limit_per_minute",
            u64::from(self.login_rate_limit_per_minute),
            u64::from(limits.max_login_rate_limit_per_minute),
        )?;

        if self.password_min_length < limits.min_password_length {
            return Err(GatehouseError::validation(format!(
                "password_min_length ({}) is below the system minimum ({})",
                self.password_min_length, limits.min_password_length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    /// Unique domain, e.g. `acme.example.com`.
    pub domain: String,
    pub name: String,
    pub status: TenantStatus,
    pub settings: TenantSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set on soft deletion; the row is purged after the audit window.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTenant {
    pub domain: String,
    pub name: String,
    pub settings: Option<TenantSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateTenant {
    pub name: Option<String>,
    pub status: Option<TenantStatus>,
    pub settings: Option<TenantSettings>,
    /// `Some(Some(t))` = set, `Some(None)` = clear, `None` = no change.
    pub deleted_at: Option<Option<DateTime<Utc>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_fit_default_limits() {
        TenantSettings::default()
            .validate(&SystemLimits::default())
            .unwrap();
    }

    #[test]
    fn ttl_above_cap_is_rejected() {
        let settings = TenantSettings {
            access_token_ttl_secs: 7_200,
            ..Default::default()
        };
        let err = settings.validate(&SystemLimits::default()).unwrap_err();
        assert!(err.to_string().contains("access_token_ttl_secs"));
    }

    #[test]
    fn weaker_password_policy_is_rejected() {
        let settings = TenantSettings {
            password_min_length: 6,
            ..Default::default()
        };
        assert!(settings.validate(&SystemLimits::default()).is_err());
    }

    #[test]
    fn zero_lockout_threshold_is_rejected() {
        let settings = TenantSettings {
            max_failed_login_attempts: 0,
            ..Default::default()
        };
        assert!(settings.validate(&SystemLimits::default()).is_err());
    }
}
