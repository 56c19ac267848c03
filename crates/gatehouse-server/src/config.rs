//! Process configuration read from the environment.
//!
//! A `.env` file in the working directory is loaded first when present.
//! Unset variables fall back to the library defaults.

use std::env;
use std::str::FromStr;

use gatehouse_auth::AuthConfig;
use gatehouse_db::DbConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db: DbConfig,
    pub auth: AuthConfig,
    /// Shared ephemeral store; the in-process store is used when unset.
    pub redis_url: Option<String>,
    pub maintenance_interval_secs: u64,
    /// Soft-deleted tenants older than this are purged.
    pub tenant_retention_days: i64,
}

fn var(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    var(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// A 256-bit key given as 64 hex characters.
fn encryption_key(name: &'static str) -> Result<Option<[u8; 32]>, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    let bytes = hex::decode(raw.trim()).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    let key: [u8; 32] = bytes.try_into().map_err(|_| ConfigError::Invalid {
        name,
        reason: "expected 32 bytes".into(),
    })?;
    Ok(Some(key))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let db_defaults = DbConfig::default();
        let db = DbConfig {
            url: var("GATEHOUSE_DB_URL").unwrap_or(db_defaults.url),
            namespace: var("GATEHOUSE_DB_NAMESPACE").unwrap_or(db_defaults.namespace),
            database: var("GATEHOUSE_DB_DATABASE").unwrap_or(db_defaults.database),
            username: var("GATEHOUSE_DB_USERNAME").unwrap_or(db_defaults.username),
            password: var("GATEHOUSE_DB_PASSWORD").unwrap_or(db_defaults.password),
        };

        let defaults = AuthConfig::default();
        let mut limits = defaults.limits.clone();
        limits.max_access_token_ttl_secs =
            parsed("GATEHOUSE_MAX_ACCESS_TOKEN_TTL_SECS", limits.max_access_token_ttl_secs)?;
        limits.max_refresh_token_ttl_secs =
            parsed("GATEHOUSE_MAX_REFRESH_TOKEN_TTL_SECS", limits.max_refresh_token_ttl_secs)?;
        limits.min_password_length =
            parsed("GATEHOUSE_MIN_PASSWORD_LENGTH", limits.min_password_length)?;
        limits.max_lockout_duration_secs =
            parsed("GATEHOUSE_MAX_LOCKOUT_SECS", limits.max_lockout_duration_secs)?;

        let mut system_settings = defaults.system_settings.clone();
        system_settings.mfa_required =
            parsed("GATEHOUSE_SYSTEM_MFA_REQUIRED", system_settings.mfa_required)?;
        system_settings.password_min_length = system_settings
            .password_min_length
            .max(limits.min_password_length);
        system_settings
            .validate(&limits)
            .map_err(|e| ConfigError::Invalid {
                name: "system settings",
                reason: e.to_string(),
            })?;

        let auth = AuthConfig {
            jwt_private_key_pem: required("GATEHOUSE_JWT_PRIVATE_KEY")?,
            jwt_public_key_pem: required("GATEHOUSE_JWT_PUBLIC_KEY")?,
            jwt_issuer: var("GATEHOUSE_JWT_ISSUER").unwrap_or(defaults.jwt_issuer),
            pepper: var("GATEHOUSE_PASSWORD_PEPPER"),
            limits,
            system_settings,
            mfa_encryption_key: encryption_key("GATEHOUSE_MFA_ENCRYPTION_KEY")?,
            mfa_challenge_lifetime_secs: parsed(
                "GATEHOUSE_MFA_CHALLENGE_SECS",
                defaults.mfa_challenge_lifetime_secs,
            )?,
            max_mfa_attempts: parsed("GATEHOUSE_MAX_MFA_ATTEMPTS", defaults.max_mfa_attempts)?,
            totp_issuer: var("GATEHOUSE_TOTP_ISSUER").unwrap_or(defaults.totp_issuer),
            recovery_code_count: parsed(
                "GATEHOUSE_RECOVERY_CODE_COUNT",
                defaults.recovery_code_count,
            )?,
            lockout_backoff_multiplier: parsed(
                "GATEHOUSE_LOCKOUT_BACKOFF",
                defaults.lockout_backoff_multiplier,
            )?,
            dependency_timeout_ms: parsed(
                "GATEHOUSE_DEPENDENCY_TIMEOUT_MS",
                defaults.dependency_timeout_ms,
            )?,
            claims_size_warning_bytes: parsed(
                "GATEHOUSE_CLAIMS_WARNING_BYTES",
                defaults.claims_size_warning_bytes,
            )?,
        };

        Ok(Self {
            db,
            auth,
            redis_url: var("GATEHOUSE_REDIS_URL"),
            maintenance_interval_secs: parsed("GATEHOUSE_MAINTENANCE_INTERVAL_SECS", 300)?,
            tenant_retention_days: parsed("GATEHOUSE_TENANT_RETENTION_DAYS", 30)?,
        })
    }
}
