//! Authentication configuration.

use std::time::Duration;

use gatehouse_core::models::tenant::{SystemLimits, TenantSettings};

/// Configuration for login, MFA and token issuance.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// PEM-encoded Ed25519 private key for JWT signing.
    pub jwt_private_key_pem: String,
    /// PEM-encoded Ed25519 public key for JWT verification.
    pub jwt_public_key_pem: String,
    /// JWT issuer (`iss` claim).
    pub jwt_issuer: String,
    /// Optional pepper prepended to passwords before Argon2id hashing.
    pub pepper: Option<String>,
    /// Caps every tenant setting.
    pub limits: SystemLimits,
    /// Policy for system principals, which belong to no tenant.
    pub system_settings: TenantSettings,
    /// 256-bit AES-GCM key for encrypting TOTP secrets at rest.
    /// `None` disables MFA enrollment.
    pub mfa_encryption_key: Option<[u8; 32]>,
    /// MFA challenge lifetime in seconds (default: 300 = 5 minutes).
    pub mfa_challenge_lifetime_secs: u64,
    /// Failed verifications before a challenge is destroyed.
    pub max_mfa_attempts: u64,
    /// Issuer name shown in authenticator apps.
    pub totp_issuer: String,
    /// Recovery codes handed out on MFA enrollment.
    pub recovery_code_count: usize,
    /// Exponential backoff multiplier for repeated lockouts (default: 2.0).
    pub lockout_backoff_multiplier: f64,
    /// Upper bound on any single store, cache or signer call.
    pub dependency_timeout_ms: u64,
    /// Serialized permission claims above this size are flagged.
    pub claims_size_warning_bytes: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_private_key_pem: String::new(),
            jwt_public_key_pem: String::new(),
            jwt_issuer: "gatehouse".into(),
            pepper: None,
            limits: SystemLimits::default(),
            system_settings: TenantSettings::default(),
            mfa_encryption_key: None,
            mfa_challenge_lifetime_secs: 300,
            max_mfa_attempts: 5,
            totp_issuer: "Gatehouse".into(),
            recovery_code_count: 10,
            lockout_backoff_multiplier: 2.0,
            dependency_timeout_ms: 2_000,
            claims_size_warning_bytes: 8_192,
        }
    }
}

impl AuthConfig {
    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_timeout_ms)
    }

    pub fn mfa_challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.mfa_challenge_lifetime_secs)
    }
}
