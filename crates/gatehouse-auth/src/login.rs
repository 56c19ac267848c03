//! Login orchestration: credential checks, lockout, rate limiting and
//! the MFA challenge state machine.
//!
//! ```text
//! AwaitingCredentials -> CredentialsValidated -> TokensIssued
//!                                             -> AwaitingMfa -> TokensIssued
//!                                                            -> MfaFailed
//! ```
//!
//! `LockedOut` and `Rejected` are terminal and surface as errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatehouse_authz::CapabilityEvaluator;
use gatehouse_authz::audit::record;
use gatehouse_core::deadline::with_deadline;
use gatehouse_core::ephemeral::{EphemeralStore, keys};
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::events::{DomainEvent, EventKind, EventSink};
use gatehouse_core::models::capability::{MFA_CAPABILITY, UpsertUserCapabilityState};
use gatehouse_core::models::session::MfaSession;
use gatehouse_core::models::tenant::{Tenant, TenantSettings};
use gatehouse_core::models::user::{Principal, UpdateUser, User, UserStatus};
use gatehouse_core::repository::{CredentialStore, Repositories, TenantRepository, UserRepository};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::signer::TokenSigner;
use crate::tokens::{IssuedTokens, TokenManager, ensure_active};
use crate::totp;

const STORE: &str = "persistent store";
const EPHEMERAL: &str = "ephemeral store";
const RATE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// `None` for system principals.
    pub tenant_id: Option<Uuid>,
    /// Username or email.
    pub identifier: String,
    pub password: String,
    pub remember_me: bool,
}

/// A pending second-factor challenge handed back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct MfaChallenge {
    pub session_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginOutcome {
    TokensIssued(IssuedTokens),
    MfaRequired(MfaChallenge),
}

/// Returned when TOTP enrollment starts. The secret is shown once.
#[derive(Debug, Clone, Serialize)]
pub struct TotpSetup {
    pub secret_base32: String,
    pub otpauth_uri: String,
}

/// The factor that answered a challenge.
enum SecondFactor {
    Totp,
    /// Hash of a recovery code, spent once the session is claimed.
    RecoveryCode(String),
}

/// Lock duration after `previous_lockouts` earlier lockouts.
pub fn lockout_duration(
    base_secs: u64,
    previous_lockouts: u32,
    multiplier: f64,
    max_secs: u64,
) -> chrono::Duration {
    let factor = multiplier.max(1.0).powi(previous_lockouts.min(32) as i32);
    let secs = (base_secs as f64 * factor).min(max_secs as f64);
    chrono::Duration::seconds(secs as i64)
}

pub struct LoginOrchestrator<S: Repositories, E: EphemeralStore, K: TokenSigner> {
    store: S,
    ephemeral: E,
    tokens: TokenManager<S, E, K>,
    evaluator: CapabilityEvaluator<S>,
    events: Arc<dyn EventSink>,
    config: Arc<AuthConfig>,
}

impl<S: Repositories, E: EphemeralStore + Clone, K: TokenSigner> Clone
    for LoginOrchestrator<S, E, K>
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ephemeral: self.ephemeral.clone(),
            tokens: self.tokens.clone(),
            evaluator: self.evaluator.clone(),
            events: Arc::clone(&self.events),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: Repositories, E: EphemeralStore, K: TokenSigner> LoginOrchestrator<S, E, K> {
    pub fn new(
        store: S,
        ephemeral: E,
        tokens: TokenManager<S, E, K>,
        evaluator: CapabilityEvaluator<S>,
        events: Arc<dyn EventSink>,
        config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            store,
            ephemeral,
            tokens,
            evaluator,
            events,
            config,
        }
    }

    fn timeout(&self) -> Duration {
        self.config.dependency_timeout()
    }

    fn encryption_key(&self) -> GatehouseResult<&[u8; 32]> {
        self.config.mfa_encryption_key.as_ref().ok_or_else(|| {
            AuthError::MfaUnavailable("no MFA encryption key configured".into()).into()
        })
    }

    fn login_failed(&self, tenant_id: Option<Uuid>, user_id: Option<Uuid>, reason: &str) {
        self.events.emit(
            DomainEvent::new(EventKind::LoginFailure, tenant_id, user_id)
                .with_detail(json!({ "reason": reason })),
        );
    }

    /// Authenticate with a password. Either issues tokens or opens an
    /// MFA challenge; never both.
    #[instrument(skip_all, fields(tenant_id = ?request.tenant_id, identifier = %request.identifier))]
    pub async fn login(&self, request: LoginRequest) -> GatehouseResult<LoginOutcome> {
        let t = self.timeout();

        let tenant = match request.tenant_id {
            Some(tenant_id) => {
                match with_deadline(STORE, t, self.store.tenants().get_by_id(tenant_id)).await {
                    Ok(tenant) if tenant.is_active() => Some(tenant),
                    Ok(_) => {
                        self.login_failed(Some(tenant_id), None, "tenant inactive");
                        return Err(GatehouseError::TenantInactive { tenant_id });
                    }
                    Err(GatehouseError::NotFound { .. }) => {
                        return Err(GatehouseError::InvalidCredentials);
                    }
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };
        let settings = self.tokens.settings_for(tenant.as_ref()).clone();

        self.check_rate(request.tenant_id, &request.identifier, &settings)
            .await?;

        let Some(mut user) = self
            .find_user(request.tenant_id, &request.identifier)
            .await?
        else {
            self.login_failed(request.tenant_id, None, "unknown principal");
            return Err(GatehouseError::InvalidCredentials);
        };

        if user.lock_expired(Utc::now()) {
            with_deadline(STORE, t, self.store.users().unlock(user.id)).await?;
            user.status = UserStatus::Active;
            user.locked_until = None;
            user.failed_login_attempts = 0;
            info!(user_id = %user.id, "expired lock lifted");
        }
        if let Err(e) = ensure_active(&user) {
            self.login_failed(user.tenant_id, Some(user.id), "principal not active");
            return Err(e);
        }

        let valid = with_deadline(
            STORE,
            t,
            self.store.users().verify_password(user.id, &request.password),
        )
        .await?;
        if !valid {
            self.record_failed_attempt(&user, &settings).await?;
            return Err(GatehouseError::InvalidCredentials);
        }
        if user.failed_login_attempts > 0 {
            with_deadline(STORE, t, self.store.users().reset_failed_attempts(user.id)).await?;
        }

        if self.mfa_required(&user, &settings).await? {
            let challenge = self.open_challenge(&user, request.remember_me).await?;
            return Ok(LoginOutcome::MfaRequired(challenge));
        }

        let tokens = self
            .tokens
            .issue(&user, tenant.as_ref(), false, request.remember_me, None)
            .await?;
        self.events.emit(
            DomainEvent::new(EventKind::LoginSuccess, user.tenant_id, Some(user.id))
                .with_detail(json!({ "amr": tokens.amr })),
        );
        info!(user_id = %user.id, "login succeeded");
        Ok(LoginOutcome::TokensIssued(tokens))
    }

    async fn check_rate(
        &self,
        tenant_id: Option<Uuid>,
        identifier: &str,
        settings: &TenantSettings,
    ) -> GatehouseResult<()> {
        let window = Utc::now().timestamp() / RATE_WINDOW_SECS;
        let attempts = with_deadline(
            EPHEMERAL,
            self.timeout(),
            self.ephemeral.increment(
                &keys::login_rate(tenant_id, identifier, window),
                Duration::from_secs(RATE_WINDOW_SECS as u64),
            ),
        )
        .await?;
        if attempts > u64::from(settings.login_rate_limit_per_minute) {
            warn!(?tenant_id, identifier, attempts, "login rate limit exceeded");
            return Err(GatehouseError::RateLimited);
        }
        Ok(())
    }

    async fn find_user(
        &self,
        tenant_id: Option<Uuid>,
        identifier: &str,
    ) -> GatehouseResult<Option<User>> {
        let t = self.timeout();
        match with_deadline(
            STORE,
            t,
            self.store.users().get_by_username(tenant_id, identifier),
        )
        .await
        {
            Ok(user) => return Ok(Some(user)),
            Err(GatehouseError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        if !identifier.contains('@') {
            return Ok(None);
        }
        match with_deadline(STORE, t, self.store.users().get_by_email(tenant_id, identifier)).await
        {
            Ok(user) => Ok(Some(user)),
            Err(GatehouseError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn record_failed_attempt(
        &self,
        user: &User,
        settings: &TenantSettings,
    ) -> GatehouseResult<()> {
        let t = self.timeout();
        let attempts = with_deadline(
            STORE,
            t,
            self.store.users().increment_failed_attempts(user.id),
        )
        .await?;

        if attempts < settings.max_failed_login_attempts {
            self.login_failed(user.tenant_id, Some(user.id), "invalid password");
            return Ok(());
        }

        let duration = lockout_duration(
            settings.lockout_duration_secs,
            user.lockout_count,
            self.config.lockout_backoff_multiplier,
            self.config.limits.max_lockout_duration_secs,
        );
        let until = Utc::now() + duration;
        with_deadline(STORE, t, self.store.users().set_locked(user.id, until)).await?;
        warn!(
            user_id = %user.id,
            attempts,
            lockout_count = user.lockout_count + 1,
            %until,
            "account locked after repeated failures"
        );
        self.login_failed(user.tenant_id, Some(user.id), "locked out");
        Ok(())
    }

    async fn mfa_required(&self, user: &User, settings: &TenantSettings) -> GatehouseResult<bool> {
        if !(user.mfa_enabled || settings.mfa_required) {
            return Ok(false);
        }
        let eval = with_deadline(
            STORE,
            self.timeout(),
            self.evaluator.evaluate(user.tenant_id, user.id, MFA_CAPABILITY),
        )
        .await?;
        Ok(eval.can_use)
    }

    async fn open_challenge(&self, user: &User, remember_me: bool) -> GatehouseResult<MfaChallenge> {
        let now = Utc::now();
        let ttl = self.config.mfa_challenge_ttl();
        let session = MfaSession {
            id: Uuid::new_v4(),
            user_id: user.id,
            tenant_id: user.tenant_id,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(ttl.as_secs() as i64),
            remember_me,
        };
        let value = serde_json::to_string(&session)
            .map_err(|e| GatehouseError::Internal(format!("MFA session serialization: {e}")))?;
        with_deadline(
            EPHEMERAL,
            self.timeout(),
            self.ephemeral
                .set(&keys::mfa_session(session.id), value, ttl),
        )
        .await?;

        self.events.emit(
            DomainEvent::new(EventKind::MfaChallengeCreated, user.tenant_id, Some(user.id))
                .with_detail(json!({ "session_id": session.id })),
        );
        info!(user_id = %user.id, session_id = %session.id, "MFA challenge opened");

        Ok(MfaChallenge {
            session_id: session.id,
            expires_at: session.expires_at,
            expires_in: ttl.as_secs(),
        })
    }

    /// Answer an MFA challenge with a TOTP code or a recovery code.
    #[instrument(skip(self, code))]
    pub async fn verify_mfa(&self, session_id: Uuid, code: &str) -> GatehouseResult<IssuedTokens> {
        let t = self.timeout();
        let session_key = keys::mfa_session(session_id);
        let attempts_key = keys::mfa_attempts(session_id);

        let raw = with_deadline(EPHEMERAL, t, self.ephemeral.get(&session_key))
            .await?
            .ok_or(GatehouseError::SessionNotFound)?;
        let session: MfaSession = serde_json::from_str(&raw)
            .map_err(|e| GatehouseError::Internal(format!("MFA session deserialization: {e}")))?;

        let now = Utc::now();
        if session.is_expired(now) {
            self.destroy_challenge(&session_key, &attempts_key).await?;
            return Err(GatehouseError::SessionExpired);
        }

        let user = match with_deadline(
            STORE,
            t,
            self.store.users().get_by_id(session.tenant_id, session.user_id),
        )
        .await
        {
            Ok(user) => user,
            Err(GatehouseError::NotFound { .. }) => return Err(GatehouseError::SessionNotFound),
            Err(e) => return Err(e),
        };
        ensure_active(&user)?;
        let tenant = self.active_tenant(session.tenant_id).await?;

        let Some(factor) = self.check_second_factor(&user, code).await? else {
            let remaining = (session.expires_at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_secs(1));
            let attempts = with_deadline(
                EPHEMERAL,
                t,
                self.ephemeral.increment(&attempts_key, remaining),
            )
            .await?;
            self.events.emit(
                DomainEvent::new(EventKind::MfaChallengeFailed, user.tenant_id, Some(user.id))
                    .with_detail(json!({ "session_id": session_id, "attempts": attempts })),
            );

            if attempts >= self.config.max_mfa_attempts {
                self.destroy_challenge(&session_key, &attempts_key).await?;
                warn!(user_id = %user.id, %session_id, attempts, "MFA challenge destroyed");
                return Err(GatehouseError::MaxAttemptsExceeded);
            }
            warn!(user_id = %user.id, %session_id, attempts, "invalid MFA code");
            return Err(GatehouseError::InvalidMfaCode);
        };

        let consumed = with_deadline(
            EPHEMERAL,
            t,
            self.ephemeral.compare_and_delete(&session_key, &raw),
        )
        .await?;
        if !consumed {
            return Err(GatehouseError::SessionNotFound);
        }
        with_deadline(EPHEMERAL, t, self.ephemeral.delete(&attempts_key)).await?;

        // Spent only by the attempt that claimed the session.
        if let SecondFactor::RecoveryCode(hash) = factor {
            let spent = with_deadline(
                STORE,
                t,
                self.store.users().consume_recovery_code(user.id, &hash),
            )
            .await?;
            if !spent {
                warn!(user_id = %user.id, %session_id, "recovery code already spent");
                return Err(GatehouseError::InvalidMfaCode);
            }
            info!(user_id = %user.id, "recovery code consumed");
        }

        self.events.emit(
            DomainEvent::new(EventKind::MfaChallengeVerified, user.tenant_id, Some(user.id))
                .with_detail(json!({ "session_id": session_id })),
        );
        let tokens = self
            .tokens
            .issue(&user, tenant.as_ref(), true, session.remember_me, None)
            .await?;
        self.events.emit(
            DomainEvent::new(EventKind::LoginSuccess, user.tenant_id, Some(user.id))
                .with_detail(json!({ "amr": tokens.amr })),
        );
        info!(user_id = %user.id, "login completed with MFA");
        Ok(tokens)
    }

    async fn destroy_challenge(&self, session_key: &str, attempts_key: &str) -> GatehouseResult<()> {
        let t = self.timeout();
        with_deadline(EPHEMERAL, t, self.ephemeral.delete(session_key)).await?;
        with_deadline(EPHEMERAL, t, self.ephemeral.delete(attempts_key)).await?;
        Ok(())
    }

    async fn active_tenant(&self, tenant_id: Option<Uuid>) -> GatehouseResult<Option<Tenant>> {
        let Some(tenant_id) = tenant_id else {
            return Ok(None);
        };
        let tenant =
            with_deadline(STORE, self.timeout(), self.store.tenants().get_by_id(tenant_id)).await?;
        if !tenant.is_active() {
            return Err(GatehouseError::TenantInactive { tenant_id });
        }
        Ok(Some(tenant))
    }

    /// TOTP codes are checked against the decrypted secret; anything
    /// else is looked up among the user's unspent recovery codes.
    async fn check_second_factor(
        &self,
        user: &User,
        code: &str,
    ) -> GatehouseResult<Option<SecondFactor>> {
        let code = code.trim();
        if totp::looks_like_totp(code) {
            let Some(secret) = &user.mfa_secret else {
                return Ok(None);
            };
            let bytes = totp::decrypt_secret(self.encryption_key()?, secret)?;
            let valid = totp::verify_code(&bytes, code, &self.config.totp_issuer, &user.email)?;
            return Ok(valid.then_some(SecondFactor::Totp));
        }

        let hash = totp::hash_recovery_code(code);
        Ok(user
            .recovery_code_hashes
            .contains(&hash)
            .then_some(SecondFactor::RecoveryCode(hash)))
    }

    // -------------------------------------------------------------------
    // Enrollment and credential rotation
    // -------------------------------------------------------------------

    /// Generate a TOTP secret and park it, encrypted, in the user's
    /// capability state until a first code confirms it.
    #[instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn begin_totp_enrollment(&self, principal: &Principal) -> GatehouseResult<TotpSetup> {
        let key = self.encryption_key()?;
        self.evaluator
            .require_available(principal.tenant_id, MFA_CAPABILITY)
            .await?;

        let user = self
            .store
            .users()
            .get_by_id(principal.tenant_id, principal.user_id)
            .await?;
        if user.mfa_enabled {
            return Err(GatehouseError::AlreadyExists {
                entity: "mfa enrollment".into(),
            });
        }

        let enrollment = totp::generate_enrollment(&self.config.totp_issuer, &user.email)?;
        let pending = totp::encrypt_secret(key, &enrollment.secret_bytes)?;
        self.evaluator
            .enroll_user(
                principal.tenant_id,
                UpsertUserCapabilityState {
                    user_id: user.id,
                    key: MFA_CAPABILITY.into(),
                    enrolled: false,
                    state: json!({ "pending_secret": pending }),
                },
            )
            .await?;

        info!("TOTP enrollment started");
        Ok(TotpSetup {
            secret_base32: enrollment.secret_base32,
            otpauth_uri: enrollment.otpauth_uri,
        })
    }

    /// Confirm enrollment with a first valid code. Returns the recovery
    /// codes in plain text; only their hashes are kept.
    #[instrument(skip(self, code), fields(user_id = %principal.user_id))]
    pub async fn confirm_totp_enrollment(
        &self,
        principal: &Principal,
        code: &str,
    ) -> GatehouseResult<Vec<String>> {
        let key = self.encryption_key()?;
        let state = self
            .evaluator
            .user_state(principal.user_id, MFA_CAPABILITY)
            .await?
            .ok_or_else(|| GatehouseError::validation("no TOTP enrollment in progress"))?;
        let pending = state
            .state
            .get("pending_secret")
            .and_then(Value::as_str)
            .ok_or_else(|| GatehouseError::validation("no TOTP enrollment in progress"))?
            .to_string();

        let user = self
            .store
            .users()
            .get_by_id(principal.tenant_id, principal.user_id)
            .await?;
        let secret = totp::decrypt_secret(key, &pending)?;
        if !totp::verify_code(&secret, code.trim(), &self.config.totp_issuer, &user.email)? {
            return Err(GatehouseError::InvalidMfaCode);
        }

        let codes = totp::generate_recovery_codes(self.config.recovery_code_count);
        let hashes = codes.iter().map(|c| totp::hash_recovery_code(c)).collect();
        self.store
            .users()
            .update(
                principal.tenant_id,
                user.id,
                UpdateUser {
                    mfa_enabled: Some(true),
                    mfa_secret: Some(Some(pending)),
                    recovery_code_hashes: Some(hashes),
                    ..Default::default()
                },
            )
            .await?;
        self.evaluator
            .enroll_user(
                principal.tenant_id,
                UpsertUserCapabilityState {
                    user_id: user.id,
                    key: MFA_CAPABILITY.into(),
                    enrolled: true,
                    state: json!({}),
                },
            )
            .await?;
        record(
            &self.store,
            principal,
            principal.tenant_id,
            "mfa.enrolled",
            Some(user.id),
            json!({ "method": "totp" }),
        )
        .await?;

        info!("TOTP enrollment confirmed");
        Ok(codes)
    }

    /// Rotate a password and revoke every token issued under the old one.
    #[instrument(skip(self, current, new), fields(user_id = %principal.user_id))]
    pub async fn change_password(
        &self,
        principal: &Principal,
        current: &str,
        new: &str,
    ) -> GatehouseResult<()> {
        let t = self.timeout();
        let user = with_deadline(
            STORE,
            t,
            self.store.users().get_by_id(principal.tenant_id, principal.user_id),
        )
        .await?;
        let tenant = self.active_tenant(user.tenant_id).await?;

        let valid = with_deadline(STORE, t, self.store.users().verify_password(user.id, current))
            .await?;
        if !valid {
            return Err(GatehouseError::InvalidCredentials);
        }

        let min_length = self
            .tokens
            .settings_for(tenant.as_ref())
            .password_min_length
            .max(self.config.limits.min_password_length);
        if new.chars().count() < min_length {
            return Err(GatehouseError::validation(format!(
                "password must be at least {min_length} characters"
            )));
        }
        if new == current {
            return Err(GatehouseError::validation(
                "new password must differ from the current one",
            ));
        }

        with_deadline(STORE, t, self.store.users().set_password(user.id, new)).await?;
        self.tokens
            .revoke_all_for_user(user.id, user.tenant_id, "password changed")
            .await?;
        record(
            &self.store,
            principal,
            user.tenant_id,
            "password.changed",
            Some(user.id),
            Value::Null,
        )
        .await?;

        info!("password changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lockout_uses_the_base_duration() {
        assert_eq!(lockout_duration(300, 0, 2.0, 3_600).num_seconds(), 300);
    }

    #[test]
    fn repeated_lockouts_back_off_up_to_the_cap() {
        assert_eq!(lockout_duration(300, 1, 2.0, 3_600).num_seconds(), 600);
        assert_eq!(lockout_duration(300, 3, 2.0, 3_600).num_seconds(), 2_400);
        assert_eq!(lockout_duration(300, 4, 2.0, 3_600).num_seconds(), 3_600);
        assert_eq!(lockout_duration(300, u32::MAX, 2.0, 3_600).num_seconds(), 3_600);
    }

    #[test]
    fn multipliers_below_one_do_not_shrink_the_lock() {
        assert_eq!(lockout_duration(300, 5, 0.5, 3_600).num_seconds(), 300);
    }
}
