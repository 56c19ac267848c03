//! Token lifecycle: lifetime resolution, issuance, refresh rotation,
//! revocation and validation.
//!
//! Revocation state lives in the ephemeral store: one entry per revoked
//! jti, kept exactly as long as the token would have been valid, plus
//! per-user and per-tenant "revoked before" markers for bulk
//! revocation. Any failure to read that state rejects the token.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gatehouse_core::deadline::with_deadline;
use gatehouse_core::ephemeral::{EphemeralStore, keys};
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::events::{DomainEvent, EventKind, EventSink};
use gatehouse_core::models::session::CreateRefreshToken;
use gatehouse_core::models::tenant::{SystemLimits, Tenant, TenantSettings};
use gatehouse_core::models::user::{User, UserStatus};
use gatehouse_core::repository::{
    RefreshTokenRepository, Repositories, TenantRepository, UserRepository,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::claims::{ClaimSet, ClaimsBuilder};
use crate::config::AuthConfig;
use crate::signer::{TokenKind, TokenSigner, VerifiedToken};

/// Tenant named by a token of any kind; `None` on the system plane.
fn token_tenant(verified: &VerifiedToken) -> Option<Uuid> {
    verified
        .claims
        .get("tenant_id")
        .and_then(Value::as_str)
        .and_then(|id| id.parse().ok())
}

const STORE: &str = "persistent store";
const EPHEMERAL: &str = "ephemeral store";
const SIGNER: &str = "token signer";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifetimes {
    pub access: Duration,
    pub refresh: Duration,
    pub id: Duration,
}

/// Each lifetime is the tenant's value, capped by the system maximum.
pub fn resolve_lifetimes(
    settings: &TenantSettings,
    limits: &SystemLimits,
    remember_me: bool,
) -> Lifetimes {
    let capped = |value: u64, cap: u64| Duration::from_secs(value.min(cap));
    let id = capped(settings.id_token_ttl_secs, limits.max_id_token_ttl_secs);
    if remember_me {
        Lifetimes {
            access: capped(
                settings.remember_me_access_token_ttl_secs,
                limits.max_remember_me_access_token_ttl_secs,
            ),
            refresh: capped(
                settings.remember_me_refresh_token_ttl_secs,
                limits.max_remember_me_refresh_token_ttl_secs,
            ),
            id,
        }
    } else {
        Lifetimes {
            access: capped(settings.access_token_ttl_secs, limits.max_access_token_ttl_secs),
            refresh: capped(settings.refresh_token_ttl_secs, limits.max_refresh_token_ttl_secs),
            id,
        }
    }
}

/// Longest lifetime any token can have; bulk revocation markers must
/// outlive every token they cover.
fn longest_lifetime(limits: &SystemLimits) -> Duration {
    let secs = [
        limits.max_access_token_ttl_secs,
        limits.max_refresh_token_ttl_secs,
        limits.max_id_token_ttl_secs,
        limits.max_remember_me_access_token_ttl_secs,
        limits.max_remember_me_refresh_token_ttl_secs,
    ]
    .into_iter()
    .max()
    .unwrap_or_default();
    Duration::from_secs(secs)
}

/// A marker holds the millisecond timestamp of the bulk revocation.
/// Anything unreadable counts as revoked.
fn revoked_by_marker(marker: Option<&str>, issued_at: DateTime<Utc>) -> bool {
    match marker {
        None => false,
        Some(raw) => raw
            .parse::<i64>()
            .map_or(true, |cutoff| issued_at.timestamp_millis() <= cutoff),
    }
}

pub(crate) fn ensure_active(user: &User) -> GatehouseResult<()> {
    match user.status {
        UserStatus::Active => Ok(()),
        UserStatus::Locked => Err(GatehouseError::AccountLocked {
            until: user.locked_until,
        }),
        other => Err(GatehouseError::AccountInactive {
            status: other.as_str().to_lowercase(),
        }),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
    pub refresh_expires_in: u64,
    pub amr: Vec<String>,
}

/// An access token that passed signature, expiry and revocation checks.
#[derive(Debug, Clone)]
pub struct ValidatedAccess {
    pub subject: Uuid,
    pub jti: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claims: ClaimSet,
}

pub struct TokenManager<S: Repositories, E: EphemeralStore, K: TokenSigner> {
    store: S,
    ephemeral: E,
    signer: Arc<K>,
    claims: ClaimsBuilder<S>,
    events: Arc<dyn EventSink>,
    config: Arc<AuthConfig>,
}

impl<S: Repositories, E: EphemeralStore + Clone, K: TokenSigner> Clone for TokenManager<S, E, K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ephemeral: self.ephemeral.clone(),
            signer: Arc::clone(&self.signer),
            claims: self.claims.clone(),
            events: Arc::clone(&self.events),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: Repositories, E: EphemeralStore, K: TokenSigner> TokenManager<S, E, K> {
    pub fn new(
        store: S,
        ephemeral: E,
        signer: Arc<K>,
        claims: ClaimsBuilder<S>,
        events: Arc<dyn EventSink>,
        config: Arc<AuthConfig>,
    ) -> Self {
        Self {
            store,
            ephemeral,
            signer,
            claims,
            events,
            config,
        }
    }

    fn timeout(&self) -> Duration {
        self.config.dependency_timeout()
    }

    /// Policy in force for a principal: its tenant's settings, or the
    /// system settings for system principals.
    pub fn settings_for<'a>(&'a self, tenant: Option<&'a Tenant>) -> &'a TenantSettings {
        tenant.map_or(&self.config.system_settings, |t| &t.settings)
    }

    pub fn lifetimes(&self, tenant: Option<&Tenant>, remember_me: bool) -> Lifetimes {
        resolve_lifetimes(self.settings_for(tenant), &self.config.limits, remember_me)
    }

    /// Sign a fresh access/refresh/ID triple and persist the refresh
    /// record.
    #[instrument(skip_all, fields(user_id = %user.id, mfa_verified = mfa_verified))]
    pub async fn issue(
        &self,
        user: &User,
        tenant: Option<&Tenant>,
        mfa_verified: bool,
        remember_me: bool,
        parent_jti: Option<Uuid>,
    ) -> GatehouseResult<IssuedTokens> {
        let t = self.timeout();
        let lifetimes = self.lifetimes(tenant, remember_me);
        let claims = with_deadline(STORE, t, self.claims.build(&user.principal(), mfa_verified))
            .await?;

        let mut refresh_claims = Map::new();
        let mut id_claims = Map::new();
        if let Some(tenant_id) = user.tenant_id {
            refresh_claims.insert("tenant_id".into(), json!(tenant_id));
            id_claims.insert("tenant_id".into(), json!(tenant_id));
        }
        id_claims.insert("preferred_username".into(), json!(user.username));
        id_claims.insert("email".into(), json!(user.email));
        id_claims.insert("amr".into(), json!(claims.amr));

        let access = with_deadline(
            SIGNER,
            t,
            self.signer
                .sign(TokenKind::Access, user.id, lifetimes.access, claims.to_map()?),
        )
        .await?;
        let refresh = with_deadline(
            SIGNER,
            t,
            self.signer
                .sign(TokenKind::Refresh, user.id, lifetimes.refresh, refresh_claims),
        )
        .await?;
        let id = with_deadline(
            SIGNER,
            t,
            self.signer.sign(TokenKind::Id, user.id, lifetimes.id, id_claims),
        )
        .await?;

        with_deadline(
            STORE,
            t,
            self.store.refresh_tokens().create(CreateRefreshToken {
                jti: refresh.jti,
                user_id: user.id,
                tenant_id: user.tenant_id,
                expires_at: refresh.expires_at,
                parent_jti,
                mfa_verified,
                remember_me,
            }),
        )
        .await?;

        self.events.emit(
            DomainEvent::new(EventKind::TokenIssued, user.tenant_id, Some(user.id)).with_detail(
                json!({
                    "access_jti": access.jti,
                    "refresh_jti": refresh.jti,
                    "mfa_verified": mfa_verified,
                    "rotated_from": parent_jti,
                }),
            ),
        );
        info!(access_jti = %access.jti, refresh_jti = %refresh.jti, "tokens issued");

        Ok(IssuedTokens {
            access_token: access.token,
            refresh_token: refresh.token,
            id_token: id.token,
            token_type: "Bearer",
            expires_in: lifetimes.access.as_secs(),
            refresh_expires_in: lifetimes.refresh.as_secs(),
            amr: claims.amr,
        })
    }

    async fn verify(&self, token: &str, expected: TokenKind) -> GatehouseResult<VerifiedToken> {
        let verified = with_deadline(SIGNER, self.timeout(), self.signer.verify(token)).await?;
        if verified.kind != expected {
            return Err(GatehouseError::InvalidSignature(format!(
                "expected a {expected:?} token"
            )));
        }
        Ok(verified)
    }

    /// Reject a token found in the revocation index or issued before a
    /// bulk revocation of its user or tenant.
    async fn ensure_not_revoked(
        &self,
        token: &VerifiedToken,
        tenant_id: Option<Uuid>,
    ) -> GatehouseResult<()> {
        let t = self.timeout();
        let entry = with_deadline(EPHEMERAL, t, self.ephemeral.get(&keys::revoked_token(token.jti)))
            .await?;
        if entry.is_some() {
            return Err(GatehouseError::TokenRevoked);
        }

        let user_marker = with_deadline(
            EPHEMERAL,
            t,
            self.ephemeral.get(&keys::revoked_before_user(token.subject)),
        )
        .await?;
        if revoked_by_marker(user_marker.as_deref(), token.issued_at) {
            return Err(GatehouseError::TokenRevoked);
        }

        if let Some(tenant_id) = tenant_id {
            let tenant_marker = with_deadline(
                EPHEMERAL,
                t,
                self.ephemeral.get(&keys::revoked_before_tenant(tenant_id)),
            )
            .await?;
            if revoked_by_marker(tenant_marker.as_deref(), token.issued_at) {
                return Err(GatehouseError::TokenRevoked);
            }
        }
        Ok(())
    }

    /// Verify an access token and return its claims.
    pub async fn validate_access_token(&self, token: &str) -> GatehouseResult<ValidatedAccess> {
        let verified = self.verify(token, TokenKind::Access).await?;
        let claims = ClaimSet::from_map(verified.claims.clone())?;
        self.ensure_not_revoked(&verified, claims.tenant_id).await?;

        Ok(ValidatedAccess {
            subject: verified.subject,
            jti: verified.jti,
            issued_at: verified.issued_at,
            expires_at: verified.expires_at,
            claims,
        })
    }

    /// Exchange a refresh token for a new pair. The presented token is
    /// consumed; of several concurrent calls with the same token at most
    /// one succeeds.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> GatehouseResult<IssuedTokens> {
        let t = self.timeout();
        let verified = self.verify(refresh_token, TokenKind::Refresh).await?;

        let record = match with_deadline(STORE, t, self.store.refresh_tokens().get(verified.jti))
            .await
        {
            Ok(record) => record,
            Err(GatehouseError::NotFound { .. }) => return Err(GatehouseError::TokenRevoked),
            Err(e) => return Err(e),
        };
        self.ensure_not_revoked(&verified, record.tenant_id).await?;
        if record.revoked_at.is_some() {
            warn!(jti = %record.jti, user_id = %record.user_id, "revoked refresh token presented");
            return Err(GatehouseError::TokenRevoked);
        }
        if record.expires_at <= Utc::now() {
            return Err(GatehouseError::TokenExpired);
        }

        let user = match with_deadline(
            STORE,
            t,
            self.store.users().get_by_id(record.tenant_id, record.user_id),
        )
        .await
        {
            Ok(user) => user,
            Err(GatehouseError::NotFound { .. }) => return Err(GatehouseError::TokenRevoked),
            Err(e) => return Err(e),
        };
        ensure_active(&user)?;

        let tenant = match record.tenant_id {
            Some(tenant_id) => {
                let tenant =
                    with_deadline(STORE, t, self.store.tenants().get_by_id(tenant_id)).await?;
                if !tenant.is_active() {
                    return Err(GatehouseError::TenantInactive { tenant_id });
                }
                Some(tenant)
            }
            None => None,
        };

        if user.mfa_enabled && !record.mfa_verified {
            warn!(user_id = %user.id, jti = %record.jti, "refresh without MFA denied");
            return Err(GatehouseError::MfaNotVerified);
        }

        let won = with_deadline(STORE, t, self.store.refresh_tokens().mark_revoked(record.jti))
            .await?;
        if !won {
            return Err(GatehouseError::TokenRevoked);
        }

        self.issue(
            &user,
            tenant.as_ref(),
            record.mfa_verified,
            record.remember_me,
            Some(record.jti),
        )
        .await
    }

    /// Revoke a single token. The signature is checked before anything
    /// is written; an already expired token needs no entry.
    #[instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> GatehouseResult<()> {
        let t = self.timeout();
        let verified = match with_deadline(SIGNER, t, self.signer.verify(token)).await {
            Ok(verified) => verified,
            Err(GatehouseError::TokenExpired) => return Ok(()),
            Err(e) => return Err(e),
        };

        let remaining = (verified.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Ok(());
        }

        with_deadline(
            EPHEMERAL,
            t,
            self.ephemeral.set(
                &keys::revoked_token(verified.jti),
                Utc::now().to_rfc3339(),
                remaining,
            ),
        )
        .await?;
        if verified.kind == TokenKind::Refresh {
            with_deadline(STORE, t, self.store.refresh_tokens().mark_revoked(verified.jti))
                .await?;
        }

        self.events.emit(
            DomainEvent::new(
                EventKind::TokenRevoked,
                token_tenant(&verified),
                Some(verified.subject),
            )
            .with_detail(json!({ "jti": verified.jti, "kind": verified.kind })),
        );
        info!(jti = %verified.jti, "token revoked");
        Ok(())
    }

    /// Invalidate every token issued to a user so far.
    #[instrument(skip(self))]
    pub async fn revoke_all_for_user(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        reason: &str,
    ) -> GatehouseResult<usize> {
        let t = self.timeout();
        with_deadline(
            EPHEMERAL,
            t,
            self.ephemeral.set(
                &keys::revoked_before_user(user_id),
                Utc::now().timestamp_millis().to_string(),
                longest_lifetime(&self.config.limits),
            ),
        )
        .await?;
        let revoked =
            with_deadline(STORE, t, self.store.refresh_tokens().revoke_all_for_user(user_id))
                .await?;

        self.events.emit(
            DomainEvent::new(EventKind::TokenRevoked, tenant_id, Some(user_id)).with_detail(
                json!({ "scope": "user", "reason": reason, "refresh_tokens": revoked.len() }),
            ),
        );
        info!(%user_id, reason, refresh_tokens = revoked.len(), "all user tokens revoked");
        Ok(revoked.len())
    }

    /// Invalidate every token issued within a tenant so far.
    #[instrument(skip(self))]
    pub async fn revoke_all_for_tenant(&self, tenant_id: Uuid, reason: &str) -> GatehouseResult<()> {
        with_deadline(
            EPHEMERAL,
            self.timeout(),
            self.ephemeral.set(
                &keys::revoked_before_tenant(tenant_id),
                Utc::now().timestamp_millis().to_string(),
                longest_lifetime(&self.config.limits),
            ),
        )
        .await?;

        self.events.emit(
            DomainEvent::new(EventKind::TokenRevoked, Some(tenant_id), None)
                .with_detail(json!({ "scope": "tenant", "reason": reason })),
        );
        warn!(%tenant_id, reason, "all tenant tokens revoked");
        Ok(())
    }

    /// Drop refresh records past their expiry.
    pub async fn purge_expired_records(&self) -> GatehouseResult<u64> {
        with_deadline(STORE, self.timeout(), self.store.refresh_tokens().delete_expired()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn lifetimes_never_exceed_caps() {
        let limits = SystemLimits {
            max_access_token_ttl_secs: 600,
            ..Default::default()
        };
        let settings = TenantSettings {
            access_token_ttl_secs: 900,
            refresh_token_ttl_secs: 3_600,
            ..Default::default()
        };
        let lifetimes = resolve_lifetimes(&settings, &limits, false);
        assert_eq!(lifetimes.access, Duration::from_secs(600));
        assert_eq!(lifetimes.refresh, Duration::from_secs(3_600));
    }

    #[test]
    fn remember_me_uses_its_own_variants() {
        let settings = TenantSettings::default();
        let limits = SystemLimits::default();
        let normal = resolve_lifetimes(&settings, &limits, false);
        let remembered = resolve_lifetimes(&settings, &limits, true);
        assert_eq!(
            remembered.access,
            Duration::from_secs(settings.remember_me_access_token_ttl_secs)
        );
        assert_eq!(
            remembered.refresh,
            Duration::from_secs(settings.remember_me_refresh_token_ttl_secs)
        );
        assert_eq!(normal.id, remembered.id);
    }

    #[test]
    fn markers_cover_tokens_issued_up_to_the_cutoff() {
        let issued = Utc.timestamp_millis_opt(1_000).unwrap();
        assert!(!revoked_by_marker(None, issued));
        assert!(revoked_by_marker(Some("1000"), issued));
        assert!(revoked_by_marker(Some("2000"), issued));
        assert!(!revoked_by_marker(Some("999"), issued));
        assert!(revoked_by_marker(Some("garbage"), issued));
    }

    #[test]
    fn only_active_users_get_tokens() {
        let mut user = User {
            id: Uuid::new_v4(),
            kind: gatehouse_core::models::user::PrincipalKind::System,
            tenant_id: None,
            username: "root".into(),
            email: "root@example.com".into(),
            password_hash: String::new(),
            status: UserStatus::Active,
            mfa_enabled: false,
            mfa_secret: None,
            recovery_code_hashes: Vec::new(),
            failed_login_attempts: 0,
            locked_until: None,
            lockout_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(ensure_active(&user).is_ok());
        user.status = UserStatus::Disabled;
        assert!(matches!(
            ensure_active(&user),
            Err(GatehouseError::AccountInactive { .. })
        ));
        user.status = UserStatus::Locked;
        assert!(matches!(
            ensure_active(&user),
            Err(GatehouseError::AccountLocked { .. })
        ));
    }
}
