//! Security-weakening administrative actions. Each one is attributed to
//! an actor and audit-logged before it reports success.

use std::sync::Arc;

use gatehouse_authz::audit::{record, require_permission};
use gatehouse_authz::{CapabilityEvaluator, Provisioner};
use gatehouse_core::ephemeral::EphemeralStore;
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::events::{DomainEvent, EventKind, EventSink};
use gatehouse_core::models::capability::MFA_CAPABILITY;
use gatehouse_core::models::permission::predefined;
use gatehouse_core::models::tenant::Tenant;
use gatehouse_core::models::user::{Principal, UpdateUser};
use gatehouse_core::repository::{CredentialStore, Repositories, UserRepository};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::signer::TokenSigner;
use crate::tokens::TokenManager;

pub struct AccountAdmin<S: Repositories, E: EphemeralStore, K: TokenSigner> {
    store: S,
    evaluator: CapabilityEvaluator<S>,
    provisioner: Provisioner<S>,
    tokens: TokenManager<S, E, K>,
    events: Arc<dyn EventSink>,
}

impl<S: Repositories, E: EphemeralStore + Clone, K: TokenSigner> Clone for AccountAdmin<S, E, K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            evaluator: self.evaluator.clone(),
            provisioner: self.provisioner.clone(),
            tokens: self.tokens.clone(),
            events: Arc::clone(&self.events),
        }
    }
}

impl<S: Repositories, E: EphemeralStore, K: TokenSigner> AccountAdmin<S, E, K> {
    pub fn new(
        store: S,
        evaluator: CapabilityEvaluator<S>,
        provisioner: Provisioner<S>,
        tokens: TokenManager<S, E, K>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            evaluator,
            provisioner,
            tokens,
            events,
        }
    }

    /// Remove a principal's second factor and end all of its sessions.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn reset_mfa(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
    ) -> GatehouseResult<()> {
        require_permission(&self.store, actor, tenant_id, predefined::MFA_RESET).await?;
        let user = self.store.users().get_by_id(tenant_id, user_id).await?;

        self.store
            .users()
            .update(
                tenant_id,
                user.id,
                UpdateUser {
                    mfa_enabled: Some(false),
                    mfa_secret: Some(None),
                    recovery_code_hashes: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await?;
        self.evaluator.clear_user_state(user.id, MFA_CAPABILITY).await?;
        self.tokens
            .revoke_all_for_user(user.id, tenant_id, "mfa reset")
            .await?;
        record(
            &self.store,
            actor,
            tenant_id,
            "mfa.reset",
            Some(user.id),
            json!({ "username": user.username, "was_enabled": user.mfa_enabled }),
        )
        .await?;

        self.events.emit(
            DomainEvent::new(EventKind::MfaReset, tenant_id, Some(user.id))
                .with_actor(actor.user_id),
        );
        warn!(%user_id, "MFA reset");
        Ok(())
    }

    /// Lift a lockout before it expires.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn unlock_account(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
    ) -> GatehouseResult<()> {
        require_permission(&self.store, actor, tenant_id, predefined::USERS_UPDATE).await?;
        let user = self.store.users().get_by_id(tenant_id, user_id).await?;

        self.store.users().unlock(user.id).await?;
        record(
            &self.store,
            actor,
            tenant_id,
            "account.unlocked",
            Some(user.id),
            json!({ "locked_until": user.locked_until }),
        )
        .await?;

        info!(%user_id, "account unlocked");
        Ok(())
    }

    /// Suspend a tenant, revoking its tokens when the tenant asks for it.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn suspend_tenant(&self, actor: &Principal, tenant_id: Uuid) -> GatehouseResult<Tenant> {
        let tenant = self.provisioner.suspend_tenant(actor, tenant_id).await?;
        if tenant.settings.revoke_tokens_on_suspend {
            self.tokens
                .revoke_all_for_tenant(tenant_id, "tenant suspended")
                .await?;
        }
        Ok(tenant)
    }
}
