//! Wiring of every service over one store, one ephemeral store and one
//! signer.

use std::sync::Arc;

use gatehouse_authz::{CapabilityEvaluator, PermissionResolver, Provisioner};
use gatehouse_core::ephemeral::EphemeralStore;
use gatehouse_core::events::EventSink;
use gatehouse_core::repository::Repositories;

use crate::admin::AccountAdmin;
use crate::claims::ClaimsBuilder;
use crate::config::AuthConfig;
use crate::login::LoginOrchestrator;
use crate::signer::TokenSigner;
use crate::tokens::TokenManager;

/// Every service, sharing the capability cache and configuration.
pub struct AuthServices<S: Repositories, E: EphemeralStore, K: TokenSigner> {
    pub resolver: PermissionResolver<S>,
    pub evaluator: CapabilityEvaluator<S>,
    pub provisioner: Provisioner<S>,
    pub tokens: TokenManager<S, E, K>,
    pub login: LoginOrchestrator<S, E, K>,
    pub admin: AccountAdmin<S, E, K>,
}

impl<S: Repositories, E: EphemeralStore + Clone, K: TokenSigner> AuthServices<S, E, K> {
    pub fn new(
        store: S,
        ephemeral: E,
        signer: K,
        events: Arc<dyn EventSink>,
        config: AuthConfig,
    ) -> Self {
        let config = Arc::new(config);
        let resolver = PermissionResolver::new(store.clone(), Arc::clone(&events));
        let evaluator = CapabilityEvaluator::new(store.clone());
        let provisioner = Provisioner::new(store.clone(), config.limits.clone());
        let claims = ClaimsBuilder::new(
            resolver.clone(),
            evaluator.clone(),
            config.claims_size_warning_bytes,
        );
        let tokens = TokenManager::new(
            store.clone(),
            ephemeral.clone(),
            Arc::new(signer),
            claims,
            Arc::clone(&events),
            Arc::clone(&config),
        );
        let login = LoginOrchestrator::new(
            store.clone(),
            ephemeral,
            tokens.clone(),
            evaluator.clone(),
            Arc::clone(&events),
            config,
        );
        let admin = AccountAdmin::new(
            store,
            evaluator.clone(),
            provisioner.clone(),
            tokens.clone(),
            events,
        );

        Self {
            resolver,
            evaluator,
            provisioner,
            tokens,
            login,
            admin,
        }
    }
}
