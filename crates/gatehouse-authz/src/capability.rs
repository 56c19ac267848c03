//! Four-layer capability evaluation.
//!
//! A capability is usable only when every layer agrees, in order:
//! the platform supports it, the tenant was granted it, the tenant
//! turned it on, and (when required) the user enrolled. Each layer is
//! a pure function over what the store returned; the evaluator stops
//! at the first negative.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use gatehouse_core::error::{CapabilityLayer, GatehouseError, GatehouseResult};
use gatehouse_core::models::capability::{
    SystemCapability, TenantCapabilityGrant, TenantFeature, UpsertCapabilityGrant,
    UpsertSystemCapability, UpsertTenantFeature, UpsertUserCapabilityState, UserCapabilityState,
};
use gatehouse_core::models::permission::predefined;
use gatehouse_core::models::user::Principal;
use gatehouse_core::repository::{CapabilityRepository, Repositories};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::audit::{ensure_system_actor, record, require_permission};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

pub const NOT_SUPPORTED: &str = "not supported";
pub const NOT_ALLOWED: &str = "not allowed for tenant";
pub const NOT_ENABLED: &str = "not enabled by tenant";
pub const NOT_ENROLLED: &str = "user not enrolled";

/// Outcome of one evaluation, layer by layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityEvaluation {
    pub key: String,
    pub can_use: bool,
    pub reason: Option<String>,
    #[serde(skip)]
    pub denied_at: Option<CapabilityLayer>,
    pub supported: bool,
    pub allowed: bool,
    pub enabled: bool,
    pub enrolled: bool,
}

impl CapabilityEvaluation {
    fn start(key: &str) -> Self {
        Self {
            key: key.to_string(),
            can_use: false,
            reason: None,
            denied_at: None,
            supported: false,
            allowed: false,
            enabled: false,
            enrolled: false,
        }
    }

    fn apply(mut self, layer: CapabilityLayer, outcome: LayerOutcome) -> Self {
        match outcome {
            Ok(()) => {
                match layer {
                    CapabilityLayer::Supported => self.supported = true,
                    CapabilityLayer::Allowed => self.allowed = true,
                    CapabilityLayer::Enabled => self.enabled = true,
                    CapabilityLayer::Enrolled => self.enrolled = true,
                }
                self
            }
            Err(reason) => {
                self.reason = Some(reason.to_string());
                self.denied_at = Some(layer);
                self
            }
        }
    }

    fn is_denied(&self) -> bool {
        self.denied_at.is_some()
    }

    /// The denial as an error, if there is one.
    pub fn into_result(self) -> GatehouseResult<Self> {
        match self.denied_at {
            Some(layer) => Err(GatehouseError::CapabilityDenied {
                layer,
                reason: self.reason.unwrap_or_default(),
            }),
            None => Ok(self),
        }
    }
}

/// `Err` carries the human-readable reason for the denial.
pub type LayerOutcome = Result<(), &'static str>;

pub fn check_supported(system: Option<&SystemCapability>) -> LayerOutcome {
    match system {
        Some(s) if s.enabled => Ok(()),
        _ => Err(NOT_SUPPORTED),
    }
}

pub fn check_allowed(grant: Option<&TenantCapabilityGrant>) -> LayerOutcome {
    match grant {
        Some(g) if g.enabled => Ok(()),
        _ => Err(NOT_ALLOWED),
    }
}

pub fn check_enabled(feature: Option<&TenantFeature>) -> LayerOutcome {
    match feature {
        Some(f) if f.enabled => Ok(()),
        _ => Err(NOT_ENABLED),
    }
}

pub fn check_enrolled(
    system: &SystemCapability,
    state: Option<&UserCapabilityState>,
) -> LayerOutcome {
    if !system.requires_enrollment || state.is_some_and(|s| s.enrolled) {
        Ok(())
    } else {
        Err(NOT_ENROLLED)
    }
}

/// Reject a child configuration with a numeric field above the
/// parent's value for the same field. Nested objects are compared
/// field by field; fields absent from the parent are unbounded.
pub fn check_bounds(key: &str, parent: &Value, child: &Value) -> GatehouseResult<()> {
    walk_bounds(key, "", parent, child)
}

fn walk_bounds(key: &str, path: &str, parent: &Value, child: &Value) -> GatehouseResult<()> {
    let (Some(parent), Some(child)) = (parent.as_object(), child.as_object()) else {
        return Ok(());
    };
    for (field, child_value) in child {
        let Some(parent_value) = parent.get(field) else {
            continue;
        };
        let field_path = if path.is_empty() {
            field.clone()
        } else {
            format!("{path}.{field}")
        };
        match (child_value.as_f64(), parent_value.as_f64()) {
            (Some(c), Some(p)) if c > p => {
                return Err(GatehouseError::CapabilityBoundExceeded {
                    key: key.to_string(),
                    field: field_path,
                });
            }
            (Some(_), Some(_)) => {}
            _ => walk_bounds(key, &field_path, parent_value, child_value)?,
        }
    }
    Ok(())
}

/// Overlay `child` on `parent`, never letting a numeric field rise
/// above the parent's value.
pub fn narrow(parent: &Value, child: &Value) -> Value {
    match (parent.as_object(), child.as_object()) {
        (Some(p), Some(c)) => {
            let mut out = p.clone();
            for (field, child_value) in c {
                let merged = match p.get(field) {
                    Some(parent_value) => match (child_value.as_f64(), parent_value.as_f64()) {
                        (Some(cv), Some(pv)) if cv > pv => parent_value.clone(),
                        (Some(_), Some(_)) => child_value.clone(),
                        _ if parent_value.is_object() => narrow(parent_value, child_value),
                        _ => child_value.clone(),
                    },
                    None => child_value.clone(),
                };
                out.insert(field.clone(), merged);
            }
            Value::Object(out)
        }
        (Some(_), None) => parent.clone(),
        _ => child.clone(),
    }
}

/// Small expiring map for store lookups that are read far more often
/// than they are written.
struct TtlCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, V)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        if self.ttl.is_zero() {
            return None;
        }
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, value)| value.clone())
    }

    fn insert(&self, key: K, value: V) {
        if self.ttl.is_zero() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, (stored, _)| stored.elapsed() < self.ttl);
        entries.insert(key, (Instant::now(), value));
    }

    fn invalidate(&self, key: &K) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }
}

type TenantKey = (Uuid, String);

#[derive(Clone)]
pub struct CapabilityEvaluator<S: Repositories> {
    store: S,
    systems: Arc<TtlCache<String, Option<SystemCapability>>>,
    grants: Arc<TtlCache<TenantKey, Option<TenantCapabilityGrant>>>,
    features: Arc<TtlCache<TenantKey, Option<TenantFeature>>>,
}

impl<S: Repositories> CapabilityEvaluator<S> {
    pub fn new(store: S) -> Self {
        Self::with_cache_ttl(store, DEFAULT_CACHE_TTL)
    }

    /// A zero TTL disables caching.
    pub fn with_cache_ttl(store: S, ttl: Duration) -> Self {
        Self {
            store,
            systems: Arc::new(TtlCache::new(ttl)),
            grants: Arc::new(TtlCache::new(ttl)),
            features: Arc::new(TtlCache::new(ttl)),
        }
    }

    async fn system(&self, key: &str) -> GatehouseResult<Option<SystemCapability>> {
        let cache_key = key.to_string();
        if let Some(hit) = self.systems.get(&cache_key) {
            return Ok(hit);
        }
        let value = self.store.capabilities().get_system(key).await?;
        self.systems.insert(cache_key, value.clone());
        Ok(value)
    }

    async fn grant(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> GatehouseResult<Option<TenantCapabilityGrant>> {
        let cache_key = (tenant_id, key.to_string());
        if let Some(hit) = self.grants.get(&cache_key) {
            return Ok(hit);
        }
        let value = self.store.capabilities().get_grant(tenant_id, key).await?;
        self.grants.insert(cache_key, value.clone());
        Ok(value)
    }

    async fn feature(&self, tenant_id: Uuid, key: &str) -> GatehouseResult<Option<TenantFeature>> {
        let cache_key = (tenant_id, key.to_string());
        if let Some(hit) = self.features.get(&cache_key) {
            return Ok(hit);
        }
        let value = self.store.capabilities().get_feature(tenant_id, key).await?;
        self.features.insert(cache_key, value.clone());
        Ok(value)
    }

    /// Layers 1 to 3. Returns the system capability when they pass.
    async fn tenant_layers(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
    ) -> GatehouseResult<(CapabilityEvaluation, Option<SystemCapability>)> {
        let system = self.system(key).await?;
        let eval = CapabilityEvaluation::start(key)
            .apply(CapabilityLayer::Supported, check_supported(system.as_ref()));
        if eval.is_denied() {
            return Ok((eval, None));
        }

        let Some(tenant_id) = tenant_id else {
            // System principals have no tenant layers to fail.
            let eval = eval
                .apply(CapabilityLayer::Allowed, Ok(()))
                .apply(CapabilityLayer::Enabled, Ok(()));
            return Ok((eval, system));
        };

        let grant = self.grant(tenant_id, key).await?;
        let eval = eval.apply(CapabilityLayer::Allowed, check_allowed(grant.as_ref()));
        if eval.is_denied() {
            return Ok((eval, None));
        }

        let feature = self.feature(tenant_id, key).await?;
        let eval = eval.apply(CapabilityLayer::Enabled, check_enabled(feature.as_ref()));
        if eval.is_denied() {
            return Ok((eval, None));
        }
        Ok((eval, system))
    }

    /// Evaluate `key` for `user_id`, stopping at the first layer that
    /// says no.
    #[instrument(skip(self))]
    pub async fn evaluate(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
        key: &str,
    ) -> GatehouseResult<CapabilityEvaluation> {
        let (eval, system) = self.tenant_layers(tenant_id, key).await?;
        let Some(system) = system else {
            debug!(key, reason = ?eval.reason, "capability denied");
            return Ok(eval);
        };

        let state = if system.requires_enrollment {
            self.store.capabilities().get_user_state(user_id, key).await?
        } else {
            None
        };
        let mut eval = eval.apply(
            CapabilityLayer::Enrolled,
            check_enrolled(&system, state.as_ref()),
        );
        eval.can_use = !eval.is_denied();
        if !eval.can_use {
            debug!(key, reason = ?eval.reason, "capability denied");
        }
        Ok(eval)
    }

    /// Like [`evaluate`](Self::evaluate), but a denial is an error.
    pub async fn require(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
        key: &str,
    ) -> GatehouseResult<CapabilityEvaluation> {
        self.evaluate(tenant_id, user_id, key).await?.into_result()
    }

    /// Fail unless layers 1 to 3 pass. Used before enrollment, which by
    /// definition happens while layer 4 still says no.
    pub async fn require_available(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
    ) -> GatehouseResult<SystemCapability> {
        let (eval, system) = self.tenant_layers(tenant_id, key).await?;
        eval.into_result()?;
        system.ok_or_else(|| {
            GatehouseError::Internal(format!("capability {key} has no system definition"))
        })
    }

    /// Configuration in force for a tenant: the system default narrowed
    /// by the grant and then by the feature.
    pub async fn effective_config(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
    ) -> GatehouseResult<Value> {
        let system = self.require_available(tenant_id, key).await?;
        let Some(tenant_id) = tenant_id else {
            return Ok(system.default_config);
        };
        let mut config = system.default_config;
        if let Some(grant) = self.grant(tenant_id, key).await? {
            config = narrow(&config, &grant.config);
        }
        if let Some(feature) = self.feature(tenant_id, key).await? {
            config = narrow(&config, &feature.config);
        }
        Ok(config)
    }

    // -------------------------------------------------------------------
    // Administration
    // -------------------------------------------------------------------

    #[instrument(skip(self, input), fields(actor = %actor.user_id, key = %input.key))]
    pub async fn set_system_capability(
        &self,
        actor: &Principal,
        input: UpsertSystemCapability,
    ) -> GatehouseResult<SystemCapability> {
        ensure_system_actor(actor)?;
        validate_key(&input.key)?;
        validate_config(&input.default_config)?;

        let capability = self.store.capabilities().upsert_system(input).await?;
        self.systems.invalidate(&capability.key);
        record(
            &self.store,
            actor,
            None,
            "capability.system.updated",
            None,
            json!({ "key": capability.key, "enabled": capability.enabled }),
        )
        .await?;
        info!(key = %capability.key, enabled = capability.enabled, "system capability updated");
        Ok(capability)
    }

    /// Grant (or withdraw) a capability for a tenant.
    #[instrument(skip(self, input), fields(actor = %actor.user_id, key = %input.key))]
    pub async fn grant_to_tenant(
        &self,
        actor: &Principal,
        input: UpsertCapabilityGrant,
    ) -> GatehouseResult<TenantCapabilityGrant> {
        ensure_system_actor(actor)?;
        validate_key(&input.key)?;
        validate_config(&input.config)?;

        let system = self.store.capabilities().get_system(&input.key).await?;
        if input.enabled {
            check_supported(system.as_ref()).map_err(|reason| GatehouseError::CapabilityDenied {
                layer: CapabilityLayer::Supported,
                reason: reason.into(),
            })?;
        }
        if let Some(system) = &system {
            check_bounds(&input.key, &system.default_config, &input.config)?;
        }

        let grant = self.store.capabilities().upsert_grant(input).await?;
        self.grants.invalidate(&(grant.tenant_id, grant.key.clone()));
        record(
            &self.store,
            actor,
            Some(grant.tenant_id),
            "capability.grant.updated",
            None,
            json!({ "key": grant.key, "enabled": grant.enabled }),
        )
        .await?;
        info!(tenant_id = %grant.tenant_id, key = %grant.key, enabled = grant.enabled, "capability grant updated");
        Ok(grant)
    }

    /// Turn a granted capability on or off for the tenant.
    #[instrument(skip(self, input), fields(actor = %actor.user_id, key = %input.key))]
    pub async fn set_tenant_feature(
        &self,
        actor: &Principal,
        input: UpsertTenantFeature,
    ) -> GatehouseResult<TenantFeature> {
        require_permission(
            &self.store,
            actor,
            Some(input.tenant_id),
            predefined::SETTINGS_UPDATE,
        )
        .await?;
        validate_key(&input.key)?;
        validate_config(&input.config)?;

        let grant = self
            .store
            .capabilities()
            .get_grant(input.tenant_id, &input.key)
            .await?;
        if input.enabled {
            check_allowed(grant.as_ref()).map_err(|reason| GatehouseError::CapabilityDenied {
                layer: CapabilityLayer::Allowed,
                reason: reason.into(),
            })?;
        }
        // The grant may leave a field unset; the platform default still caps it.
        let system = self.store.capabilities().get_system(&input.key).await?;
        let ceiling = narrow(
            system.as_ref().map_or(&Value::Null, |s| &s.default_config),
            grant.as_ref().map_or(&Value::Null, |g| &g.config),
        );
        check_bounds(&input.key, &ceiling, &input.config)?;

        let feature = self.store.capabilities().upsert_feature(input).await?;
        self.features
            .invalidate(&(feature.tenant_id, feature.key.clone()));
        record(
            &self.store,
            actor,
            Some(feature.tenant_id),
            "capability.feature.updated",
            None,
            json!({ "key": feature.key, "enabled": feature.enabled }),
        )
        .await?;
        info!(tenant_id = %feature.tenant_id, key = %feature.key, enabled = feature.enabled, "tenant feature updated");
        Ok(feature)
    }

    /// Record a user's enrollment state. Only possible while the
    /// capability is available to the user's tenant.
    pub async fn enroll_user(
        &self,
        tenant_id: Option<Uuid>,
        input: UpsertUserCapabilityState,
    ) -> GatehouseResult<UserCapabilityState> {
        validate_key(&input.key)?;
        self.require_available(tenant_id, &input.key).await?;
        self.store.capabilities().upsert_user_state(input).await
    }

    pub async fn user_state(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> GatehouseResult<Option<UserCapabilityState>> {
        self.store.capabilities().get_user_state(user_id, key).await
    }

    pub async fn clear_user_state(&self, user_id: Uuid, key: &str) -> GatehouseResult<()> {
        self.store.capabilities().delete_user_state(user_id, key).await
    }

    /// Every capability the platform knows about, with its default
    /// configuration.
    pub async fn list_system(&self) -> GatehouseResult<Vec<SystemCapability>> {
        self.store.capabilities().list_system().await
    }
}

fn validate_key(key: &str) -> GatehouseResult<()> {
    if key.trim().is_empty() || key.contains(char::is_whitespace) {
        return Err(GatehouseError::validation(
            "capability key must be non-empty and contain no whitespace",
        ));
    }
    Ok(())
}

fn validate_config(config: &Value) -> GatehouseResult<()> {
    if config.is_object() || config.is_null() {
        Ok(())
    } else {
        Err(GatehouseError::validation(
            "capability configuration must be an object",
        ))
    }
}
