//! Integration tests for the four-layer capability evaluator.

use gatehouse_authz::capability::{NOT_ALLOWED, NOT_ENABLED, NOT_ENROLLED, NOT_SUPPORTED};
use gatehouse_authz::{CapabilityEvaluator, Provisioner};
use gatehouse_core::models::capability::{
    UpsertCapabilityGrant, UpsertSystemCapability, UpsertTenantFeature, UpsertUserCapabilityState,
};
use gatehouse_core::models::tenant::{CreateTenant, SystemLimits};
use gatehouse_core::models::user::{CreateUser, Principal, PrincipalKind, UserStatus};
use gatehouse_core::{CapabilityLayer, GatehouseError};
use gatehouse_db::SurrealRepositories;
use serde_json::{Value, json};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

const KEY: &str = "webauthn";

struct Fixture {
    evaluator: CapabilityEvaluator<SurrealRepositories<Db>>,
    provisioner: Provisioner<SurrealRepositories<Db>>,
    root: Principal,
    tenant_id: Uuid,
    user_id: Uuid,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    gatehouse_db::run_migrations(&db).await.unwrap();
    let repos = SurrealRepositories::new(db);

    let root = Principal {
        user_id: Uuid::new_v4(),
        kind: PrincipalKind::System,
        tenant_id: None,
    };
    let provisioner = Provisioner::new(repos.clone(), SystemLimits::default());
    let tenant = provisioner
        .create_tenant(
            &root,
            CreateTenant {
                domain: "acme.test".into(),
                name: "ACME".into(),
                settings: None,
            },
        )
        .await
        .unwrap();

    Fixture {
        evaluator: CapabilityEvaluator::new(repos),
        provisioner,
        root,
        tenant_id: tenant.id,
        user_id: Uuid::new_v4(),
    }
}

impl Fixture {
    /// First member of the tenant, who therefore holds the owner role.
    async fn owner(&self) -> Principal {
        self.provisioner
            .create_user(CreateUser {
                kind: PrincipalKind::Tenant,
                tenant_id: Some(self.tenant_id),
                username: "owner".into(),
                email: "owner@acme.test".into(),
                password: "correct horse battery".into(),
                status: Some(UserStatus::Active),
            })
            .await
            .unwrap()
            .principal()
    }

    async fn support(&self, enabled: bool, default_config: Value) {
        self.evaluator
            .set_system_capability(
                &self.root,
                UpsertSystemCapability {
                    key: KEY.into(),
                    enabled,
                    requires_enrollment: true,
                    default_config,
                },
            )
            .await
            .unwrap();
    }

    async fn grant(&self, enabled: bool, config: Value) -> Result<(), GatehouseError> {
        self.evaluator
            .grant_to_tenant(
                &self.root,
                UpsertCapabilityGrant {
                    tenant_id: self.tenant_id,
                    key: KEY.into(),
                    enabled,
                    config,
                },
            )
            .await
            .map(|_| ())
    }

    async fn feature(&self, enabled: bool, config: Value) -> Result<(), GatehouseError> {
        self.evaluator
            .set_tenant_feature(
                &self.root,
                UpsertTenantFeature {
                    tenant_id: self.tenant_id,
                    key: KEY.into(),
                    enabled,
                    config,
                },
            )
            .await
            .map(|_| ())
    }

    async fn enroll(&self) -> Result<(), GatehouseError> {
        self.evaluator
            .enroll_user(
                Some(self.tenant_id),
                UpsertUserCapabilityState {
                    user_id: self.user_id,
                    key: KEY.into(),
                    enrolled: true,
                    state: json!({}),
                },
            )
            .await
            .map(|_| ())
    }

    async fn reason(&self) -> Option<String> {
        self.evaluator
            .evaluate(Some(self.tenant_id), self.user_id, KEY)
            .await
            .unwrap()
            .reason
    }
}

#[tokio::test]
async fn layers_are_checked_in_order() {
    let f = setup().await;
    assert_eq!(f.reason().await.as_deref(), Some(NOT_SUPPORTED));

    f.support(true, json!({})).await;
    assert_eq!(f.reason().await.as_deref(), Some(NOT_ALLOWED));

    f.grant(true, json!({})).await.unwrap();
    assert_eq!(f.reason().await.as_deref(), Some(NOT_ENABLED));

    f.feature(true, json!({})).await.unwrap();
    let eval = f.evaluator.evaluate(Some(f.tenant_id), f.user_id, KEY).await.unwrap();
    assert_eq!(eval.reason.as_deref(), Some(NOT_ENROLLED));
    assert!(eval.supported && eval.allowed && eval.enabled);
    assert!(!eval.enrolled && !eval.can_use);

    f.enroll().await.unwrap();
    let eval = f.evaluator.evaluate(Some(f.tenant_id), f.user_id, KEY).await.unwrap();
    assert!(eval.can_use);
    assert_eq!(eval.reason, None);
}

#[tokio::test]
async fn lower_layers_cannot_elevate_a_denial() {
    let f = setup().await;
    f.support(true, json!({})).await;
    f.grant(true, json!({})).await.unwrap();
    f.feature(true, json!({})).await.unwrap();
    f.enroll().await.unwrap();
    assert!(f.reason().await.is_none());

    f.grant(false, json!({})).await.unwrap();
    let eval = f.evaluator.evaluate(Some(f.tenant_id), f.user_id, KEY).await.unwrap();
    assert!(!eval.can_use);
    assert_eq!(eval.denied_at, Some(CapabilityLayer::Allowed));
    assert!(!eval.enabled && !eval.enrolled);

    f.support(false, json!({})).await;
    let err = f
        .evaluator
        .require(Some(f.tenant_id), f.user_id, KEY)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatehouseError::CapabilityDenied { layer: CapabilityLayer::Supported, .. }
    ));
}

#[tokio::test]
async fn writes_respect_the_layer_above() {
    let f = setup().await;

    let err = f.grant(true, json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        GatehouseError::CapabilityDenied { layer: CapabilityLayer::Supported, .. }
    ));

    f.support(true, json!({})).await;
    let err = f.feature(true, json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        GatehouseError::CapabilityDenied { layer: CapabilityLayer::Allowed, .. }
    ));

    f.grant(true, json!({})).await.unwrap();
    let err = f.enroll().await.unwrap_err();
    assert!(matches!(
        err,
        GatehouseError::CapabilityDenied { layer: CapabilityLayer::Enabled, .. }
    ));
}

#[tokio::test]
async fn configuration_is_bounded_by_the_layer_above() {
    let f = setup().await;
    f.support(true, json!({ "max_devices": 5 })).await;

    let err = f.grant(true, json!({ "max_devices": 6 })).await.unwrap_err();
    assert!(matches!(err, GatehouseError::CapabilityBoundExceeded { .. }));
    f.grant(true, json!({ "max_devices": 3 })).await.unwrap();

    let err = f.feature(true, json!({ "max_devices": 4 })).await.unwrap_err();
    assert!(matches!(err, GatehouseError::CapabilityBoundExceeded { .. }));
    f.feature(true, json!({ "max_devices": 2 })).await.unwrap();

    let config = f
        .evaluator
        .effective_config(Some(f.tenant_id), KEY)
        .await
        .unwrap();
    assert_eq!(config, json!({ "max_devices": 2 }));
}

#[tokio::test]
async fn platform_defaults_cap_fields_the_grant_leaves_open() {
    let f = setup().await;
    f.support(true, json!({ "max_attempts": 5 })).await;
    f.grant(true, json!({})).await.unwrap();

    let err = f.feature(true, json!({ "max_attempts": 50 })).await.unwrap_err();
    assert!(matches!(
        err,
        GatehouseError::CapabilityBoundExceeded { ref field, .. } if field == "max_attempts"
    ));
    f.feature(true, json!({ "max_attempts": 5 })).await.unwrap();
}

#[tokio::test]
async fn system_principals_skip_tenant_layers() {
    let f = setup().await;
    f.support(true, json!({})).await;

    let eval = f.evaluator.evaluate(None, f.user_id, KEY).await.unwrap();
    assert!(eval.supported && eval.allowed && eval.enabled);
    assert_eq!(eval.reason.as_deref(), Some(NOT_ENROLLED));

    f.evaluator
        .enroll_user(
            None,
            UpsertUserCapabilityState {
                user_id: f.user_id,
                key: KEY.into(),
                enrolled: true,
                state: json!({}),
            },
        )
        .await
        .unwrap();
    assert!(f.evaluator.evaluate(None, f.user_id, KEY).await.unwrap().can_use);
}

#[tokio::test]
async fn clones_share_an_invalidated_cache() {
    let f = setup().await;
    let reader = f.evaluator.clone();

    assert_eq!(
        reader
            .evaluate(Some(f.tenant_id), f.user_id, KEY)
            .await
            .unwrap()
            .reason
            .as_deref(),
        Some(NOT_SUPPORTED)
    );
    f.support(true, json!({})).await;
    assert_eq!(
        reader
            .evaluate(Some(f.tenant_id), f.user_id, KEY)
            .await
            .unwrap()
            .reason
            .as_deref(),
        Some(NOT_ALLOWED)
    );
}

#[tokio::test]
async fn only_platform_principals_grant_capabilities() {
    let f = setup().await;
    f.support(true, json!({})).await;
    let tenant_admin = f.owner().await;

    let err = f
        .evaluator
        .grant_to_tenant(
            &tenant_admin,
            UpsertCapabilityGrant {
                tenant_id: f.tenant_id,
                key: KEY.into(),
                enabled: true,
                config: json!({}),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    f.grant(true, json!({})).await.unwrap();
    f.evaluator
        .set_tenant_feature(
            &tenant_admin,
            UpsertTenantFeature {
                tenant_id: f.tenant_id,
                key: KEY.into(),
                enabled: true,
                config: json!({}),
            },
        )
        .await
        .unwrap();
}
