//! Integration tests for tenant lifecycle and user provisioning.

use chrono::Duration;
use gatehouse_authz::Provisioner;
use gatehouse_core::GatehouseError;
use gatehouse_core::models::tenant::{CreateTenant, SystemLimits, TenantSettings, TenantStatus};
use gatehouse_core::models::user::{CreateUser, Principal, PrincipalKind, UserStatus};
use gatehouse_core::repository::{Repositories, UserRepository};
use gatehouse_db::SurrealRepositories;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

fn root() -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        kind: PrincipalKind::System,
        tenant_id: None,
    }
}

async fn setup() -> (SurrealRepositories<Db>, Provisioner<SurrealRepositories<Db>>) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    gatehouse_db::run_migrations(&db).await.unwrap();
    let repos = SurrealRepositories::new(db);
    let provisioner = Provisioner::new(repos.clone(), SystemLimits::default());
    (repos, provisioner)
}

fn acme() -> CreateTenant {
    CreateTenant {
        domain: "acme.test".into(),
        name: "ACME".into(),
        settings: None,
    }
}

fn member(tenant_id: Uuid, name: &str, password: &str) -> CreateUser {
    CreateUser {
        kind: PrincipalKind::Tenant,
        tenant_id: Some(tenant_id),
        username: name.into(),
        email: format!("{name}@acme.test"),
        password: password.into(),
        status: Some(UserStatus::Active),
    }
}

#[tokio::test]
async fn only_system_principals_create_tenants() {
    let (_, provisioner) = setup().await;
    let outsider = Principal {
        user_id: Uuid::new_v4(),
        kind: PrincipalKind::Tenant,
        tenant_id: Some(Uuid::new_v4()),
    };

    let err = provisioner.create_tenant(&outsider, acme()).await.unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    let tenant = provisioner.create_tenant(&root(), acme()).await.unwrap();
    assert_eq!(tenant.status, TenantStatus::Active);

    let err = provisioner.create_tenant(&root(), acme()).await.unwrap_err();
    assert!(matches!(err, GatehouseError::AlreadyExists { .. }));
}

#[tokio::test]
async fn tenant_settings_are_bounded_by_system_limits() {
    let (_, provisioner) = setup().await;
    let too_long = TenantSettings {
        refresh_token_ttl_secs: SystemLimits::default().max_refresh_token_ttl_secs + 1,
        ..Default::default()
    };

    let err = provisioner
        .create_tenant(
            &root(),
            CreateTenant {
                settings: Some(too_long.clone()),
                ..acme()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    let tenant = provisioner.create_tenant(&root(), acme()).await.unwrap();
    let err = provisioner
        .update_tenant_settings(&root(), tenant.id, too_long)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    let stricter = TenantSettings {
        mfa_required: true,
        password_min_length: 16,
        ..Default::default()
    };
    let updated = provisioner
        .update_tenant_settings(&root(), tenant.id, stricter)
        .await
        .unwrap();
    assert!(updated.settings.mfa_required);
    assert_eq!(updated.settings.password_min_length, 16);
}

#[tokio::test]
async fn user_creation_enforces_password_policy_and_scope() {
    let (_, provisioner) = setup().await;
    let tenant = provisioner.create_tenant(&root(), acme()).await.unwrap();

    let err = provisioner
        .create_user(member(tenant.id, "alice", "short"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    let err = provisioner
        .create_user(CreateUser {
            kind: PrincipalKind::System,
            ..member(tenant.id, "alice", "correct horse battery")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    let err = provisioner
        .create_user(member(Uuid::new_v4(), "alice", "correct horse battery"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::NotFound { .. }));

    provisioner
        .create_user(member(tenant.id, "alice", "correct horse battery"))
        .await
        .unwrap();
}

#[tokio::test]
async fn suspended_tenants_can_be_reactivated_but_deleted_ones_cannot() {
    let (_, provisioner) = setup().await;
    let tenant = provisioner.create_tenant(&root(), acme()).await.unwrap();

    let suspended = provisioner.suspend_tenant(&root(), tenant.id).await.unwrap();
    assert_eq!(suspended.status, TenantStatus::Suspended);
    let active = provisioner.reactivate_tenant(&root(), tenant.id).await.unwrap();
    assert_eq!(active.status, TenantStatus::Active);

    let deleted = provisioner.soft_delete_tenant(&root(), tenant.id).await.unwrap();
    assert_eq!(deleted.status, TenantStatus::Deleted);
    assert!(deleted.deleted_at.is_some());

    let err = provisioner
        .reactivate_tenant(&root(), tenant.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    let err = provisioner
        .create_user(member(tenant.id, "late", "correct horse battery"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::TenantInactive { .. }));
}

#[tokio::test]
async fn purge_removes_tenants_past_retention() {
    let (repos, provisioner) = setup().await;
    let tenant = provisioner.create_tenant(&root(), acme()).await.unwrap();
    let alice = provisioner
        .create_user(member(tenant.id, "alice", "correct horse battery"))
        .await
        .unwrap();

    // Active tenants are never purged.
    assert!(
        provisioner
            .purge_deleted_tenants(&root(), Duration::zero())
            .await
            .unwrap()
            .is_empty()
    );

    provisioner.soft_delete_tenant(&root(), tenant.id).await.unwrap();
    assert!(
        provisioner
            .purge_deleted_tenants(&root(), Duration::days(30))
            .await
            .unwrap()
            .is_empty()
    );

    let purged = provisioner
        .purge_deleted_tenants(&root(), Duration::zero())
        .await
        .unwrap();
    assert_eq!(purged, vec![tenant.id]);

    let err = provisioner.get_tenant(tenant.id).await.unwrap_err();
    assert!(matches!(err, GatehouseError::NotFound { .. }));
    let err = repos
        .users()
        .get_by_id(Some(tenant.id), alice.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::NotFound { .. }));
}
