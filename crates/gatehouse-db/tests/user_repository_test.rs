//! Integration tests for the user repository and credential store.

use chrono::{Duration, Utc};
use gatehouse_core::GatehouseError;
use gatehouse_core::models::tenant::CreateTenant;
use gatehouse_core::models::user::{CreateUser, PrincipalKind, UpdateUser, UserStatus};
use gatehouse_core::repository::{CredentialStore, TenantRepository, UserRepository};
use gatehouse_db::repository::{SurrealTenantRepository, SurrealUserRepository};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> (Surreal<Db>, Uuid) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    gatehouse_db::run_migrations(&db).await.unwrap();

    let tenant = SurrealTenantRepository::new(db.clone())
        .create(CreateTenant {
            domain: "acme.test".into(),
            name: "ACME".into(),
            settings: None,
        })
        .await
        .unwrap();

    (db, tenant.id)
}

fn tenant_user(tenant_id: Uuid, username: &str, email: &str) -> CreateUser {
    CreateUser {
        kind: PrincipalKind::Tenant,
        tenant_id: Some(tenant_id),
        username: username.into(),
        email: email.into(),
        password: "correct horse battery".into(),
        status: Some(UserStatus::Active),
    }
}

#[tokio::test]
async fn create_and_lookup_within_plane() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);

    let user = repo
        .create(tenant_user(tenant_id, "alice", "Alice@Example.com"))
        .await
        .unwrap();
    assert_eq!(user.tenant_id, Some(tenant_id));
    assert_eq!(user.kind, PrincipalKind::Tenant);
    assert!(user.password_hash.starts_with("$argon2id$"));

    let by_email = repo
        .get_by_email(Some(tenant_id), "alice@example.COM")
        .await
        .unwrap();
    assert_eq!(by_email.id, user.id);

    let by_name = repo
        .get_by_username(Some(tenant_id), "alice")
        .await
        .unwrap();
    assert_eq!(by_name.id, user.id);

    // Not visible from the system plane.
    let err = repo.get_by_id(None, user.id).await.unwrap_err();
    assert!(matches!(err, GatehouseError::NotFound { .. }));
}

#[tokio::test]
async fn system_principals_live_in_their_own_plane() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);

    let root = repo
        .create(CreateUser {
            kind: PrincipalKind::System,
            tenant_id: None,
            username: "root".into(),
            email: "root@platform.test".into(),
            password: "correct horse battery".into(),
            status: Some(UserStatus::Active),
        })
        .await
        .unwrap();
    assert_eq!(root.tenant_id, None);

    assert!(repo.get_by_username(None, "root").await.is_ok());
    assert!(repo.get_by_username(Some(tenant_id), "root").await.is_err());
}

#[tokio::test]
async fn system_principal_with_tenant_id_is_rejected() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);

    let err = repo
        .create(CreateUser {
            kind: PrincipalKind::System,
            tenant_id: Some(tenant_id),
            username: "root".into(),
            email: "root@platform.test".into(),
            password: "correct horse battery".into(),
            status: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));
}

#[tokio::test]
async fn email_uniqueness_is_case_insensitive() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);

    repo.create(tenant_user(tenant_id, "alice", "alice@example.com"))
        .await
        .unwrap();
    let err = repo
        .create(tenant_user(tenant_id, "alice2", "ALICE@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::AlreadyExists { .. }));
}

#[tokio::test]
async fn password_verification_uses_pepper() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::with_pepper(db, "pepper!".into());

    let user = repo
        .create(tenant_user(tenant_id, "alice", "alice@example.com"))
        .await
        .unwrap();
    assert!(repo.verify_password(user.id, "correct horse battery").await.unwrap());
    assert!(!repo.verify_password(user.id, "wrong").await.unwrap());

    repo.set_password(user.id, "a brand new passphrase").await.unwrap();
    assert!(repo.verify_password(user.id, "a brand new passphrase").await.unwrap());
    assert!(!repo.verify_password(user.id, "correct horse battery").await.unwrap());
}

#[tokio::test]
async fn failed_attempts_count_up_and_reset() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);
    let user = repo
        .create(tenant_user(tenant_id, "alice", "alice@example.com"))
        .await
        .unwrap();

    for expected in 1..=3 {
        assert_eq!(repo.increment_failed_attempts(user.id).await.unwrap(), expected);
    }

    repo.reset_failed_attempts(user.id).await.unwrap();
    let user = repo.get_by_id(Some(tenant_id), user.id).await.unwrap();
    assert_eq!(user.failed_login_attempts, 0);
}

#[tokio::test]
async fn lock_is_idempotent_and_unlock_clears_state() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);
    let user = repo
        .create(tenant_user(tenant_id, "alice", "alice@example.com"))
        .await
        .unwrap();

    let until = Utc::now() + Duration::minutes(5);
    repo.set_locked(user.id, until).await.unwrap();
    repo.set_locked(user.id, until).await.unwrap();

    let locked = repo.get_by_id(Some(tenant_id), user.id).await.unwrap();
    assert_eq!(locked.status, UserStatus::Locked);
    assert_eq!(locked.lockout_count, 1);
    assert!(locked.locked_until.is_some());

    repo.unlock(user.id).await.unwrap();
    let unlocked = repo.get_by_id(Some(tenant_id), user.id).await.unwrap();
    assert_eq!(unlocked.status, UserStatus::Active);
    assert_eq!(unlocked.locked_until, None);
    assert_eq!(unlocked.failed_login_attempts, 0);
}

#[tokio::test]
async fn recovery_codes_are_single_use() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);
    let user = repo
        .create(tenant_user(tenant_id, "alice", "alice@example.com"))
        .await
        .unwrap();

    repo.update(
        Some(tenant_id),
        user.id,
        UpdateUser {
            recovery_code_hashes: Some(vec!["h1".into(), "h2".into()]),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(repo.consume_recovery_code(user.id, "h1").await.unwrap());
    assert!(!repo.consume_recovery_code(user.id, "h1").await.unwrap());
    assert!(!repo.consume_recovery_code(user.id, "nope").await.unwrap());

    let user = repo.get_by_id(Some(tenant_id), user.id).await.unwrap();
    assert_eq!(user.recovery_code_hashes, vec!["h2".to_string()]);
}

#[tokio::test]
async fn mfa_secret_can_be_set_and_cleared() {
    let (db, tenant_id) = setup().await;
    let repo = SurrealUserRepository::new(db);
    let user = repo
        .create(tenant_user(tenant_id, "alice", "alice@example.com"))
        .await
        .unwrap();

    let updated = repo
        .update(
            Some(tenant_id),
            user.id,
            UpdateUser {
                mfa_enabled: Some(true),
                mfa_secret: Some(Some("ciphertext".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.mfa_enabled);
    assert_eq!(updated.mfa_secret.as_deref(), Some("ciphertext"));

    let cleared = repo
        .update(
            Some(tenant_id),
            user.id,
            UpdateUser {
                mfa_enabled: Some(false),
                mfa_secret: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!cleared.mfa_enabled);
    assert_eq!(cleared.mfa_secret, None);
}
