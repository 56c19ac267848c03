//! Integration tests for tenant seeding and the permission resolver.

use std::collections::BTreeSet;
use std::sync::Arc;

use gatehouse_authz::initializer::PREDEFINED_PERMISSIONS;
use gatehouse_authz::{PermissionResolver, Provisioner, TenantInitializer};
use gatehouse_core::GatehouseError;
use gatehouse_core::events::{ChannelEventSink, EventKind};
use gatehouse_core::models::role::{ADMIN_ROLE, AUDITOR_ROLE, OWNER_ROLE, UpdateRole};
use gatehouse_core::models::tenant::{CreateTenant, SystemLimits, Tenant, TenantSettings};
use gatehouse_core::models::user::{CreateUser, Principal, PrincipalKind, User, UserStatus};
use gatehouse_core::repository::{
    AuditLogFilter, AuditLogRepository, PermissionRepository, Repositories, RoleRepository,
};
use gatehouse_db::SurrealRepositories;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

type Store = SurrealRepositories<Db>;

struct Fixture {
    repos: Store,
    resolver: PermissionResolver<Store>,
    provisioner: Provisioner<Store>,
    events: UnboundedReceiver<gatehouse_core::events::DomainEvent>,
    root: Principal,
    tenant: Tenant,
}

fn root() -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        kind: PrincipalKind::System,
        tenant_id: None,
    }
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    gatehouse_db::run_migrations(&db).await.unwrap();
    let repos = SurrealRepositories::new(db);

    let (sink, events) = ChannelEventSink::new();
    let resolver = PermissionResolver::new(repos.clone(), Arc::new(sink));
    let provisioner = Provisioner::new(repos.clone(), SystemLimits::default());
    let root = root();
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
        repos,
        resolver,
        provisioner,
        events,
        root,
        tenant,
    }
}

async fn tenant_user(f: &Fixture, name: &str) -> User {
    f.provisioner
        .create_user(CreateUser {
            kind: PrincipalKind::Tenant,
            tenant_id: Some(f.tenant.id),
            username: name.into(),
            email: format!("{name}@acme.test"),
            password: "correct horse battery".into(),
            status: Some(UserStatus::Active),
        })
        .await
        .unwrap()
}

async fn role_keys(f: &Fixture, name: &str) -> BTreeSet<String> {
    let role = f
        .repos
        .roles()
        .get_by_name(Some(f.tenant.id), name)
        .await
        .unwrap();
    f.repos
        .permissions()
        .get_role_permissions(role.id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.key)
        .collect()
}

#[tokio::test]
async fn new_tenant_gets_predefined_roles_and_first_user_becomes_owner() {
    let f = setup().await;

    let roles: BTreeSet<String> = f
        .repos
        .roles()
        .list(Some(f.tenant.id))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(
        roles,
        BTreeSet::from([OWNER_ROLE.into(), ADMIN_ROLE.into(), AUDITOR_ROLE.into()])
    );

    let permissions = f.repos.permissions().list(Some(f.tenant.id)).await.unwrap();
    assert_eq!(permissions.len(), 18);
    assert_eq!(role_keys(&f, OWNER_ROLE).await.len(), 18);

    let auditor = role_keys(&f, AUDITOR_ROLE).await;
    assert!(!auditor.is_empty());
    assert!(auditor.iter().all(|k| k.ends_with(".read")));

    let admin = role_keys(&f, ADMIN_ROLE).await;
    assert!(!admin.contains("tenant.permissions.create"));
    assert!(!admin.contains("tenant.settings.update"));

    let first = tenant_user(&f, "alice").await;
    let second = tenant_user(&f, "bob").await;
    assert_eq!(
        f.resolver.list_role_names(&first.principal()).await.unwrap(),
        vec![OWNER_ROLE.to_string()]
    );
    assert!(
        f.resolver
            .list_role_names(&second.principal())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn initializing_twice_changes_nothing() {
    let f = setup().await;
    let initializer = TenantInitializer::new(f.repos.clone());

    let first = initializer.initialize(f.tenant.id).await.unwrap();
    let second = initializer.initialize(f.tenant.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.owner_permission_count, PREDEFINED_PERMISSIONS.len());

    assert_eq!(f.repos.roles().list(Some(f.tenant.id)).await.unwrap().len(), 3);
    assert_eq!(
        f.repos.permissions().list(Some(f.tenant.id)).await.unwrap().len(),
        18
    );
}

#[tokio::test]
async fn tenant_permissions_are_namespaced_and_land_on_owner_only() {
    let mut f = setup().await;
    let owner = tenant_user(&f, "alice").await.principal();

    let err = f
        .resolver
        .create_permission(&owner, Some(f.tenant.id), "system.users.create", "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::InvalidNamespace { .. }));

    f.resolver
        .create_permission(&owner, Some(f.tenant.id), "tenant.reports.generate", "Reports")
        .await
        .unwrap();

    assert!(role_keys(&f, OWNER_ROLE).await.contains("tenant.reports.generate"));
    assert!(!role_keys(&f, ADMIN_ROLE).await.contains("tenant.reports.generate"));
    assert!(!role_keys(&f, AUDITOR_ROLE).await.contains("tenant.reports.generate"));
    assert!(
        f.resolver
            .has_permission(&owner, "tenant.reports.generate")
            .await
            .unwrap()
    );

    let event = f.events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::PermissionCreated);

    // A re-run of the initializer keeps the custom permission on owner.
    let init = TenantInitializer::new(f.repos.clone())
        .initialize(f.tenant.id)
        .await
        .unwrap();
    assert_eq!(init.owner_permission_count, 19);
}

#[tokio::test]
async fn predefined_roles_are_immutable() {
    let f = setup().await;
    let owner_role = f
        .repos
        .roles()
        .get_by_name(Some(f.tenant.id), OWNER_ROLE)
        .await
        .unwrap();

    let err = f
        .resolver
        .update_role(
            &f.root,
            owner_role.id,
            UpdateRole {
                name: Some("boss".into()),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::ImmutableRole { .. }));

    let err = f.resolver.delete_role(&f.root, owner_role.id).await.unwrap_err();
    assert!(matches!(err, GatehouseError::ImmutableRole { .. }));

    let permission = f
        .repos
        .permissions()
        .get_by_key(Some(f.tenant.id), "tenant.users.read")
        .await
        .unwrap();
    let err = f
        .resolver
        .revoke_permission(&f.root, owner_role.id, permission.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::ImmutableRole { .. }));

    let err = f
        .resolver
        .delete_permission(&f.root, permission.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    // Other predefined roles can still have permissions moved around.
    let auditor = f
        .repos
        .roles()
        .get_by_name(Some(f.tenant.id), AUDITOR_ROLE)
        .await
        .unwrap();
    f.resolver
        .revoke_permission(&f.root, auditor.id, permission.id)
        .await
        .unwrap();
    assert!(!role_keys(&f, AUDITOR_ROLE).await.contains("tenant.users.read"));
}

#[tokio::test]
async fn last_owner_cannot_be_removed_without_override() {
    let f = setup().await;
    let alice = tenant_user(&f, "alice").await;
    let bob = tenant_user(&f, "bob").await;
    let owner_role = f
        .repos
        .roles()
        .get_by_name(Some(f.tenant.id), OWNER_ROLE)
        .await
        .unwrap();

    let err = f
        .resolver
        .remove_role(&alice.principal(), alice.id, owner_role.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::LastOwnerProtected { .. }));

    f.resolver
        .assign_role(&alice.principal(), bob.id, owner_role.id)
        .await
        .unwrap();
    f.resolver
        .remove_role(&alice.principal(), alice.id, owner_role.id)
        .await
        .unwrap();
    assert_eq!(f.repos.roles().count_holders(owner_role.id).await.unwrap(), 1);

    // Only a system principal with a reason may strip the last owner.
    let err = f
        .resolver
        .force_remove_role(&bob.principal(), bob.id, owner_role.id, "offboarding")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));
    let err = f
        .resolver
        .force_remove_role(&f.root, bob.id, owner_role.id, "  ")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    f.resolver
        .force_remove_role(&f.root, bob.id, owner_role.id, "account compromised")
        .await
        .unwrap();
    assert_eq!(f.repos.roles().count_holders(owner_role.id).await.unwrap(), 0);

    let audit = f
        .repos
        .audit()
        .list(
            Some(f.tenant.id),
            AuditLogFilter {
                action: Some("role.removed.override".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].actor_id, f.root.user_id);
    assert_eq!(audit[0].metadata["reason"], "account compromised");
}

#[tokio::test]
async fn planes_never_mix() {
    let f = setup().await;
    let alice = tenant_user(&f, "alice").await;

    let operator = f
        .provisioner
        .create_user(CreateUser {
            kind: PrincipalKind::System,
            tenant_id: None,
            username: "operator".into(),
            email: "operator@platform.test".into(),
            password: "correct horse battery".into(),
            status: Some(UserStatus::Active),
        })
        .await
        .unwrap();

    let platform_role = f
        .resolver
        .create_role(&f.root, None, "platform-admin", "Platform administrators")
        .await
        .unwrap();
    let permission = f
        .resolver
        .create_permission(&f.root, None, "platform.tenants.manage", "")
        .await
        .unwrap();
    f.resolver
        .grant_permission(&f.root, platform_role.id, permission.id)
        .await
        .unwrap();
    f.resolver
        .assign_role(&f.root, operator.id, platform_role.id)
        .await
        .unwrap();

    let access = f.resolver.resolve(&operator.principal()).await.unwrap();
    assert_eq!(access.role_names, vec!["platform-admin".to_string()]);
    assert_eq!(
        access.permissions,
        BTreeSet::from(["platform.tenants.manage".to_string()])
    );

    // A tenant principal cannot receive a system role, nor grant one.
    let err = f
        .resolver
        .assign_role(&f.root, alice.id, platform_role.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));
    let err = f
        .resolver
        .assign_role(&alice.principal(), alice.id, platform_role.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    // Nor can a system principal hold a tenant role.
    let owner_role = f
        .repos
        .roles()
        .get_by_name(Some(f.tenant.id), OWNER_ROLE)
        .await
        .unwrap();
    let err = f
        .resolver
        .assign_role(&f.root, operator.id, owner_role.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    // Cross-plane grants are refused.
    let tenant_permission = f
        .repos
        .permissions()
        .get_by_key(Some(f.tenant.id), "tenant.users.read")
        .await
        .unwrap();
    let err = f
        .resolver
        .grant_permission(&f.root, platform_role.id, tenant_permission.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    let tenant_access = f.resolver.resolve(&alice.principal()).await.unwrap();
    assert!(!tenant_access.permissions.contains("platform.tenants.manage"));
}

#[tokio::test]
async fn tenant_actors_are_confined_to_their_tenant() {
    let f = setup().await;
    let alice = tenant_user(&f, "alice").await;
    let other = f
        .provisioner
        .create_tenant(
            &f.root,
            CreateTenant {
                domain: "globex.test".into(),
                name: "Globex".into(),
                settings: None,
            },
        )
        .await
        .unwrap();

    let err = f
        .resolver
        .create_permission(&alice.principal(), Some(other.id), "app.widgets.view", "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    let err = f
        .resolver
        .create_role(&alice.principal(), Some(f.tenant.id), "owner", "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Validation { .. }));

    let support = f
        .resolver
        .create_role(&alice.principal(), Some(f.tenant.id), "support", "")
        .await
        .unwrap();
    assert_eq!(support.tenant_id, Some(f.tenant.id));
    assert!(!support.is_system);
}

#[tokio::test]
async fn administration_requires_the_matching_permission() {
    let f = setup().await;
    let alice = tenant_user(&f, "alice").await;
    let bob = tenant_user(&f, "bob").await;
    let carol = tenant_user(&f, "carol").await;
    let dave = tenant_user(&f, "dave").await;
    let role = |name: &'static str| {
        let repos = f.repos.clone();
        let tenant_id = f.tenant.id;
        async move { repos.roles().get_by_name(Some(tenant_id), name).await.unwrap() }
    };
    let admin = role(ADMIN_ROLE).await;
    let auditor = role(AUDITOR_ROLE).await;
    f.resolver
        .assign_role(&alice.principal(), carol.id, admin.id)
        .await
        .unwrap();
    f.resolver
        .assign_role(&alice.principal(), dave.id, auditor.id)
        .await
        .unwrap();

    // No role at all.
    let err = f
        .resolver
        .create_permission(&bob.principal(), Some(f.tenant.id), "app.widgets.view", "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));
    let err = f
        .resolver
        .list_roles(&bob.principal(), Some(f.tenant.id))
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    // Auditors read but never change.
    f.resolver
        .list_roles(&dave.principal(), Some(f.tenant.id))
        .await
        .unwrap();
    let err = f
        .resolver
        .require_permission(&dave.principal(), Some(f.tenant.id), "tenant.roles.assign")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { ref reason } if reason.contains("tenant.roles.assign")));
    let err = f
        .resolver
        .assign_role(&dave.principal(), bob.id, auditor.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    // Admins manage roles but not permissions or settings.
    f.resolver
        .assign_role(&carol.principal(), bob.id, auditor.id)
        .await
        .unwrap();
    let err = f
        .resolver
        .create_permission(&carol.principal(), Some(f.tenant.id), "app.widgets.view", "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));
    let err = f
        .provisioner
        .update_tenant_settings(&carol.principal(), f.tenant.id, TenantSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::Forbidden { .. }));

    assert!(
        f.repos
            .permissions()
            .get_by_key(Some(f.tenant.id), "app.widgets.view")
            .await
            .is_err()
    );
}

#[tokio::test]
async fn duplicate_tenant_permission_leaves_no_dangling_grant() {
    let f = setup().await;
    let alice = tenant_user(&f, "alice").await;
    f.resolver
        .create_permission(&alice.principal(), Some(f.tenant.id), "app.widgets.view", "")
        .await
        .unwrap();
    let grants = f.repos.permissions().count_grants(Some(f.tenant.id)).await.unwrap();

    let err = f
        .resolver
        .create_permission(&alice.principal(), Some(f.tenant.id), "app.widgets.view", "")
        .await
        .unwrap_err();
    assert!(matches!(err, GatehouseError::AlreadyExists { .. }));
    assert_eq!(
        f.repos.permissions().count_grants(Some(f.tenant.id)).await.unwrap(),
        grants
    );
    assert!(role_keys(&f, OWNER_ROLE).await.contains("app.widgets.view"));
}
