//! Tenant initializer: the predefined roles and permissions every tenant
//! starts with.
//!
//! The write plan is computed by a pure function and applied in one
//! store transaction of upserts, so running it again changes nothing.

use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::permission::predefined;
use gatehouse_core::models::role::{ADMIN_ROLE, AUDITOR_ROLE, OWNER_ROLE};
use gatehouse_core::models::seed::{self, SeedPermission, SeedRole, TenantSeed};
use gatehouse_core::models::tenant::{CreateTenant, Tenant};
use gatehouse_core::repository::{PermissionRepository, Repositories, TenantRepository};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::rbac::sync_owner;

/// `(key, description)` of every predefined tenant permission.
pub const PREDEFINED_PERMISSIONS: &[(&str, &str)] = &[
    (predefined::USERS_READ, "View users"),
    (predefined::USERS_CREATE, "Create users"),
    (predefined::USERS_UPDATE, "Update users"),
    (predefined::USERS_DELETE, "Delete users"),
    (predefined::ROLES_READ, "View roles"),
    (predefined::ROLES_CREATE, "Create roles"),
    (predefined::ROLES_UPDATE, "Update roles"),
    (predefined::ROLES_DELETE, "Delete roles"),
    (predefined::ROLES_ASSIGN, "Assign roles to users"),
    (predefined::PERMISSIONS_READ, "View permissions"),
    (predefined::PERMISSIONS_CREATE, "Create permissions"),
    (predefined::PERMISSIONS_DELETE, "Delete permissions"),
    (predefined::SETTINGS_READ, "View tenant settings"),
    (predefined::SETTINGS_UPDATE, "Change tenant settings"),
    (predefined::AUDIT_READ, "Read the audit log"),
    (predefined::MFA_RESET, "Reset a user's second factor"),
    (predefined::SESSIONS_READ, "View sessions"),
    (predefined::SESSIONS_REVOKE, "Revoke sessions"),
];

/// Keys withheld from the admin role.
const ADMIN_EXCLUDED: &[&str] = &[
    predefined::PERMISSIONS_CREATE,
    predefined::PERMISSIONS_DELETE,
    predefined::SETTINGS_UPDATE,
];

const PREDEFINED_ROLES: &[(&str, &str)] = &[
    (OWNER_ROLE, "Full control of the tenant"),
    (ADMIN_ROLE, "Manages users and roles"),
    (AUDITOR_ROLE, "Read-only access"),
];

fn role_grants(role: &str, key: &str) -> bool {
    match role {
        OWNER_ROLE => true,
        ADMIN_ROLE => !ADMIN_EXCLUDED.contains(&key),
        AUDITOR_ROLE => key.ends_with(".read"),
        _ => false,
    }
}

/// Everything the initializer writes for `tenant_id`.
pub fn plan(tenant_id: Uuid) -> TenantSeed {
    let roles: Vec<SeedRole> = PREDEFINED_ROLES
        .iter()
        .map(|(name, description)| SeedRole {
            id: seed::role_id(Some(tenant_id), name),
            name: (*name).to_string(),
            description: (*description).to_string(),
        })
        .collect();

    let permissions: Vec<SeedPermission> = PREDEFINED_PERMISSIONS
        .iter()
        .map(|(key, description)| SeedPermission {
            id: seed::permission_id(Some(tenant_id), key),
            key: (*key).to_string(),
            description: (*description).to_string(),
        })
        .collect();

    let grants = roles
        .iter()
        .flat_map(|role| {
            permissions
                .iter()
                .filter(move |p| role_grants(&role.name, &p.key))
                .map(move |p| (role.id, p.id))
        })
        .collect();

    TenantSeed {
        tenant_id,
        roles,
        permissions,
        grants,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitResult {
    pub owner_role_id: Uuid,
    /// Permissions the owner holds after the sync, custom ones included.
    pub owner_permission_count: usize,
}

#[derive(Clone)]
pub struct TenantInitializer<S: Repositories> {
    store: S,
}

impl<S: Repositories> TenantInitializer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Create a tenant with its predefined roles and permissions in one
    /// store transaction.
    #[instrument(skip(self, input), fields(domain = %input.domain))]
    pub async fn create_tenant(&self, input: CreateTenant) -> GatehouseResult<(Tenant, InitResult)> {
        let seed = plan(Uuid::new_v4());
        let owner_role_id = seed::role_id(Some(seed.tenant_id), OWNER_ROLE);
        let owner_permission_count = seed.grants.iter().filter(|(r, _)| *r == owner_role_id).count();

        let tenant = self.store.tenants().create_with_seed(input, seed).await?;

        info!(tenant_id = %tenant.id, owner_permission_count, "tenant initialized");
        Ok((
            tenant,
            InitResult {
                owner_role_id,
                owner_permission_count,
            },
        ))
    }

    /// Re-apply the seed to an existing tenant and re-sync the owner.
    #[instrument(skip(self))]
    pub async fn initialize(&self, tenant_id: Uuid) -> GatehouseResult<InitResult> {
        self.store.tenants().get_by_id(tenant_id).await?;

        let seed = plan(tenant_id);
        let owner_role_id = seed::role_id(Some(tenant_id), OWNER_ROLE);
        self.store.permissions().apply_seed(seed).await?;

        let owner_permission_count = sync_owner(&self.store, tenant_id, owner_role_id).await?;

        info!(%tenant_id, owner_permission_count, "tenant initialized");
        Ok(InitResult {
            owner_role_id,
            owner_permission_count,
        })
    }
}
