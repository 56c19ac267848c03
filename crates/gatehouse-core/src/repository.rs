//! Repository trait definitions for the persistent store.
//!
//! All operations are async. Scoped lookups take `Option<Uuid>` for
//! the tenant: `None` addresses the system plane, so a query for one
//! plane can never return rows from the other.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::GatehouseResult;
use crate::models::{
    audit::{AuditLogEntry, CreateAuditLogEntry},
    capability::{
        SystemCapability, TenantCapabilityGrant, TenantFeature, UpsertCapabilityGrant,
        UpsertSystemCapability, UpsertTenantFeature, UpsertUserCapabilityState,
        UserCapabilityState,
    },
    permission::{CreatePermission, Permission},
    role::{CreateRole, Role, UpdateRole},
    seed::TenantSeed,
    session::{CreateRefreshToken, RefreshTokenRecord},
    tenant::{CreateTenant, Tenant, UpdateTenant},
    user::{CreateUser, UpdateUser, User},
};

// ---------------------------------------------------------------------------
// Tenants (global scope)
// ---------------------------------------------------------------------------

pub trait TenantRepository: Send + Sync {
    fn create(&self, input: CreateTenant) -> impl Future<Output = GatehouseResult<Tenant>> + Send;
    /// Create the tenant under `seed.tenant_id` and write the seed in
    /// the same transaction. Nothing is left behind when either fails.
    fn create_with_seed(
        &self,
        input: CreateTenant,
        seed: TenantSeed,
    ) -> impl Future<Output = GatehouseResult<Tenant>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GatehouseResult<Tenant>> + Send;
    fn get_by_domain(&self, domain: &str)
    -> impl Future<Output = GatehouseResult<Tenant>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateTenant,
    ) -> impl Future<Output = GatehouseResult<Tenant>> + Send;
    /// Hard delete. Only valid after a soft delete.
    fn delete(&self, id: Uuid) -> impl Future<Output = GatehouseResult<()>> + Send;
    /// Soft-deleted tenants whose `deleted_at` is older than `cutoff`.
    fn list_deleted_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = GatehouseResult<Vec<Tenant>>> + Send;
}

// ---------------------------------------------------------------------------
// Users and credentials
// ---------------------------------------------------------------------------

pub trait UserRepository: Send + Sync {
    fn create(&self, input: CreateUser) -> impl Future<Output = GatehouseResult<User>> + Send;
    /// Create a user and, in the same transaction, assign `role_id` to
    /// it when the role has no holder yet.
    fn create_claiming_role(
        &self,
        input: CreateUser,
        role_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<User>> + Send;
    fn get_by_id(
        &self,
        tenant_id: Option<Uuid>,
        id: Uuid,
    ) -> impl Future<Output = GatehouseResult<User>> + Send;
    fn get_by_username(
        &self,
        tenant_id: Option<Uuid>,
        username: &str,
    ) -> impl Future<Output = GatehouseResult<User>> + Send;
    /// Case-insensitive lookup.
    fn get_by_email(
        &self,
        tenant_id: Option<Uuid>,
        email: &str,
    ) -> impl Future<Output = GatehouseResult<User>> + Send;
    fn update(
        &self,
        tenant_id: Option<Uuid>,
        id: Uuid,
        input: UpdateUser,
    ) -> impl Future<Output = GatehouseResult<User>> + Send;
    /// Atomically remove one recovery code hash. Returns `false` when
    /// the hash was not present (already used or never issued).
    fn consume_recovery_code(
        &self,
        id: Uuid,
        code_hash: &str,
    ) -> impl Future<Output = GatehouseResult<bool>> + Send;
}

/// Credential and lockout state, addressed by principal id.
pub trait CredentialStore: Send + Sync {
    fn verify_password(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> impl Future<Output = GatehouseResult<bool>> + Send;
    fn set_password(
        &self,
        user_id: Uuid,
        password: &str,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    /// Atomic read-modify-write; returns the new counter value.
    fn increment_failed_attempts(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<u32>> + Send;
    fn reset_failed_attempts(&self, user_id: Uuid)
    -> impl Future<Output = GatehouseResult<()>> + Send;
    /// Lock until `until` and bump the lockout counter.
    fn set_locked(
        &self,
        user_id: Uuid,
        until: DateTime<Utc>,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    /// Lift a lock (manual or after expiry) and clear failed attempts.
    fn unlock(&self, user_id: Uuid) -> impl Future<Output = GatehouseResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// RBAC
// ---------------------------------------------------------------------------

pub trait RoleRepository: Send + Sync {
    fn create(&self, input: CreateRole) -> impl Future<Output = GatehouseResult<Role>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GatehouseResult<Role>> + Send;
    fn get_by_name(
        &self,
        tenant_id: Option<Uuid>,
        name: &str,
    ) -> impl Future<Output = GatehouseResult<Role>> + Send;
    fn update(
        &self,
        id: Uuid,
        input: UpdateRole,
    ) -> impl Future<Output = GatehouseResult<Role>> + Send;
    /// Delete a role together with its grants and assignments.
    fn delete(&self, id: Uuid) -> impl Future<Output = GatehouseResult<()>> + Send;
    fn list(
        &self,
        tenant_id: Option<Uuid>,
    ) -> impl Future<Output = GatehouseResult<Vec<Role>>> + Send;

    /// Idempotent: assigning twice leaves one assignment.
    fn assign_to_user(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
        role_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    fn unassign_from_user(
        &self,
        user_id: Uuid,
        role_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    /// Remove an assignment unless it is the role's last holder, in a
    /// single transaction. Fails with `LastOwnerProtected`.
    fn unassign_keeping_last_holder(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    /// Roles assigned to a user within one plane.
    fn get_user_roles(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<Vec<Role>>> + Send;
    fn count_holders(&self, role_id: Uuid) -> impl Future<Output = GatehouseResult<u64>> + Send;
}

pub trait PermissionRepository: Send + Sync {
    /// Fails with `AlreadyExists` when the key exists in that scope.
    fn create(
        &self,
        input: CreatePermission,
    ) -> impl Future<Output = GatehouseResult<Permission>> + Send;
    /// `create` plus the link to `role_id`, committed together.
    fn create_granted_to(
        &self,
        input: CreatePermission,
        role_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<Permission>> + Send;
    fn get_by_key(
        &self,
        tenant_id: Option<Uuid>,
        key: &str,
    ) -> impl Future<Output = GatehouseResult<Permission>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = GatehouseResult<Permission>> + Send;
    /// Delete a permission together with its grants.
    fn delete(&self, id: Uuid) -> impl Future<Output = GatehouseResult<()>> + Send;
    fn list(
        &self,
        tenant_id: Option<Uuid>,
    ) -> impl Future<Output = GatehouseResult<Vec<Permission>>> + Send;

    /// Idempotent upsert of a role→permission link.
    fn grant_to_role(
        &self,
        tenant_id: Option<Uuid>,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    fn revoke_from_role(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
    fn get_role_permissions(
        &self,
        role_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<Vec<Permission>>> + Send;
    /// Total number of role→permission links in a scope.
    fn count_grants(
        &self,
        tenant_id: Option<Uuid>,
    ) -> impl Future<Output = GatehouseResult<u64>> + Send;

    /// Write a tenant seed (roles, permissions, grants) atomically with
    /// upserts; applying the same seed twice changes nothing.
    fn apply_seed(&self, seed: TenantSeed) -> impl Future<Output = GatehouseResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub trait CapabilityRepository: Send + Sync {
    fn get_system(
        &self,
        key: &str,
    ) -> impl Future<Output = GatehouseResult<Option<SystemCapability>>> + Send;
    fn upsert_system(
        &self,
        input: UpsertSystemCapability,
    ) -> impl Future<Output = GatehouseResult<SystemCapability>> + Send;
    fn list_system(&self) -> impl Future<Output = GatehouseResult<Vec<SystemCapability>>> + Send;

    fn get_grant(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> impl Future<Output = GatehouseResult<Option<TenantCapabilityGrant>>> + Send;
    fn upsert_grant(
        &self,
        input: UpsertCapabilityGrant,
    ) -> impl Future<Output = GatehouseResult<TenantCapabilityGrant>> + Send;

    fn get_feature(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> impl Future<Output = GatehouseResult<Option<TenantFeature>>> + Send;
    fn upsert_feature(
        &self,
        input: UpsertTenantFeature,
    ) -> impl Future<Output = GatehouseResult<TenantFeature>> + Send;

    fn get_user_state(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> impl Future<Output = GatehouseResult<Option<UserCapabilityState>>> + Send;
    fn upsert_user_state(
        &self,
        input: UpsertUserCapabilityState,
    ) -> impl Future<Output = GatehouseResult<UserCapabilityState>> + Send;
    fn delete_user_state(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> impl Future<Output = GatehouseResult<()>> + Send;
}

// ---------------------------------------------------------------------------
// Refresh tokens
// ---------------------------------------------------------------------------

pub trait RefreshTokenRepository: Send + Sync {
    fn create(
        &self,
        input: CreateRefreshToken,
    ) -> impl Future<Output = GatehouseResult<RefreshTokenRecord>> + Send;
    fn get(&self, jti: Uuid) -> impl Future<Output = GatehouseResult<RefreshTokenRecord>> + Send;
    /// Conditionally revoke: returns `true` only for the caller that
    /// flipped `revoked_at` from unset to set.
    fn mark_revoked(&self, jti: Uuid) -> impl Future<Output = GatehouseResult<bool>> + Send;
    /// Revoke every live record of a user; returns the records revoked
    /// by this call.
    fn revoke_all_for_user(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = GatehouseResult<Vec<RefreshTokenRecord>>> + Send;
    /// Remove records past expiry.
    fn delete_expired(&self) -> impl Future<Output = GatehouseResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Audit (append-only)
// ---------------------------------------------------------------------------

/// Query filters for audit log entries.
#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub actor_id: Option<Uuid>,
    pub action: Option<String>,
    pub target_id: Option<Uuid>,
    pub limit: Option<u64>,
}

pub trait AuditLogRepository: Send + Sync {
    /// Append a new audit log entry. No update or delete operations exist.
    fn append(
        &self,
        input: CreateAuditLogEntry,
    ) -> impl Future<Output = GatehouseResult<AuditLogEntry>> + Send;
    fn list(
        &self,
        tenant_id: Option<Uuid>,
        filter: AuditLogFilter,
    ) -> impl Future<Output = GatehouseResult<Vec<AuditLogEntry>>> + Send;
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// One handle onto every persistent repository.
///
/// Services are generic over this trait rather than over each
/// repository so that a single database connection can back all of
/// them.
pub trait Repositories: Clone + Send + Sync + 'static {
    type Tenants: TenantRepository;
    type Users: UserRepository + CredentialStore;
    type Roles: RoleRepository;
    type Permissions: PermissionRepository;
    type Capabilities: CapabilityRepository;
    type RefreshTokens: RefreshTokenRepository;
    type Audit: AuditLogRepository;

    fn tenants(&self) -> &Self::Tenants;
    fn users(&self) -> &Self::Users;
    fn roles(&self) -> &Self::Roles;
    fn permissions(&self) -> &Self::Permissions;
    fn capabilities(&self) -> &Self::Capabilities;
    fn refresh_tokens(&self) -> &Self::RefreshTokens;
    fn audit(&self) -> &Self::Audit;
}
