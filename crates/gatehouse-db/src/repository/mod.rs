//! SurrealDB repository implementations.

mod audit;
mod capability;
mod permission;
mod refresh_token;
mod role;
mod tenant;
mod user;

use gatehouse_core::repository::Repositories;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

pub use audit::SurrealAuditLogRepository;
pub use capability::SurrealCapabilityRepository;
pub use permission::SurrealPermissionRepository;
pub use refresh_token::SurrealRefreshTokenRepository;
pub use role::SurrealRoleRepository;
pub use tenant::SurrealTenantRepository;
pub use user::SurrealUserRepository;

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
pub(crate) struct CountRow {
    pub(crate) total: u64,
}

/// Every repository over one shared connection.
#[derive(Clone)]
pub struct SurrealRepositories<C: Connection> {
    tenants: SurrealTenantRepository<C>,
    users: SurrealUserRepository<C>,
    roles: SurrealRoleRepository<C>,
    permissions: SurrealPermissionRepository<C>,
    capabilities: SurrealCapabilityRepository<C>,
    refresh_tokens: SurrealRefreshTokenRepository<C>,
    audit: SurrealAuditLogRepository<C>,
}

impl<C: Connection> SurrealRepositories<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self::build(db.clone(), SurrealUserRepository::new(db))
    }

    /// Same as [`SurrealRepositories::new`] with a password pepper.
    pub fn with_pepper(db: Surreal<C>, pepper: String) -> Self {
        Self::build(db.clone(), SurrealUserRepository::with_pepper(db, pepper))
    }

    fn build(db: Surreal<C>, users: SurrealUserRepository<C>) -> Self {
        Self {
            tenants: SurrealTenantRepository::new(db.clone()),
            users,
            roles: SurrealRoleRepository::new(db.clone()),
            permissions: SurrealPermissionRepository::new(db.clone()),
            capabilities: SurrealCapabilityRepository::new(db.clone()),
            refresh_tokens: SurrealRefreshTokenRepository::new(db.clone()),
            audit: SurrealAuditLogRepository::new(db),
        }
    }
}

impl<C: Connection + Clone> Repositories for SurrealRepositories<C> {
    type Tenants = SurrealTenantRepository<C>;
    type Users = SurrealUserRepository<C>;
    type Roles = SurrealRoleRepository<C>;
    type Permissions = SurrealPermissionRepository<C>;
    type Capabilities = SurrealCapabilityRepository<C>;
    type RefreshTokens = SurrealRefreshTokenRepository<C>;
    type Audit = SurrealAuditLogRepository<C>;

    fn tenants(&self) -> &Self::Tenants {
        &self.tenants
    }

    fn users(&self) -> &Self::Users {
        &self.users
    }

    fn roles(&self) -> &Self::Roles {
        &self.roles
    }

    fn permissions(&self) -> &Self::Permissions {
        &self.permissions
    }

    fn capabilities(&self) -> &Self::Capabilities {
        &self.capabilities
    }

    fn refresh_tokens(&self) -> &Self::RefreshTokens {
        &self.refresh_tokens
    }

    fn audit(&self) -> &Self::Audit {
        &self.audit
    }
}
