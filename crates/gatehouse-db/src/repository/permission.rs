//! SurrealDB implementation of [`PermissionRepository`].
//!
//! Permission ids are derived from (scope, key), which makes a duplicate
//! create collide on the record id as well as on the unique index.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::permission::{CreatePermission, Permission};
use gatehouse_core::models::seed::{TenantSeed, grant_id, permission_id};
use gatehouse_core::repository::PermissionRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::CountRow;
use crate::error::{DbError, parse_opt_uuid, parse_uuid};

#[derive(Debug, SurrealValue)]
struct PermissionRow {
    tenant_id: Option<String>,
    key: String,
    description: String,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct PermissionRowWithId {
    record_id: String,
    tenant_id: Option<String>,
    key: String,
    description: String,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PermissionRow {
    fn into_permission(self, id: Uuid) -> Result<Permission, DbError> {
        Ok(Permission {
            id,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            key: self.key,
            description: self.description,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl PermissionRowWithId {
    fn try_into_permission(self) -> Result<Permission, DbError> {
        Ok(Permission {
            id: parse_uuid(&self.record_id, "permission")?,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            key: self.key,
            description: self.description,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Permission repository.
#[derive(Clone)]
pub struct SurrealPermissionRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPermissionRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> PermissionRepository for SurrealPermissionRepository<C> {
    async fn create(&self, input: CreatePermission) -> GatehouseResult<Permission> {
        let id = permission_id(input.tenant_id, &input.key);
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('permission', $id) SET \
                 tenant_id = $tenant_id, key = $key, \
                 description = $description, is_system = false",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("key", input.key))
            .bind(("description", input.description))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("permission", e))?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            id: id_str,
        })?;

        Ok(row.into_permission(id)?)
    }

    async fn create_granted_to(
        &self,
        input: CreatePermission,
        role_id: Uuid,
    ) -> GatehouseResult<Permission> {
        let id = permission_id(input.tenant_id, &input.key);

        self.db
            .query(
                "BEGIN TRANSACTION; \
                 CREATE type::record('permission', $id) SET \
                 tenant_id = $tenant_id, key = $key, \
                 description = $description, is_system = false; \
                 UPSERT type::record('role_permission', $grant) SET \
                 tenant_id = $tenant_id, role_id = $role_id, permission_id = $id; \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .bind(("grant", grant_id(role_id, id).to_string()))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("role_id", role_id.to_string()))
            .bind(("key", input.key))
            .bind(("description", input.description))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("permission", e))?;

        self.get_by_id(id).await
    }

    async fn get_by_key(&self, tenant_id: Option<Uuid>, key: &str) -> GatehouseResult<Permission> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE tenant_id = $tenant_id AND key = $key",
            )
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("key", key.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            id: format!("key={key}"),
        })?;

        Ok(row.try_into_permission()?)
    }

    async fn get_by_id(&self, id: Uuid) -> GatehouseResult<Permission> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('permission', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "permission".into(),
            id: id_str,
        })?;

        Ok(row.into_permission(id)?)
    }

    async fn delete(&self, id: Uuid) -> GatehouseResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE role_permission WHERE permission_id = $id; \
                 DELETE type::record('permission', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, tenant_id: Option<Uuid>) -> GatehouseResult<Vec<Permission>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE tenant_id = $tenant_id ORDER BY key ASC",
            )
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_permission().map_err(Into::into))
            .collect()
    }

    async fn grant_to_role(
        &self,
        tenant_id: Option<Uuid>,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> GatehouseResult<()> {
        self.db
            .query(
                "UPSERT type::record('role_permission', $id) SET \
                 tenant_id = $tenant_id, role_id = $role_id, \
                 permission_id = $permission_id",
            )
            .bind(("id", grant_id(role_id, permission_id).to_string()))
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("role_id", role_id.to_string()))
            .bind(("permission_id", permission_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn revoke_from_role(&self, role_id: Uuid, permission_id: Uuid) -> GatehouseResult<()> {
        self.db
            .query("DELETE type::record('role_permission', $id)")
            .bind(("id", grant_id(role_id, permission_id).to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn get_role_permissions(&self, role_id: Uuid) -> GatehouseResult<Vec<Permission>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM permission \
                 WHERE meta::id(id) IN \
                 (SELECT VALUE permission_id FROM role_permission \
                  WHERE role_id = $role_id) \
                 ORDER BY key ASC",
            )
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PermissionRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_permission().map_err(Into::into))
            .collect()
    }

    async fn count_grants(&self, tenant_id: Option<Uuid>) -> GatehouseResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM role_permission \
                 WHERE tenant_id = $tenant_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|c| c.total).unwrap_or(0))
    }

    async fn apply_seed(&self, seed: TenantSeed) -> GatehouseResult<()> {
        let (body, binds) = seed_statements(&seed);
        let sql = format!("BEGIN TRANSACTION;\n{body}COMMIT TRANSACTION;");

        let mut builder = self
            .db
            .query(sql)
            .bind(("tenant_id", Some(seed.tenant_id.to_string())));
        for bind in binds {
            builder = builder.bind(bind);
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("tenant seed", e))?;

        debug!(tenant_id = %seed.tenant_id, grant_count = seed.grants.len(), "tenant seed applied");
        Ok(())
    }
}

/// Upsert statements for a seed, with numbered parameters, meant to be
/// wrapped in a transaction by the caller. `$tenant_id` is left for the
/// caller to bind.
pub(crate) fn seed_statements(seed: &TenantSeed) -> (String, Vec<(String, String)>) {
    let mut sql = String::new();
    let mut binds = Vec::new();
    for (i, role) in seed.roles.iter().enumerate() {
        let _ = writeln!(
            sql,
            "UPSERT type::record('role', $role_id_{i}) SET \
             tenant_id = $tenant_id, name = $role_name_{i}, \
             description = $role_desc_{i}, is_system = true, \
             updated_at = time::now();"
        );
        binds.push((format!("role_id_{i}"), role.id.to_string()));
        binds.push((format!("role_name_{i}"), role.name.clone()));
        binds.push((format!("role_desc_{i}"), role.description.clone()));
    }
    for (i, perm) in seed.permissions.iter().enumerate() {
        let _ = writeln!(
            sql,
            "UPSERT type::record('permission', $perm_id_{i}) SET \
             tenant_id = $tenant_id, key = $perm_key_{i}, \
             description = $perm_desc_{i}, is_system = true, \
             updated_at = time::now();"
        );
        binds.push((format!("perm_id_{i}"), perm.id.to_string()));
        binds.push((format!("perm_key_{i}"), perm.key.clone()));
        binds.push((format!("perm_desc_{i}"), perm.description.clone()));
    }
    for (i, (role_id, perm_id)) in seed.grants.iter().enumerate() {
        let _ = writeln!(
            sql,
            "UPSERT type::record('role_permission', $grant_id_{i}) SET \
             tenant_id = $tenant_id, role_id = $grant_role_{i}, \
             permission_id = $grant_perm_{i};"
        );
        binds.push((format!("grant_id_{i}"), grant_id(*role_id, *perm_id).to_string()));
        binds.push((format!("grant_role_{i}"), role_id.to_string()));
        binds.push((format!("grant_perm_{i}"), perm_id.to_string()));
    }
    (sql, binds)
}
