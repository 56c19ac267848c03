//! SurrealDB implementation of [`RoleRepository`].
//!
//! User→role assignments live in the `user_role` table under a
//! deterministic id per (user, role) pair, so assigning is an upsert.

use chrono::{DateTime, Utc};
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::models::role::{CreateRole, Role, UpdateRole};
use gatehouse_core::models::seed::assignment_id;
use gatehouse_core::repository::RoleRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::{DbError, parse_opt_uuid, parse_uuid};

#[derive(Debug, SurrealValue)]
struct RoleRow {
    tenant_id: Option<String>,
    name: String,
    description: String,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct RoleRowWithId {
    record_id: String,
    tenant_id: Option<String>,
    name: String,
    description: String,
    is_system: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AssignmentRow {
    #[allow(dead_code)]
    user_id: String,
}

impl RoleRow {
    fn into_role(self, id: Uuid) -> Result<Role, DbError> {
        Ok(Role {
            id,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            name: self.name,
            description: self.description,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl RoleRowWithId {
    fn try_into_role(self) -> Result<Role, DbError> {
        Ok(Role {
            id: parse_uuid(&self.record_id, "role")?,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            name: self.name,
            description: self.description,
            is_system: self.is_system,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SurrealDB implementation of the Role repository.
#[derive(Clone)]
pub struct SurrealRoleRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealRoleRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn assignment_exists(&self, user_id: Uuid, role_id: Uuid) -> GatehouseResult<bool> {
        let mut result = self
            .db
            .query("SELECT user_id FROM type::record('user_role', $id)")
            .bind(("id", assignment_id(user_id, role_id).to_string()))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<AssignmentRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }
}

impl<C: Connection> RoleRepository for SurrealRoleRepository<C> {
    async fn create(&self, input: CreateRole) -> GatehouseResult<Role> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('role', $id) SET \
                 tenant_id = $tenant_id, \
                 name = $name, description = $description, \
                 is_system = false",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("name", input.name))
            .bind(("description", input.description))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("role", e))?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            id: id_str,
        })?;

        Ok(row.into_role(id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> GatehouseResult<Role> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('role', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            id: id_str,
        })?;

        Ok(row.into_role(id)?)
    }

    async fn get_by_name(&self, tenant_id: Option<Uuid>, name: &str) -> GatehouseResult<Role> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM role \
                 WHERE tenant_id = $tenant_id AND name = $name",
            )
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("name", name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            id: format!("name={name}"),
        })?;

        Ok(row.try_into_role()?)
    }

    async fn update(&self, id: Uuid, input: UpdateRole) -> GatehouseResult<Role> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.description.is_some() {
            sets.push("description = $description");
        }
        sets.push("updated_at = time::now()");

        let query = format!("UPDATE type::record('role', $id) SET {}", sets.join(", "));

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(description) = input.description {
            builder = builder.bind(("description", description));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("role", e))?;

        let rows: Vec<RoleRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "role".into(),
            id: id_str,
        })?;

        Ok(row.into_role(id)?)
    }

    async fn delete(&self, id: Uuid) -> GatehouseResult<()> {
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 DELETE user_role WHERE role_id = $id; \
                 DELETE role_permission WHERE role_id = $id; \
                 DELETE type::record('role', $id); \
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn list(&self, tenant_id: Option<Uuid>) -> GatehouseResult<Vec<Role>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM role \
                 WHERE tenant_id = $tenant_id ORDER BY name ASC",
            )
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_role().map_err(Into::into))
            .collect()
    }

    async fn assign_to_user(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
        role_id: Uuid,
    ) -> GatehouseResult<()> {
        self.db
            .query(
                "UPSERT type::record('user_role', $id) SET \
                 tenant_id = $tenant_id, user_id = $user_id, \
                 role_id = $role_id",
            )
            .bind(("id", assignment_id(user_id, role_id).to_string()))
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("user_id", user_id.to_string()))
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn unassign_from_user(&self, user_id: Uuid, role_id: Uuid) -> GatehouseResult<()> {
        self.db
            .query("DELETE type::record('user_role', $id)")
            .bind(("id", assignment_id(user_id, role_id).to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn unassign_keeping_last_holder(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role_id: Uuid,
    ) -> GatehouseResult<()> {
        // Holder check and delete run as a single statement.
        let result = self
            .db
            .query(
                "DELETE type::record('user_role', $id) \
                 WHERE count((SELECT id FROM user_role \
                     WHERE role_id = $role_id AND user_id != $user_id)) > 0 \
                 RETURN BEFORE",
            )
            .bind(("id", assignment_id(user_id, role_id).to_string()))
            .bind(("role_id", role_id.to_string()))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let removed: Vec<AssignmentRow> = result.take(0).map_err(DbError::from)?;
        if !removed.is_empty() {
            return Ok(());
        }
        if self.assignment_exists(user_id, role_id).await? {
            Err(GatehouseError::LastOwnerProtected { tenant_id })
        } else {
            Err(DbError::NotFound {
                entity: "role assignment".into(),
                id: format!("{user_id}/{role_id}"),
            }
            .into())
        }
    }

    async fn get_user_roles(
        &self,
        tenant_id: Option<Uuid>,
        user_id: Uuid,
    ) -> GatehouseResult<Vec<Role>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM role \
                 WHERE tenant_id = $tenant_id AND meta::id(id) IN \
                 (SELECT VALUE role_id FROM user_role WHERE user_id = $user_id) \
                 ORDER BY name ASC",
            )
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RoleRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_role().map_err(Into::into))
            .collect()
    }

    async fn count_holders(&self, role_id: Uuid) -> GatehouseResult<u64> {
        let mut result = self
            .db
            .query(
                "SELECT count() AS total FROM user_role \
                 WHERE role_id = $role_id GROUP ALL",
            )
            .bind(("role_id", role_id.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CountRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.first().map(|c| c.total).unwrap_or(0))
    }
}
