//! SurrealDB implementation of [`TenantRepository`].

use chrono::{DateTime, Utc};
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::tenant::{
    CreateTenant, Tenant, TenantSettings, TenantStatus, UpdateTenant,
};
use gatehouse_core::models::seed::TenantSeed;
use gatehouse_core::repository::TenantRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::permission::seed_statements;
use crate::error::{DbError, parse_uuid};

/// Tables whose rows belong to a single tenant and go with it on purge.
const TENANT_SCOPED_TABLES: &[&str] = &[
    "user_role",
    "role_permission",
    "role",
    "permission",
    "tenant_capability",
    "tenant_feature",
    "refresh_token",
    "user",
];

#[derive(Debug, SurrealValue)]
struct TenantRow {
    domain: String,
    name: String,
    status: String,
    settings: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, SurrealValue)]
struct TenantRowWithId {
    record_id: String,
    domain: String,
    name: String,
    status: String,
    settings: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

fn parse_status(s: &str) -> Result<TenantStatus, DbError> {
    TenantStatus::parse(s).ok_or_else(|| DbError::Corrupt(format!("unknown tenant status: {s}")))
}

fn parse_settings(value: serde_json::Value) -> Result<TenantSettings, DbError> {
    serde_json::from_value(value)
        .map_err(|e| DbError::Corrupt(format!("invalid tenant settings: {e}")))
}

fn settings_value(settings: &TenantSettings) -> Result<serde_json::Value, DbError> {
    serde_json::to_value(settings)
        .map_err(|e| DbError::Corrupt(format!("unserializable tenant settings: {e}")))
}

impl TenantRow {
    fn into_tenant(self, id: Uuid) -> Result<Tenant, DbError> {
        Ok(Tenant {
            id,
            domain: self.domain,
            name: self.name,
            status: parse_status(&self.status)?,
            settings: parse_settings(self.settings)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

impl TenantRowWithId {
    fn try_into_tenant(self) -> Result<Tenant, DbError> {
        Ok(Tenant {
            id: parse_uuid(&self.record_id, "tenant")?,
            domain: self.domain,
            name: self.name,
            status: parse_status(&self.status)?,
            settings: parse_settings(self.settings)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

/// SurrealDB implementation of the Tenant repository.
#[derive(Clone)]
pub struct SurrealTenantRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTenantRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> TenantRepository for SurrealTenantRepository<C> {
    async fn create(&self, input: CreateTenant) -> GatehouseResult<Tenant> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let settings = settings_value(&input.settings.unwrap_or_default())?;

        let result = self
            .db
            .query(
                "CREATE type::record('tenant', $id) SET \
                 domain = $domain, name = $name, \
                 status = 'Active', settings = $settings",
            )
            .bind(("id", id_str.clone()))
            .bind(("domain", input.domain.trim().to_lowercase()))
            .bind(("name", input.name))
            .bind(("settings", settings))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id_str,
        })?;

        Ok(row.into_tenant(id)?)
    }

    async fn create_with_seed(
        &self,
        input: CreateTenant,
        seed: TenantSeed,
    ) -> GatehouseResult<Tenant> {
        let id = seed.tenant_id;
        let settings = settings_value(&input.settings.unwrap_or_default())?;
        let (seed_sql, seed_binds) = seed_statements(&seed);

        // The CREATE goes first so a duplicate domain is the error reported.
        let sql = format!(
            "BEGIN TRANSACTION;\n\
             CREATE type::record('tenant', $id) SET \
             domain = $domain, name = $name, \
             status = 'Active', settings = $settings;\n\
             {seed_sql}COMMIT TRANSACTION;"
        );
        let mut builder = self
            .db
            .query(sql)
            .bind(("id", id.to_string()))
            .bind(("domain", input.domain.trim().to_lowercase()))
            .bind(("name", input.name))
            .bind(("settings", settings))
            .bind(("tenant_id", Some(id.to_string())));
        for bind in seed_binds {
            builder = builder.bind(bind);
        }

        builder
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        debug!(tenant_id = %id, roles = seed.roles.len(), "tenant created with seed");
        self.get_by_id(id).await
    }

    async fn get_by_id(&self, id: Uuid) -> GatehouseResult<Tenant> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('tenant', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id_str,
        })?;

        Ok(row.into_tenant(id)?)
    }

    async fn get_by_domain(&self, domain: &str) -> GatehouseResult<Tenant> {
        let domain = domain.trim().to_lowercase();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tenant \
                 WHERE domain = $domain",
            )
            .bind(("domain", domain.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: format!("domain={domain}"),
        })?;

        Ok(row.try_into_tenant()?)
    }

    async fn update(&self, id: Uuid, input: UpdateTenant) -> GatehouseResult<Tenant> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        if input.settings.is_some() {
            sets.push("settings = $settings");
        }
        if input.deleted_at.is_some() {
            sets.push("deleted_at = $deleted_at");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('tenant', $id) SET {}",
            sets.join(", ")
        );

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));

        if let Some(name) = input.name {
            builder = builder.bind(("name", name));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str().to_string()));
        }
        if let Some(ref settings) = input.settings {
            builder = builder.bind(("settings", settings_value(settings)?));
        }
        if let Some(deleted_at) = input.deleted_at {
            builder = builder.bind(("deleted_at", deleted_at));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("tenant", e))?;

        let rows: Vec<TenantRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id_str,
        })?;

        Ok(row.into_tenant(id)?)
    }

    async fn delete(&self, id: Uuid) -> GatehouseResult<()> {
        let id_str = id.to_string();

        let mut statements = String::from(
            "BEGIN TRANSACTION;\n\
             DELETE user_capability WHERE user_id IN \
             (SELECT VALUE meta::id(id) FROM user WHERE tenant_id = $id);\n",
        );
        for table in TENANT_SCOPED_TABLES {
            statements.push_str(&format!("DELETE {table} WHERE tenant_id = $id;\n"));
        }
        statements.push_str("DELETE type::record('tenant', $id);\nCOMMIT TRANSACTION;");

        self.db
            .query(statements)
            .bind(("id", id_str))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn list_deleted_before(&self, cutoff: DateTime<Utc>) -> GatehouseResult<Vec<Tenant>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tenant \
                 WHERE status = 'Deleted' AND deleted_at != NONE \
                 AND deleted_at < $cutoff",
            )
            .bind(("cutoff", cutoff))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_tenant().map_err(Into::into))
            .collect()
    }
}
