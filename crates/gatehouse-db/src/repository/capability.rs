//! SurrealDB implementation of [`CapabilityRepository`].
//!
//! Each layer has its own table. Records are keyed by the capability
//! key, prefixed with the owning tenant or user id for the lower
//! layers, so writes are upserts.

use chrono::{DateTime, Utc};
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::capability::{
    SystemCapability, TenantCapabilityGrant, TenantFeature, UpsertCapabilityGrant,
    UpsertSystemCapability, UpsertTenantFeature, UpsertUserCapabilityState, UserCapabilityState,
};
use gatehouse_core::repository::CapabilityRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_uuid};

#[derive(Debug, SurrealValue)]
struct SystemCapabilityRow {
    key: String,
    enabled: bool,
    requires_enrollment: bool,
    default_config: serde_json::Value,
    updated_at: DateTime<Utc>,
}

/// Shared by the tenant grant and tenant feature tables.
#[derive(Debug, SurrealValue)]
struct TenantLayerRow {
    tenant_id: String,
    key: String,
    enabled: bool,
    config: serde_json::Value,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct UserStateRow {
    user_id: String,
    key: String,
    enrolled: bool,
    state: serde_json::Value,
    updated_at: DateTime<Utc>,
}

impl From<SystemCapabilityRow> for SystemCapability {
    fn from(row: SystemCapabilityRow) -> Self {
        SystemCapability {
            key: row.key,
            enabled: row.enabled,
            requires_enrollment: row.requires_enrollment,
            default_config: row.default_config,
            updated_at: row.updated_at,
        }
    }
}

impl TenantLayerRow {
    fn into_grant(self) -> Result<TenantCapabilityGrant, DbError> {
        Ok(TenantCapabilityGrant {
            tenant_id: parse_uuid(&self.tenant_id, "tenant")?,
            key: self.key,
            enabled: self.enabled,
            config: self.config,
            updated_at: self.updated_at,
        })
    }

    fn into_feature(self) -> Result<TenantFeature, DbError> {
        Ok(TenantFeature {
            tenant_id: parse_uuid(&self.tenant_id, "tenant")?,
            key: self.key,
            enabled: self.enabled,
            config: self.config,
            updated_at: self.updated_at,
        })
    }
}

impl UserStateRow {
    fn into_state(self) -> Result<UserCapabilityState, DbError> {
        Ok(UserCapabilityState {
            user_id: parse_uuid(&self.user_id, "user")?,
            key: self.key,
            enrolled: self.enrolled,
            state: self.state,
            updated_at: self.updated_at,
        })
    }
}

fn scoped_id(owner: Uuid, key: &str) -> String {
    format!("{owner}/{key}")
}

/// Config and state columns are objects; anything else is stored empty.
fn as_object(value: serde_json::Value) -> serde_json::Value {
    if value.is_object() {
        value
    } else {
        serde_json::Value::Object(Default::default())
    }
}

/// SurrealDB implementation of the Capability repository.
#[derive(Clone)]
pub struct SurrealCapabilityRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealCapabilityRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn get_tenant_layer(
        &self,
        table: &'static str,
        tenant_id: Uuid,
        key: &str,
    ) -> GatehouseResult<Option<TenantLayerRow>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record($table, $id)")
            .bind(("table", table))
            .bind(("id", scoped_id(tenant_id, key)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantLayerRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_tenant_layer(
        &self,
        table: &'static str,
        tenant_id: Uuid,
        key: String,
        enabled: bool,
        config: serde_json::Value,
    ) -> GatehouseResult<TenantLayerRow> {
        let id = scoped_id(tenant_id, &key);

        let result = self
            .db
            .query(
                "UPSERT type::record($table, $id) SET \
                 tenant_id = $tenant_id, key = $key, enabled = $enabled, \
                 config = $config, updated_at = time::now()",
            )
            .bind(("table", table))
            .bind(("id", id.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("key", key))
            .bind(("enabled", enabled))
            .bind(("config", as_object(config)))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<TenantLayerRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: table.into(),
            id,
        })?;
        Ok(row)
    }
}

impl<C: Connection> CapabilityRepository for SurrealCapabilityRepository<C> {
    async fn get_system(&self, key: &str) -> GatehouseResult<Option<SystemCapability>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('system_capability', $key)")
            .bind(("key", key.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemCapabilityRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().next().map(Into::into))
    }

    async fn upsert_system(
        &self,
        input: UpsertSystemCapability,
    ) -> GatehouseResult<SystemCapability> {
        let result = self
            .db
            .query(
                "UPSERT type::record('system_capability', $key) SET \
                 key = $key, enabled = $enabled, \
                 requires_enrollment = $requires_enrollment, \
                 default_config = $default_config, updated_at = time::now()",
            )
            .bind(("key", input.key.clone()))
            .bind(("enabled", input.enabled))
            .bind(("requires_enrollment", input.requires_enrollment))
            .bind(("default_config", as_object(input.default_config)))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<SystemCapabilityRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "system_capability".into(),
            id: input.key,
        })?;
        Ok(row.into())
    }

    async fn list_system(&self) -> GatehouseResult<Vec<SystemCapability>> {
        let mut result = self
            .db
            .query("SELECT * FROM system_capability ORDER BY key ASC")
            .await
            .map_err(DbError::from)?;

        let rows: Vec<SystemCapabilityRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_grant(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> GatehouseResult<Option<TenantCapabilityGrant>> {
        self.get_tenant_layer("tenant_capability", tenant_id, key)
            .await?
            .map(|r| r.into_grant().map_err(Into::into))
            .transpose()
    }

    async fn upsert_grant(
        &self,
        input: UpsertCapabilityGrant,
    ) -> GatehouseResult<TenantCapabilityGrant> {
        let row = self
            .upsert_tenant_layer(
                "tenant_capability",
                input.tenant_id,
                input.key,
                input.enabled,
                input.config,
            )
            .await?;
        Ok(row.into_grant()?)
    }

    async fn get_feature(
        &self,
        tenant_id: Uuid,
        key: &str,
    ) -> GatehouseResult<Option<TenantFeature>> {
        self.get_tenant_layer("tenant_feature", tenant_id, key)
            .await?
            .map(|r| r.into_feature().map_err(Into::into))
            .transpose()
    }

    async fn upsert_feature(&self, input: UpsertTenantFeature) -> GatehouseResult<TenantFeature> {
        let row = self
            .upsert_tenant_layer(
                "tenant_feature",
                input.tenant_id,
                input.key,
                input.enabled,
                input.config,
            )
            .await?;
        Ok(row.into_feature()?)
    }

    async fn get_user_state(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> GatehouseResult<Option<UserCapabilityState>> {
        let mut result = self
            .db
            .query("SELECT * FROM type::record('user_capability', $id)")
            .bind(("id", scoped_id(user_id, key)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserStateRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(|r| r.into_state().map_err(Into::into))
            .transpose()
    }

    async fn upsert_user_state(
        &self,
        input: UpsertUserCapabilityState,
    ) -> GatehouseResult<UserCapabilityState> {
        let id = scoped_id(input.user_id, &input.key);

        let result = self
            .db
            .query(
                "UPSERT type::record('user_capability', $id) SET \
                 user_id = $user_id, key = $key, enrolled = $enrolled, \
                 state = $state, updated_at = time::now()",
            )
            .bind(("id", id.clone()))
            .bind(("user_id", input.user_id.to_string()))
            .bind(("key", input.key))
            .bind(("enrolled", input.enrolled))
            .bind(("state", as_object(input.state)))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<UserStateRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "user_capability".into(),
            id,
        })?;
        Ok(row.into_state()?)
    }

    async fn delete_user_state(&self, user_id: Uuid, key: &str) -> GatehouseResult<()> {
        self.db
            .query("DELETE type::record('user_capability', $id)")
            .bind(("id", scoped_id(user_id, key)))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }
}
