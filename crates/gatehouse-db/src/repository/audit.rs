//! SurrealDB implementation of [`AuditLogRepository`]. Append-only.

use chrono::{DateTime, Utc};
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::audit::{ActorType, AuditLogEntry, AuditOutcome, CreateAuditLogEntry};
use gatehouse_core::repository::{AuditLogFilter, AuditLogRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_opt_uuid, parse_uuid};

const DEFAULT_LIST_LIMIT: u64 = 100;

#[derive(Debug, SurrealValue)]
struct AuditRow {
    tenant_id: Option<String>,
    actor_id: String,
    actor_type: String,
    action: String,
    target_id: Option<String>,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct AuditRowWithId {
    record_id: String,
    tenant_id: Option<String>,
    actor_id: String,
    actor_type: String,
    action: String,
    target_id: Option<String>,
    outcome: String,
    metadata: serde_json::Value,
    timestamp: DateTime<Utc>,
}

fn parse_actor_type(s: &str) -> Result<ActorType, DbError> {
    ActorType::parse(s).ok_or_else(|| DbError::Corrupt(format!("unknown actor type: {s}")))
}

fn parse_outcome(s: &str) -> Result<AuditOutcome, DbError> {
    AuditOutcome::parse(s).ok_or_else(|| DbError::Corrupt(format!("unknown audit outcome: {s}")))
}

impl AuditRow {
    fn into_entry(self, id: Uuid) -> Result<AuditLogEntry, DbError> {
        Ok(AuditLogEntry {
            id,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            actor_id: parse_uuid(&self.actor_id, "actor")?,
            actor_type: parse_actor_type(&self.actor_type)?,
            action: self.action,
            target_id: parse_opt_uuid(self.target_id.as_deref(), "target")?,
            outcome: parse_outcome(&self.outcome)?,
            metadata: self.metadata,
            timestamp: self.timestamp,
        })
    }
}

impl AuditRowWithId {
    fn try_into_entry(self) -> Result<AuditLogEntry, DbError> {
        let id = parse_uuid(&self.record_id, "audit log")?;
        AuditRow {
            tenant_id: self.tenant_id,
            actor_id: self.actor_id,
            actor_type: self.actor_type,
            action: self.action,
            target_id: self.target_id,
            outcome: self.outcome,
            metadata: self.metadata,
            timestamp: self.timestamp,
        }
        .into_entry(id)
    }
}

/// SurrealDB implementation of the audit log repository.
#[derive(Clone)]
pub struct SurrealAuditLogRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditLogRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditLogRepository for SurrealAuditLogRepository<C> {
    async fn append(&self, input: CreateAuditLogEntry) -> GatehouseResult<AuditLogEntry> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let metadata = if input.metadata.is_object() {
            input.metadata
        } else {
            serde_json::Value::Object(Default::default())
        };

        let result = self
            .db
            .query(
                "CREATE type::record('audit_log', $id) SET \
                 tenant_id = $tenant_id, actor_id = $actor_id, \
                 actor_type = $actor_type, action = $action, \
                 target_id = $target_id, outcome = $outcome, \
                 metadata = $metadata",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("actor_id", input.actor.id.to_string()))
            .bind(("actor_type", input.actor.actor_type.as_str().to_string()))
            .bind(("action", input.action))
            .bind(("target_id", input.target_id.map(|t| t.to_string())))
            .bind(("outcome", input.outcome.as_str().to_string()))
            .bind(("metadata", metadata))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<AuditRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "audit log".into(),
            id: id_str,
        })?;

        Ok(row.into_entry(id)?)
    }

    async fn list(
        &self,
        tenant_id: Option<Uuid>,
        filter: AuditLogFilter,
    ) -> GatehouseResult<Vec<AuditLogEntry>> {
        let mut conditions = vec!["tenant_id = $tenant_id"];
        if filter.actor_id.is_some() {
            conditions.push("actor_id = $actor_id");
        }
        if filter.action.is_some() {
            conditions.push("action = $action");
        }
        if filter.target_id.is_some() {
            conditions.push("target_id = $target_id");
        }

        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM audit_log \
             WHERE {} ORDER BY timestamp DESC LIMIT $limit",
            conditions.join(" AND ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("limit", filter.limit.unwrap_or(DEFAULT_LIST_LIMIT)));

        if let Some(actor_id) = filter.actor_id {
            builder = builder.bind(("actor_id", actor_id.to_string()));
        }
        if let Some(action) = filter.action {
            builder = builder.bind(("action", action));
        }
        if let Some(target_id) = filter.target_id {
            builder = builder.bind(("target_id", target_id.to_string()));
        }

        let mut result = builder.await.map_err(DbError::from)?;
        let rows: Vec<AuditRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_entry().map_err(Into::into))
            .collect()
    }
}
