//! SurrealDB implementation of [`RefreshTokenRepository`].
//!
//! Records are keyed by `jti` and never reused: rotation revokes the
//! presented record and inserts a new one that points back at it.

use chrono::{DateTime, Utc};
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::session::{CreateRefreshToken, RefreshTokenRecord};
use gatehouse_core::repository::RefreshTokenRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::CountRow;
use crate::error::{DbError, parse_opt_uuid, parse_uuid};

#[derive(Debug, SurrealValue)]
struct RefreshTokenRow {
    jti: String,
    user_id: String,
    tenant_id: Option<String>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    parent_jti: Option<String>,
    mfa_verified: bool,
    remember_me: bool,
    revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRow {
    fn try_into_record(self) -> Result<RefreshTokenRecord, DbError> {
        Ok(RefreshTokenRecord {
            jti: parse_uuid(&self.jti, "refresh token")?,
            user_id: parse_uuid(&self.user_id, "user")?,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            parent_jti: parse_opt_uuid(self.parent_jti.as_deref(), "parent refresh token")?,
            mfa_verified: self.mfa_verified,
            remember_me: self.remember_me,
            revoked_at: self.revoked_at,
        })
    }
}

/// SurrealDB implementation of the refresh-token repository.
#[derive(Clone)]
pub struct SurrealRefreshTokenRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealRefreshTokenRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> RefreshTokenRepository for SurrealRefreshTokenRepository<C> {
    async fn create(&self, input: CreateRefreshToken) -> GatehouseResult<RefreshTokenRecord> {
        let jti_str = input.jti.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('refresh_token', $jti) SET \
                 jti = $jti, user_id = $user_id, tenant_id = $tenant_id, \
                 expires_at = $expires_at, parent_jti = $parent_jti, \
                 mfa_verified = $mfa_verified, remember_me = $remember_me",
            )
            .bind(("jti", jti_str.clone()))
            .bind(("user_id", input.user_id.to_string()))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("expires_at", input.expires_at))
            .bind(("parent_jti", input.parent_jti.map(|p| p.to_string())))
            .bind(("mfa_verified", input.mfa_verified))
            .bind(("remember_me", input.remember_me))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("refresh token", e))?;

        let rows: Vec<RefreshTokenRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "refresh token".into(),
            id: jti_str,
        })?;

        Ok(row.try_into_record()?)
    }

    async fn get(&self, jti: Uuid) -> GatehouseResult<RefreshTokenRecord> {
        let jti_str = jti.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('refresh_token', $jti)")
            .bind(("jti", jti_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<RefreshTokenRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "refresh token".into(),
            id: jti_str,
        })?;

        Ok(row.try_into_record()?)
    }

    async fn mark_revoked(&self, jti: Uuid) -> GatehouseResult<bool> {
        let result = self
            .db
            .query(
                "UPDATE type::record('refresh_token', $jti) SET \
                 revoked_at = time::now() WHERE revoked_at = NONE",
            )
            .bind(("jti", jti.to_string()))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<RefreshTokenRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> GatehouseResult<Vec<RefreshTokenRecord>> {
        let result = self
            .db
            .query(
                "UPDATE refresh_token SET revoked_at = time::now() \
                 WHERE user_id = $user_id AND revoked_at = NONE \
                 AND expires_at > time::now()",
            )
            .bind(("user_id", user_id.to_string()))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<RefreshTokenRow> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .map(|r| r.try_into_record().map_err(Into::into))
            .collect()
    }

    async fn delete_expired(&self) -> GatehouseResult<u64> {
        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM refresh_token \
                 WHERE expires_at <= time::now() GROUP ALL",
            )
            .await
            .map_err(DbError::from)?;

        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|c| c.total).unwrap_or(0);

        if total > 0 {
            self.db
                .query("DELETE refresh_token WHERE expires_at <= time::now()")
                .await
                .map_err(DbError::from)?
                .check()
                .map_err(|e| DbError::Migration(e.to_string()))?;
        }

        Ok(total)
    }
}
