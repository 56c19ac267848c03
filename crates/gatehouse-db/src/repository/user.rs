//! SurrealDB implementation of [`UserRepository`] and [`CredentialStore`].
//!
//! Users of both planes share one table; the system plane is the set of
//! rows whose `tenant_id` is NONE. Every lookup binds the plane, so a
//! tenant-scoped query cannot match a system principal and vice versa.

use chrono::{DateTime, Utc};
use gatehouse_core::error::GatehouseResult;
use gatehouse_core::models::user::{
    CreateUser, PrincipalKind, UpdateUser, User, UserStatus, normalize_email,
};
use gatehouse_core::models::seed::assignment_id;
use gatehouse_core::repository::{CredentialStore, UserRepository};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use crate::error::{DbError, parse_opt_uuid, parse_uuid};
use crate::password::{hash_password, verify_password};

const CREATE_USER: &str = "CREATE type::record('user', $id) SET \
     kind = $kind, tenant_id = $tenant_id, \
     username = $username, email = $email, \
     email_normalized = $email_normalized, \
     password_hash = $password_hash, \
     status = $status, \
     mfa_enabled = false, \
     recovery_code_hashes = [], \
     failed_login_attempts = 0, \
     locked_until = NONE, \
     lockout_count = 0";

#[derive(Debug, SurrealValue)]
struct UserRow {
    kind: String,
    tenant_id: Option<String>,
    username: String,
    email: String,
    password_hash: String,
    status: String,
    mfa_enabled: bool,
    mfa_secret: Option<String>,
    recovery_code_hashes: Vec<String>,
    failed_login_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    lockout_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct UserRowWithId {
    record_id: String,
    kind: String,
    tenant_id: Option<String>,
    username: String,
    email: String,
    password_hash: String,
    status: String,
    mfa_enabled: bool,
    mfa_secret: Option<String>,
    recovery_code_hashes: Vec<String>,
    failed_login_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    lockout_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct PasswordRow {
    password_hash: String,
}

#[derive(Debug, SurrealValue)]
struct AttemptsRow {
    failed_login_attempts: u32,
}

fn parse_status(s: &str) -> Result<UserStatus, DbError> {
    UserStatus::parse(s).ok_or_else(|| DbError::Corrupt(format!("unknown user status: {s}")))
}

fn parse_kind(s: &str) -> Result<PrincipalKind, DbError> {
    PrincipalKind::parse(s).ok_or_else(|| DbError::Corrupt(format!("unknown principal kind: {s}")))
}

impl UserRow {
    fn into_user(self, id: Uuid) -> Result<User, DbError> {
        Ok(User {
            id,
            kind: parse_kind(&self.kind)?,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            status: parse_status(&self.status)?,
            mfa_enabled: self.mfa_enabled,
            mfa_secret: self.mfa_secret,
            recovery_code_hashes: self.recovery_code_hashes,
            failed_login_attempts: self.failed_login_attempts,
            locked_until: self.locked_until,
            lockout_count: self.lockout_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl UserRowWithId {
    fn try_into_user(self) -> Result<User, DbError> {
        Ok(User {
            id: parse_uuid(&self.record_id, "user")?,
            kind: parse_kind(&self.kind)?,
            tenant_id: parse_opt_uuid(self.tenant_id.as_deref(), "tenant")?,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            status: parse_status(&self.status)?,
            mfa_enabled: self.mfa_enabled,
            mfa_secret: self.mfa_secret,
            recovery_code_hashes: self.recovery_code_hashes,
            failed_login_attempts: self.failed_login_attempts,
            locked_until: self.locked_until,
            lockout_count: self.lockout_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn not_found(id: impl Into<String>) -> DbError {
    DbError::NotFound {
        entity: "user".into(),
        id: id.into(),
    }
}

/// SurrealDB implementation of the User repository.
#[derive(Clone)]
pub struct SurrealUserRepository<C: Connection> {
    db: Surreal<C>,
    /// Optional server-side pepper for password hashing.
    pepper: Option<String>,
}

impl<C: Connection> SurrealUserRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db, pepper: None }
    }

    pub fn with_pepper(db: Surreal<C>, pepper: String) -> Self {
        Self {
            db,
            pepper: Some(pepper),
        }
    }

    async fn find_one(
        &self,
        column: &str,
        tenant_id: Option<Uuid>,
        value: String,
    ) -> GatehouseResult<Option<User>> {
        let query = format!(
            "SELECT meta::id(id) AS record_id, * FROM user \
             WHERE tenant_id = $tenant_id AND {column} = $value"
        );
        let mut result = self
            .db
            .query(&query)
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("value", value))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRowWithId> = result.take(0).map_err(DbError::from)?;
        rows.into_iter()
            .next()
            .map(|r| r.try_into_user().map_err(Into::into))
            .transpose()
    }

    /// Run a single-record UPDATE and return the changed row.
    async fn update_returning(&self, id: Uuid, set_clause: &str) -> GatehouseResult<User> {
        let id_str = id.to_string();
        let query = format!(
            "UPDATE type::record('user', $id) SET {set_clause}, updated_at = time::now()"
        );
        let result = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("user", e))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id_str))?;
        Ok(row.into_user(id)?)
    }
}

impl<C: Connection> UserRepository for SurrealUserRepository<C> {
    async fn create(&self, input: CreateUser) -> GatehouseResult<User> {
        input.validate()?;

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let password_hash = hash_password(&input.password, self.pepper.as_deref())?;
        let status = input.status.unwrap_or(UserStatus::Pending);

        let result = self
            .db
            .query(CREATE_USER)
            .bind(("id", id_str.clone()))
            .bind(("kind", input.kind.as_str().to_string()))
            .bind(("tenant_id", input.tenant_id.map(|t| t.to_string())))
            .bind(("username", input.username))
            .bind(("email_normalized", normalize_email(&input.email)))
            .bind(("email", input.email))
            .bind(("password_hash", password_hash))
            .bind(("status", status.as_str().to_string()))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("user", e))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id_str))?;

        Ok(row.into_user(id)?)
    }

    async fn create_claiming_role(&self, input: CreateUser, role_id: Uuid) -> GatehouseResult<User> {
        input.validate()?;

        let id = Uuid::new_v4();
        let tenant_id = input.tenant_id;
        let password_hash = hash_password(&input.password, self.pepper.as_deref())?;
        let status = input.status.unwrap_or(UserStatus::Pending);

        let sql = format!(
            "BEGIN TRANSACTION; \
             {CREATE_USER}; \
             IF count((SELECT id FROM user_role WHERE role_id = $role_id)) = 0 {{ \
                 UPSERT type::record('user_role', $assignment) SET \
                 tenant_id = $tenant_id, user_id = $id, role_id = $role_id \
             }}; \
             COMMIT TRANSACTION;"
        );
        self.db
            .query(sql)
            .bind(("id", id.to_string()))
            .bind(("kind", input.kind.as_str().to_string()))
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .bind(("username", input.username))
            .bind(("email_normalized", normalize_email(&input.email)))
            .bind(("email", input.email))
            .bind(("password_hash", password_hash))
            .bind(("status", status.as_str().to_string()))
            .bind(("role_id", role_id.to_string()))
            .bind(("assignment", assignment_id(id, role_id).to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement("user", e))?;

        self.get_by_id(tenant_id, id).await
    }

    async fn get_by_id(&self, tenant_id: Option<Uuid>, id: Uuid) -> GatehouseResult<User> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('user', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id_str))?;

        Ok(row.into_user(id)?)
    }

    async fn get_by_username(
        &self,
        tenant_id: Option<Uuid>,
        username: &str,
    ) -> GatehouseResult<User> {
        self.find_one("username", tenant_id, username.to_string())
            .await?
            .ok_or_else(|| not_found(format!("username={username}")).into())
    }

    async fn get_by_email(&self, tenant_id: Option<Uuid>, email: &str) -> GatehouseResult<User> {
        self.find_one("email_normalized", tenant_id, normalize_email(email))
            .await?
            .ok_or_else(|| not_found(format!("email={email}")).into())
    }

    async fn update(
        &self,
        tenant_id: Option<Uuid>,
        id: Uuid,
        input: UpdateUser,
    ) -> GatehouseResult<User> {
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.email.is_some() {
            sets.push("email = $email, email_normalized = $email_normalized");
        }
        if input.status.is_some() {
            sets.push("status = $status");
        }
        if input.mfa_enabled.is_some() {
            sets.push("mfa_enabled = $mfa_enabled");
        }
        if input.mfa_secret.is_some() {
            sets.push("mfa_secret = $mfa_secret");
        }
        if input.recovery_code_hashes.is_some() {
            sets.push("recovery_code_hashes = $recovery_code_hashes");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('user', $id) SET {} \
             WHERE tenant_id = $tenant_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.map(|t| t.to_string())));

        if let Some(email) = input.email {
            builder = builder
                .bind(("email_normalized", normalize_email(&email)))
                .bind(("email", email));
        }
        if let Some(status) = input.status {
            builder = builder.bind(("status", status.as_str().to_string()));
        }
        if let Some(mfa_enabled) = input.mfa_enabled {
            builder = builder.bind(("mfa_enabled", mfa_enabled));
        }
        if let Some(mfa_secret) = input.mfa_secret {
            // Some(Some(v)) = set, Some(None) = clear
            builder = builder.bind(("mfa_secret", mfa_secret));
        }
        if let Some(hashes) = input.recovery_code_hashes {
            builder = builder.bind(("recovery_code_hashes", hashes));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement("user", e))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id_str))?;

        Ok(row.into_user(id)?)
    }

    async fn consume_recovery_code(&self, id: Uuid, code_hash: &str) -> GatehouseResult<bool> {
        let result = self
            .db
            .query(
                "UPDATE type::record('user', $id) SET \
                 recovery_code_hashes -= $hash, updated_at = time::now() \
                 WHERE recovery_code_hashes CONTAINS $hash",
            )
            .bind(("id", id.to_string()))
            .bind(("hash", code_hash.to_string()))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<UserRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }
}

impl<C: Connection> CredentialStore for SurrealUserRepository<C> {
    async fn verify_password(&self, user_id: Uuid, password: &str) -> GatehouseResult<bool> {
        let id_str = user_id.to_string();

        let mut result = self
            .db
            .query("SELECT password_hash FROM type::record('user', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PasswordRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id_str))?;

        Ok(verify_password(password, &row.password_hash, self.pepper.as_deref())?)
    }

    async fn set_password(&self, user_id: Uuid, password: &str) -> GatehouseResult<()> {
        let hash = hash_password(password, self.pepper.as_deref())?;

        let result = self
            .db
            .query(
                "UPDATE type::record('user', $id) SET \
                 password_hash = $hash, updated_at = time::now()",
            )
            .bind(("id", user_id.to_string()))
            .bind(("hash", hash))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<PasswordRow> = result.take(0).map_err(DbError::from)?;
        if rows.is_empty() {
            return Err(not_found(user_id.to_string()).into());
        }
        Ok(())
    }

    async fn increment_failed_attempts(&self, user_id: Uuid) -> GatehouseResult<u32> {
        let id_str = user_id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('user', $id) SET \
                 failed_login_attempts += 1, updated_at = time::now() \
                 RETURN AFTER",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;

        let rows: Vec<AttemptsRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| not_found(id_str))?;
        Ok(row.failed_login_attempts)
    }

    async fn reset_failed_attempts(&self, user_id: Uuid) -> GatehouseResult<()> {
        self.update_returning(user_id, "failed_login_attempts = 0, lockout_count = 0")
            .await
            .map(|_| ())
    }

    async fn set_locked(&self, user_id: Uuid, until: DateTime<Utc>) -> GatehouseResult<()> {
        // Only the first caller to cross the threshold bumps the counter.
        self.db
            .query(
                "UPDATE type::record('user', $id) SET \
                 status = 'Locked', locked_until = $until, \
                 lockout_count += 1, updated_at = time::now() \
                 WHERE status != 'Locked'",
            )
            .bind(("id", user_id.to_string()))
            .bind(("until", until))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::Migration(e.to_string()))?;
        Ok(())
    }

    async fn unlock(&self, user_id: Uuid) -> GatehouseResult<()> {
        self.update_returning(
            user_id,
            "status = 'Active', locked_until = NONE, failed_login_attempts = 0",
        )
        .await
        .map(|_| ())
    }
}
