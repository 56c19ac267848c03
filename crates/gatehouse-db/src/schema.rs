//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Enums are stored as strings with
//! ASSERT constraints for validation.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: SCHEMA_V1,
}];

// -----------------------------------------------------------------------
// Schema v1 — initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Tenants (global scope)
-- =======================================================================
DEFINE TABLE tenant SCHEMAFULL;
DEFINE FIELD domain ON TABLE tenant TYPE string;
DEFINE FIELD name ON TABLE tenant TYPE string;
DEFINE FIELD status ON TABLE tenant TYPE string \
    ASSERT $value IN ['Active', 'Suspended', 'Deleted'];
DEFINE FIELD settings ON TABLE tenant TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD created_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD deleted_at ON TABLE tenant TYPE option<datetime>;
DEFINE INDEX idx_tenant_domain ON TABLE tenant COLUMNS domain UNIQUE;

-- =======================================================================
-- Users (system plane when tenant_id is NONE, tenant plane otherwise)
-- =======================================================================
DEFINE TABLE user SCHEMAFULL;
DEFINE FIELD kind ON TABLE user TYPE string \
    ASSERT $value IN ['System', 'Tenant'];
DEFINE FIELD tenant_id ON TABLE user TYPE option<string>;
DEFINE FIELD username ON TABLE user TYPE string;
DEFINE FIELD email ON TABLE user TYPE string;
DEFINE FIELD email_normalized ON TABLE user TYPE string;
DEFINE FIELD password_hash ON TABLE user TYPE string;
DEFINE FIELD status ON TABLE user TYPE string \
    ASSERT $value IN ['Active', 'Disabled', 'Locked', 'Pending'];
DEFINE FIELD mfa_enabled ON TABLE user TYPE bool DEFAULT false;
DEFINE FIELD mfa_secret ON TABLE user TYPE option<string>;
DEFINE FIELD recovery_code_hashes ON TABLE user TYPE array<string> \
    DEFAULT [];
DEFINE FIELD failed_login_attempts ON TABLE user TYPE int DEFAULT 0;
DEFINE FIELD locked_until ON TABLE user TYPE option<datetime>;
DEFINE FIELD lockout_count ON TABLE user TYPE int DEFAULT 0;
DEFINE FIELD created_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE user TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_tenant_username ON TABLE user \
    COLUMNS tenant_id, username UNIQUE;
DEFINE INDEX idx_user_tenant_email ON TABLE user \
    COLUMNS tenant_id, email_normalized UNIQUE;

-- =======================================================================
-- Roles and permissions (same plane rule as users)
-- =======================================================================
DEFINE TABLE role SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE role TYPE option<string>;
DEFINE FIELD name ON TABLE role TYPE string;
DEFINE FIELD description ON TABLE role TYPE string DEFAULT '';
DEFINE FIELD is_system ON TABLE role TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE role TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_tenant_name ON TABLE role \
    COLUMNS tenant_id, name UNIQUE;

DEFINE TABLE permission SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE permission TYPE option<string>;
DEFINE FIELD key ON TABLE permission TYPE string;
DEFINE FIELD description ON TABLE permission TYPE string DEFAULT '';
DEFINE FIELD is_system ON TABLE permission TYPE bool DEFAULT false;
DEFINE FIELD created_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_permission_tenant_key ON TABLE permission \
    COLUMNS tenant_id, key UNIQUE;

-- Role -> Permission links (deterministic ids, see models::seed)
DEFINE TABLE role_permission SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE role_permission TYPE option<string>;
DEFINE FIELD role_id ON TABLE role_permission TYPE string;
DEFINE FIELD permission_id ON TABLE role_permission TYPE string;
DEFINE FIELD created_at ON TABLE role_permission TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_role_permission_role ON TABLE role_permission \
    COLUMNS role_id;
DEFINE INDEX idx_role_permission_permission ON TABLE role_permission \
    COLUMNS permission_id;
DEFINE INDEX idx_role_permission_tenant ON TABLE role_permission \
    COLUMNS tenant_id;

-- User -> Role assignments
DEFINE TABLE user_role SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE user_role TYPE option<string>;
DEFINE FIELD user_id ON TABLE user_role TYPE string;
DEFINE FIELD role_id ON TABLE user_role TYPE string;
DEFINE FIELD created_at ON TABLE user_role TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_role_user ON TABLE user_role COLUMNS user_id;
DEFINE INDEX idx_user_role_role ON TABLE user_role COLUMNS role_id;

-- =======================================================================
-- Capability layers
-- =======================================================================
DEFINE TABLE system_capability SCHEMAFULL;
DEFINE FIELD key ON TABLE system_capability TYPE string;
DEFINE FIELD enabled ON TABLE system_capability TYPE bool;
DEFINE FIELD requires_enrollment ON TABLE system_capability TYPE bool \
    DEFAULT false;
DEFINE FIELD default_config ON TABLE system_capability \
    TYPE object FLEXIBLE DEFAULT {};
DEFINE FIELD updated_at ON TABLE system_capability TYPE datetime \
    DEFAULT time::now();

DEFINE TABLE tenant_capability SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE tenant_capability TYPE string;
DEFINE FIELD key ON TABLE tenant_capability TYPE string;
DEFINE FIELD enabled ON TABLE tenant_capability TYPE bool;
DEFINE FIELD config ON TABLE tenant_capability TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD updated_at ON TABLE tenant_capability TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tenant_capability_tenant ON TABLE tenant_capability \
    COLUMNS tenant_id;

DEFINE TABLE tenant_feature SCHEMAFULL;
DEFINE FIELD tenant_id ON TABLE tenant_feature TYPE string;
DEFINE FIELD key ON TABLE tenant_feature TYPE string;
DEFINE FIELD enabled ON TABLE tenant_feature TYPE bool;
DEFINE FIELD config ON TABLE tenant_feature TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD updated_at ON TABLE tenant_feature TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_tenant_feature_tenant ON TABLE tenant_feature \
    COLUMNS tenant_id;

DEFINE TABLE user_capability SCHEMAFULL;
DEFINE FIELD user_id ON TABLE user_capability TYPE string;
DEFINE FIELD key ON TABLE user_capability TYPE string;
DEFINE FIELD enrolled ON TABLE user_capability TYPE bool DEFAULT false;
DEFINE FIELD state ON TABLE user_capability TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD updated_at ON TABLE user_capability TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_user_capability_user ON TABLE user_capability \
    COLUMNS user_id;

-- =======================================================================
-- Refresh tokens (record id = jti)
-- =======================================================================
DEFINE TABLE refresh_token SCHEMAFULL;
DEFINE FIELD jti ON TABLE refresh_token TYPE string;
DEFINE FIELD user_id ON TABLE refresh_token TYPE string;
DEFINE FIELD tenant_id ON TABLE refresh_token TYPE option<string>;
DEFINE FIELD issued_at ON TABLE refresh_token TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD expires_at ON TABLE refresh_token TYPE datetime;
DEFINE FIELD parent_jti ON TABLE refresh_token TYPE option<string>;
DEFINE FIELD mfa_verified ON TABLE refresh_token TYPE bool;
DEFINE FIELD remember_me ON TABLE refresh_token TYPE bool DEFAULT false;
DEFINE FIELD revoked_at ON TABLE refresh_token TYPE option<datetime>;
DEFINE INDEX idx_refresh_token_user ON TABLE refresh_token \
    COLUMNS user_id;
DEFINE INDEX idx_refresh_token_expires ON TABLE refresh_token \
    COLUMNS expires_at;

-- =======================================================================
-- Audit log (append-only)
-- =======================================================================
DEFINE TABLE audit_log SCHEMAFULL \
    PERMISSIONS \
        FOR select FULL \
        FOR create FULL \
        FOR update NONE \
        FOR delete NONE;
DEFINE FIELD tenant_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD actor_id ON TABLE audit_log TYPE string;
DEFINE FIELD actor_type ON TABLE audit_log TYPE string \
    ASSERT $value IN ['User', 'System'];
DEFINE FIELD action ON TABLE audit_log TYPE string;
DEFINE FIELD target_id ON TABLE audit_log TYPE option<string>;
DEFINE FIELD outcome ON TABLE audit_log TYPE string \
    ASSERT $value IN ['Success', 'Failure', 'Denied'];
DEFINE FIELD metadata ON TABLE audit_log TYPE object FLEXIBLE \
    DEFAULT {};
DEFINE FIELD timestamp ON TABLE audit_log TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_audit_log_tenant_time ON TABLE audit_log \
    COLUMNS tenant_id, timestamp;
DEFINE INDEX idx_audit_log_actor ON TABLE audit_log COLUMNS actor_id;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum.
/// All DEFINE statements are idempotent so re-running is safe.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    // Ensure migration tracking table exists (idempotent).
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    // Determine current schema version.
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    let current_version = records.first().map(|m| m.version).unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            db.query(migration.sql).await?.check().map_err(|e| {
                DbError::Migration(format!(
                    "Migration v{} '{}' failed: {}",
                    migration.version, migration.name, e,
                ))
            })?;

            // Record the applied migration.
            db.query(
                "CREATE _migration SET version = $version, \
                 name = $name",
            )
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e,
                ))
            })?;

            info!(
                version = migration.version,
                "Migration applied successfully"
            );
        }
    }

    Ok(())
}

/// Returns the raw schema DDL for version 1.
///
/// Exposed for testing with in-memory SurrealDB instances that
/// bypass the migration runner.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
