//! Ephemeral MFA challenge sessions and persistent refresh-token records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A pending second-factor challenge.
///
/// Lives only in the ephemeral store. The serialized value is immutable
/// once written; attempts are counted under a separate key so the
/// session itself can be consumed with compare-and-delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MfaSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Lifetime variant to use once the challenge is passed.
    pub remember_me: bool,
}

impl MfaSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Predecessor in the rotation chain.
    pub parent_jti: Option<Uuid>,
    /// Copied from the parent on rotation; never upgraded.
    pub mfa_verified: bool,
    pub remember_me: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRefreshToken {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub parent_jti: Option<Uuid>,
    pub mfa_verified: bool,
    pub remember_me: bool,
}
