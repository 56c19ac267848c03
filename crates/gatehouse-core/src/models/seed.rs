//! Deterministic identifiers and the write plan used to seed a tenant.
//!
//! Predefined roles, predefined permissions and every role link use
//! name-derived UUIDv5 ids so that repeated or concurrent writes land on
//! the same record instead of producing duplicates.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_03c2_8e4b_4d7a_9c55_2b8e_1f0d_7e31);

fn scope_part(tenant_id: Option<Uuid>) -> String {
    tenant_id.map_or_else(|| "system".to_string(), |t| t.to_string())
}

/// Id of a predefined role, derived from its scope and name.
pub fn role_id(tenant_id: Option<Uuid>, name: &str) -> Uuid {
    let name = format!("role/{}/{name}", scope_part(tenant_id));
    Uuid::new_v5(&NAMESPACE, name.as_bytes())
}

/// Id of a permission, derived from its scope and key.
pub fn permission_id(tenant_id: Option<Uuid>, key: &str) -> Uuid {
    let name = format!("permission/{}/{key}", scope_part(tenant_id));
    Uuid::new_v5(&NAMESPACE, name.as_bytes())
}

/// Id of a role→permission link.
pub fn grant_id(role_id: Uuid, permission_id: Uuid) -> Uuid {
    let name = format!("grant/{role_id}/{permission_id}");
    Uuid::new_v5(&NAMESPACE, name.as_bytes())
}

/// Id of a user→role assignment.
pub fn assignment_id(user_id: Uuid, role_id: Uuid) -> Uuid {
    let name = format!("assignment/{user_id}/{role_id}");
    Uuid::new_v5(&NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedRole {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedPermission {
    pub id: Uuid,
    pub key: String,
    pub description: String,
}

/// Everything the initializer writes for one tenant, applied in a
/// single store transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantSeed {
    pub tenant_id: Uuid,
    pub roles: Vec<SeedRole>,
    pub permissions: Vec<SeedPermission>,
    /// `(role_id, permission_id)` pairs.
    pub grants: Vec<(Uuid, Uuid)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_scoped() {
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        assert_eq!(role_id(Some(t1), "owner"), role_id(Some(t1), "owner"));
        assert_ne!(role_id(Some(t1), "owner"), role_id(Some(t2), "owner"));
        assert_ne!(role_id(None, "owner"), role_id(Some(t1), "owner"));
        assert_ne!(
            permission_id(Some(t1), "tenant.users.read"),
            role_id(Some(t1), "tenant.users.read")
        );
    }
}
