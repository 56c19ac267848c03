//! Claims assembly.
//!
//! System principals carry `system_roles`/`system_permissions`; tenant
//! principals carry `roles`/`permissions`. The two field pairs are never
//! both populated.

use std::collections::BTreeMap;

use gatehouse_authz::{CapabilityEvaluator, PermissionResolver};
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::models::user::{Principal, PrincipalKind};
use gatehouse_core::repository::Repositories;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

pub const AMR_PASSWORD: &str = "pwd";
pub const AMR_MFA: &str = "mfa";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimSet {
    pub principal_kind: PrincipalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system_permissions: Vec<String>,
    /// Informational only; enforcement re-evaluates capabilities.
    #[serde(default)]
    pub capabilities: BTreeMap<String, bool>,
    pub amr: Vec<String>,
    /// Set when the permission list is larger than the configured
    /// threshold. The list itself is never cut.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub claims_oversized: bool,
}

impl ClaimSet {
    pub fn mfa_verified(&self) -> bool {
        self.amr.iter().any(|m| m == AMR_MFA)
    }

    pub fn to_map(&self) -> GatehouseResult<Map<String, Value>> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(GatehouseError::Internal("claims did not serialize to an object".into())),
            Err(e) => Err(GatehouseError::Internal(format!("claims serialization: {e}"))),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> GatehouseResult<Self> {
        serde_json::from_value(Value::Object(map))
            .map_err(|e| GatehouseError::InvalidSignature(format!("malformed claims: {e}")))
    }
}

pub fn amr(mfa_verified: bool) -> Vec<String> {
    if mfa_verified {
        vec![AMR_PASSWORD.into(), AMR_MFA.into()]
    } else {
        vec![AMR_PASSWORD.into()]
    }
}

#[derive(Clone)]
pub struct ClaimsBuilder<S: Repositories> {
    resolver: PermissionResolver<S>,
    evaluator: CapabilityEvaluator<S>,
    size_warning_bytes: usize,
}

impl<S: Repositories> ClaimsBuilder<S> {
    pub fn new(
        resolver: PermissionResolver<S>,
        evaluator: CapabilityEvaluator<S>,
        size_warning_bytes: usize,
    ) -> Self {
        Self {
            resolver,
            evaluator,
            size_warning_bytes,
        }
    }

    pub async fn build(&self, principal: &Principal, mfa_verified: bool) -> GatehouseResult<ClaimSet> {
        let access = self.resolver.resolve(principal).await?;
        let permissions: Vec<String> = access.permissions.into_iter().collect();

        let mut capabilities = BTreeMap::new();
        for capability in self.evaluator.list_system().await? {
            if !capability.enabled {
                continue;
            }
            let eval = self
                .evaluator
                .evaluate(principal.tenant_id, principal.user_id, &capability.key)
                .await?;
            capabilities.insert(capability.key, eval.can_use);
        }

        let size: usize = permissions.iter().map(|p| p.len() + 3).sum();
        let claims_oversized = size > self.size_warning_bytes;
        if claims_oversized {
            warn!(
                user_id = %principal.user_id,
                permission_count = permissions.len(),
                size,
                threshold = self.size_warning_bytes,
                "permission claims exceed size threshold"
            );
        }

        let (roles, permissions, system_roles, system_permissions) = match principal.kind {
            PrincipalKind::System => (Vec::new(), Vec::new(), access.role_names, permissions),
            PrincipalKind::Tenant => (access.role_names, permissions, Vec::new(), Vec::new()),
        };

        Ok(ClaimSet {
            principal_kind: principal.kind,
            tenant_id: principal.tenant_id,
            roles,
            permissions,
            system_roles,
            system_permissions,
            capabilities,
            amr: amr(mfa_verified),
            claims_oversized,
        })
    }
}
