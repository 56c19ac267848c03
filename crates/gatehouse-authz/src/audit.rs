//! Audit and scope helpers shared by the authorization services.

use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::models::audit::{Actor, AuditOutcome, CreateAuditLogEntry};
use gatehouse_core::models::user::{Principal, PrincipalKind};
use gatehouse_core::repository::{AuditLogRepository, Repositories};
use tracing::debug;
use uuid::Uuid;

use crate::rbac::effective_access;

/// Append an audit entry attributed to `actor`.
pub async fn record<S: Repositories>(
    store: &S,
    actor: &Principal,
    tenant_id: Option<Uuid>,
    action: &str,
    target_id: Option<Uuid>,
    metadata: serde_json::Value,
) -> GatehouseResult<()> {
    store
        .audit()
        .append(CreateAuditLogEntry {
            tenant_id,
            actor: Actor::user(actor.user_id),
            action: action.to_string(),
            target_id,
            outcome: AuditOutcome::Success,
            metadata,
        })
        .await
        .map(|_| ())
}

/// A system principal may act on any plane; a tenant principal only
/// on its own tenant.
pub fn ensure_actor_scope(
    actor: &Principal,
    tenant_id: Option<Uuid>,
) -> GatehouseResult<()> {
    match actor.kind {
        PrincipalKind::System => Ok(()),
        PrincipalKind::Tenant if tenant_id.is_some() && actor.tenant_id == tenant_id => Ok(()),
        PrincipalKind::Tenant => Err(GatehouseError::Forbidden {
            reason: "tenant principals cannot act outside their own tenant".into(),
        }),
    }
}

/// Scope check plus a permission check for tenant principals.
///
/// System principals administer every plane and are not looked up.
/// A tenant principal must hold `permission` through one of its roles.
pub async fn require_permission<S: Repositories>(
    store: &S,
    actor: &Principal,
    tenant_id: Option<Uuid>,
    permission: &str,
) -> GatehouseResult<()> {
    ensure_actor_scope(actor, tenant_id)?;
    if actor.kind == PrincipalKind::System {
        return Ok(());
    }
    let access = effective_access(store, actor).await?;
    if access.permissions.contains(permission) {
        Ok(())
    } else {
        debug!(user_id = %actor.user_id, permission, "permission missing");
        Err(GatehouseError::Forbidden {
            reason: format!("missing permission {permission}"),
        })
    }
}

pub fn ensure_system_actor(actor: &Principal) -> GatehouseResult<()> {
    if actor.kind == PrincipalKind::System {
        Ok(())
    } else {
        Err(GatehouseError::Forbidden {
            reason: "operation requires a system principal".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant_actor(tenant_id: Uuid) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            kind: PrincipalKind::Tenant,
            tenant_id: Some(tenant_id),
        }
    }

    #[test]
    fn tenant_actor_is_confined_to_its_tenant() {
        let t = Uuid::new_v4();
        let actor = tenant_actor(t);
        assert!(ensure_actor_scope(&actor, Some(t)).is_ok());
        assert!(ensure_actor_scope(&actor, Some(Uuid::new_v4())).is_err());
        assert!(ensure_actor_scope(&actor, None).is_err());
        assert!(ensure_system_actor(&actor).is_err());
    }

    #[test]
    fn system_actor_may_act_anywhere() {
        let actor = Principal {
            user_id: Uuid::new_v4(),
            kind: PrincipalKind::System,
            tenant_id: None,
        };
        assert!(ensure_actor_scope(&actor, Some(Uuid::new_v4())).is_ok());
        assert!(ensure_actor_scope(&actor, None).is_ok());
        assert!(ensure_system_actor(&actor).is_ok());
    }
}
