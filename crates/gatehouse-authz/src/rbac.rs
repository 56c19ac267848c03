//! Permission resolver: role/permission administration and effective
//! permission resolution.
//!
//! Roles and permissions live on one of two planes. System roles and
//! `system.`/`platform.` permissions have no tenant; tenant roles and
//! `tenant.`/`app.`/`resource.` permissions always have one. Nothing
//! here ever links or resolves across planes.

use std::collections::BTreeSet;
use std::sync::Arc;

use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::events::{DomainEvent, EventKind, EventSink};
use gatehouse_core::models::permission::{
    CreatePermission, Permission, predefined, validate_system_key, validate_tenant_key,
};
use gatehouse_core::models::role::{
    ADMIN_ROLE, AUDITOR_ROLE, CreateRole, OWNER_ROLE, Role, UpdateRole,
};
use gatehouse_core::models::user::Principal;
use gatehouse_core::repository::{
    PermissionRepository, Repositories, RoleRepository, UserRepository,
};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::{ensure_system_actor, record, require_permission};

/// Role names and permission keys a principal holds on its own plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveAccess {
    pub role_names: Vec<String>,
    pub permissions: BTreeSet<String>,
}

/// Attach every permission of the tenant to its owner role.
///
/// Returns the number of permissions the owner now holds. Links use
/// deterministic ids, so concurrent callers converge.
pub(crate) async fn sync_owner<S: Repositories>(
    store: &S,
    tenant_id: Uuid,
    owner_role_id: Uuid,
) -> GatehouseResult<usize> {
    let permissions = store.permissions().list(Some(tenant_id)).await?;
    for permission in &permissions {
        store
            .permissions()
            .grant_to_role(Some(tenant_id), owner_role_id, permission.id)
            .await?;
    }
    Ok(permissions.len())
}

pub(crate) async fn effective_access<S: Repositories>(
    store: &S,
    principal: &Principal,
) -> GatehouseResult<EffectiveAccess> {
    let roles = store
        .roles()
        .get_user_roles(principal.tenant_id, principal.user_id)
        .await?;

    let mut access = EffectiveAccess::default();
    for role in roles {
        let permissions = store.permissions().get_role_permissions(role.id).await?;
        for permission in permissions {
            if permission.tenant_id != principal.tenant_id {
                warn!(
                    role = %role.name,
                    permission = %permission.key,
                    "ignoring cross-plane role permission"
                );
                continue;
            }
            access.permissions.insert(permission.key);
        }
        access.role_names.push(role.name);
    }
    access.role_names.sort();
    access.role_names.dedup();
    Ok(access)
}

#[derive(Clone)]
pub struct PermissionResolver<S: Repositories> {
    store: S,
    events: Arc<dyn EventSink>,
}

impl<S: Repositories> PermissionResolver<S> {
    pub fn new(store: S, events: Arc<dyn EventSink>) -> Self {
        Self { store, events }
    }

    // -------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------

    /// Roles and de-duplicated permissions of `principal`, read from its
    /// own plane only.
    #[instrument(skip(self), fields(user_id = %principal.user_id))]
    pub async fn resolve(&self, principal: &Principal) -> GatehouseResult<EffectiveAccess> {
        effective_access(&self.store, principal).await
    }

    pub async fn resolve_effective_permissions(
        &self,
        principal: &Principal,
    ) -> GatehouseResult<BTreeSet<String>> {
        Ok(self.resolve(principal).await?.permissions)
    }

    pub async fn list_role_names(&self, principal: &Principal) -> GatehouseResult<Vec<String>> {
        Ok(self.resolve(principal).await?.role_names)
    }

    pub async fn has_permission(&self, principal: &Principal, key: &str) -> GatehouseResult<bool> {
        Ok(self.resolve(principal).await?.permissions.contains(key))
    }

    /// `Forbidden` unless `actor` may exercise `key` on `tenant_id`.
    pub async fn require_permission(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
        key: &str,
    ) -> GatehouseResult<()> {
        require_permission(&self.store, actor, tenant_id, key).await
    }

    // -------------------------------------------------------------------
    // Permissions
    // -------------------------------------------------------------------

    /// Create a permission on the actor's plane.
    ///
    /// Tenant permissions are attached to the tenant's owner role in the
    /// same store transaction.
    #[instrument(skip(self, description), fields(actor = %actor.user_id))]
    pub async fn create_permission(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
        key: &str,
        description: &str,
    ) -> GatehouseResult<Permission> {
        match tenant_id {
            Some(_) => validate_tenant_key(key)?,
            None => validate_system_key(key)?,
        }
        require_permission(&self.store, actor, tenant_id, predefined::PERMISSIONS_CREATE).await?;

        let owner = match tenant_id {
            Some(t) => Some(self.store.roles().get_by_name(Some(t), OWNER_ROLE).await?),
            None => None,
        };

        let input = CreatePermission {
            tenant_id,
            key: key.to_string(),
            description: description.to_string(),
        };
        let permission = match owner {
            Some(owner) => {
                self.store
                    .permissions()
                    .create_granted_to(input, owner.id)
                    .await?
            }
            None => self.store.permissions().create(input).await?,
        };

        record(
            &self.store,
            actor,
            tenant_id,
            "permission.created",
            Some(permission.id),
            json!({ "key": key }),
        )
        .await?;
        self.events.emit(
            DomainEvent::new(EventKind::PermissionCreated, tenant_id, None)
                .with_actor(actor.user_id)
                .with_detail(json!({ "key": key })),
        );
        info!(key, tenant_id = ?tenant_id, "permission created");
        Ok(permission)
    }

    /// Delete a custom permission. Seeded permissions are permanent.
    pub async fn delete_permission(
        &self,
        actor: &Principal,
        permission_id: Uuid,
    ) -> GatehouseResult<()> {
        let permission = self.store.permissions().get_by_id(permission_id).await?;
        require_permission(
            &self.store,
            actor,
            permission.tenant_id,
            predefined::PERMISSIONS_DELETE,
        )
        .await?;
        if permission.is_system {
            return Err(GatehouseError::Forbidden {
                reason: format!("predefined permission {} cannot be deleted", permission.key),
            });
        }

        self.store.permissions().delete(permission_id).await?;
        record(
            &self.store,
            actor,
            permission.tenant_id,
            "permission.deleted",
            Some(permission_id),
            json!({ "key": permission.key }),
        )
        .await
    }

    /// Re-attach every tenant permission to the owner role.
    pub async fn sync_owner_permissions(&self, tenant_id: Uuid) -> GatehouseResult<usize> {
        let owner = self.store.roles().get_by_name(Some(tenant_id), OWNER_ROLE).await?;
        sync_owner(&self.store, tenant_id, owner.id).await
    }

    /// Link a permission to a role on the same plane. Allowed on system
    /// roles too.
    pub async fn grant_permission(
        &self,
        actor: &Principal,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> GatehouseResult<()> {
        let role = self.store.roles().get_by_id(role_id).await?;
        let permission = self.store.permissions().get_by_id(permission_id).await?;
        require_permission(&self.store, actor, role.tenant_id, predefined::ROLES_UPDATE).await?;
        if role.tenant_id != permission.tenant_id {
            return Err(GatehouseError::Forbidden {
                reason: "role and permission belong to different planes".into(),
            });
        }

        self.store
            .permissions()
            .grant_to_role(role.tenant_id, role_id, permission_id)
            .await?;
        record(
            &self.store,
            actor,
            role.tenant_id,
            "role.permission.granted",
            Some(role_id),
            json!({ "permission": permission.key }),
        )
        .await
    }

    /// Unlink a permission from a role. The owner role never loses one.
    pub async fn revoke_permission(
        &self,
        actor: &Principal,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> GatehouseResult<()> {
        let role = self.store.roles().get_by_id(role_id).await?;
        require_permission(&self.store, actor, role.tenant_id, predefined::ROLES_UPDATE).await?;
        if role.is_tenant_owner() {
            return Err(GatehouseError::ImmutableRole { role: role.name });
        }

        self.store
            .permissions()
            .revoke_from_role(role_id, permission_id)
            .await?;
        record(
            &self.store,
            actor,
            role.tenant_id,
            "role.permission.revoked",
            Some(role_id),
            json!({ "permission_id": permission_id }),
        )
        .await
    }

    // -------------------------------------------------------------------
    // Roles
    // -------------------------------------------------------------------

    pub async fn create_role(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
        name: &str,
        description: &str,
    ) -> GatehouseResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatehouseError::validation("role name must not be empty"));
        }
        if tenant_id.is_some() && [OWNER_ROLE, ADMIN_ROLE, AUDITOR_ROLE].contains(&name) {
            return Err(GatehouseError::validation(format!(
                "role name {name} is reserved"
            )));
        }
        require_permission(&self.store, actor, tenant_id, predefined::ROLES_CREATE).await?;

        let role = self
            .store
            .roles()
            .create(CreateRole {
                tenant_id,
                name: name.to_string(),
                description: description.to_string(),
            })
            .await?;
        record(
            &self.store,
            actor,
            tenant_id,
            "role.created",
            Some(role.id),
            json!({ "name": name }),
        )
        .await?;
        Ok(role)
    }

    pub async fn update_role(
        &self,
        actor: &Principal,
        role_id: Uuid,
        input: UpdateRole,
    ) -> GatehouseResult<Role> {
        let role = self.store.roles().get_by_id(role_id).await?;
        require_permission(&self.store, actor, role.tenant_id, predefined::ROLES_UPDATE).await?;
        if role.is_system {
            return Err(GatehouseError::ImmutableRole { role: role.name });
        }
        self.store.roles().update(role_id, input).await
    }

    pub async fn delete_role(&self, actor: &Principal, role_id: Uuid) -> GatehouseResult<()> {
        let role = self.store.roles().get_by_id(role_id).await?;
        require_permission(&self.store, actor, role.tenant_id, predefined::ROLES_DELETE).await?;
        if role.is_system {
            return Err(GatehouseError::ImmutableRole { role: role.name });
        }

        self.store.roles().delete(role_id).await?;
        record(
            &self.store,
            actor,
            role.tenant_id,
            "role.deleted",
            Some(role_id),
            json!({ "name": role.name }),
        )
        .await
    }

    /// Assign a role. The principal must live on the role's plane.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn assign_role(
        &self,
        actor: &Principal,
        user_id: Uuid,
        role_id: Uuid,
    ) -> GatehouseResult<()> {
        let role = self.store.roles().get_by_id(role_id).await?;
        require_permission(&self.store, actor, role.tenant_id, predefined::ROLES_ASSIGN).await?;
        match self.store.users().get_by_id(role.tenant_id, user_id).await {
            Ok(_) => {}
            Err(GatehouseError::NotFound { .. }) => {
                return Err(GatehouseError::Forbidden {
                    reason: "principal is not on the role's plane".into(),
                });
            }
            Err(e) => return Err(e),
        }

        self.store
            .roles()
            .assign_to_user(role.tenant_id, user_id, role_id)
            .await?;
        record(
            &self.store,
            actor,
            role.tenant_id,
            "role.assigned",
            Some(user_id),
            json!({ "role": role.name }),
        )
        .await?;
        self.events.emit(
            DomainEvent::new(EventKind::RoleAssigned, role.tenant_id, Some(user_id))
                .with_actor(actor.user_id)
                .with_detail(json!({ "role": role.name })),
        );
        Ok(())
    }

    /// Remove a role assignment. Removing the last owner of a tenant
    /// fails with `LastOwnerProtected`.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn remove_role(
        &self,
        actor: &Principal,
        user_id: Uuid,
        role_id: Uuid,
    ) -> GatehouseResult<()> {
        let role = self.store.roles().get_by_id(role_id).await?;
        require_permission(&self.store, actor, role.tenant_id, predefined::ROLES_ASSIGN).await?;

        match (role.is_tenant_owner(), role.tenant_id) {
            (true, Some(tenant_id)) => {
                self.store
                    .roles()
                    .unassign_keeping_last_holder(tenant_id, user_id, role_id)
                    .await?
            }
            _ => self.store.roles().unassign_from_user(user_id, role_id).await?,
        }

        record(
            &self.store,
            actor,
            role.tenant_id,
            "role.removed",
            Some(user_id),
            json!({ "role": role.name }),
        )
        .await?;
        self.emit_removed(actor, &role, user_id, false);
        Ok(())
    }

    /// Break-glass removal that may leave a tenant without an owner.
    ///
    /// Only a system principal may use it, and the audit entry is
    /// written before the assignment is touched.
    #[instrument(skip(self, reason), fields(actor = %actor.user_id))]
    pub async fn force_remove_role(
        &self,
        actor: &Principal,
        user_id: Uuid,
        role_id: Uuid,
        reason: &str,
    ) -> GatehouseResult<()> {
        ensure_system_actor(actor)?;
        if reason.trim().is_empty() {
            return Err(GatehouseError::validation("an override reason is required"));
        }
        let role = self.store.roles().get_by_id(role_id).await?;

        record(
            &self.store,
            actor,
            role.tenant_id,
            "role.removed.override",
            Some(user_id),
            json!({ "role": role.name, "reason": reason }),
        )
        .await?;
        warn!(role = %role.name, %user_id, reason, "last-owner protection overridden");

        self.store.roles().unassign_from_user(user_id, role_id).await?;
        self.emit_removed(actor, &role, user_id, true);
        Ok(())
    }

    pub async fn list_roles(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
    ) -> GatehouseResult<Vec<Role>> {
        require_permission(&self.store, actor, tenant_id, predefined::ROLES_READ).await?;
        self.store.roles().list(tenant_id).await
    }

    pub async fn list_permissions(
        &self,
        actor: &Principal,
        tenant_id: Option<Uuid>,
    ) -> GatehouseResult<Vec<Permission>> {
        require_permission(&self.store, actor, tenant_id, predefined::PERMISSIONS_READ).await?;
        self.store.permissions().list(tenant_id).await
    }

    fn emit_removed(&self, actor: &Principal, role: &Role, user_id: Uuid, override_used: bool) {
        self.events.emit(
            DomainEvent::new(EventKind::RoleRemoved, role.tenant_id, Some(user_id))
                .with_actor(actor.user_id)
                .with_detail(json!({ "role": role.name, "override": override_used })),
        );
    }
}
