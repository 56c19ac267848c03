//! Tenant lifecycle and principal creation.

use chrono::{Duration, Utc};
use gatehouse_core::error::{GatehouseError, GatehouseResult};
use gatehouse_core::models::permission::predefined;
use gatehouse_core::models::role::OWNER_ROLE;
use gatehouse_core::models::tenant::{
    CreateTenant, SystemLimits, Tenant, TenantSettings, TenantStatus, UpdateTenant,
};
use gatehouse_core::models::user::{CreateUser, Principal, User};
use gatehouse_core::repository::{Repositories, RoleRepository, TenantRepository, UserRepository};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::audit::{ensure_system_actor, record, require_permission};
use crate::initializer::TenantInitializer;

#[derive(Clone)]
pub struct Provisioner<S: Repositories> {
    store: S,
    limits: SystemLimits,
    initializer: TenantInitializer<S>,
}

impl<S: Repositories> Provisioner<S> {
    pub fn new(store: S, limits: SystemLimits) -> Self {
        Self {
            initializer: TenantInitializer::new(store.clone()),
            store,
            limits,
        }
    }

    pub fn limits(&self) -> &SystemLimits {
        &self.limits
    }

    /// Create a tenant and seed its predefined roles and permissions.
    #[instrument(skip(self, input), fields(actor = %actor.user_id, domain = %input.domain))]
    pub async fn create_tenant(
        &self,
        actor: &Principal,
        mut input: CreateTenant,
    ) -> GatehouseResult<Tenant> {
        ensure_system_actor(actor)?;
        validate_domain(&input.domain)?;
        if input.name.trim().is_empty() {
            return Err(GatehouseError::validation("tenant name must not be empty"));
        }
        let settings = input.settings.take().unwrap_or_else(|| self.default_settings());
        settings.validate(&self.limits)?;
        input.settings = Some(settings);

        let (tenant, init) = self.initializer.create_tenant(input).await?;

        record(
            &self.store,
            actor,
            Some(tenant.id),
            "tenant.created",
            Some(tenant.id),
            json!({ "domain": tenant.domain, "owner_role_id": init.owner_role_id }),
        )
        .await?;
        info!(tenant_id = %tenant.id, domain = %tenant.domain, "tenant created");
        Ok(tenant)
    }

    /// Tenant defaults, never above the system maxima.
    fn default_settings(&self) -> TenantSettings {
        let d = TenantSettings::default();
        let l = &self.limits;
        TenantSettings {
            access_token_ttl_secs: d.access_token_ttl_secs.min(l.max_access_token_ttl_secs),
            refresh_token_ttl_secs: d.refresh_token_ttl_secs.min(l.max_refresh_token_ttl_secs),
            id_token_ttl_secs: d.id_token_ttl_secs.min(l.max_id_token_ttl_secs),
            remember_me_access_token_ttl_secs: d
                .remember_me_access_token_ttl_secs
                .min(l.max_remember_me_access_token_ttl_secs),
            remember_me_refresh_token_ttl_secs: d
                .remember_me_refresh_token_ttl_secs
                .min(l.max_remember_me_refresh_token_ttl_secs),
            password_min_length: d.password_min_length.max(l.min_password_length),
            max_failed_login_attempts: d
                .max_failed_login_attempts
                .min(l.max_failed_login_attempts),
            lockout_duration_secs: d.lockout_duration_secs.min(l.max_lockout_duration_secs),
            login_rate_limit_per_minute: d
                .login_rate_limit_per_minute
                .min(l.max_login_rate_limit_per_minute),
            ..d
        }
    }

    pub async fn get_tenant(&self, tenant_id: Uuid) -> GatehouseResult<Tenant> {
        self.store.tenants().get_by_id(tenant_id).await
    }

    /// Create a principal. The first user of a tenant without an owner
    /// becomes its owner.
    #[instrument(skip(self, input), fields(username = %input.username, tenant_id = ?input.tenant_id))]
    pub async fn create_user(&self, input: CreateUser) -> GatehouseResult<User> {
        input.validate()?;

        let min_length = match input.tenant_id {
            Some(tenant_id) => {
                let tenant = self.store.tenants().get_by_id(tenant_id).await?;
                if tenant.status == TenantStatus::Deleted {
                    return Err(GatehouseError::TenantInactive { tenant_id });
                }
                tenant.settings.password_min_length
            }
            None => self.limits.min_password_length,
        };
        if input.password.chars().count() < min_length {
            return Err(GatehouseError::validation(format!(
                "password must be at least {min_length} characters"
            )));
        }

        let user = match input.tenant_id {
            Some(tenant_id) => {
                let owner = self.store.roles().get_by_name(Some(tenant_id), OWNER_ROLE).await?;
                self.store.users().create_claiming_role(input, owner.id).await?
            }
            None => self.store.users().create(input).await?,
        };

        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Block new logins. Whether outstanding tokens are revoked is
    /// decided by the caller from the tenant settings.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn suspend_tenant(&self, actor: &Principal, tenant_id: Uuid) -> GatehouseResult<Tenant> {
        ensure_system_actor(actor)?;
        let tenant = self.store.tenants().get_by_id(tenant_id).await?;
        if tenant.status == TenantStatus::Deleted {
            return Err(GatehouseError::TenantInactive { tenant_id });
        }
        self.set_status(actor, tenant_id, TenantStatus::Suspended, "tenant.suspended")
            .await
    }

    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn reactivate_tenant(
        &self,
        actor: &Principal,
        tenant_id: Uuid,
    ) -> GatehouseResult<Tenant> {
        ensure_system_actor(actor)?;
        let tenant = self.store.tenants().get_by_id(tenant_id).await?;
        if tenant.status == TenantStatus::Deleted {
            return Err(GatehouseError::validation(
                "a deleted tenant cannot be reactivated",
            ));
        }
        self.set_status(actor, tenant_id, TenantStatus::Active, "tenant.reactivated")
            .await
    }

    /// Mark a tenant deleted. Its data stays until the retention window
    /// has passed and [`purge_deleted_tenants`](Self::purge_deleted_tenants) runs.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn soft_delete_tenant(
        &self,
        actor: &Principal,
        tenant_id: Uuid,
    ) -> GatehouseResult<Tenant> {
        ensure_system_actor(actor)?;
        let tenant = self
            .store
            .tenants()
            .update(
                tenant_id,
                UpdateTenant {
                    status: Some(TenantStatus::Deleted),
                    deleted_at: Some(Some(Utc::now())),
                    ..Default::default()
                },
            )
            .await?;
        record(
            &self.store,
            actor,
            Some(tenant_id),
            "tenant.deleted",
            Some(tenant_id),
            json!({ "domain": tenant.domain }),
        )
        .await?;
        warn!(%tenant_id, "tenant soft-deleted");
        Ok(tenant)
    }

    /// Hard-delete tenants soft-deleted more than `retention` ago.
    /// Returns the purged tenant ids.
    #[instrument(skip(self), fields(actor = %actor.user_id))]
    pub async fn purge_deleted_tenants(
        &self,
        actor: &Principal,
        retention: Duration,
    ) -> GatehouseResult<Vec<Uuid>> {
        ensure_system_actor(actor)?;
        let cutoff = Utc::now() - retention;
        let expired = self.store.tenants().list_deleted_before(cutoff).await?;

        let mut purged = Vec::with_capacity(expired.len());
        for tenant in expired {
            self.store.tenants().delete(tenant.id).await?;
            record(
                &self.store,
                actor,
                None,
                "tenant.purged",
                Some(tenant.id),
                json!({ "domain": tenant.domain }),
            )
            .await?;
            purged.push(tenant.id);
        }
        if !purged.is_empty() {
            info!(count = purged.len(), "purged deleted tenants");
        }
        Ok(purged)
    }

    /// Replace a tenant's settings. Values above the system maxima are
    /// rejected, never clamped.
    #[instrument(skip(self, settings), fields(actor = %actor.user_id))]
    pub async fn update_tenant_settings(
        &self,
        actor: &Principal,
        tenant_id: Uuid,
        settings: TenantSettings,
    ) -> GatehouseResult<Tenant> {
        require_permission(&self.store, actor, Some(tenant_id), predefined::SETTINGS_UPDATE).await?;
        settings.validate(&self.limits)?;

        let tenant = self
            .store
            .tenants()
            .update(
                tenant_id,
                UpdateTenant {
                    settings: Some(settings),
                    ..Default::default()
                },
            )
            .await?;
        record(
            &self.store,
            actor,
            Some(tenant_id),
            "tenant.settings.updated",
            Some(tenant_id),
            serde_json::to_value(&tenant.settings).unwrap_or_default(),
        )
        .await?;
        Ok(tenant)
    }

    async fn set_status(
        &self,
        actor: &Principal,
        tenant_id: Uuid,
        status: TenantStatus,
        action: &str,
    ) -> GatehouseResult<Tenant> {
        let tenant = self
            .store
            .tenants()
            .update(
                tenant_id,
                UpdateTenant {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;
        record(
            &self.store,
            actor,
            Some(tenant_id),
            action,
            Some(tenant_id),
            json!({ "status": status.as_str() }),
        )
        .await?;
        info!(%tenant_id, status = status.as_str(), "tenant status changed");
        Ok(tenant)
    }
}

/// Lowercase DNS-style name with at least one dot.
fn validate_domain(domain: &str) -> GatehouseResult<()> {
    let valid = domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain.len() <= 253
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(GatehouseError::validation(format!(
            "'{domain}' is not a valid tenant domain"
        )))
    }
}
