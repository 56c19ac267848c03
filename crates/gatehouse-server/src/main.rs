//! Gatehouse Server — process entry point.
//!
//! Connects the persistent and ephemeral stores, runs migrations, wires
//! the services and runs periodic maintenance until interrupted.

mod config;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use gatehouse_auth::{AuthServices, JwtSigner, TokenSigner};
use gatehouse_core::ephemeral::EphemeralStore;
use gatehouse_core::events::TracingEventSink;
use gatehouse_core::models::user::{Principal, PrincipalKind};
use gatehouse_core::repository::Repositories;
use gatehouse_db::{DbManager, MemoryEphemeralStore, SurrealRepositories};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gatehouse=info".parse()?))
        .json()
        .init();

    info!("Starting Gatehouse server...");

    let config = ServerConfig::from_env()?;
    let db = DbManager::connect(&config.db).await?;
    gatehouse_db::run_migrations(db.client()).await?;

    let repos = match &config.auth.pepper {
        Some(pepper) => SurrealRepositories::with_pepper(db.client().clone(), pepper.clone()),
        None => SurrealRepositories::new(db.client().clone()),
    };
    let signer = JwtSigner::from_config(&config.auth)?;

    #[cfg(feature = "redis")]
    {
        if let Some(url) = config.redis_url.clone() {
            let ephemeral = gatehouse_db::RedisEphemeralStore::connect(&url).await?;
            run(repos, ephemeral, signer, config).await;
            info!("Gatehouse server stopped.");
            return Ok(());
        }
    }

    #[cfg(not(feature = "redis"))]
    {
        if config.redis_url.is_some() {
            warn!("GATEHOUSE_REDIS_URL is set but the redis feature is disabled");
        }
    }
    warn!("Using the in-process ephemeral store; run a single instance only");

    let ephemeral = MemoryEphemeralStore::new();
    let sweeper = ephemeral.clone();
    let interval = Duration::from_secs(config.maintenance_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweeper.purge_expired() {
                Ok(0) => {}
                Ok(removed) => info!(removed, "expired ephemeral entries dropped"),
                Err(e) => error!(error = %e, "ephemeral sweep failed"),
            }
        }
    });
    run(repos, ephemeral, signer, config).await;

    info!("Gatehouse server stopped.");
    Ok(())
}

/// Wire the services and run maintenance until Ctrl-C.
async fn run<S, E, K>(repos: S, ephemeral: E, signer: K, config: ServerConfig)
where
    S: Repositories,
    E: EphemeralStore + Clone + 'static,
    K: TokenSigner + 'static,
{
    let services = AuthServices::new(
        repos,
        ephemeral,
        signer,
        Arc::new(TracingEventSink),
        config.auth,
    );
    // Maintenance runs as the platform itself.
    let platform = Principal {
        user_id: Uuid::nil(),
        kind: PrincipalKind::System,
        tenant_id: None,
    };
    let retention = chrono::Duration::days(config.tenant_retention_days);
    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.maintenance_interval_secs.max(1)));

    info!("Gatehouse services ready");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match services.tokens.purge_expired_records().await {
                    Ok(0) => {}
                    Ok(purged) => info!(purged, "expired refresh records purged"),
                    Err(e) => error!(error = %e, "refresh record purge failed"),
                }
                match services.provisioner.purge_deleted_tenants(&platform, retention).await {
                    Ok(purged) if purged.is_empty() => {}
                    Ok(purged) => info!(count = purged.len(), "deleted tenants purged"),
                    Err(e) => error!(error = %e, "tenant purge failed"),
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for shutdown signal");
                }
                break;
            }
        }
    }
}
