//! vmsync
//!
//! Keeps the VM record store and user session caches consistent with the
//! live inventory of a hypervisor cluster, and tells downstream services
//! when a VM is renamed.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmsync_sync::{
    api,
    cache::RedisSessionCache,
    config::Config,
    db::Database,
    engine::ReconciliationEngine,
    notify::Dispatcher,
    propagator::Propagator,
    provider::HttpInventoryProvider,
    scheduler::{SchedulerWorker, SyncCoordinator, SyncState},
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    // Prefer RUST_LOG, fall back to the configured level
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting vm-sync");
    info!(
        listen_addr = %config.api_server.listen_addr(),
        hosts = config.hypervisors.len(),
        interval_secs = config.sync.interval.as_secs(),
        "Configuration loaded"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };
    if let Err(e) = db.run_migrations().await {
        error!(error = %e, "Failed to run migrations");
        return Err(e.into());
    }

    let cache = match RedisSessionCache::connect(
        &config.redis.url,
        config.redis.scan_count,
        &config.redis.key_pattern,
    )
    .await
    {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "Failed to connect to session cache");
            return Err(e.into());
        }
    };

    let provider = HttpInventoryProvider::new(config.sync.host_timeout)?;
    let propagator = Arc::new(Propagator::new(Arc::new(cache)));
    let dispatcher = Dispatcher::new(config.endpoints.clone(), propagator.clone())?;
    let engine = ReconciliationEngine::new(Arc::new(provider), Arc::new(db.record_store()));
    let coordinator = Arc::new(SyncCoordinator::new(
        config.hypervisors.clone(),
        engine,
        propagator,
        dispatcher,
    ));
    let sync_state = Arc::new(SyncState::new());

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler_worker =
        SchedulerWorker::new(coordinator.clone(), sync_state.clone(), config.sync);
    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            scheduler_worker.run(shutdown_rx).await;
        }
    });

    let state = AppState::new(sync_state, coordinator, config.sync.timeout);
    let app = api::create_router(state);

    let listen_addr = config.api_server.listen_addr();
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!(addr = %listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for scheduler to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, scheduler_handle).await {
        warn!(error = %e, "Scheduler worker did not shut down in time");
    }

    info!("vm-sync shutdown complete");
    Ok(())
}
