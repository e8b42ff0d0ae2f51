//! Snapshot Datastore — Entry Point
//!
//! Initializes configuration, logging, the document store connection
//! and background tasks. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml (path from the first argument) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create the datastore over the configured backend
//! 4. Spawn health server (/live + /ready) and Prometheus /metrics
//! 5. Spawn the retention sweeper
//! 6. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use snapshot_datastore::adapters::metrics::{HealthServer, MetricsRegistry};
use snapshot_datastore::adapters::persistence::{MemoryConnector, MongoConnector};
use snapshot_datastore::config::loader::load_config;
use snapshot_datastore::config::{AppConfig, StoreBackend};
use snapshot_datastore::ports::StoreConnector;
use snapshot_datastore::usecases::{Datastore, RetentionSweeper};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = if config_path == DEFAULT_CONFIG_PATH && !Path::new(&config_path).exists() {
        AppConfig::default()
    } else {
        load_config(&config_path).context("Failed to load configuration")?
    };

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(&config.service.log_level)
                }),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        backend = ?config.store.backend,
        uri = %config.store.connection_uri(),
        "Starting snapshot datastore"
    );

    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    // ── 3. Create datastore (connects in the background) ────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);
    let connector: Arc<dyn StoreConnector> = match config.store.backend {
        StoreBackend::Mongo => Arc::new(MongoConnector::new(config.service.name.clone())),
        StoreBackend::Memory => Arc::new(MemoryConnector::new()),
    };
    let store = Datastore::with_metrics(config.store.clone(), connector, Arc::clone(&metrics))
        .context("Failed to create datastore")?;

    // ── 4. Spawn health + metrics servers ───────────────────
    let health = HealthServer::new(store.subscribe_state(), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    });

    let metrics_handle = if config.metrics.enabled {
        let metrics_shutdown = shutdown_tx.subscribe();
        let bind_address = config.metrics.bind_address.clone();
        let metrics_ref = Arc::clone(&metrics);
        Some(tokio::spawn(async move {
            if let Err(e) = metrics_ref.serve(bind_address, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }))
    } else {
        None
    };

    // ── 5. Spawn retention sweeper ──────────────────────────
    let sweeper_handle = if config.retention.enabled {
        let sweeper = RetentionSweeper::new(
            store.clone(),
            Duration::from_secs(config.retention.interval_seconds),
        );
        let sweeper_shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = sweeper.run(sweeper_shutdown).await {
                error!(error = %e, "Retention sweeper failed");
            }
        }))
    } else {
        None
    };

    // Log the readiness outcome without holding up the signal handler.
    store.report_readiness();

    info!("All tasks spawned — datastore is running");

    // ── 6. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    let _ = shutdown_tx.send(());

    for handle in [Some(health_handle), metrics_handle, sweeper_handle]
        .into_iter()
        .flatten()
    {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}
