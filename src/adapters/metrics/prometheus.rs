//! Prometheus Metrics Registry - Datastore Observability
//!
//! Registers and exposes Prometheus metrics on :9090. Covers snapshot
//! writes, fetches, retention trimming, per-operation failures and
//! readiness.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the datastore.
///
/// All metrics follow the naming convention `snapshot_datastore_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Snapshots written by `put`.
    pub snapshots_written: IntCounter,
    /// Successful `fetch` calls.
    pub fetches: IntCounter,
    /// Snapshots removed by cleanup.
    pub snapshots_trimmed: IntCounter,
    /// Failed operations, labelled by operation.
    pub errors: IntCounterVec,
    /// Readiness (1 = ready, 0 = not ready or failed).
    pub ready: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let snapshots_written = IntCounter::new(
            "snapshot_datastore_snapshots_written_total",
            "Snapshots written",
        )?;

        let fetches = IntCounter::new(
            "snapshot_datastore_fetches_total",
            "Snapshot windows fetched",
        )?;

        let snapshots_trimmed = IntCounter::new(
            "snapshot_datastore_snapshots_trimmed_total",
            "Snapshots deleted by retention cleanup",
        )?;

        let errors = IntCounterVec::new(
            Opts::new(
                "snapshot_datastore_errors_total",
                "Failed datastore operations",
            ),
            &["op"],
        )?;

        let ready = IntGauge::new(
            "snapshot_datastore_ready",
            "Whether the datastore is ready (1=yes, 0=no)",
        )?;

        // Register all metrics
        registry.register(Box::new(snapshots_written.clone()))?;
        registry.register(Box::new(fetches.clone()))?;
        registry.register(Box::new(snapshots_trimmed.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(ready.clone()))?;

        Ok(Self {
            registry,
            snapshots_written,
            fetches,
            snapshots_trimmed,
            errors,
            ready,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move { metrics.render() }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
