//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for Docker
//! health checks and monitoring. Readiness follows the datastore's
//! readiness state machine.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use crate::usecases::datastore::ReadinessState;

/// Axum-based health check HTTP server.
///
/// Serves liveness (/live) and readiness (/ready) endpoints for
/// Docker health checks and orchestrator probes.
pub struct HealthServer {
    /// Datastore readiness, updated by the datastore itself.
    state_rx: watch::Receiver<ReadinessState>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    /// Create a new health server.
    pub fn new(state_rx: watch::Receiver<ReadinessState>, port: u16) -> Self {
        Self { state_rx, port }
    }

    /// Build the probe router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(self.state_rx.clone())
    }

    /// Start the health check server in the background.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: returns 200 only once the datastore is ready.
    async fn readiness(
        State(state_rx): State<watch::Receiver<ReadinessState>>,
    ) -> impl IntoResponse {
        let state = *state_rx.borrow();
        if state == ReadinessState::Ready {
            (StatusCode::OK, "READY".to_string())
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, format!("NOT READY ({state})"))
        }
    }
}
