//! Retention Sweeper — Periodic Snapshot Cleanup
//!
//! Every `interval` runs the datastore's cleanup for each source in the
//! store, so no source grows past the retention limit between writes.
//! Sources already present at startup are swept too, not only those
//! written since. Runs until the shutdown broadcast fires.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::datastore::Datastore;

/// Periodically trims every known source.
pub struct RetentionSweeper {
    /// Datastore to clean.
    store: Datastore,
    /// Time between sweeps.
    interval: Duration,
}

impl RetentionSweeper {
    /// Create a sweeper over `store`.
    pub const fn new(store: Datastore, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run sweeps until shutdown.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Retention sweeper shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Clean every source once. Returns how many were visited.
    ///
    /// If the store cannot list its sources, falls back to those
    /// written through this datastore.
    pub async fn sweep(&self) -> usize {
        let mut sources: BTreeSet<_> = self.store.known_sources().into_iter().collect();
        match self.store.stored_sources().await {
            Ok(stored) => sources.extend(stored),
            Err(e) => warn!(error = %e, "Could not list stored sources; sweeping known ones"),
        }

        for sid in &sources {
            self.store.cleanup(sid).await;
        }
        debug!(sources = sources.len(), "Retention sweep finished");
        sources.len()
    }
}
