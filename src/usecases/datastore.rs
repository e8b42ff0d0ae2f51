//! Datastore - Snapshot Write, Bounded Read and Retention
//!
//! Owns a single shared handle to the snapshot collection. The handle
//! comes from a one-time readiness future started at construction:
//!
//! `Uninitialized → Connecting → {CollectionExists | CollectionCreated} → Ready`
//! or `Failed` on any step's error.
//!
//! Every operation awaits that same future. It settles exactly once;
//! later calls reuse the outcome, so a failed connection is final for
//! the instance (no retry, no reconnect).

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::{DatastoreConfig, RetentionPolicy};
use crate::domain::error::{describe, DatastoreError};
use crate::domain::snapshot::{NewSnapshot, Snapshot, SourceId, SID_FIELD};
use crate::ports::document_store::{SnapshotCollection, StoreConnector};

/// Collection handle shared by every operation once ready.
pub type CollectionHandle = Arc<dyn SnapshotCollection>;

type Readiness = Shared<BoxFuture<'static, Result<CollectionHandle, DatastoreError>>>;

/// Observable steps of the readiness state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Nothing attempted yet.
    Uninitialized,
    /// Opening the connection.
    Connecting,
    /// Collection was already present; index creation skipped.
    CollectionExists,
    /// Collection was created; building the `sid` index.
    CollectionCreated,
    /// Operations can run.
    Ready,
    /// Terminal failure; every operation returns the settled error.
    Failed,
}

impl std::fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::CollectionExists => "collection_exists",
            Self::CollectionCreated => "collection_created",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Inner {
    config: DatastoreConfig,
    ready: Readiness,
    state_rx: watch::Receiver<ReadinessState>,
    /// Sources written through this instance, for the retention sweeper.
    sources: Mutex<HashSet<SourceId>>,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Snapshot datastore over a document store.
///
/// Cheap to clone; clones share the connection and readiness outcome.
#[derive(Clone)]
pub struct Datastore {
    inner: Arc<Inner>,
}

impl Datastore {
    /// Validate `config` and start connecting through `connector`.
    ///
    /// When called inside a tokio runtime the connection attempt starts
    /// immediately in the background; otherwise it starts on first use.
    pub fn new(
        config: DatastoreConfig,
        connector: Arc<dyn StoreConnector>,
    ) -> Result<Self, DatastoreError> {
        Self::build(config, connector, None)
    }

    /// Same as [`Datastore::new`], recording operation metrics.
    pub fn with_metrics(
        config: DatastoreConfig,
        connector: Arc<dyn StoreConnector>,
        metrics: Arc<MetricsRegistry>,
    ) -> Result<Self, DatastoreError> {
        Self::build(config, connector, Some(metrics))
    }

    fn build(
        config: DatastoreConfig,
        connector: Arc<dyn StoreConnector>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Result<Self, DatastoreError> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(ReadinessState::Uninitialized);
        let ready = initialize(config.clone(), connector, state_tx, metrics.clone())
            .boxed()
            .shared();

        let store = Self {
            inner: Arc::new(Inner {
                config,
                ready,
                state_rx,
                sources: Mutex::new(HashSet::new()),
                metrics,
            }),
        };

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let ready = store.inner.ready.clone();
            runtime.spawn(async move {
                let _ = ready.await;
            });
        }

        Ok(store)
    }

    /// Wait for readiness and return the shared collection handle.
    pub async fn ready(&self) -> Result<CollectionHandle, DatastoreError> {
        self.inner.ready.clone().await
    }

    /// Log the readiness outcome from a detached task once it settles.
    pub fn report_readiness(&self) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(e) = store.ready().await {
                error!(error = %e, "Datastore is not usable; /ready will report failure");
            }
        })
    }

    /// Current readiness state.
    pub fn state(&self) -> ReadinessState {
        *self.inner.state_rx.borrow()
    }

    /// Subscribe to readiness state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ReadinessState> {
        self.inner.state_rx.clone()
    }

    /// Configuration this instance was built with.
    pub fn config(&self) -> &DatastoreConfig {
        &self.inner.config
    }

    /// Sources written through this instance, sorted.
    pub fn known_sources(&self) -> Vec<SourceId> {
        let sources = self
            .inner
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        sources.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Every distinct sid held by the store, including sources written
    /// before this instance started or by other processes.
    pub async fn stored_sources(&self) -> Result<Vec<SourceId>, DatastoreError> {
        let collection = self.ready().await?;
        collection.list_sources().await.map_err(|e| {
            self.count_error("list_sources");
            DatastoreError::Query(describe(&e))
        })
    }

    /// Record a new snapshot of `state` for `sid`.
    ///
    /// Returns the inserted record with its store identity and the
    /// `createdAt` that was persisted.
    #[instrument(skip(self, state))]
    pub async fn put(&self, sid: &str, state: Value) -> Result<Snapshot, DatastoreError> {
        if sid.is_empty() {
            return Err(DatastoreError::InvalidSource);
        }
        let collection = self.ready().await?;

        let record = NewSnapshot::now(sid, state);
        let id = collection.insert(&record).await.map_err(|e| {
            warn!(error = %describe(&e), "Snapshot insert failed");
            self.count_error("put");
            DatastoreError::Insert(describe(&e))
        })?;

        self.inner
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sid.to_string());
        if let Some(metrics) = &self.inner.metrics {
            metrics.snapshots_written.inc();
        }

        debug!(id = %id, created_at = record.created_at, "Snapshot stored");
        Ok(record.into_snapshot(id))
    }

    /// The most recent snapshots for `sid`, oldest first.
    ///
    /// Queries newest-first so the limit keeps the latest window, then
    /// reverses into chronological order. Unknown sources yield an
    /// empty vector.
    #[instrument(skip(self))]
    pub async fn fetch(&self, sid: &str) -> Result<Vec<Snapshot>, DatastoreError> {
        if sid.is_empty() {
            return Err(DatastoreError::InvalidSource);
        }
        let collection = self.ready().await?;

        let mut records = collection
            .find_newest(sid, self.inner.config.fetch_limit)
            .await
            .map_err(|e| {
                warn!(error = %describe(&e), "Snapshot query failed");
                self.count_error("fetch");
                DatastoreError::Query(describe(&e))
            })?;
        records.reverse();

        if let Some(metrics) = &self.inner.metrics {
            metrics.fetches.inc();
        }
        debug!(count = records.len(), "Snapshots fetched");
        Ok(records)
    }

    /// Trim old snapshots of `sid` beyond the retention limit.
    ///
    /// Never reports failure to the caller; errors are logged and counted.
    #[instrument(skip(self))]
    pub async fn cleanup(&self, sid: &str) {
        match self.trim(sid).await {
            Ok(0) => debug!("Nothing to trim"),
            Ok(removed) => {
                info!(removed, policy = ?self.inner.config.retention_policy, "Snapshots trimmed");
                if let Some(metrics) = &self.inner.metrics {
                    metrics.snapshots_trimmed.inc_by(removed);
                }
            }
            Err(e) => {
                warn!(error = %describe(&e), "Cleanup failed");
                self.count_error("cleanup");
            }
        }
    }

    /// Run [`Datastore::cleanup`] detached on the current runtime.
    pub fn spawn_cleanup(&self, sid: impl Into<SourceId>) -> JoinHandle<()> {
        let store = self.clone();
        let sid = sid.into();
        tokio::spawn(async move { store.cleanup(&sid).await })
    }

    async fn trim(&self, sid: &str) -> anyhow::Result<u64> {
        let collection = self.ready().await?;
        let config = &self.inner.config;

        let Some(boundary) = collection.first_excess(sid, config.retention_limit).await? else {
            return Ok(0);
        };

        let removed = match config.retention_policy {
            RetentionPolicy::TrimExcess => collection.delete_through(&boundary).await?,
            RetentionPolicy::PurgeSource => collection.delete_sources(&[boundary.sid]).await?,
        };
        Ok(removed)
    }

    fn count_error(&self, op: &str) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.errors.with_label_values(&[op]).inc();
        }
    }
}

/// One-time readiness initialization, bounded by the connect timeout.
async fn initialize(
    config: DatastoreConfig,
    connector: Arc<dyn StoreConnector>,
    state_tx: watch::Sender<ReadinessState>,
    metrics: Option<Arc<MetricsRegistry>>,
) -> Result<CollectionHandle, DatastoreError> {
    let timeout = Duration::from_millis(config.connect_timeout_ms);
    let outcome = tokio::time::timeout(timeout, prepare(&config, connector.as_ref(), &state_tx))
        .await
        .unwrap_or_else(|_| {
            Err(DatastoreError::Connection(format!(
                "timed out after {}ms",
                config.connect_timeout_ms
            )))
        });

    match &outcome {
        Ok(_) => {
            state_tx.send_replace(ReadinessState::Ready);
            info!(collection = %config.collection, "Datastore ready");
        }
        Err(e) => {
            state_tx.send_replace(ReadinessState::Failed);
            error!(error = %e, uri = %config.connection_uri(), "Datastore failed to become ready");
        }
    }
    if let Some(metrics) = &metrics {
        metrics.ready.set(i64::from(outcome.is_ok()));
    }
    outcome
}

async fn prepare(
    config: &DatastoreConfig,
    connector: &dyn StoreConnector,
    state_tx: &watch::Sender<ReadinessState>,
) -> Result<CollectionHandle, DatastoreError> {
    let connection_error = |e: anyhow::Error| DatastoreError::Connection(describe(&e));
    let name = config.collection.as_str();

    state_tx.send_replace(ReadinessState::Connecting);
    let db = connector
        .connect(&config.target())
        .await
        .map_err(connection_error)?;

    if db.collection_exists(name).await.map_err(connection_error)? {
        state_tx.send_replace(ReadinessState::CollectionExists);
        info!(collection = name, "Reusing existing collection");
        return Ok(db.collection(name));
    }

    if let Err(e) = db.create_collection(name).await {
        // Another writer may have created it since the existence check.
        if db.collection_exists(name).await.unwrap_or(false) {
            state_tx.send_replace(ReadinessState::CollectionExists);
            info!(collection = name, "Collection appeared concurrently, reusing it");
            return Ok(db.collection(name));
        }
        return Err(connection_error(e));
    }

    state_tx.send_replace(ReadinessState::CollectionCreated);
    db.create_index(name, SID_FIELD)
        .await
        .map_err(|e| DatastoreError::IndexCreation(describe(&e)))?;
    info!(collection = name, field = SID_FIELD, "Collection created and indexed");

    Ok(db.collection(name))
}
