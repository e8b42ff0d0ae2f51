//! Document Store Port - Snapshot Persistence Interface
//!
//! Defines the traits the datastore needs from a document database:
//! connecting, preparing the collection, and the handful of queries
//! the snapshot workflow issues. MongoDB and the in-memory store both
//! implement these; the use-case layer never sees a driver type.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::snapshot::{NewSnapshot, RecordId, Snapshot, SourceId};

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
  /// Full connection string (`mongodb://host:port/db`).
  pub uri: String,
  /// Database to open once connected.
  pub db_name: String,
}

/// Position of a stored record in its source's newest-first order,
/// without its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
  /// Store-assigned identity.
  pub id: RecordId,
  /// Source identifier.
  pub sid: SourceId,
  /// Milliseconds since epoch.
  pub created_at: i64,
}

/// Opens connections to a document database.
///
/// Called exactly once per datastore instance. A returned error is
/// final for that instance.
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
  /// Connect and verify the server is reachable.
  async fn connect(
    &self,
    target: &ConnectionTarget,
  ) -> anyhow::Result<Arc<dyn DocumentDatabase>>;
}

/// A connected database.
#[async_trait]
pub trait DocumentDatabase: Send + Sync + 'static {
  /// Whether a collection with this name already exists.
  async fn collection_exists(&self, name: &str) -> anyhow::Result<bool>;

  /// Create a new, empty collection.
  async fn create_collection(&self, name: &str) -> anyhow::Result<()>;

  /// Build an ascending single-field index.
  async fn create_index(&self, collection: &str, field: &str) -> anyhow::Result<()>;

  /// Handle to a collection. Does not touch the network.
  fn collection(&self, name: &str) -> Arc<dyn SnapshotCollection>;
}

/// Snapshot queries against one collection.
///
/// All reads are ordered newest first: `createdAt` descending, ties
/// broken by insertion order descending.
#[async_trait]
pub trait SnapshotCollection: Send + Sync + 'static {
  /// Insert one record and return its assigned identity.
  async fn insert(&self, snapshot: &NewSnapshot) -> anyhow::Result<RecordId>;

  /// Records for `sid`, newest first, at most `limit` of them.
  async fn find_newest(&self, sid: &str, limit: u32) -> anyhow::Result<Vec<Snapshot>>;

  /// The newest record for `sid` that falls outside the newest `keep`,
  /// or `None` when the source holds `keep` records or fewer.
  async fn first_excess(&self, sid: &str, keep: u64) -> anyhow::Result<Option<RecordRef>>;

  /// Delete `boundary` and every record of its source ordered after it
  /// (older, or equally old and inserted earlier). Returns the number removed.
  async fn delete_through(&self, boundary: &RecordRef) -> anyhow::Result<u64>;

  /// Delete every record whose sid is in `sids`. Returns the number removed.
  async fn delete_sources(&self, sids: &[SourceId]) -> anyhow::Result<u64>;

  /// Every distinct sid currently stored.
  async fn list_sources(&self) -> anyhow::Result<Vec<SourceId>>;
}
