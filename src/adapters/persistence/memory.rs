//! In-Memory Store - Process-local Document Store
//!
//! Implements the document store port with plain vectors behind locks.
//! Used by tests and benches, and by `backend = "memory"` deployments
//! that do not need snapshots to outlive the process. Mirrors the
//! MongoDB semantics the datastore relies on: explicit collection
//! creation, index bookkeeping, newest-first ordering and skip/limit.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::domain::snapshot::{NewSnapshot, RecordId, Snapshot, SourceId};
use crate::ports::document_store::{
    ConnectionTarget, DocumentDatabase, RecordRef, SnapshotCollection, StoreConnector,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connector that always hands out the same in-memory database.
pub struct MemoryConnector {
    database: Arc<MemoryDatabase>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    /// Connector over a fresh, empty database.
    pub fn new() -> Self {
        Self::with_database(Arc::new(MemoryDatabase::new()))
    }

    /// Connector over an existing database (shared with the caller).
    pub fn with_database(database: Arc<MemoryDatabase>) -> Self {
        Self {
            database,
            connects: AtomicUsize::new(0),
        }
    }

    /// The database this connector hands out.
    pub fn database(&self) -> Arc<MemoryDatabase> {
        Arc::clone(&self.database)
    }

    /// Number of times `connect` has been called.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn DocumentDatabase>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        debug!(uri = %target.uri, "Opened in-memory database");
        Ok(Arc::clone(&self.database) as Arc<dyn DocumentDatabase>)
    }
}

/// Collections and their indexes, all held in process memory.
#[derive(Default)]
pub struct MemoryDatabase {
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
    indexes: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryDatabase {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Database that already contains an (unindexed) collection.
    pub fn with_collection(name: &str) -> Self {
        let db = Self::new();
        lock(&db.collections).insert(name.to_string(), Arc::new(MemoryCollection::new()));
        db
    }

    /// Indexed fields of a collection, in creation order.
    pub fn indexes(&self, collection: &str) -> Vec<String> {
        lock(&self.indexes).get(collection).cloned().unwrap_or_default()
    }

    /// Direct handle to a collection, creating it implicitly like MongoDB does on write.
    pub fn snapshots(&self, name: &str) -> Arc<MemoryCollection> {
        let mut collections = lock(&self.collections);
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryCollection::new())),
        )
    }
}

#[async_trait]
impl DocumentDatabase for MemoryDatabase {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.collections).contains_key(name))
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        let mut collections = lock(&self.collections);
        if collections.contains_key(name) {
            bail!("collection {name} already exists");
        }
        collections.insert(name.to_string(), Arc::new(MemoryCollection::new()));
        Ok(())
    }

    async fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        if !lock(&self.collections).contains_key(collection) {
            bail!("collection {collection} does not exist");
        }
        let mut indexes = lock(&self.indexes);
        let fields = indexes.entry(collection.to_string()).or_default();
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn SnapshotCollection> {
        self.snapshots(name)
    }
}

/// One stored record plus its insertion sequence (the tie-breaker).
#[derive(Debug, Clone)]
struct StoredRecord {
    seq: u64,
    snapshot: Snapshot,
}

/// Snapshot records of one collection.
#[derive(Default)]
pub struct MemoryCollection {
    records: Mutex<Vec<StoredRecord>>,
    next_seq: AtomicU64,
}

impl MemoryCollection {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all sources.
    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    /// Whether the collection holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records stored for `sid`.
    pub fn count(&self, sid: &str) -> usize {
        lock(&self.records).iter().filter(|r| r.snapshot.sid == sid).count()
    }

    /// Bulk-load `count` records for `sid`, one millisecond apart starting
    /// at `first_ms`. Each record's state is its position as a number.
    pub fn seed(&self, sid: &str, count: u64, first_ms: i64) {
        let mut records = lock(&self.records);
        records.reserve(usize::try_from(count).unwrap_or(0));
        for n in 0..count {
            let created_at = first_ms.saturating_add(i64::try_from(n).unwrap_or(i64::MAX));
            let snapshot = NewSnapshot {
                sid: sid.to_string(),
                state: Value::from(n),
                created_at,
            };
            records.push(self.stamp(snapshot));
        }
    }

    fn stamp(&self, snapshot: NewSnapshot) -> StoredRecord {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        StoredRecord {
            seq,
            snapshot: snapshot.into_snapshot(Uuid::new_v4().simple().to_string()),
        }
    }

    /// Records for `sid`, newest first.
    fn newest_first(&self, sid: &str) -> Vec<StoredRecord> {
        let mut matching: Vec<StoredRecord> = lock(&self.records)
            .iter()
            .filter(|r| r.snapshot.sid == sid)
            .cloned()
            .collect();
        matching.sort_unstable_by(|a, b| {
            (b.snapshot.created_at, b.seq).cmp(&(a.snapshot.created_at, a.seq))
        });
        matching
    }
}

#[async_trait]
impl SnapshotCollection for MemoryCollection {
    async fn insert(&self, snapshot: &NewSnapshot) -> Result<RecordId> {
        let record = self.stamp(snapshot.clone());
        let id = record.snapshot.id.clone();
        lock(&self.records).push(record);
        Ok(id)
    }

    async fn find_newest(&self, sid: &str, limit: u32) -> Result<Vec<Snapshot>> {
        Ok(self
            .newest_first(sid)
            .into_iter()
            .take(limit as usize)
            .map(|r| r.snapshot)
            .collect())
    }

    async fn first_excess(&self, sid: &str, keep: u64) -> Result<Option<RecordRef>> {
        Ok(self
            .newest_first(sid)
            .into_iter()
            .nth(usize::try_from(keep).unwrap_or(usize::MAX))
            .map(|r| RecordRef {
                id: r.snapshot.id,
                sid: r.snapshot.sid,
                created_at: r.snapshot.created_at,
            }))
    }

    async fn delete_through(&self, boundary: &RecordRef) -> Result<u64> {
        let mut records = lock(&self.records);
        // A boundary that is already gone still bounds by time.
        let cutoff = records
            .iter()
            .find(|r| r.snapshot.id == boundary.id)
            .map_or((boundary.created_at.saturating_sub(1), u64::MAX), |r| {
                (r.snapshot.created_at, r.seq)
            });

        let before = records.len();
        records.retain(|r| {
            r.snapshot.sid != boundary.sid || (r.snapshot.created_at, r.seq) > cutoff
        });
        Ok((before - records.len()) as u64)
    }

    async fn delete_sources(&self, sids: &[SourceId]) -> Result<u64> {
        let doomed: HashSet<&str> = sids.iter().map(String::as_str).collect();
        let mut records = lock(&self.records);
        let before = records.len();
        records.retain(|r| !doomed.contains(r.snapshot.sid.as_str()));
        Ok((before - records.len()) as u64)
    }

    async fn list_sources(&self) -> Result<Vec<SourceId>> {
        let sids: BTreeSet<SourceId> = lock(&self.records)
            .iter()
            .map(|r| r.snapshot.sid.clone())
            .collect();
        Ok(sids.into_iter().collect())
    }
}
