//! Integration Tests - Datastore over Mocked and In-Memory Stores
//!
//! Drives the datastore through the document store port. Failure
//! paths use mockall mocks of the port traits; the happy paths and
//! the retention scenarios run against the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mockall::mock;
use mockall::predicate::*;
use serde_json::json;

use snapshot_datastore::adapters::persistence::{MemoryConnector, MemoryDatabase};
use snapshot_datastore::config::{DatastoreConfig, RetentionPolicy};
use snapshot_datastore::domain::snapshot::{NewSnapshot, RecordId, Snapshot, SourceId};
use snapshot_datastore::ports::document_store::{
    ConnectionTarget, DocumentDatabase, RecordRef, SnapshotCollection, StoreConnector,
};
use snapshot_datastore::{Datastore, DatastoreError, ReadinessState};

// ---- Mock Definitions ----

mock! {
    pub Connector {}

    #[async_trait::async_trait]
    impl StoreConnector for Connector {
        async fn connect(
            &self,
            target: &ConnectionTarget,
        ) -> anyhow::Result<Arc<dyn DocumentDatabase>>;
    }
}

mock! {
    pub Database {}

    #[async_trait::async_trait]
    impl DocumentDatabase for Database {
        async fn collection_exists(&self, name: &str) -> anyhow::Result<bool>;
        async fn create_collection(&self, name: &str) -> anyhow::Result<()>;
        async fn create_index(&self, collection: &str, field: &str) -> anyhow::Result<()>;
        fn collection(&self, name: &str) -> Arc<dyn SnapshotCollection>;
    }
}

mock! {
    pub Collection {}

    #[async_trait::async_trait]
    impl SnapshotCollection for Collection {
        async fn insert(&self, snapshot: &NewSnapshot) -> anyhow::Result<RecordId>;
        async fn find_newest(&self, sid: &str, limit: u32) -> anyhow::Result<Vec<Snapshot>>;
        async fn first_excess(&self, sid: &str, keep: u64) -> anyhow::Result<Option<RecordRef>>;
        async fn delete_through(&self, boundary: &RecordRef) -> anyhow::Result<u64>;
        async fn delete_sources(&self, sids: &[SourceId]) -> anyhow::Result<u64>;
        async fn list_sources(&self) -> anyhow::Result<Vec<SourceId>>;
    }
}

/// Connector that hands out `db` and counts how often it was asked.
fn connector_for(db: Arc<dyn DocumentDatabase>, attempts: Arc<AtomicUsize>) -> MockConnector {
    let mut connector = MockConnector::new();
    connector.expect_connect().returning(move |_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&db))
    });
    connector
}

/// Database whose collection already exists and resolves to `collection`.
fn existing_database(collection: MockCollection) -> Arc<dyn DocumentDatabase> {
    let collection: Arc<dyn SnapshotCollection> = Arc::new(collection);
    let mut db = MockDatabase::new();
    db.expect_collection_exists().returning(|_| Ok(true));
    db.expect_create_collection().never();
    db.expect_create_index().never();
    db.expect_collection()
        .with(eq("datastore"))
        .returning(move |_| Arc::clone(&collection));
    Arc::new(db)
}

fn memory_datastore(config: DatastoreConfig) -> (Datastore, Arc<MemoryDatabase>) {
    let db = Arc::new(MemoryDatabase::new());
    let connector = Arc::new(MemoryConnector::with_database(Arc::clone(&db)));
    (Datastore::new(config, connector).unwrap(), db)
}

// ---- Readiness ----

#[tokio::test]
async fn test_connection_failure_is_final_and_attempted_once() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);

    let mut connector = MockConnector::new();
    connector
        .expect_connect()
        .withf(|target| target.uri == "mongodb://localhost:27017/dashbi")
        .returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("connection refused"))
        });

    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    for _ in 0..3 {
        let put = store.put("source-A", json!({"x": 1})).await.unwrap_err();
        assert!(matches!(put, DatastoreError::Connection(ref msg) if msg.contains("connection refused")));

        let fetch = store.fetch("source-A").await.unwrap_err();
        assert_eq!(fetch, put);
    }

    // Cleanup swallows the same failure.
    store.cleanup("source-A").await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(store.state(), ReadinessState::Failed);
}

#[tokio::test]
async fn test_index_failure_is_final() {
    let mut db = MockDatabase::new();
    db.expect_collection_exists().returning(|_| Ok(false));
    db.expect_create_collection()
        .with(eq("datastore"))
        .times(1)
        .returning(|_| Ok(()));
    db.expect_create_index()
        .with(eq("datastore"), eq("sid"))
        .times(1)
        .returning(|_, _| Err(anyhow::anyhow!("not authorized")));
    db.expect_collection().never();

    let attempts = Arc::new(AtomicUsize::new(0));
    let connector = connector_for(Arc::new(db), Arc::clone(&attempts));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    let err = store.put("s", json!(1)).await.unwrap_err();
    assert!(matches!(err, DatastoreError::IndexCreation(ref msg) if msg.contains("not authorized")));
    assert_eq!(store.fetch("s").await.unwrap_err(), err);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_collection_created_concurrently_is_reused() {
    let checks = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&checks);

    let mut collection = MockCollection::new();
    collection.expect_find_newest().returning(|_, _| Ok(Vec::new()));
    let collection: Arc<dyn SnapshotCollection> = Arc::new(collection);

    let mut db = MockDatabase::new();
    // Absent on the first check, present after creation raced.
    db.expect_collection_exists()
        .returning(move |_| Ok(seen.fetch_add(1, Ordering::SeqCst) > 0));
    db.expect_create_collection()
        .returning(|_| Err(anyhow::anyhow!("collection already exists")));
    db.expect_create_index().never();
    db.expect_collection()
        .returning(move |_| Arc::clone(&collection));

    let connector = connector_for(Arc::new(db), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    assert!(store.fetch("s").await.unwrap().is_empty());
    assert_eq!(store.state(), ReadinessState::Ready);
    assert_eq!(checks.load(Ordering::SeqCst), 2);
}

// ---- Per-call failures ----

#[tokio::test]
async fn test_insert_failure_does_not_poison_readiness() {
    let inserts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&inserts);

    let mut collection = MockCollection::new();
    collection.expect_insert().returning(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow::anyhow!("duplicate key"))
        } else {
            Ok("65f0c0ffee".to_string())
        }
    });

    let connector = connector_for(existing_database(collection), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    let err = store.put("s", json!(1)).await.unwrap_err();
    assert!(matches!(err, DatastoreError::Insert(_)));
    assert!(!err.is_terminal());

    let record = store.put("s", json!(2)).await.unwrap();
    assert_eq!(record.id, "65f0c0ffee");
    assert_eq!(record.state, json!(2));
    assert_eq!(store.state(), ReadinessState::Ready);
}

#[tokio::test]
async fn test_query_failure_is_reported() {
    let mut collection = MockCollection::new();
    collection
        .expect_find_newest()
        .with(eq("s"), eq(100))
        .returning(|_, _| Err(anyhow::anyhow!("cursor killed")));
    collection
        .expect_insert()
        .returning(|_| Ok("id".to_string()));

    let connector = connector_for(existing_database(collection), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    let err = store.fetch("s").await.unwrap_err();
    assert!(matches!(err, DatastoreError::Query(ref msg) if msg.contains("cursor killed")));
    assert!(store.put("s", json!(null)).await.is_ok());
}

#[tokio::test]
async fn test_cleanup_swallows_store_errors() {
    let mut collection = MockCollection::new();
    collection
        .expect_first_excess()
        .with(eq("s"), eq(1_000_000))
        .returning(|_, _| Err(anyhow::anyhow!("timeout")));
    collection.expect_delete_through().never();
    collection.expect_delete_sources().never();

    let connector = connector_for(existing_database(collection), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    store.cleanup("s").await;
    store.spawn_cleanup("s").await.unwrap();
}

#[tokio::test]
async fn test_cleanup_under_limit_deletes_nothing() {
    let mut collection = MockCollection::new();
    collection.expect_first_excess().returning(|_, _| Ok(None));
    collection.expect_delete_through().never();
    collection.expect_delete_sources().never();

    let connector = connector_for(existing_database(collection), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    store.cleanup("s").await;
}

#[tokio::test]
async fn test_trim_deletes_from_boundary_in_one_request() {
    let boundary = RecordRef {
        id: "65f0c0ffee65f0c0ffee65f0".to_string(),
        sid: "s".to_string(),
        created_at: 1_700_000_000_000,
    };
    let expected = boundary.clone();

    let mut collection = MockCollection::new();
    collection
        .expect_first_excess()
        .with(eq("s"), eq(1_000_000))
        .times(1)
        .returning(move |_, _| Ok(Some(boundary.clone())));
    collection
        .expect_delete_through()
        .withf(move |b| *b == expected)
        .times(1)
        .returning(|_| Ok(840_000));
    collection.expect_delete_sources().never();

    let connector = connector_for(existing_database(collection), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(DatastoreConfig::default(), Arc::new(connector)).unwrap();

    store.cleanup("s").await;
}

#[tokio::test]
async fn test_purge_deletes_the_boundary_source() {
    let mut collection = MockCollection::new();
    collection.expect_first_excess().returning(|sid, _| {
        Ok(Some(RecordRef {
            id: "65f0c0ffee65f0c0ffee65f0".to_string(),
            sid: sid.to_string(),
            created_at: 0,
        }))
    });
    collection.expect_delete_through().never();
    collection
        .expect_delete_sources()
        .withf(|sids| sids == ["s".to_string()].as_slice())
        .times(1)
        .returning(|_| Ok(1_000_001));

    let config = DatastoreConfig {
        retention_policy: RetentionPolicy::PurgeSource,
        ..Default::default()
    };
    let connector = connector_for(existing_database(collection), Arc::new(AtomicUsize::new(0)));
    let store = Datastore::new(config, Arc::new(connector)).unwrap();

    store.cleanup("s").await;
}

// ---- Scenarios ----

#[tokio::test]
async fn test_put_fetch_scenario_with_defaults() {
    let (store, _) = memory_datastore(DatastoreConfig::default());

    store.put("source-A", json!({"x": 1})).await.unwrap();
    store.put("source-A", json!({"x": 2})).await.unwrap();

    let records = store.fetch("source-A").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sid, "source-A");
    assert_eq!(records[0].state, json!({"x": 1}));
    assert_eq!(records[1].sid, "source-A");
    assert_eq!(records[1].state, json!({"x": 2}));
}

#[tokio::test]
async fn test_fetch_unknown_source_is_empty() {
    let (store, _) = memory_datastore(DatastoreConfig::default());
    store.put("other", json!(1)).await.unwrap();
    assert_eq!(store.fetch("nobody").await.unwrap(), Vec::new());
}

#[tokio::test]
async fn test_fetch_keeps_latest_hundred_in_order() {
    let (store, db) = memory_datastore(DatastoreConfig::default());
    db.snapshots("datastore").seed("busy", 250, 1_000);
    store.put("busy", json!("latest")).await.unwrap();

    let records = store.fetch("busy").await.unwrap();
    assert_eq!(records.len(), 100);
    // The 99 newest seeded states (151..=249), then the live put.
    assert_eq!(records[0].state, json!(151));
    assert_eq!(records[98].state, json!(249));
    assert_eq!(records[99].state, json!("latest"));
    assert!(records.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

/// `source-B` holds 1,000,001 records, one past the per-source limit.
///
/// Default policy (`trim_excess`): cleanup deletes only the oldest record,
/// so exactly 1,000,000 remain. Legacy policy (`purge_source`): cleanup
/// deletes every record whose sid matches the excess, which is all of
/// `source-B`, so none remain. Other sources are untouched either way.
#[tokio::test]
async fn test_cleanup_one_past_limit() {
    const STORED: u64 = 1_000_001;

    {
        let (store, db) = memory_datastore(DatastoreConfig::default());
        let records = db.snapshots("datastore");
        records.seed("source-B", STORED, 0);
        records.seed("source-C", 3, 0);

        store.cleanup("source-B").await;

        assert_eq!(records.count("source-B"), 1_000_000);
        assert_eq!(records.count("source-C"), 3);
        // The oldest (state 0) is the one that went.
        assert_eq!(store.fetch("source-B").await.unwrap()[0].state, json!(999_901));
        let oldest = records.first_excess("source-B", 999_999).await.unwrap().unwrap();
        assert_eq!(oldest.created_at, 1);
        assert_eq!(records.first_excess("source-B", 1_000_000).await.unwrap(), None);
    }

    {
        let config = DatastoreConfig {
            retention_policy: RetentionPolicy::PurgeSource,
            ..Default::default()
        };
        let (store, db) = memory_datastore(config);
        let records = db.snapshots("datastore");
        records.seed("source-B", STORED, 0);
        records.seed("source-C", 3, 0);

        store.cleanup("source-B").await;

        assert_eq!(records.count("source-B"), 0);
        assert_eq!(records.count("source-C"), 3);
    }
}

#[tokio::test]
async fn test_cleanup_at_limit_keeps_everything() {
    let config = DatastoreConfig {
        retention_limit: 10,
        retention_policy: RetentionPolicy::PurgeSource,
        ..Default::default()
    };
    let (store, db) = memory_datastore(config);
    db.snapshots("datastore").seed("edge", 10, 0);

    store.cleanup("edge").await;
    assert_eq!(db.snapshots("datastore").count("edge"), 10);
}
