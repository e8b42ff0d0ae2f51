//! MongoDB Store - Document Store Port over the Official Driver
//!
//! Connects with a standard `mongodb://` connection string, verifies
//! reachability with a `ping`, and maps the snapshot queries onto
//! find/sort/skip/limit and `deleteMany`. State payloads are converted
//! between JSON and BSON at this boundary only.
//!
//! Trimming never ships record ids to the server: it reads the single
//! boundary record at `skip(keep)` and deletes by range from there, so
//! the request stays small however large the backlog is.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, instrument};

use crate::domain::snapshot::{
    NewSnapshot, RecordId, Snapshot, SourceId, CREATED_AT_FIELD, SID_FIELD,
};
use crate::ports::document_store::{
    ConnectionTarget, DocumentDatabase, RecordRef, SnapshotCollection, StoreConnector,
};

/// Stored document shape: `{ _id, sid, state, createdAt }`.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    sid: String,
    state: Bson,
    #[serde(rename = "createdAt", deserialize_with = "millis_from_bson")]
    created_at: i64,
}

impl SnapshotDocument {
    fn into_snapshot(self) -> Result<Snapshot> {
        let state = bson::from_bson(self.state)
            .context("Failed to convert stored state to JSON")?;
        Ok(Snapshot {
            id: self.id.to_hex(),
            sid: self.sid,
            state,
            created_at: self.created_at,
        })
    }
}

/// Projection used when only a record's position is needed.
#[derive(Debug, Deserialize)]
struct RecordRefDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    sid: String,
    #[serde(rename = "createdAt", deserialize_with = "millis_from_bson")]
    created_at: i64,
}

/// Read `createdAt` from any numeric form a writer may have used.
///
/// Int64 is what this crate writes. JavaScript writers store
/// `Date.now()` as a double, and some tools store a BSON date.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn millis_from_bson<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Bson::deserialize(deserializer)? {
        Bson::Int64(ms) => Ok(ms),
        Bson::Int32(ms) => Ok(i64::from(ms)),
        Bson::Double(ms) if ms.is_finite() && ms.trunc() == ms && ms.abs() < 9.0e18 => {
            Ok(ms as i64)
        }
        Bson::DateTime(at) => Ok(at.timestamp_millis()),
        other => Err(D::Error::custom(format!(
            "createdAt is not a millisecond timestamp: {other}"
        ))),
    }
}

// ---- Query shapes ----

fn source_filter(sid: &str) -> Document {
    doc! { SID_FIELD: sid }
}

fn newest_first() -> Document {
    doc! { CREATED_AT_FIELD: -1, "_id": -1 }
}

/// Latest `limit` records of a source.
fn newest_options(limit: u32) -> FindOptions {
    FindOptions::builder()
        .sort(newest_first())
        .limit(i64::from(limit))
        .build()
}

/// The one record just past the newest `keep`.
fn boundary_options(keep: u64) -> FindOptions {
    FindOptions::builder()
        .sort(newest_first())
        .skip(keep)
        .limit(1_i64)
        .projection(doc! { "_id": 1, SID_FIELD: 1, CREATED_AT_FIELD: 1 })
        .build()
}

/// The boundary record and every record of `sid` ordered after it.
fn through_filter(sid: &str, id: ObjectId, created_at: i64) -> Document {
    doc! {
        SID_FIELD: sid,
        "$or": [
            { CREATED_AT_FIELD: { "$lt": created_at } },
            { CREATED_AT_FIELD: created_at, "_id": { "$lte": id } },
        ],
    }
}

/// Opens MongoDB connections.
#[derive(Debug, Clone)]
pub struct MongoConnector {
    /// Application name reported to the server.
    app_name: String,
}

impl MongoConnector {
    /// Create a connector that identifies itself as `app_name`.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    #[instrument(skip(self), fields(uri = %target.uri))]
    async fn connect(&self, target: &ConnectionTarget) -> Result<Arc<dyn DocumentDatabase>> {
        let mut options = ClientOptions::parse(&target.uri)
            .await
            .context("Failed to parse connection string")?;
        options.app_name = Some(self.app_name.clone());

        let client = Client::with_options(options).context("Failed to build MongoDB client")?;
        let db = client.database(&target.db_name);

        // The driver connects lazily; force a round-trip so failures surface now.
        db.run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;

        info!(db = %target.db_name, "Connected to MongoDB");
        Ok(Arc::new(MongoDatabase { db }))
    }
}

/// A connected MongoDB database.
pub struct MongoDatabase {
    db: Database,
}

#[async_trait]
impl DocumentDatabase for MongoDatabase {
    async fn collection_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .db
            .list_collection_names()
            .filter(doc! { "name": name })
            .await
            .context("Failed to list collections")?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.db
            .create_collection(name)
            .await
            .with_context(|| format!("Failed to create collection {name}"))
    }

    async fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        let index = IndexModel::builder().keys(doc! { field: 1 }).build();
        let result = self
            .db
            .collection::<SnapshotDocument>(collection)
            .create_index(index)
            .await
            .with_context(|| format!("Failed to index {collection}.{field}"))?;
        debug!(index = %result.index_name, "Index created");
        Ok(())
    }

    fn collection(&self, name: &str) -> Arc<dyn SnapshotCollection> {
        Arc::new(MongoSnapshots {
            collection: self.db.collection(name),
        })
    }
}

/// Snapshot queries over one MongoDB collection.
pub struct MongoSnapshots {
    collection: Collection<SnapshotDocument>,
}

#[async_trait]
impl SnapshotCollection for MongoSnapshots {
    async fn insert(&self, snapshot: &NewSnapshot) -> Result<RecordId> {
        let document = SnapshotDocument {
            id: ObjectId::new(),
            sid: snapshot.sid.clone(),
            state: bson::to_bson(&snapshot.state).context("State is not representable as BSON")?,
            created_at: snapshot.created_at,
        };

        self.collection
            .insert_one(&document)
            .await
            .context("insertOne failed")?;

        Ok(document.id.to_hex())
    }

    async fn find_newest(&self, sid: &str, limit: u32) -> Result<Vec<Snapshot>> {
        let documents: Vec<SnapshotDocument> = self
            .collection
            .find(source_filter(sid))
            .with_options(newest_options(limit))
            .await
            .context("find failed")?
            .try_collect()
            .await
            .context("Failed to read cursor")?;

        documents.into_iter().map(SnapshotDocument::into_snapshot).collect()
    }

    async fn first_excess(&self, sid: &str, keep: u64) -> Result<Option<RecordRef>> {
        let boundary = self
            .collection
            .clone_with_type::<RecordRefDocument>()
            .find(source_filter(sid))
            .with_options(boundary_options(keep))
            .await
            .context("find failed")?
            .try_next()
            .await
            .context("Failed to read cursor")?;

        Ok(boundary.map(|d| RecordRef {
            id: d.id.to_hex(),
            sid: d.sid,
            created_at: d.created_at,
        }))
    }

    async fn delete_through(&self, boundary: &RecordRef) -> Result<u64> {
        let id = ObjectId::parse_str(&boundary.id)
            .with_context(|| format!("Invalid record id {}", boundary.id))?;

        let result = self
            .collection
            .delete_many(through_filter(&boundary.sid, id, boundary.created_at))
            .await
            .context("deleteMany failed")?;
        Ok(result.deleted_count)
    }

    async fn delete_sources(&self, sids: &[SourceId]) -> Result<u64> {
        let result = self
            .collection
            .delete_many(doc! { SID_FIELD: { "$in": sids.to_vec() } })
            .await
            .context("deleteMany failed")?;
        Ok(result.deleted_count)
    }

    async fn list_sources(&self) -> Result<Vec<SourceId>> {
        let values = self
            .collection
            .distinct(SID_FIELD, doc! {})
            .await
            .context("distinct failed")?;
        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(sid) => Some(sid),
                _ => None,
            })
            .collect())
    }
}
