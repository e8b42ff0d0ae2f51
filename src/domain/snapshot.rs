//! Snapshot record types.
//!
//! A snapshot is one time-stamped state value recorded for a source.
//! The state payload is opaque: it is stored and returned verbatim and
//! never inspected by the datastore.
//!
//! Exposes two shapes:
//! - `NewSnapshot` for records about to be written (no identity yet)
//! - `Snapshot` for records read back from the store

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ────────────────────────────────────────────
// Type aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// Source identifier. Many snapshots share the same sid over time.
pub type SourceId = String;

/// Store-assigned record identity (hex ObjectId for MongoDB).
pub type RecordId = String;

// ────────────────────────────────────────────
// Store constants
// ────────────────────────────────────────────

/// Name of the backing collection.
pub const COLLECTION_NAME: &str = "datastore";

/// Indexed field used for every lookup.
pub const SID_FIELD: &str = "sid";

/// Timestamp field used for ordering.
pub const CREATED_AT_FIELD: &str = "createdAt";

/// Maximum number of snapshots returned by a fetch.
pub const FETCH_LIMIT: u32 = 100;

/// Number of newest snapshots kept per source by cleanup.
pub const LIMIT_PER_SID: u64 = 1_000_000;

/// A snapshot that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    /// Source identifier.
    pub sid: SourceId,
    /// Caller-supplied state, stored verbatim.
    pub state: Value,
    /// Write timestamp (Unix ms).
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

impl NewSnapshot {
    /// Stamp a new snapshot with the current wall-clock time.
    pub fn now(sid: impl Into<SourceId>, state: Value) -> Self {
        Self {
            sid: sid.into(),
            state,
            created_at: now_ms(),
        }
    }

    /// Attach the identity assigned by the store.
    pub fn into_snapshot(self, id: RecordId) -> Snapshot {
        Snapshot {
            id,
            sid: self.sid,
            state: self.state,
            created_at: self.created_at,
        }
    }
}

/// A persisted snapshot record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store-assigned identity.
    #[serde(rename = "_id")]
    pub id: RecordId,
    /// Source identifier.
    pub sid: SourceId,
    /// State exactly as it was written.
    pub state: Value,
    /// Write timestamp (Unix ms).
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
