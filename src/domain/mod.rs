//! Domain layer - Snapshot records and errors.
//!
//! No store or transport types live here (hexagonal architecture
//! inner ring). All types are serializable and testable in isolation.

pub mod error;
pub mod snapshot;

// Re-export core types for convenience
pub use error::DatastoreError;
pub use snapshot::{NewSnapshot, RecordId, Snapshot, SourceId};
