//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `DocumentStore`: connection, collection setup and snapshot queries

pub mod document_store;

pub use document_store::{
  ConnectionTarget, DocumentDatabase, RecordRef, SnapshotCollection, StoreConnector,
};
