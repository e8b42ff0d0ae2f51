//! Persistence Adapters - Document Store Implementations
//!
//! Implements the document store port twice: over a MongoDB server
//! and over process memory. Both honor the same ordering and
//! collection-setup semantics.

pub mod memory;
pub mod mongo;

pub use memory::{MemoryCollection, MemoryConnector, MemoryDatabase};
pub use mongo::MongoConnector;
