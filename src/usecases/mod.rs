//! Use Cases Layer - Datastore Orchestration
//!
//! Coordinates the document store port into the snapshot workflow.
//!
//! Use cases:
//! - `datastore`: readiness gate plus put / fetch / cleanup
//! - `retention`: periodic cleanup of every known source

pub mod datastore;
pub mod retention;

pub use datastore::{Datastore, ReadinessState};
pub use retention::RetentionSweeper;
