//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (MongoDB driver, in-process storage, HTTP).
//! Each sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: MongoDB and in-memory document stores

pub mod metrics;
pub mod persistence;
