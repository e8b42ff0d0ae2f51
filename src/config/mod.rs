//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Every field
//! has a serde default, so a partial file (or none of a section) merges
//! with the defaults and the caller's values win.

pub mod loader;

use serde::Deserialize;

use crate::domain::error::DatastoreError;
use crate::domain::snapshot::{COLLECTION_NAME, FETCH_LIMIT, LIMIT_PER_SID};
use crate::ports::ConnectionTarget;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  #[serde(default)]
  pub service: ServiceConfig,
  /// Document store connection and query limits.
  #[serde(default)]
  pub store: DatastoreConfig,
  /// Periodic retention sweep.
  #[serde(default)]
  pub retention: RetentionConfig,
  /// Metrics and health endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  #[serde(default = "default_service_name")]
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: default_service_name(),
      log_level: default_log_level(),
    }
  }
}

/// Which document store implementation backs the datastore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
  /// MongoDB server at `host:port`.
  #[default]
  Mongo,
  /// In-process store; nothing survives a restart.
  Memory,
}

/// What cleanup removes once a source exceeds its retention limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
  /// Delete only the records beyond the newest `retention_limit`.
  #[default]
  TrimExcess,
  /// Delete every record of the source (legacy behavior).
  PurgeSource,
}

/// Document store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatastoreConfig {
  /// Store implementation.
  #[serde(default)]
  pub backend: StoreBackend,
  /// Server host.
  #[serde(default = "default_host")]
  pub host: String,
  /// Server port.
  #[serde(default = "default_port")]
  pub port: u16,
  /// Database name.
  #[serde(default = "default_db_name")]
  pub db_name: String,
  /// Collection holding the snapshots.
  #[serde(default = "default_collection")]
  pub collection: String,
  /// Maximum snapshots returned per fetch.
  #[serde(default = "default_fetch_limit")]
  pub fetch_limit: u32,
  /// Newest snapshots kept per source by cleanup.
  #[serde(default = "default_retention_limit")]
  pub retention_limit: u64,
  /// Cleanup deletion policy.
  #[serde(default)]
  pub retention_policy: RetentionPolicy,
  /// Upper bound on the one-time readiness initialization (milliseconds).
  #[serde(default = "default_connect_timeout")]
  pub connect_timeout_ms: u64,
}

impl Default for DatastoreConfig {
  fn default() -> Self {
    Self {
      backend: StoreBackend::default(),
      host: default_host(),
      port: default_port(),
      db_name: default_db_name(),
      collection: default_collection(),
      fetch_limit: default_fetch_limit(),
      retention_limit: default_retention_limit(),
      retention_policy: RetentionPolicy::default(),
      connect_timeout_ms: default_connect_timeout(),
    }
  }
}

impl DatastoreConfig {
  /// Standard connection string built from host, port and database.
  pub fn connection_uri(&self) -> String {
    format!("mongodb://{}:{}/{}", self.host, self.port, self.db_name)
  }

  /// Connection target handed to the store connector.
  pub fn target(&self) -> ConnectionTarget {
    ConnectionTarget {
      uri: self.connection_uri(),
      db_name: self.db_name.clone(),
    }
  }

  /// Check every field; the datastore refuses to start otherwise.
  pub fn validate(&self) -> Result<(), DatastoreError> {
    let fail = |msg: String| Err(DatastoreError::Config(msg));

    if self.host.trim().is_empty() {
      return fail("host must not be empty".to_string());
    }
    if self.port == 0 {
      return fail("port must be non-zero".to_string());
    }
    if self.db_name.is_empty() {
      return fail("db_name must not be empty".to_string());
    }
    if let Some(c) = self
      .db_name
      .chars()
      .find(|c| matches!(c, '/' | '\\' | '.' | '"' | '$' | ' '))
    {
      return fail(format!("db_name contains invalid character {c:?}"));
    }
    if self.collection.is_empty() || self.collection.starts_with("system.") {
      return fail(format!("invalid collection name {:?}", self.collection));
    }
    if self.fetch_limit == 0 {
      return fail("fetch_limit must be positive".to_string());
    }
    if self.retention_limit == 0 {
      return fail("retention_limit must be positive".to_string());
    }
    if self.connect_timeout_ms == 0 {
      return fail("connect_timeout_ms must be positive".to_string());
    }
    Ok(())
  }
}

/// Periodic retention sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
  /// Run the sweeper at all.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Seconds between sweeps.
  #[serde(default = "default_sweep_interval")]
  pub interval_seconds: u64,
}

impl Default for RetentionConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      interval_seconds: default_sweep_interval(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_service_name() -> String {
  "snapshot-datastore".to_string()
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_host() -> String {
  "localhost".to_string()
}

fn default_port() -> u16 {
  27017
}

fn default_db_name() -> String {
  "dashbi".to_string()
}

fn default_collection() -> String {
  COLLECTION_NAME.to_string()
}

fn default_fetch_limit() -> u32 {
  FETCH_LIMIT
}

fn default_retention_limit() -> u64 {
  LIMIT_PER_SID
}

fn default_connect_timeout() -> u64 {
  10_000
}

fn default_sweep_interval() -> u64 {
  3600
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
