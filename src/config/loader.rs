//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    backend = ?config.store.backend,
    uri = %config.store.connection_uri(),
    retention_policy = ?config.store.retention_policy,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig =
    toml::from_str(content).with_context(|| "Failed to parse config.toml")?;

  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - A usable store connection target and query limits
/// - A positive sweep interval when retention is enabled
/// - A non-empty metrics bind address when metrics are enabled
fn validate_config(config: &AppConfig) -> Result<()> {
  config.store.validate()?;

  anyhow::ensure!(
    !config.retention.enabled || config.retention.interval_seconds > 0,
    "retention.interval_seconds must be positive, got {}",
    config.retention.interval_seconds
  );

  anyhow::ensure!(
    !config.metrics.enabled || !config.metrics.bind_address.is_empty(),
    "metrics.bind_address must not be empty"
  );

  Ok(())
}
