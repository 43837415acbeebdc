//! Store connection configuration.
//!
//! Config priority: explicit file (`cinesync.toml` in the given directory) >
//! `CINESYNC_*` environment variables > defaults. The defaults are the
//! sample placeholders, which [`StoreConfig::validate`] rejects, so a fresh
//! checkout fails fast with an actionable message instead of hanging on a
//! store that will never authenticate.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const CONFIG_FILE: &str = "cinesync.toml";

const PLACEHOLDER_MARKER: &str = "insert ";

/// Credentials and transport endpoints for the replicated store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Store database / app identifier.
  pub database_id: String,
  /// Authentication token.
  pub token: String,
  /// Authentication endpoint.
  pub auth_url: String,
  /// Websocket transport endpoint.
  pub websocket_url: String,
  /// Whether replication starts at initialization.
  pub sync_enabled: bool,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      database_id: "insert database id here".to_string(),
      token: "insert auth token here".to_string(),
      auth_url: "insert auth url here".to_string(),
      websocket_url: "insert websocket url here".to_string(),
      sync_enabled: true,
    }
  }
}

impl StoreConfig {
  /// Load config for a directory: file first, then env overrides.
  pub fn load(dir: &Path) -> Result<Self, ConfigError> {
    let path = dir.join(CONFIG_FILE);
    let mut config = if path.exists() {
      let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(e.to_string()))?;
      debug!(path = %path.display(), "Loaded store config file");
      toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?
    } else {
      Self::default()
    };
    config.apply_env();
    Ok(config)
  }

  /// Overlay `CINESYNC_*` environment variables onto this config.
  pub fn apply_env(&mut self) {
    if let Ok(v) = std::env::var("CINESYNC_DATABASE_ID") {
      self.database_id = v;
    }
    if let Ok(v) = std::env::var("CINESYNC_TOKEN") {
      self.token = v;
    }
    if let Ok(v) = std::env::var("CINESYNC_AUTH_URL") {
      self.auth_url = v;
    }
    if let Ok(v) = std::env::var("CINESYNC_WEBSOCKET_URL") {
      self.websocket_url = v;
    }
  }

  /// Reject empty values and untouched sample placeholders.
  pub fn validate(&self) -> Result<(), ConfigError> {
    check("database_id", &self.database_id)?;
    check("token", &self.token)?;
    check("auth_url", &self.auth_url)?;
    check("websocket_url", &self.websocket_url)?;
    Ok(())
  }

  /// A config that passes validation, for tests and local backends.
  pub fn for_local() -> Self {
    Self {
      database_id: "local".to_string(),
      token: "local".to_string(),
      auth_url: "local://auth".to_string(),
      websocket_url: "local://sync".to_string(),
      sync_enabled: true,
    }
  }
}

fn check(field: &'static str, value: &str) -> Result<(), ConfigError> {
  if value.is_empty() {
    return Err(ConfigError::Missing(field));
  }
  if value.contains(PLACEHOLDER_MARKER) {
    return Err(ConfigError::Placeholder(field));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn test_default_config_fails_validation() {
    let config = StoreConfig::default();
    assert_eq!(config.validate(), Err(ConfigError::Placeholder("database_id")));
  }

  #[test]
  fn test_empty_value_is_missing() {
    let config = StoreConfig {
      database_id: String::new(),
      ..StoreConfig::for_local()
    };
    assert_eq!(config.validate(), Err(ConfigError::Missing("database_id")));
  }

  #[test]
  fn test_local_config_validates() {
    assert_eq!(StoreConfig::for_local().validate(), Ok(()));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join(CONFIG_FILE),
      r#"
database_id = "db-1"
token = "tok-1"
auth_url = "https://auth.example"
websocket_url = "wss://sync.example"
"#,
    )
    .unwrap();

    let config = StoreConfig::load(dir.path()).unwrap();
    assert_eq!(config.database_id, "db-1");
    assert_eq!(config.websocket_url, "wss://sync.example");
    assert!(config.sync_enabled);
    assert_eq!(config.validate(), Ok(()));
  }

  #[test]
  fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::load(dir.path()).unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_parse_error_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE), "not [valid toml").unwrap();
    assert!(matches!(StoreConfig::load(dir.path()), Err(ConfigError::Parse(_))));
  }
}
