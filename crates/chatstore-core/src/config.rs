//! Store configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file)
//! yields a working in-memory store.
//!
//! ```toml
//! history_limit = 50
//! retention = 50
//! subscriber_capacity = 256
//! overflow_policy = "drop_oldest"
//!
//! [backend]
//! kind = "redb"
//! path = "/var/lib/chatstore/chat.redb"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hub::OverflowPolicy;

/// Errors from loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which storage backend to use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Volatile, process-local storage
    #[default]
    Memory,
    /// Durable redb database file
    Redb {
        /// Database file path
        path: PathBuf,
    },
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Messages returned when backfilling a joining subscriber
    pub history_limit: usize,
    /// Maximum messages retained per room
    pub retention: usize,
    /// Mailbox capacity per subscriber
    pub subscriber_capacity: usize,
    /// What to do when a subscriber's mailbox is full
    pub overflow_policy: OverflowPolicy,
    /// Storage backend
    pub backend: BackendConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            retention: 50,
            subscriber_capacity: 256,
            overflow_policy: OverflowPolicy::DropOldest,
            backend: BackendConfig::Memory,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&source)
    }

    /// Reject values the store cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention == 0 {
            return Err(ConfigError::Invalid("retention must be at least 1".into()));
        }
        if self.subscriber_capacity == 0 {
            return Err(ConfigError::Invalid("subscriber_capacity must be at least 1".into()));
        }
        if self.history_limit > self.retention {
            tracing::warn!(
                history_limit = self.history_limit,
                retention = self.retention,
                "history_limit exceeds retention; backfill is capped by retention"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn parses_redb_backend() {
        let config = StoreConfig::from_toml_str(
            r#"
            retention = 100
            overflow_policy = "disconnect"

            [backend]
            kind = "redb"
            path = "/tmp/chat.redb"
            "#,
        )
        .unwrap();

        assert_eq!(config.retention, 100);
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.overflow_policy, OverflowPolicy::Disconnect);
        assert_eq!(config.backend, BackendConfig::Redb { path: PathBuf::from("/tmp/chat.redb") });
    }

    #[test]
    fn zero_retention_is_invalid() {
        let result = StoreConfig::from_toml_str("retention = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let result = StoreConfig::from_toml_str("subscriber_capacity = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_backend_fails_to_parse() {
        let result = StoreConfig::from_toml_str("[backend]\nkind = \"postgres\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = StoreConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
