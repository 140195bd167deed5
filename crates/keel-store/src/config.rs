//! Store configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! path = "app.db"
//! busy_timeout_ms = 2000
//! journal_mode = "WAL"
//! log_parameters = false
//! ```

use crate::errors::{config_error, io_error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// SQLite journal mode for file databases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Truncate,
    Memory,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Memory => "MEMORY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Database file; ignored when `in_memory` is set
    pub path: Option<PathBuf>,
    pub in_memory: bool,
    pub foreign_keys: bool,
    pub journal_mode: JournalMode,
    pub busy_timeout_ms: u64,
    /// Include bound parameter values in statement logs
    pub log_parameters: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            foreign_keys: true,
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            log_parameters: false,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            in_memory: true,
            ..Self::default()
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| io_error("store_config", e))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| config_error(&format!("invalid store config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.in_memory && self.path.is_none() {
            return Err(config_error("either `path` or `in_memory = true` is required"));
        }
        if self.in_memory && self.path.is_some() {
            return Err(config_error("`path` and `in_memory` are mutually exclusive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_toml() {
        let config = StoreConfig::from_toml("path = \"app.db\"").unwrap();
        assert_eq!(config.path, Some(PathBuf::from("app.db")));
        assert!(config.foreign_keys);
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(!config.log_parameters);
    }

    #[test]
    fn test_full_toml() {
        let config = StoreConfig::from_toml(
            r#"
in_memory = true
foreign_keys = false
journal_mode = "DELETE"
busy_timeout_ms = 10
log_parameters = true
"#,
        )
        .unwrap();
        assert!(config.in_memory);
        assert!(!config.foreign_keys);
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.busy_timeout_ms, 10);
        assert!(config.log_parameters);
    }

    #[test]
    fn test_missing_target_rejected() {
        assert!(StoreConfig::from_toml("busy_timeout_ms = 1").is_err());
        assert!(StoreConfig::from_toml("in_memory = true\npath = \"x.db\"").is_err());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(StoreConfig::from_toml("path = \"a.db\"\ntimeout = 3").is_err());
    }
}
