//! Service configuration
//!
//! Loaded from a TOML file. Every section and field has a default, so an
//! empty or missing file yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Which departure evaluates whether an emptied room enters its grace period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureTrigger {
    /// Only a departing host; a room emptied by a non-host stays active
    #[default]
    HostDeparture,
    /// Whoever leaves last
    LastDeparture,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Delay between a room emptying and it being closed
    pub grace_period_secs: u64,
    pub default_max_participants: u32,
    pub closure_trigger: ClosureTrigger,
    pub code_length: usize,
    /// Retries when a generated code collides with an existing room
    pub max_code_attempts: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 60,
            default_max_participants: 8,
            closure_trigger: ClosureTrigger::default(),
            code_length: 6,
            max_code_attempts: 16,
        }
    }
}

impl LifecycleConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 7340,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; the platform data directory is used when unset
    pub database_path: Option<PathBuf>,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub log_filter: String,
    pub lifecycle: LifecycleConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            lifecycle: LifecycleConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl LobbyConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LobbyConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let lifecycle = &self.lifecycle;
        if lifecycle.default_max_participants == 0 {
            return Err(Error::Config(
                "lifecycle.default_max_participants must be at least 1".into(),
            ));
        }
        if lifecycle.code_length < 4 {
            return Err(Error::Config(
                "lifecycle.code_length must be at least 4".into(),
            ));
        }
        if lifecycle.max_code_attempts == 0 {
            return Err(Error::Config(
                "lifecycle.max_code_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Resolved database path
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.storage.database_path {
            return Ok(path.clone());
        }

        let dirs = ProjectDirs::from("dev", "onyx", "lobby").ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine data directory",
            ))
        })?;
        Ok(dirs.data_dir().join("lobby.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LobbyConfig::from_toml_str("").unwrap();
        assert_eq!(config, LobbyConfig::default());
        assert_eq!(config.lifecycle.grace_period(), Duration::from_secs(60));
        assert_eq!(config.lifecycle.closure_trigger, ClosureTrigger::HostDeparture);
    }

    #[test]
    fn test_partial_override() {
        let config = LobbyConfig::from_toml_str(
            r#"
            [lifecycle]
            grace_period_secs = 5
            closure_trigger = "last_departure"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.lifecycle.grace_period_secs, 5);
        assert_eq!(config.lifecycle.closure_trigger, ClosureTrigger::LastDeparture);
        assert_eq!(config.lifecycle.default_max_participants, 8);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = LobbyConfig::from_toml_str("[lifecycle]\ndefault_max_participants = 0")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = LobbyConfig::from_toml_str("[lifecycle]\nclosure_trigger = \"never\"")
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let config = LobbyConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LobbyConfig::default());
    }

    #[test]
    fn test_load_file_and_database_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lobby.toml");
        let db_path = dir.path().join("rooms.db");
        std::fs::write(
            &path,
            format!("[storage]\ndatabase_path = {:?}\n", db_path.display().to_string()),
        )
        .unwrap();

        let config = LobbyConfig::load(&path).unwrap();
        assert_eq!(config.database_path().unwrap(), db_path);
    }
}
