//! Configuration management for Replica

pub mod schema;

pub use schema::{CacheConfig, Config, GeneralConfig, SnapshotConfig};

use crate::error::{ReplicaError, ReplicaResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

const APP_DIR: &str = "replica";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        let config_path = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.toml");
        Self { config_path }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Event journal path under the platform state directory
    pub fn journal_path() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("events.log")
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> ReplicaResult<Config> {
        let path = &self.config_path;
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ReplicaError::io(format!("reading config from {}", path.display()), e))?;
        let config: Config = toml::from_str(&content).map_err(|e| self.invalid(e.to_string()))?;
        config.validate().map_err(|reason| self.invalid(reason))?;
        Ok(config)
    }

    /// Save configuration to file, creating its directory
    pub async fn save(&self, config: &Config) -> ReplicaResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ReplicaError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            ReplicaError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn invalid(&self, reason: String) -> ReplicaError {
        ReplicaError::ConfigInvalid {
            path: self.config_path.clone(),
            reason,
        }
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
