//! Configuration schema for Replica
//!
//! Configuration is stored at `~/.config/replica/config.toml`

use serde::{Deserialize, Serialize};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Asset cache settings
    pub cache: CacheConfig,

    /// Snapshot materialization settings
    pub snapshot: SnapshotConfig,
}

impl Config {
    /// Check values serde cannot constrain
    pub fn validate(&self) -> Result<(), String> {
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "general.log_format must be \"text\" or \"json\", got \"{}\"",
                self.general.log_format
            ));
        }
        if self.snapshot.fetch_concurrency == 0 {
            return Err("snapshot.fetch_concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append service lifecycle events to the event journal
    pub event_journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            event_journal: false,
        }
    }
}

/// Asset cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Use the process-wide cache instead of one cache per command
    pub shared: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { shared: true }
    }
}

/// Snapshot materialization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Deepest node level accepted below the root
    pub max_depth: usize,

    /// Concurrent fetches per session
    pub fetch_concurrency: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_depth: 256,
            fetch_concurrency: 16,
        }
    }
}
