//! Error types for Replica
//!
//! All modules use `ReplicaResult<T>` as their return type.

use crate::checksum::Checksum;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Replica operations
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// All errors that can occur in Replica
#[derive(Error, Debug)]
pub enum ReplicaError {
    // Contract violations (caller bugs)
    #[error("Service has not been initialized with a session")]
    NotInitialized,

    #[error("Service already initialized for session {session_id}")]
    AlreadyInitialized { session_id: u32 },

    #[error("Session {session_id} has no pinned root checksum")]
    NoRootChecksum { session_id: u32 },

    #[error("Invalid checksum length: expected {expected} bytes, got {actual}")]
    InvalidChecksumLength { expected: usize, actual: usize },

    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("Service instance {0} has been disposed")]
    Disposed(u64),

    #[error("Channel is closed")]
    ChannelClosed,

    // Cancellation
    #[error("Operation cancelled")]
    Cancelled,

    // Snapshot errors
    #[error("Integrity failure: expected checksum {expected}, payload hashes to {actual}")]
    Integrity { expected: Checksum, actual: Checksum },

    #[error("Asset not found on host: {0}")]
    AssetNotFound(Checksum),

    #[error("Malformed node {checksum}: {reason}")]
    Decode { checksum: Checksum, reason: String },

    #[error("Snapshot tree exceeds maximum depth of {max_depth}")]
    TreeTooDeep { max_depth: usize },

    // Transport errors
    #[error("Transport failure while {context}: {reason}")]
    Transport { context: String, reason: String },

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicaError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a transport error
    pub fn transport(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Check if error is a caller bug rather than a runtime condition
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized
                | Self::AlreadyInitialized { .. }
                | Self::NoRootChecksum { .. }
                | Self::InvalidChecksumLength { .. }
                | Self::Disposed(_)
                | Self::ChannelClosed
        )
    }

    /// Check if this is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Send Initialize before requesting a snapshot"),
            Self::NoRootChecksum { .. } => {
                Some("Initialize the session with a root checksum to request snapshots")
            }
            Self::ConfigInvalid { .. } => Some("Run: replica config init --force"),
            _ => None,
        }
    }
}
