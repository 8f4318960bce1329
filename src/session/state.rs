//! Session state
//!
//! A session binds one service instance to one pinned root checksum. It is
//! created by `Initialize` and never changes afterwards.

use crate::checksum::Checksum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a service instance
///
/// `Created → Initialized → Active → Cancelling → Disposed`. Both
/// `Cancelling` and `Disposed` are reachable directly from `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Created,
    Initialized,
    Active,
    Cancelling,
    Disposed,
}

impl ServiceState {
    /// Whether operations may still run
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Self::Initialized | Self::Active)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Active => "active",
            Self::Cancelling => "cancelling",
            Self::Disposed => "disposed",
        };
        write!(f, "{}", name)
    }
}

/// Session record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Host-assigned session ID
    pub session_id: u32,

    /// Root snapshot checksum, absent when the session needs no snapshot
    pub root_checksum: Option<Checksum>,

    /// Instance the session belongs to
    pub instance_id: u64,

    /// When the session was initialized
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a new session
    pub fn new(session_id: u32, root_checksum: Option<Checksum>, instance_id: u64) -> Self {
        Self {
            session_id,
            root_checksum,
            instance_id,
            created_at: Utc::now(),
        }
    }

    /// Whether a snapshot can be requested
    pub fn has_root(&self) -> bool {
        self.root_checksum.is_some()
    }
}
