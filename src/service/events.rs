//! Service lifecycle events
//!
//! Every event is emitted through `tracing`. An [`EventLog`] additionally
//! records events somewhere durable or inspectable: the JSON-lines journal
//! under the state directory, or memory for tests.

use crate::channel::DisconnectReason;
use crate::config::{Config, ConfigManager};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// What happened to a service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Disposed,
    UnexpectedDisconnect {
        reason: DisconnectReason,
        detail: Option<String>,
    },
}

/// Lifecycle event of one service instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub instance_id: u64,
    pub service_type: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl ServiceEvent {
    pub fn new(instance_id: u64, service_type: &str, kind: EventKind) -> Self {
        Self {
            instance_id,
            service_type: service_type.to_string(),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event is reported at error level
    pub fn is_error(&self) -> bool {
        matches!(self.kind, EventKind::UnexpectedDisconnect { .. })
    }

    /// Emit through `tracing`
    pub fn trace(&self) {
        let name = format!("{} ({})", self.service_type, self.instance_id);
        match &self.kind {
            EventKind::Created => info!(instance = self.instance_id, "{} Service instance created", name),
            EventKind::Disposed => info!(instance = self.instance_id, "{} Service instance disposed", name),
            EventKind::UnexpectedDisconnect { reason, detail } => error!(
                instance = self.instance_id,
                "{} : Client stream disconnected unexpectedly: {} {}",
                name,
                reason,
                detail.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Recorder for service events
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Record an event; must never fail the calling service
    async fn record(&self, event: &ServiceEvent);
}

/// Appends events as JSON lines to a file
pub struct JournalEventLog {
    path: PathBuf,
}

impl JournalEventLog {
    /// Journal at an explicit path
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Journal at the default location, if enabled in config
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .general
            .event_journal
            .then(|| Self::new(ConfigManager::journal_path()))
    }

    /// Journal file path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventLog for JournalEventLog {
    async fn record(&self, event: &ServiceEvent) {
        let mut line = match serde_json::to_string(event) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize service event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write event journal: {}", e);
        }
    }
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<ServiceEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<ServiceEvent> {
        self.events.lock().clone()
    }

    /// Recorded events for one instance
    pub fn for_instance(&self, instance_id: u64) -> Vec<ServiceEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.instance_id == instance_id)
            .cloned()
            .collect()
    }

    /// Number of error-level events
    pub fn error_count(&self) -> usize {
        self.events.lock().iter().filter(|e| e.is_error()).count()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn record(&self, event: &ServiceEvent) {
        self.events.lock().push(event.clone());
    }
}
