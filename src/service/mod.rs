//! RPC service base
//!
//! A worker process runs one [`ServiceBase`] per connected channel. The base
//! owns the channel, the instance's cancellation token, and its session;
//! a [`ServiceHandler`] layers the derived service's own methods and hooks
//! on top.
//!
//! # Lifecycle
//!
//! | State | Entered when |
//! |-------|--------------|
//! | Created | `ServiceBase::new` attached to the channel |
//! | Initialized | the host sent `Initialize` |
//! | Active | the first snapshot operation ran |
//! | Cancelling | the channel disconnected |
//! | Disposed | `dispose` was called |

mod base;
pub mod context;
pub mod events;

pub use base::ServiceBase;
pub use context::ServiceContext;
pub use events::{EventKind, EventLog, JournalEventLog, MemoryEventLog, ServiceEvent};

use crate::asset::AssetCache;
use crate::channel::{Channel, Disconnected};
use crate::config::SnapshotConfig;
use crate::error::{ReplicaError, ReplicaResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Derived-service behavior plugged into [`ServiceBase`]
#[async_trait]
pub trait ServiceHandler: Send + Sync + Sized + 'static {
    /// Type name used in log lines
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Handle a business method invoked by the host
    async fn handle_call(
        &self,
        service: &ServiceBase<Self>,
        method: &str,
        params: Value,
    ) -> ReplicaResult<Value> {
        let _ = (service, params);
        Err(ReplicaError::UnknownMethod(method.to_string()))
    }

    /// Called once when the channel disconnects, after cancellation is set
    fn on_disconnected(&self, _event: &Disconnected) {}

    /// Called once during `dispose`
    fn on_dispose(&self) {}
}

/// Collaborators a service instance needs
#[derive(Clone)]
pub struct ServiceConfig {
    /// Channel the instance is bound to
    pub channel: Arc<dyn Channel>,
    /// Asset cache shared with other instances
    pub cache: Arc<AssetCache>,
    /// Source of instance IDs
    pub context: Arc<ServiceContext>,
    /// Extra event recorder, on top of `tracing`
    pub events: Option<Arc<dyn EventLog>>,
    /// Snapshot materialization limits
    pub snapshot: SnapshotConfig,
}

impl ServiceConfig {
    /// Configuration using the process-wide cache and context
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            cache: AssetCache::global(),
            context: ServiceContext::global(),
            events: None,
            snapshot: SnapshotConfig::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<AssetCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_context(mut self, context: Arc<ServiceContext>) -> Self {
        self.context = context;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventLog>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = snapshot;
        self
    }
}
