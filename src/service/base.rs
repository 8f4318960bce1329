//! Service instance bound to one channel

use crate::asset::AssetCache;
use crate::channel::{Channel, ChannelSource, DisconnectReason, Disconnected, InboundCall, Request};
use crate::checksum::Checksum;
use crate::config::SnapshotConfig;
use crate::error::{ReplicaError, ReplicaResult};
use crate::service::events::{EventKind, EventLog, ServiceEvent};
use crate::service::{ServiceConfig, ServiceHandler};
use crate::session::{ServiceState, Session};
use crate::snapshot::{Snapshot, SnapshotOptions, SnapshotService};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Session plus the snapshot service built for it
struct ActiveSession {
    session: Session,
    snapshots: SnapshotService,
}

/// One RPC-exposed service instance
///
/// Created attached to its channel. The dispatch task spawned by
/// [`ServiceBase::new`] routes inbound calls and turns the channel's
/// disconnect notification into cancellation.
pub struct ServiceBase<H: ServiceHandler> {
    instance_id: u64,
    handler: H,
    channel: Arc<dyn Channel>,
    cache: Arc<AssetCache>,
    events: Option<Arc<dyn EventLog>>,
    snapshot_config: SnapshotConfig,
    cancellation: CancellationToken,
    torn_down: CancellationToken,
    session: OnceLock<ActiveSession>,
    operations: AtomicU64,
    disposed: AtomicBool,
    disconnected: AtomicBool,
}

impl<H: ServiceHandler> ServiceBase<H> {
    /// Attach a new service instance to `config.channel`
    ///
    /// Must be called inside a Tokio runtime. Fails with `ChannelClosed` if
    /// the channel has already disconnected.
    pub async fn new(config: ServiceConfig, handler: H) -> ReplicaResult<Arc<Self>> {
        if config.channel.is_closed() {
            return Err(ReplicaError::ChannelClosed);
        }

        let service = Arc::new(Self {
            instance_id: config.context.next_instance_id(),
            handler,
            channel: config.channel,
            cache: config.cache,
            events: config.events,
            snapshot_config: config.snapshot,
            cancellation: CancellationToken::new(),
            torn_down: CancellationToken::new(),
            session: OnceLock::new(),
            operations: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        });

        service.record(EventKind::Created).await;
        tokio::spawn(service.clone().dispatch());
        Ok(service)
    }

    /// Instance ID, for log correlation
    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// `"<type> (<instance id>)"`
    pub fn debug_name(&self) -> String {
        format!("{} ({})", self.handler.type_name(), self.instance_id)
    }

    /// Derived-service handler
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Asset cache this instance reads through
    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.cache
    }

    /// Session, once initialized
    pub fn session(&self) -> Option<&Session> {
        self.session.get().map(|active| &active.session)
    }

    /// Token cancelled when the channel disconnects or the instance is disposed
    pub fn cancellation(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Whether cancellation has been signaled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        if self.disposed.load(Ordering::SeqCst) {
            ServiceState::Disposed
        } else if self.cancellation.is_cancelled() {
            ServiceState::Cancelling
        } else if self.session.get().is_none() {
            ServiceState::Created
        } else if self.operations.load(Ordering::SeqCst) == 0 {
            ServiceState::Initialized
        } else {
            ServiceState::Active
        }
    }

    /// Pin the session and, optionally, its root checksum
    ///
    /// May be called once per instance; a second call is rejected with
    /// `AlreadyInitialized` and leaves the first session in place.
    pub fn initialize(&self, session_id: u32, root_checksum: Option<&[u8]>) -> ReplicaResult<()> {
        self.ensure_not_disposed()?;

        let root = root_checksum.map(Checksum::from_slice).transpose()?;
        if let Some(active) = self.session.get() {
            return Err(self.contract_violation(ReplicaError::AlreadyInitialized {
                session_id: active.session.session_id,
            }));
        }

        let snapshots = SnapshotService::new(
            session_id,
            self.cache.clone(),
            Arc::new(ChannelSource(self.channel.clone())),
            &self.snapshot_config,
        );
        let active = ActiveSession {
            session: Session::new(session_id, root, self.instance_id),
            snapshots,
        };

        if let Err(rejected) = self.session.set(active) {
            return Err(self.contract_violation(ReplicaError::AlreadyInitialized {
                session_id: rejected.session.session_id,
            }));
        }

        let session = self.session().ok_or(ReplicaError::NotInitialized)?;
        if session.has_root() {
            info!(
                "{} Session {} initialized (root: {})",
                self.debug_name(),
                session_id,
                root.map(|c| c.short()).unwrap_or_default()
            );
        } else {
            info!(
                "{} Session {} initialized without a snapshot",
                self.debug_name(),
                session_id
            );
        }
        Ok(())
    }

    /// Materialize the snapshot pinned by the session
    pub async fn snapshot(&self) -> ReplicaResult<Snapshot> {
        self.snapshot_with_options(SnapshotOptions::new()).await
    }

    /// Materialize the pinned snapshot carrying specific options
    pub async fn snapshot_with_options(&self, options: SnapshotOptions) -> ReplicaResult<Snapshot> {
        self.ensure_not_disposed()?;

        let active = self
            .session
            .get()
            .ok_or_else(|| self.contract_violation(ReplicaError::NotInitialized))?;
        let root = active.session.root_checksum.ok_or_else(|| {
            self.contract_violation(ReplicaError::NoRootChecksum {
                session_id: active.session.session_id,
            })
        })?;

        // The dispatch task may not have seen the disconnect yet
        if self.channel.is_closed() {
            self.cancellation.cancel();
        }
        if !self.state().accepts_operations() {
            return Err(ReplicaError::Cancelled);
        }

        self.operations.fetch_add(1, Ordering::SeqCst);
        active
            .snapshots
            .snapshot(root, options, &self.cancellation)
            .await
    }

    /// Close the channel and tear the instance down
    ///
    /// Idempotent: only the first call closes, runs the dispose hook, and
    /// records the disposal.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            debug!("{} Dispose called again, ignoring", self.debug_name());
            return;
        }

        self.cancellation.cancel();
        self.channel.close();
        self.handler.on_dispose();
        self.record(EventKind::Disposed).await;
    }

    /// Resolve once the disconnect handler has finished
    pub async fn closed(&self) {
        self.torn_down.cancelled().await;
    }

    async fn dispatch(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                event = self.channel.disconnected() => {
                    self.handle_disconnect(event).await;
                    break;
                }
                call = self.channel.next_call() => match call {
                    Some(call) => self.clone().route(call),
                    None => {
                        let event = Disconnected::new(
                            DisconnectReason::RemoteClosed,
                            Some("call stream ended".to_string()),
                        );
                        self.handle_disconnect(event).await;
                        break;
                    }
                },
            }
        }
    }

    fn route(self: Arc<Self>, call: InboundCall) {
        let InboundCall { request, reply } = call;
        match request {
            Request::Initialize {
                session_id,
                root_checksum,
            } => {
                let result = self
                    .initialize(session_id, root_checksum.as_deref())
                    .map(|()| Value::Null);
                let _ = reply.send(result);
            }
            Request::Invoke { name, params } => {
                if self.cancellation.is_cancelled() {
                    let _ = reply.send(Err(ReplicaError::Cancelled));
                    return;
                }
                tokio::spawn(async move {
                    let result = self.handler.handle_call(&self, &name, params).await;
                    let _ = reply.send(result);
                });
            }
        }
    }

    async fn handle_disconnect(&self, event: Disconnected) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancellation.cancel();
        self.handler.on_disconnected(&event);

        if !event.is_clean() {
            self.record(EventKind::UnexpectedDisconnect {
                reason: event.reason,
                detail: event.detail,
            })
            .await;
        }
        self.torn_down.cancel();
    }

    fn ensure_not_disposed(&self) -> ReplicaResult<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ReplicaError::Disposed(self.instance_id));
        }
        Ok(())
    }

    fn contract_violation(&self, err: ReplicaError) -> ReplicaError {
        error!("{} Contract violation: {}", self.debug_name(), err);
        err
    }

    async fn record(&self, kind: EventKind) {
        let event = ServiceEvent::new(self.instance_id, self.handler.type_name(), kind);
        event.trace();
        if let Some(events) = &self.events {
            events.record(&event).await;
        }
    }
}
