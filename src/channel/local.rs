//! In-process channel
//!
//! `LocalChannel::pair` wires a worker end and a host end together with Tokio
//! channels. The host end serves fetches from an [`AssetStore`] and counts
//! them, which makes the pair useful for tests and local demos.

use crate::channel::{Channel, DisconnectReason, Disconnected, InboundCall, Request};
use crate::checksum::Checksum;
use crate::error::{ReplicaError, ReplicaResult};
use crate::snapshot::AssetStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tracing::{debug, trace};

/// Inbound call queue depth
const CALL_QUEUE: usize = 64;

/// Outstanding fetch requests before senders wait
const FETCH_QUEUE: usize = 256;

type DisconnectState = Arc<watch::Sender<Option<Disconnected>>>;

struct FetchRequest {
    checksum: Checksum,
    reply: oneshot::Sender<ReplicaResult<Vec<u8>>>,
}

/// Record the first disconnect; later ones are ignored
fn signal(state: &DisconnectState, event: Disconnected) -> bool {
    state.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(event);
        true
    })
}

/// Worker end of an in-process channel
pub struct LocalChannel {
    calls: Mutex<mpsc::Receiver<InboundCall>>,
    fetches: mpsc::Sender<FetchRequest>,
    state: DisconnectState,
}

impl LocalChannel {
    /// Create a connected pair serving assets from `store`
    ///
    /// Must be called inside a Tokio runtime; the host end's fetch server
    /// runs as a background task until the channel disconnects.
    pub fn pair(store: Arc<AssetStore>) -> (HostEnd, Arc<LocalChannel>) {
        Self::pair_with_delay(store, Duration::ZERO)
    }

    /// Like [`LocalChannel::pair`], delaying every fetch reply
    pub fn pair_with_delay(store: Arc<AssetStore>, delay: Duration) -> (HostEnd, Arc<LocalChannel>) {
        let (call_tx, call_rx) = mpsc::channel(CALL_QUEUE);
        let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_QUEUE);
        let (state, _) = watch::channel(None);
        let state = Arc::new(state);
        let fetch_count = Arc::new(AtomicU64::new(0));

        tokio::spawn(serve_fetches(
            fetch_rx,
            store,
            state.clone(),
            fetch_count.clone(),
            delay,
        ));

        let host = HostEnd {
            calls: call_tx,
            state: state.clone(),
            fetch_count,
        };
        let worker = Arc::new(LocalChannel {
            calls: Mutex::new(call_rx),
            fetches: fetch_tx,
            state,
        });
        (host, worker)
    }
}

#[async_trait]
impl Channel for LocalChannel {
    fn is_closed(&self) -> bool {
        self.state.borrow().is_some()
    }

    async fn next_call(&self) -> Option<InboundCall> {
        self.calls.lock().await.recv().await
    }

    async fn fetch_asset(&self, checksum: Checksum) -> ReplicaResult<Vec<u8>> {
        let context = format!("fetching {}", checksum.short());
        let (reply, rx) = oneshot::channel();
        self.fetches
            .send(FetchRequest { checksum, reply })
            .await
            .map_err(|_| ReplicaError::transport(&context, "host stopped serving fetches"))?;
        rx.await
            .map_err(|_| ReplicaError::transport(&context, "host dropped the request"))?
    }

    async fn disconnected(&self) -> Disconnected {
        let mut rx = self.state.subscribe();
        let result = rx.wait_for(Option::is_some).await;
        match result {
            Ok(state) => state.clone().unwrap_or_else(remote_closed),
            Err(_) => remote_closed(),
        }
    }

    fn close(&self) {
        if signal(
            &self.state,
            Disconnected::new(DisconnectReason::Disposed, None),
        ) {
            debug!("Local channel closed by worker");
        }
    }
}

fn remote_closed() -> Disconnected {
    Disconnected::new(DisconnectReason::RemoteClosed, None)
}

async fn serve_fetches(
    mut requests: mpsc::Receiver<FetchRequest>,
    store: Arc<AssetStore>,
    state: DisconnectState,
    fetch_count: Arc<AtomicU64>,
    delay: Duration,
) {
    let mut disconnect = state.subscribe();
    loop {
        tokio::select! {
            biased;
            _ = disconnect.wait_for(Option::is_some) => break,
            request = requests.recv() => {
                let Some(FetchRequest { checksum, reply }) = request else {
                    break;
                };
                fetch_count.fetch_add(1, Ordering::SeqCst);
                trace!("Host serving {}", checksum.short());
                let payload = store
                    .get(&checksum)
                    .map(|payload| payload.to_vec())
                    .ok_or(ReplicaError::AssetNotFound(checksum));
                if delay.is_zero() {
                    let _ = reply.send(payload);
                } else {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = reply.send(payload);
                    });
                }
            }
        }
    }
    debug!("Host fetch server stopped");
}

/// Host end of an in-process channel
pub struct HostEnd {
    calls: mpsc::Sender<InboundCall>,
    state: DisconnectState,
    fetch_count: Arc<AtomicU64>,
}

impl HostEnd {
    /// Send `Initialize` and wait for the reply
    pub async fn initialize(&self, session_id: u32, root: Option<Checksum>) -> ReplicaResult<Value> {
        self.call(Request::Initialize {
            session_id,
            root_checksum: root.map(|checksum| checksum.as_bytes().to_vec()),
        })
        .await
    }

    /// Invoke a method of the derived service and wait for the reply
    pub async fn invoke(&self, name: &str, params: Value) -> ReplicaResult<Value> {
        self.call(Request::Invoke {
            name: name.to_string(),
            params,
        })
        .await
    }

    /// Send a raw request and wait for the reply
    pub async fn call(&self, request: Request) -> ReplicaResult<Value> {
        if self.is_closed() {
            return Err(ReplicaError::ChannelClosed);
        }
        let (call, rx) = InboundCall::new(request);
        self.calls
            .send(call)
            .await
            .map_err(|_| ReplicaError::ChannelClosed)?;
        rx.await.map_err(|_| ReplicaError::ChannelClosed)?
    }

    /// Drop the connection from the host side
    pub fn disconnect(&self, reason: DisconnectReason, detail: Option<String>) {
        if signal(&self.state, Disconnected::new(reason, detail)) {
            debug!("Local channel disconnected by host: {}", reason);
        }
    }

    /// Whether the channel has disconnected
    pub fn is_closed(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Fetch requests the host has served
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

impl Drop for HostEnd {
    fn drop(&mut self) {
        signal(&self.state, remote_closed());
    }
}
