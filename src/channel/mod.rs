//! Channel abstraction
//!
//! A channel is the persistent bidirectional link between the host and one
//! worker service instance. The service base needs three things from it:
//! inbound calls, outbound asset fetches, and a disconnect notification.
//! [`LocalChannel`] is an in-process implementation.

mod local;

pub use local::{HostEnd, LocalChannel};

use crate::checksum::Checksum;
use crate::error::{ReplicaError, ReplicaResult};
use crate::snapshot::AssetSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Why a channel disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Closed locally by disposing the service
    Disposed,
    /// The host closed its end
    RemoteClosed,
    /// The underlying stream failed
    StreamError,
    /// A message could not be understood
    ProtocolError,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disposed => "disposed",
            Self::RemoteClosed => "remote closed",
            Self::StreamError => "stream error",
            Self::ProtocolError => "protocol error",
        };
        write!(f, "{}", name)
    }
}

/// Disconnect notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disconnected {
    pub reason: DisconnectReason,
    /// Transport-level failure description, if any
    pub detail: Option<String>,
}

impl Disconnected {
    pub fn new(reason: DisconnectReason, detail: Option<String>) -> Self {
        Self { reason, detail }
    }

    /// Whether this disconnect was requested locally
    pub fn is_clean(&self) -> bool {
        self.reason == DisconnectReason::Disposed
    }
}

/// Request sent by the host to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    /// Establish the session; a missing checksum means no snapshot is needed
    Initialize {
        session_id: u32,
        root_checksum: Option<Vec<u8>>,
    },
    /// Call a method of the derived service
    Invoke { name: String, params: Value },
}

/// Inbound call with its reply slot
#[derive(Debug)]
pub struct InboundCall {
    pub request: Request,
    pub reply: oneshot::Sender<ReplicaResult<Value>>,
}

impl InboundCall {
    /// Create a call and the receiver its reply arrives on
    pub fn new(request: Request) -> (Self, oneshot::Receiver<ReplicaResult<Value>>) {
        let (reply, rx) = oneshot::channel();
        (Self { request, reply }, rx)
    }
}

/// Transport collaborator contract
#[async_trait]
pub trait Channel: Send + Sync {
    /// Whether the channel has disconnected
    fn is_closed(&self) -> bool;

    /// Next inbound call; `None` once the host stops sending
    async fn next_call(&self) -> Option<InboundCall>;

    /// Ask the host for the bytes behind `checksum`
    async fn fetch_asset(&self, checksum: Checksum) -> ReplicaResult<Vec<u8>>;

    /// Resolve once the channel has disconnected
    async fn disconnected(&self) -> Disconnected;

    /// Close the channel locally; observers see `DisconnectReason::Disposed`
    fn close(&self);
}

/// Adapts a channel into the fetch collaborator of a snapshot service
///
/// A disconnect is reported as `Cancelled`, never as a transport failure,
/// even when it has not reached the service's cancellation token yet.
pub(crate) struct ChannelSource(pub Arc<dyn Channel>);

#[async_trait]
impl AssetSource for ChannelSource {
    async fn fetch(&self, checksum: Checksum) -> ReplicaResult<Vec<u8>> {
        if self.0.is_closed() {
            return Err(ReplicaError::Cancelled);
        }
        match self.0.fetch_asset(checksum).await {
            Err(_) if self.0.is_closed() => Err(ReplicaError::Cancelled),
            result => result,
        }
    }
}
