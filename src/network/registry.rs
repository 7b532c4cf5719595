//! Connection Registry
//!
//! Maps an authenticated [`PlayerId`] to the live channel it is reachable on.
//! The registry only does bookkeeping: the socket itself belongs to the
//! connection task, which hands the registry a [`Transport`] to write through.
//!
//! At most one channel is registered per identity. A second registration
//! supersedes the first (last-write-wins); the older socket is left open.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::identity::PlayerId;

/// Unique connection identifier.
pub type ConnectionId = Uuid;

/// Transport-level write failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The peer side is gone.
    #[error("channel closed")]
    Closed,
    /// Outbound buffer is full; the writer is not keeping up.
    #[error("outbound buffer full")]
    Backpressure,
    /// Any other I/O failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// Write side of a live bidirectional connection.
pub trait Transport: Send + Sync {
    /// Identifier of the physical connection.
    fn connection_id(&self) -> ConnectionId;

    /// Whether the transport still accepts writes.
    fn is_open(&self) -> bool;

    /// Queue a text payload. Must not block.
    fn send_text(&self, payload: &str) -> Result<(), SendError>;
}

/// Transport backed by a bounded channel drained by the connection's writer
/// task.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ConnectionId,
    sender: mpsc::Sender<String>,
}

impl ChannelHandle {
    /// Create a handle and the receiver its writer task should drain.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }
}

impl Transport for ChannelHandle {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    fn send_text(&self, payload: &str) -> Result<(), SendError> {
        use mpsc::error::TrySendError;
        self.sender
            .try_send(payload.to_owned())
            .map_err(|e| match e {
                TrySendError::Full(_) => SendError::Backpressure,
                TrySendError::Closed(_) => SendError::Closed,
            })
    }
}

/// Result of a targeted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Payload handed to the transport.
    Delivered,
    /// Nobody is registered under that identity.
    NoSuchIdentity,
    /// Registered, but the transport reports it is no longer open.
    ChannelClosed,
    /// Transport refused the write.
    SendFailed(SendError),
}

impl DeliveryOutcome {
    /// True if the payload reached the transport.
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Identity to live channel mapping.
#[derive(Default)]
pub struct ConnectionRegistry {
    channels: RwLock<BTreeMap<PlayerId, Arc<dyn Transport>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the channel for `identity`.
    ///
    /// Returns the id of the connection that was superseded, if any.
    pub async fn register(
        &self,
        identity: PlayerId,
        transport: Arc<dyn Transport>,
    ) -> Option<ConnectionId> {
        let id = transport.connection_id();
        let previous = {
            let mut channels = self.channels.write().await;
            channels.insert(identity.clone(), transport)
        };

        let previous = previous.map(|t| t.connection_id()).filter(|prev| *prev != id);
        match previous {
            Some(prev) => debug!("Player {} re-registered: {} supersedes {}", identity, id, prev),
            None => debug!("Player {} registered on {}", identity, id),
        }
        previous
    }

    /// Remove the mapping for `identity`. Returns whether one existed.
    pub async fn unregister(&self, identity: &str) -> bool {
        let mut channels = self.channels.write().await;
        channels.remove(identity).is_some()
    }

    /// Remove the mapping only if it still points at `connection`.
    ///
    /// A superseded connection closing late must not evict its replacement.
    pub async fn unregister_connection(&self, identity: &str, connection: ConnectionId) -> bool {
        let mut channels = self.channels.write().await;
        match channels.get(identity) {
            Some(current) if current.connection_id() == connection => {
                channels.remove(identity);
                true
            }
            Some(_) => {
                debug!("Player {} already re-registered, keeping newer channel", identity);
                false
            }
            None => false,
        }
    }

    /// Best-effort send of a text payload to `identity`.
    ///
    /// Never returns an error: every failure is folded into the outcome so a
    /// failed notification cannot abort the caller's remaining work.
    pub async fn send_to(&self, identity: &str, payload: &str) -> DeliveryOutcome {
        let transport = {
            let channels = self.channels.read().await;
            channels.get(identity).cloned()
        };

        let Some(transport) = transport else {
            return DeliveryOutcome::NoSuchIdentity;
        };
        if !transport.is_open() {
            return DeliveryOutcome::ChannelClosed;
        }

        match transport.send_text(payload) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(SendError::Closed) => DeliveryOutcome::ChannelClosed,
            Err(e) => {
                warn!("Send to {} failed: {}", identity, e);
                DeliveryOutcome::SendFailed(e)
            }
        }
    }

    /// Whether `identity` currently has a channel.
    pub async fn is_registered(&self, identity: &str) -> bool {
        self.channels.read().await.contains_key(identity)
    }

    /// Connection currently registered for `identity`.
    pub async fn connection_of(&self, identity: &str) -> Option<ConnectionId> {
        self.channels.read().await.get(identity).map(|t| t.connection_id())
    }

    /// Number of registered identities.
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// True if nobody is registered.
    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }
}
