//! Matchmaking Service
//!
//! Composition root for the lobby core. Owns the shared codec, registry and
//! queue, and exposes the narrow operations the request layer and login flow
//! call. Queue calls come back as the acknowledgment text shown to the
//! player.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::auth::gate::{GateConfig, RequestGate};
use crate::auth::handshake::HandshakeAuthenticator;
use crate::auth::token::{AuthError, TokenCodec};
use crate::core::identity::PlayerId;
use crate::matchmaking::queue::{JoinOutcome, LeaveOutcome, MatchmakingQueue, QueueError};
use crate::network::registry::ConnectionRegistry;

/// Reply for [`JoinOutcome::Queued`].
pub const MSG_QUEUED: &str = "You have been added to the matchmaking queue.";
/// Reply for [`JoinOutcome::AlreadyQueued`].
pub const MSG_ALREADY_QUEUED: &str = "You are already in the matchmaking queue.";
/// Reply for [`LeaveOutcome::Removed`].
pub const MSG_REMOVED: &str = "You have been removed from the matchmaking queue.";
/// Reply for [`LeaveOutcome::NotQueued`].
pub const MSG_NOT_QUEUED: &str = "You are not in the matchmaking queue.";
/// Reply for a blank identity.
pub const MSG_BLANK_IDENTITY: &str = "Player ID cannot be null or empty.";

impl JoinOutcome {
    /// Acknowledgment shown to the player.
    pub fn message(&self) -> &'static str {
        match self {
            JoinOutcome::Queued => MSG_QUEUED,
            JoinOutcome::AlreadyQueued => MSG_ALREADY_QUEUED,
        }
    }
}

impl LeaveOutcome {
    /// Acknowledgment shown to the player.
    pub fn message(&self) -> &'static str {
        match self {
            LeaveOutcome::Removed => MSG_REMOVED,
            LeaveOutcome::NotQueued => MSG_NOT_QUEUED,
        }
    }
}

impl QueueError {
    /// Error text shown to the player.
    pub fn message(&self) -> &'static str {
        match self {
            QueueError::InvalidIdentity(_) => MSG_BLANK_IDENTITY,
        }
    }
}

/// The lobby core, wired together.
#[derive(Clone)]
pub struct Matchmaker {
    codec: Arc<TokenCodec>,
    registry: Arc<ConnectionRegistry>,
    queue: Arc<MatchmakingQueue>,
    authenticator: Arc<HandshakeAuthenticator>,
    gate: Arc<RequestGate>,
}

impl Matchmaker {
    /// Wire a fresh registry and queue around `codec`.
    pub fn new(codec: TokenCodec, gate_config: GateConfig) -> Self {
        let codec = Arc::new(codec);
        let registry = Arc::new(ConnectionRegistry::new());
        let queue = Arc::new(MatchmakingQueue::new(registry.clone()));
        let authenticator = Arc::new(HandshakeAuthenticator::new(codec.clone(), registry.clone()));
        let gate = Arc::new(RequestGate::new(codec.clone(), gate_config));

        Self {
            codec,
            registry,
            queue,
            authenticator,
            gate,
        }
    }

    /// Join the queue; returns the acknowledgment text.
    pub async fn join_queue(&self, identity: &str) -> Result<&'static str, QueueError> {
        Ok(self.queue.join(identity).await?.message())
    }

    /// Leave the queue; returns the acknowledgment text.
    pub async fn leave_queue(&self, identity: &str) -> Result<&'static str, QueueError> {
        Ok(self.queue.leave(identity).await?.message())
    }

    /// Mint a credential at login.
    pub fn issue_credential(
        &self,
        identity: &PlayerId,
        role: &str,
        claims: Map<String, Value>,
    ) -> Result<String, AuthError> {
        self.codec.issue(identity, role, claims)
    }

    /// True only for a genuine, unexpired credential naming `identity`.
    pub fn validate_credential(&self, token: &str, identity: &str) -> bool {
        self.codec.validate(token, identity)
    }

    /// Subject of a correctly signed credential.
    pub fn extract_identity(&self, token: &str) -> Result<PlayerId, AuthError> {
        self.codec.extract_identity(token)
    }

    /// Typed claim of a correctly signed credential.
    pub fn extract_claim<T: DeserializeOwned>(&self, token: &str, name: &str) -> Result<T, AuthError> {
        self.codec.extract_claim(token, name)
    }

    /// Shared connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Shared matchmaking queue.
    pub fn queue(&self) -> &Arc<MatchmakingQueue> {
        &self.queue
    }

    /// Channel handshake authenticator.
    pub fn authenticator(&self) -> &Arc<HandshakeAuthenticator> {
        &self.authenticator
    }

    /// Stateless request gate.
    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }
}
