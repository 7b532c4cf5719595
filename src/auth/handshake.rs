//! Channel Handshake
//!
//! Admits a new channel only after the credential presented in its opening
//! request verifies. Each connection walks
//! `Pending -> Authenticated -> Active -> Closed`, or straight from
//! `Pending` to `Closed` when the handshake fails.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::token::{AuthError, TokenCodec};
use crate::core::identity::PlayerId;
use crate::network::registry::{ConnectionId, ConnectionRegistry, Transport};

/// Query parameter carrying the credential.
pub const TOKEN_PARAM: &str = "token";

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Opened, credential not yet checked.
    Pending,
    /// Credential verified, not yet registered.
    Authenticated,
    /// Registered and reachable.
    Active,
    /// Finished; terminal.
    Closed,
}

/// One channel's authentication state.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    identity: Option<PlayerId>,
    token: Option<String>,
}

impl Connection {
    /// A freshly opened, unauthenticated connection.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Pending,
            identity: None,
            token: None,
        }
    }

    /// Connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Authenticated identity, once past `Pending`.
    pub fn identity(&self) -> Option<&PlayerId> {
        self.identity.as_ref()
    }

    /// Whether the connection is registered and usable.
    pub fn is_active(&self) -> bool {
        self.state == ConnectionState::Active
    }
}

/// Pull the credential out of a raw query string (`a=1&token=...`).
pub fn token_from_query(query: Option<&str>) -> Result<&str, AuthError> {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == TOKEN_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// Gatekeeper between the transport and the [`ConnectionRegistry`].
pub struct HandshakeAuthenticator {
    codec: Arc<TokenCodec>,
    registry: Arc<ConnectionRegistry>,
}

impl HandshakeAuthenticator {
    /// Create an authenticator sharing the process-wide codec and registry.
    pub fn new(codec: Arc<TokenCodec>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { codec, registry }
    }

    /// Authenticate a new channel and register it.
    ///
    /// `Err` is the `Pending -> Closed` transition: the connection never
    /// existed as far as the registry is concerned, and the caller must drop
    /// the transport.
    pub async fn admit(
        &self,
        query: Option<&str>,
        transport: Arc<dyn Transport>,
    ) -> Result<Connection, AuthError> {
        let mut conn = Connection::new(transport.connection_id());

        if let Err(e) = self.authenticate(&mut conn, query) {
            warn!("Rejected channel {}: {}", conn.id, e);
            return Err(e);
        }

        self.activate(&mut conn, transport).await;
        Ok(conn)
    }

    /// `Pending -> Authenticated` on a verified credential.
    fn authenticate(&self, conn: &mut Connection, query: Option<&str>) -> Result<(), AuthError> {
        debug_assert_eq!(conn.state, ConnectionState::Pending);
        let token = token_from_query(query)?;
        let claims = self.codec.verify(token)?;
        let identity = claims.player_id()?;

        debug!("Channel {} authenticated as {}", conn.id, identity);
        conn.identity = Some(identity);
        conn.token = Some(token.to_owned());
        conn.state = ConnectionState::Authenticated;
        Ok(())
    }

    /// `Authenticated -> Active`: make the identity reachable.
    async fn activate(&self, conn: &mut Connection, transport: Arc<dyn Transport>) {
        let Some(identity) = conn.identity.clone() else {
            return;
        };
        if let Some(previous) = self.registry.register(identity.clone(), transport).await {
            info!("Player {} reconnected, channel {} superseded", identity, previous);
        }
        conn.state = ConnectionState::Active;
        info!("Channel {} established for player {}", conn.id, identity);
    }

    /// Re-check the credential of an active connection before serving a
    /// request on it. A lapsed credential closes the connection.
    pub async fn revalidate(&self, conn: &mut Connection) -> Result<PlayerId, AuthError> {
        if conn.state != ConnectionState::Active {
            return Err(AuthError::MissingToken);
        }

        let (Some(token), Some(identity)) = (conn.token.clone(), conn.identity.clone()) else {
            return Err(AuthError::MissingToken);
        };
        if let Err(e) = self.codec.verify_subject(&token, identity.as_str()) {
            warn!("Channel {} for {} no longer authenticated: {}", conn.id, identity, e);
            self.close(conn).await;
            return Err(e);
        }
        Ok(identity)
    }

    /// Tear down a connection. Closing twice is a no-op.
    pub async fn close(&self, conn: &mut Connection) {
        if conn.state == ConnectionState::Closed {
            return;
        }
        if conn.state == ConnectionState::Active {
            if let Some(identity) = &conn.identity {
                self.registry.unregister_connection(identity.as_str(), conn.id).await;
                info!("Channel {} closed for player {}", conn.id, identity);
            }
        }
        conn.state = ConnectionState::Closed;
    }
}
