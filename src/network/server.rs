//! WebSocket Lobby Server
//!
//! Async WebSocket server for player channels.
//! Handles the credential handshake, matchmaking commands, and echo replies.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

use crate::auth::handshake::Connection;
use crate::config::{env_parse, env_string, ConfigError};
use crate::core::identity::PlayerId;
use crate::matchmaking::service::Matchmaker;
use crate::network::protocol::{
    echo_text, ClientMessage, Inbound, CREDENTIAL_EXPIRED, HANDSHAKE_REJECTED,
};
use crate::network::registry::{ChannelHandle, Transport};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// How long a closing connection waits for its writer to flush.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Per-connection outbound message buffer.
    pub outbound_buffer: usize,
    /// Request path accepted for channel upgrades.
    pub ws_path: String,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 1000,
            outbound_buffer: 64,
            ws_path: "/ws".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bind_addr: env_parse("LOBBY_BIND_ADDR", defaults.bind_addr)?,
            max_connections: env_parse("LOBBY_MAX_CONNECTIONS", defaults.max_connections)?,
            outbound_buffer: env_parse("LOBBY_OUTBOUND_BUFFER", defaults.outbound_buffer)?,
            ws_path: env_string("LOBBY_WS_PATH").unwrap_or(defaults.ws_path),
            version: defaults.version,
        };
        if config.max_connections == 0 {
            return Err(ConfigError::Rejected("max connections must be positive".into()));
        }
        if config.outbound_buffer == 0 {
            return Err(ConfigError::Rejected("outbound buffer must be positive".into()));
        }
        if !config.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "LOBBY_WS_PATH",
                value: config.ws_path,
                reason: "must start with '/'".into(),
            });
        }
        Ok(config)
    }
}

/// Lobby server errors.
#[derive(Debug, thiserror::Error)]
pub enum LobbyServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Connected client bookkeeping.
struct ConnectedClient {
    /// Player identifier (after handshake).
    player_id: Option<PlayerId>,
    /// Connection time.
    connected_at: Instant,
}

type Clients = Arc<RwLock<BTreeMap<SocketAddr, ConnectedClient>>>;

/// The lobby server.
pub struct LobbyServer {
    /// Server configuration.
    config: ServerConfig,
    /// Matchmaking core.
    lobby: Matchmaker,
    /// Connected clients.
    clients: Clients,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl LobbyServer {
    /// Create a new lobby server.
    pub fn new(config: ServerConfig, lobby: Matchmaker) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            lobby,
            clients: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), LobbyServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), LobbyServerError> {
        info!(
            "Lobby server v{} listening on {}{}",
            self.config.version,
            listener.local_addr()?,
            self.config.ws_path
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            // Limit check and slot reservation share one lock.
                            {
                                let mut clients = self.clients.write().await;
                                if clients.len() >= self.config.max_connections {
                                    warn!("Connection limit reached, rejecting {}", addr);
                                    continue;
                                }
                                clients.insert(
                                    addr,
                                    ConnectedClient {
                                        player_id: None,
                                        connected_at: Instant::now(),
                                    },
                                );
                            }

                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection whose client slot is already reserved.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let lobby = self.lobby.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            Self::run_connection(stream, addr, &clients, &lobby, &config, shutdown_rx).await;

            if let Some(client) = clients.write().await.remove(&addr) {
                info!(
                    "Client {} ({}) cleaned up after {:?}",
                    addr,
                    client.player_id.as_ref().map(PlayerId::as_str).unwrap_or("anonymous"),
                    client.connected_at.elapsed()
                );
            }
        });
    }

    /// Upgrade, authenticate, then pump messages until either side closes.
    async fn run_connection(
        stream: TcpStream,
        addr: SocketAddr,
        clients: &Clients,
        lobby: &Matchmaker,
        config: &ServerConfig,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut query: Option<String> = None;
        let expected_path = config.ws_path.as_str();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            if req.uri().path() != expected_path {
                let mut refusal = ErrorResponse::new(Some("Not Found".to_string()));
                *refusal.status_mut() = StatusCode::NOT_FOUND;
                return Err(refusal);
            }
            query = req.uri().query().map(str::to_owned);
            Ok(resp)
        };

        let ws_stream = match accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                debug!("WebSocket handshake failed for {}: {}", addr, e);
                return;
            }
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (handle, msg_rx) = ChannelHandle::new(config.outbound_buffer);
        let mut conn = match lobby
            .authenticator()
            .admit(query.as_deref(), Arc::new(handle.clone()))
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                debug!("Closing {}: {}", addr, e);
                let _ = ws_sender.send(close_message(CloseCode::Policy, HANDSHAKE_REJECTED)).await;
                let _ = ws_sender.close().await;
                return;
            }
        };

        if let Some(client) = clients.write().await.get_mut(&addr) {
            client.player_id = conn.identity().cloned();
        }

        let writer = spawn_writer(ws_sender, msg_rx);
        let mut close_reason: Option<(CloseCode, &'static str)> = None;

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(reason) = Self::handle_text(&text, &mut conn, lobby, &handle).await {
                                close_reason = Some(reason);
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => {
                            debug!("Ignoring {} byte binary frame from {}", data.len(), addr);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("Client {} disconnected", addr);
                            break;
                        }
                        Some(Err(e)) => {
                            warn!("WebSocket error for {}: {}", addr, e);
                            break;
                        }
                        _ => {}
                    }
                }
                _ = shutdown_rx.recv() => {
                    close_reason = Some((CloseCode::Away, "Server shutting down"));
                    break;
                }
            }
        }

        lobby.authenticator().close(&mut conn).await;
        drop(handle);

        // Every sender is gone once the registry entry is removed, so the
        // writer drains and hands the sink back.
        match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
            Ok(Ok(mut ws_sender)) => {
                if let Some((code, reason)) = close_reason {
                    let _ = ws_sender.send(close_message(code, reason)).await;
                }
                let _ = ws_sender.close().await;
            }
            Ok(Err(e)) => error!("Writer task for {} failed: {}", addr, e),
            Err(_) => warn!("Writer for {} did not drain in time", addr),
        }
    }

    /// Serve one inbound text frame. `Err` carries the close frame to send.
    async fn handle_text(
        text: &str,
        conn: &mut Connection,
        lobby: &Matchmaker,
        reply: &ChannelHandle,
    ) -> Result<(), (CloseCode, &'static str)> {
        let identity = match lobby.authenticator().revalidate(conn).await {
            Ok(identity) => identity,
            Err(_) => return Err((CloseCode::Policy, CREDENTIAL_EXPIRED)),
        };

        let response = match Inbound::classify(text) {
            Inbound::Command(ClientMessage::JoinQueue) => {
                match lobby.join_queue(identity.as_str()).await {
                    Ok(msg) => msg.to_string(),
                    Err(e) => e.message().to_string(),
                }
            }
            Inbound::Command(ClientMessage::LeaveQueue) => {
                match lobby.leave_queue(identity.as_str()).await {
                    Ok(msg) => msg.to_string(),
                    Err(e) => e.message().to_string(),
                }
            }
            Inbound::Text(payload) => {
                debug!("Message received from [{}]: {}", identity, payload);
                echo_text(&payload)
            }
        };

        if let Err(e) = reply.send_text(&response) {
            warn!("Could not reply to {}: {}", identity, e);
        }
        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Get matchmaking queue size.
    pub async fn queue_size(&self) -> usize {
        self.lobby.queue().len().await
    }

    /// Matchmaking core served by this server.
    pub fn lobby(&self) -> &Matchmaker {
        &self.lobby
    }
}

/// Forward queued outbound texts to the socket; returns the sink when the
/// queue is closed or the socket fails.
fn spawn_writer(mut ws_sender: WsSink, mut msg_rx: mpsc::Receiver<String>) -> JoinHandle<WsSink> {
    tokio::spawn(async move {
        while let Some(text) = msg_rx.recv().await {
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        ws_sender
    })
}

fn close_message(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}
