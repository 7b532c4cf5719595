//! Network Layer
//!
//! WebSocket server and connection bookkeeping for player channels.

pub mod protocol;
pub mod registry;
pub mod server;

pub use protocol::{ClientMessage, Inbound};
pub use registry::{
    ChannelHandle, ConnectionId, ConnectionRegistry, DeliveryOutcome, SendError, Transport,
};
pub use server::{LobbyServer, LobbyServerError, ServerConfig};
