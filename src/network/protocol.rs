//! Protocol Messages
//!
//! Wire format for the player channel. Everything the server pushes is plain
//! text: match notifications, queue acknowledgments, and echoes. Inbound
//! frames are either a JSON matchmaking command or free text to be echoed.

use serde::{Deserialize, Serialize};

use crate::core::identity::PlayerId;

/// Reason sent with the close frame when a handshake is refused.
pub const HANDSHAKE_REJECTED: &str = "Missing or invalid token.";

/// Reason sent with the close frame when a credential lapses mid-session.
pub const CREDENTIAL_EXPIRED: &str = "Credential expired.";

/// Text pushed to a player when they are paired with `opponent`.
pub fn match_found_text(opponent: &PlayerId) -> String {
    format!("Match found! Your opponent is {}", opponent)
}

/// Reply to an ordinary (non-command) inbound message.
pub fn echo_text(payload: &str) -> String {
    format!("Echo: {}", payload)
}

/// Commands a client may send over the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enter the matchmaking queue as the authenticated identity.
    JoinQueue,
    /// Leave the matchmaking queue.
    LeaveQueue,
}

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// What an inbound text frame asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A matchmaking command.
    Command(ClientMessage),
    /// Anything else; answered with an echo.
    Text(String),
}

impl Inbound {
    /// Classify a text frame.
    pub fn classify(text: &str) -> Self {
        match ClientMessage::from_json(text) {
            Ok(cmd) => Inbound::Command(cmd),
            Err(_) => Inbound::Text(text.to_owned()),
        }
    }
}
