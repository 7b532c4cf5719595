//! # Duel Lobby Server
//!
//! Real-time matchmaking core: a concurrent pairing queue whose matches are
//! pushed to players over JWT-authenticated WebSocket channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DUEL LOBBY SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── identity.rs - PlayerId (non-blank identity)             │
//! │  └── clock.rs    - Injectable time source                    │
//! │                                                              │
//! │  auth/           - Credentials                               │
//! │  ├── token.rs    - JWT issue / parse / validate              │
//! │  ├── handshake.rs- Channel admission state machine           │
//! │  └── gate.rs     - Bearer check for stateless requests       │
//! │                                                              │
//! │  matchmaking/    - Pairing                                   │
//! │  ├── queue.rs    - FIFO queue + pairing pass                 │
//! │  └── service.rs  - Matchmaker facade                         │
//! │                                                              │
//! │  network/        - Transport                                 │
//! │  ├── registry.rs - Identity -> live channel                  │
//! │  ├── protocol.rs - Channel texts and commands                │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Flow
//!
//! A channel opens with `?token=<jwt>`; the handshake verifies it and
//! registers the channel under the token's subject. A join enqueues the
//! identity and immediately pairs the two oldest waiting players; each side
//! gets `Match found! Your opponent is <other>`. Delivery is best-effort and
//! never rolls a pairing back.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod core;
pub mod matchmaking;
pub mod network;

// Re-export commonly used types
pub use auth::{AuthConfig, AuthError, GateConfig, GateDecision, TokenCodec};
pub use config::ConfigError;
pub use core::identity::PlayerId;
pub use matchmaking::{JoinOutcome, LeaveOutcome, Matchmaker, MatchmakingQueue};
pub use network::{ConnectionRegistry, DeliveryOutcome, LobbyServer, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
