//! Authentication
//!
//! One credential codec, two entry points: the channel handshake and the
//! stateless request gate.

pub mod gate;
pub mod handshake;
pub mod token;

pub use gate::{AuthenticatedPrincipal, GateConfig, GateDecision, RequestGate};
pub use handshake::{Connection, ConnectionState, HandshakeAuthenticator};
pub use token::{AuthConfig, AuthError, TokenClaims, TokenCodec};
