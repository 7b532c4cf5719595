//! Request Gate
//!
//! Bearer-token check applied to every stateless request except the
//! allow-listed public paths. A request without a bearer header passes
//! through anonymous and downstream authorization decides. A request that
//! does present a credential must present a valid one: an invalid or expired
//! credential is rejected outright, on every path that is gated.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::token::{AuthError, TokenCodec};
use crate::config::{env_string, ConfigError};
use crate::core::identity::PlayerId;

/// Authorization header scheme.
pub const BEARER_SCHEME: &str = "Bearer";

/// Gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Paths served without inspecting credentials.
    pub public_paths: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            public_paths: vec!["/api/user/register".into(), "/api/auth/login".into()],
        }
    }
}

impl GateConfig {
    /// Create config from environment variables.
    ///
    /// `GATE_PUBLIC_PATHS` is a comma-separated list replacing the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let Some(raw) = env_string("GATE_PUBLIC_PATHS") else {
            return Ok(Self::default());
        };
        let public_paths: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect();
        if let Some(bad) = public_paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid {
                key: "GATE_PUBLIC_PATHS",
                value: raw.clone(),
                reason: format!("path {bad:?} must start with '/'"),
            });
        }
        Ok(Self { public_paths })
    }
}

/// Credential carried by a `Bearer` authorization header.
///
/// The scheme matches case-insensitively. `None` means some other scheme; a
/// bearer header without a credential yields an empty string.
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim_start();
    let (scheme, rest) = header.split_once(char::is_whitespace).unwrap_or((header, ""));
    scheme
        .eq_ignore_ascii_case(BEARER_SCHEME)
        .then_some(rest.trim())
}

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal {
    /// Subject of the credential.
    pub identity: PlayerId,
    /// Role claim.
    pub role: String,
}

/// Verdict for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Allow-listed path; credentials not inspected.
    Public,
    /// No bearer credential; continue unauthenticated.
    Anonymous,
    /// Valid credential.
    Authenticated(AuthenticatedPrincipal),
    /// Credential present but invalid; reject with an authentication failure.
    Rejected(AuthError),
}

impl GateDecision {
    /// True when the request may proceed to its handler.
    pub fn may_proceed(&self) -> bool {
        !matches!(self, GateDecision::Rejected(_))
    }

    /// Principal, if authenticated.
    pub fn principal(&self) -> Option<&AuthenticatedPrincipal> {
        match self {
            GateDecision::Authenticated(p) => Some(p),
            _ => None,
        }
    }
}

/// Stateless request authenticator.
pub struct RequestGate {
    codec: Arc<TokenCodec>,
    config: GateConfig,
}

impl RequestGate {
    /// Create a gate over the shared codec.
    pub fn new(codec: Arc<TokenCodec>, config: GateConfig) -> Self {
        Self { codec, config }
    }

    /// Whether `path` skips authentication.
    pub fn is_public(&self, path: &str) -> bool {
        self.config.public_paths.iter().any(|p| p == path)
    }

    /// Inspect one request.
    pub fn authorize(&self, path: &str, authorization: Option<&str>) -> GateDecision {
        if self.is_public(path) {
            debug!("Skipping authentication for public path {}", path);
            return GateDecision::Public;
        }

        let Some(token) = authorization.and_then(bearer_token) else {
            return GateDecision::Anonymous;
        };

        match self.authenticate(token) {
            Ok(principal) => {
                debug!("Authenticated {} for {}", principal.identity, path);
                GateDecision::Authenticated(principal)
            }
            Err(e) => {
                warn!("Rejected credential on {}: {}", path, e);
                GateDecision::Rejected(e)
            }
        }
    }

    fn authenticate(&self, token: &str) -> Result<AuthenticatedPrincipal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = self.codec.verify(token)?;
        Ok(AuthenticatedPrincipal {
            identity: claims.player_id()?,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::AuthConfig;
    use crate::core::clock::ManualClock;
    use chrono::Duration;
    use serde_json::Map;

    const START: i64 = 1_700_000_000;

    fn gate() -> (RequestGate, Arc<TokenCodec>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_timestamp(START));
        let codec = Arc::new(
            TokenCodec::with_clock(
                AuthConfig {
                    secret: Some("gate-test-secret".into()),
                    expiration: Duration::seconds(60),
                    clock_skew: Duration::seconds(5),
                    ..Default::default()
                },
                clock.clone(),
            )
            .unwrap(),
        );
        (RequestGate::new(codec.clone(), GateConfig::default()), codec, clock)
    }

    fn bearer(codec: &TokenCodec, name: &str, role: &str) -> String {
        let token = codec
            .issue(&PlayerId::parse(name).unwrap(), role, Map::new())
            .unwrap();
        format!("Bearer {token}")
    }

    #[test]
    fn test_public_paths_skip_inspection() {
        let (gate, _, _) = gate();
        assert_eq!(gate.authorize("/api/auth/login", Some("Bearer garbage")), GateDecision::Public);
        assert_eq!(gate.authorize("/api/user/register", None), GateDecision::Public);
    }

    #[test]
    fn test_missing_header_is_anonymous() {
        let (gate, _, _) = gate();
        assert_eq!(gate.authorize("/api/matchmaking/join", None), GateDecision::Anonymous);
        assert_eq!(
            gate.authorize("/api/matchmaking/join", Some("Basic dXNlcjpwdw==")),
            GateDecision::Anonymous
        );
    }

    #[test]
    fn test_valid_bearer_authenticates() {
        let (gate, codec, _) = gate();
        let header = bearer(&codec, "alice", "ADMIN");
        let decision = gate.authorize("/api/user/alice", Some(&header));

        let principal = decision.principal().unwrap();
        assert_eq!(principal.identity.as_str(), "alice");
        assert_eq!(principal.role, "ADMIN");
        assert!(decision.may_proceed());
    }

    #[test]
    fn test_invalid_bearer_rejected() {
        let (gate, _, _) = gate();
        let decision = gate.authorize("/api/user/alice", Some("Bearer not.a.token"));
        assert!(matches!(decision, GateDecision::Rejected(ref e) if e.is_malformed()));
        assert!(!decision.may_proceed());

        let empty = gate.authorize("/api/user/alice", Some("Bearer "));
        assert_eq!(empty, GateDecision::Rejected(AuthError::MissingToken));
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        let (gate, codec, _) = gate();
        let header = bearer(&codec, "alice", "USER");
        let token = header.trim_start_matches("Bearer ");

        for header in [format!("bearer {token}"), format!("BEARER  {token}")] {
            let decision = gate.authorize("/api/user/alice", Some(&header));
            assert_eq!(decision.principal().map(|p| p.identity.as_str()), Some("alice"));
        }

        assert_eq!(
            gate.authorize("/api/user/alice", Some("Bearer")),
            GateDecision::Rejected(AuthError::MissingToken)
        );
        assert!(!gate
            .authorize("/api/user/alice", Some("bearer not.a.token"))
            .may_proceed());
    }

    #[test]
    fn test_bearer_token_extraction() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bEaReR\tabc "), Some("abc"));
        assert_eq!(bearer_token("Bearer"), Some(""));
        assert_eq!(bearer_token("Bearerabc"), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }

    #[test]
    fn test_expired_bearer_rejected() {
        let (gate, codec, clock) = gate();
        let header = bearer(&codec, "alice", "USER");
        clock.advance(Duration::seconds(60 + 6));

        assert_eq!(
            gate.authorize("/api/user/alice", Some(&header)),
            GateDecision::Rejected(AuthError::Expired)
        );
    }

    #[test]
    fn test_custom_allow_list() {
        let (_, codec, _) = gate();
        let gate = RequestGate::new(
            codec,
            GateConfig {
                public_paths: vec!["/health".into()],
            },
        );
        assert!(gate.is_public("/health"));
        assert!(!gate.is_public("/api/auth/login"));
    }
}
