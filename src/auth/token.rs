//! JWT Credentials
//!
//! Issues and validates the signed credentials that authenticate both
//! stateless requests and channel handshakes. One [`TokenCodec`] serves both
//! entry points so expiry and clock-skew rules cannot drift apart.
//!
//! Expiry is judged against the injected [`Clock`], not by `jsonwebtoken`
//! itself: a credential is expired iff `exp < now - clock_skew`. The skew
//! window only forgives lateness; `iat` in the future is not rejected.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{env_seconds, env_string, parse_value, ConfigError};
use crate::core::clock::{Clock, SystemClock};
use crate::core::identity::PlayerId;

/// Claim names the codec writes itself; extra claims may not shadow them.
pub const REGISTERED_CLAIMS: [&str; 5] = ["sub", "role", "iss", "iat", "exp"];

/// Upper bound for both the credential lifetime and the clock skew (ten years).
pub const MAX_WINDOW_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Authentication configuration.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HMAC secret used to sign and verify credentials.
    pub secret: Option<String>,
    /// Issuer written into and required on every credential.
    pub issuer: String,
    /// Credential lifetime.
    pub expiration: Duration,
    /// Grace period accepted past nominal expiry.
    pub clock_skew: Duration,
    /// Signing algorithm (HMAC family only).
    pub algorithm: Algorithm,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: None,
            issuer: "duel-lobby".to_string(),
            expiration: Duration::seconds(3600),
            clock_skew: Duration::seconds(60),
            algorithm: Algorithm::HS256,
        }
    }
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let algorithm = match env_string("AUTH_ALGORITHM") {
            Some(raw) => parse_value::<Algorithm>("AUTH_ALGORITHM", &raw)?,
            None => defaults.algorithm,
        };

        let config = Self {
            secret: env_string("AUTH_SECRET"),
            issuer: env_string("AUTH_ISSUER").unwrap_or(defaults.issuer),
            expiration: env_seconds("AUTH_EXPIRATION_SECS", defaults.expiration)?,
            clock_skew: env_seconds("AUTH_CLOCK_SKEW_SECS", defaults.clock_skew)?,
            algorithm,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Reject settings that would mint unusable credentials.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_configured() {
            return Err(ConfigError::Missing("AUTH_SECRET"));
        }
        if !matches!(self.algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(ConfigError::Rejected(format!(
                "algorithm {:?} is not an HMAC algorithm",
                self.algorithm
            )));
        }
        if self.expiration <= Duration::zero() {
            return Err(ConfigError::Rejected(
                "credential lifetime must be positive".into(),
            ));
        }
        if self.clock_skew < Duration::zero() {
            return Err(ConfigError::Rejected("clock skew cannot be negative".into()));
        }
        let max = Duration::seconds(MAX_WINDOW_SECS);
        if self.expiration > max || self.clock_skew > max {
            return Err(ConfigError::Rejected(format!(
                "credential lifetime and clock skew must not exceed {MAX_WINDOW_SECS}s"
            )));
        }
        Ok(())
    }
}

/// Claims carried by every credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the player identity.
    pub sub: String,
    /// Role granted at login.
    pub role: String,
    /// Issuer.
    pub iss: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
    /// Additional claims supplied at issue time.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// Subject as a validated identity.
    pub fn player_id(&self) -> Result<PlayerId, AuthError> {
        PlayerId::parse(&self.sub).map_err(|_| AuthError::MissingClaim("sub".into()))
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingToken,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token was signed with an algorithm this server does not accept.
    #[error("unexpected signing algorithm")]
    InvalidAlgorithm,
    /// Token has expired beyond the clock-skew window.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match the configured issuer.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Token belongs to another identity.
    #[error("subject mismatch: expected {expected}, found {actual}")]
    SubjectMismatch {
        /// Identity the caller expected.
        expected: String,
        /// Identity found in the token.
        actual: String,
    },
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Claim present but of the wrong type.
    #[error("claim {claim} has unexpected type: {reason}")]
    InvalidClaimType {
        /// Claim name.
        claim: String,
        /// Deserializer message.
        reason: String,
    },
    /// Extra claim would overwrite a registered claim.
    #[error("claim {0} is reserved")]
    ReservedClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
    /// JWT encoding error.
    #[error("encode error: {0}")]
    EncodeError(String),
}

impl AuthError {
    /// True for structural or cryptographic failures (the token cannot be
    /// trusted at all), as opposed to a well-formed token that is expired
    /// or belongs to someone else.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidFormat
                | AuthError::InvalidSignature
                | AuthError::InvalidAlgorithm
                | AuthError::InvalidIssuer
                | AuthError::MissingClaim(_)
                | AuthError::InvalidClaimType { .. }
                | AuthError::DecodeError(_)
        )
    }
}

/// Signs, parses, and validates credentials.
///
/// Keys are derived once at construction and shared read-only afterwards.
pub struct TokenCodec {
    config: AuthConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.config.issuer)
            .field("algorithm", &self.config.algorithm)
            .field("expiration", &self.config.expiration)
            .field("clock_skew", &self.config.clock_skew)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec reading the system clock.
    pub fn new(config: AuthConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a codec with an explicit time source.
    pub fn with_clock(config: AuthConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        let secret = config.secret.as_deref().unwrap_or_default().as_bytes();

        let mut validation = Validation::new(config.algorithm);
        // Expiry is checked against our own clock in `check_expiry`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims =
            ["sub", "exp", "iss"].iter().map(|c| c.to_string()).collect::<HashSet<_>>();
        validation.set_issuer(&[config.issuer.as_str()]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            clock,
            config,
        })
    }

    /// Codec configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Mint a credential for `subject`.
    ///
    /// `extra` claims are embedded alongside the registered ones and are
    /// covered by the same signature.
    pub fn issue(
        &self,
        subject: &PlayerId,
        role: &str,
        extra: Map<String, Value>,
    ) -> Result<String, AuthError> {
        if let Some(reserved) = extra.keys().find(|k| REGISTERED_CLAIMS.contains(&k.as_str())) {
            return Err(AuthError::ReservedClaim(reserved.clone()));
        }

        let now = self.clock.now();
        let expires = now
            .checked_add_signed(self.config.expiration)
            .ok_or_else(|| AuthError::EncodeError("expiry out of range".into()))?;
        let claims = TokenClaims {
            sub: subject.as_str().to_owned(),
            role: role.to_owned(),
            iss: self.config.issuer.clone(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
            extra,
        };

        let token = encode(&Header::new(self.config.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AuthError::EncodeError(e.to_string()))?;
        info!("Issued credential for {} (role {})", subject, role);
        Ok(token)
    }

    /// Verify signature, structure, and issuer. Expiry is not judged here.
    pub fn parse(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(map_jwt_error)?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::MissingClaim("sub".into()));
        }
        Ok(claims)
    }

    /// Apply the expiry rule: expired iff `exp < now - clock_skew`.
    pub fn check_expiry(&self, claims: &TokenClaims) -> Result<(), AuthError> {
        // A cutoff before the earliest representable instant expires nothing.
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.config.clock_skew)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .timestamp();
        if claims.exp < cutoff {
            debug!("Credential for {} expired at {} (cutoff {})", claims.sub, claims.exp, cutoff);
            return Err(AuthError::Expired);
        }
        Ok(())
    }

    /// Parse and check expiry.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.parse(token)?;
        self.check_expiry(&claims)?;
        Ok(claims)
    }

    /// Verify and require the subject to be `expected`.
    pub fn verify_subject(&self, token: &str, expected: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.verify(token)?;
        if claims.sub != expected {
            return Err(AuthError::SubjectMismatch {
                expected: expected.to_owned(),
                actual: claims.sub,
            });
        }
        Ok(claims)
    }

    /// True only for a genuine, unexpired credential naming `expected`.
    pub fn validate(&self, token: &str, expected: &str) -> bool {
        match self.verify_subject(token, expected) {
            Ok(_) => true,
            Err(e) => {
                warn!("Credential validation failed for {}: {}", expected, e);
                false
            }
        }
    }

    /// Subject of a correctly signed credential.
    pub fn extract_identity(&self, token: &str) -> Result<PlayerId, AuthError> {
        self.parse(token)?.player_id()
    }

    /// Typed claim from a correctly signed credential.
    pub fn extract_claim<T: DeserializeOwned>(&self, token: &str, name: &str) -> Result<T, AuthError> {
        let claims = self.parse(token)?;
        let value = match name {
            "sub" => Value::String(claims.sub),
            "role" => Value::String(claims.role),
            "iss" => Value::String(claims.iss),
            "iat" => Value::from(claims.iat),
            "exp" => Value::from(claims.exp),
            _ => claims
                .extra
                .get(name)
                .cloned()
                .ok_or_else(|| AuthError::MissingClaim(name.to_owned()))?,
        };
        if value.is_null() {
            return Err(AuthError::MissingClaim(name.to_owned()));
        }
        serde_json::from_value(value).map_err(|e| AuthError::InvalidClaimType {
            claim: name.to_owned(),
            reason: e.to_string(),
        })
    }
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => AuthError::InvalidAlgorithm,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Utf8(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================
