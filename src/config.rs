//! Environment-driven configuration helpers.
//!
//! Each component owns its config struct (`AuthConfig`, `ServerConfig`,
//! `GateConfig`) with a `Default` and a `from_env()` constructor. This module
//! holds the shared error type and the parsing helpers they use. A variable
//! that is set but unparseable is an error, never a silent fallback.

use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A variable is set but could not be parsed.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value found.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// Values parse individually but are unusable together.
    #[error("invalid configuration: {0}")]
    Rejected(String),
}

/// Read an optional string variable. Empty values count as unset.
pub(crate) fn env_string(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse a variable, falling back to `default` when unset.
pub(crate) fn env_parse<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// Read a whole-seconds duration, falling back to `default` when unset.
pub(crate) fn env_seconds(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env_string(key) {
        Some(raw) => seconds_value(key, &raw),
        None => Ok(default),
    }
}

pub(crate) fn seconds_value(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs = parse_value::<i64>(key, raw)?;
    Duration::try_seconds(secs).ok_or_else(|| ConfigError::Invalid {
        key,
        value: raw.to_owned(),
        reason: "seconds out of range".into(),
    })
}

pub(crate) fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: raw.to_owned(),
        reason: e.to_string(),
    })
}
