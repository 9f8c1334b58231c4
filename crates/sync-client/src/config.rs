//! Runtime configuration for the sync engine.

use std::{env, time::Duration};

use thiserror::Error;

use crate::filter::SyncFilter;

const DEFAULT_SERVER_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CLIENT_TIMEOUT_MARGIN_MS: u64 = 10_000;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Tuning and connection parameters for a sync session.
///
/// Defaults are conservative; every implementation-defined constant from
/// the protocol is overridable here or through the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Homeserver base URL, for example `https://matrix.example.org`.
    pub homeserver: String,
    /// Bearer access token obtained out-of-band.
    pub access_token: String,
    /// Long-poll hold duration requested from the server, in milliseconds.
    pub server_timeout_ms: u64,
    /// Extra client-side allowance on top of `server_timeout_ms`; keeps the
    /// HTTP timeout strictly greater than the server hold.
    pub client_timeout_margin_ms: u64,
    /// First retry delay after a failed poll, in milliseconds.
    pub backoff_base_ms: u64,
    /// Retry delay ceiling, in milliseconds.
    pub backoff_max_ms: u64,
    /// Bounded capacity of each subscriber's update queue.
    pub queue_capacity: usize,
    /// When false, timeline/ephemeral events of the very first poll of a
    /// tokenless start are absorbed into state without being delivered.
    pub deliver_initial_events: bool,
    /// Server-side event filter.
    pub filter: SyncFilter,
}

impl SyncConfig {
    pub fn new(homeserver: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            homeserver: homeserver.into(),
            access_token: access_token.into(),
            server_timeout_ms: DEFAULT_SERVER_TIMEOUT_MS,
            client_timeout_margin_ms: DEFAULT_CLIENT_TIMEOUT_MARGIN_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            deliver_initial_events: true,
            filter: SyncFilter::default(),
        }
    }

    /// Server-side long-poll hold.
    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    /// Per-request HTTP timeout, strictly greater than the server hold.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(
            self.server_timeout_ms
                .saturating_add(self.client_timeout_margin_ms.max(1)),
        )
    }

    /// Parse configuration from `MATRIX_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let homeserver = required_trimmed("MATRIX_SYNC_HOMESERVER", &mut lookup)?;
        let access_token = required_trimmed("MATRIX_SYNC_ACCESS_TOKEN", &mut lookup)?;

        let mut config = Self::new(homeserver, access_token);
        config.server_timeout_ms = parse_optional_u64(
            "MATRIX_SYNC_SERVER_TIMEOUT_MS",
            config.server_timeout_ms,
            &mut lookup,
        )?;
        config.client_timeout_margin_ms = parse_optional_u64(
            "MATRIX_SYNC_CLIENT_TIMEOUT_MARGIN_MS",
            config.client_timeout_margin_ms,
            &mut lookup,
        )?;
        config.backoff_base_ms = parse_optional_u64(
            "MATRIX_SYNC_BACKOFF_BASE_MS",
            config.backoff_base_ms,
            &mut lookup,
        )?;
        config.backoff_max_ms = parse_optional_u64(
            "MATRIX_SYNC_BACKOFF_MAX_MS",
            config.backoff_max_ms,
            &mut lookup,
        )?;
        config.queue_capacity = parse_optional_usize(
            "MATRIX_SYNC_QUEUE_CAPACITY",
            config.queue_capacity,
            &mut lookup,
        )?;

        if config.client_timeout_margin_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MATRIX_SYNC_CLIENT_TIMEOUT_MARGIN_MS",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }
        if config.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MATRIX_SYNC_QUEUE_CAPACITY",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(config)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required environment variable is missing or blank.
    #[error("missing required {key}")]
    MissingValue { key: &'static str },
    /// An environment variable could not be parsed.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn required_trimmed<F>(key: &'static str, lookup: &mut F) -> Result<String, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingValue { key })
}

fn parse_optional_u64<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_usize<F>(
    key: &'static str,
    default: usize,
    lookup: &mut F,
) -> Result<usize, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    value
        .parse::<usize>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
