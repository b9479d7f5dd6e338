//! Environment-backed runtime configuration for `chatli`.

use std::{env, error::Error, fmt, time::Duration};

use chat_core::{EngineConfig, MAX_FETCH_LIMIT, RetryPolicy};
use chat_http::HttpBackendConfig;
use url::Url;

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
const DEFAULT_HISTORY_LIMIT: u16 = 50;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Runtime configuration used by the line client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatliConfig {
    /// Base URL of the chat server.
    pub server_url: Url,
    /// Optional username submitted on startup.
    pub prefill_username: Option<String>,
    /// Messages fetched when a room is entered.
    pub history_limit: u16,
    /// Deadline for each backend request and stream handshake.
    pub request_timeout_ms: u64,
    /// Fixed delay between stream reconnection attempts.
    pub reconnect_delay_ms: u64,
    /// Capacity of the engine's event and snapshot channels.
    pub event_buffer: usize,
}

impl ChatliConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let server_url = parse_server_url(
            "CHATLI_SERVER_URL",
            optional_trimmed_env("CHATLI_SERVER_URL", &mut lookup)
                .unwrap_or_else(|| DEFAULT_SERVER_URL.to_owned()),
        )?;
        let prefill_username = optional_trimmed_env("CHATLI_USERNAME", &mut lookup);

        let history_limit = parse_optional_u16_with_default(
            "CHATLI_HISTORY_LIMIT",
            DEFAULT_HISTORY_LIMIT,
            &mut lookup,
        )?;
        let request_timeout_ms = parse_optional_u64_with_default(
            "CHATLI_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
            &mut lookup,
        )?;
        let reconnect_delay_ms = parse_optional_u64_with_default(
            "CHATLI_RECONNECT_DELAY_MS",
            DEFAULT_RECONNECT_DELAY_MS,
            &mut lookup,
        )?;
        let event_buffer =
            parse_optional_usize("CHATLI_EVENT_BUFFER", DEFAULT_EVENT_BUFFER, &mut lookup)?;

        if history_limit == 0 || history_limit > MAX_FETCH_LIMIT {
            return Err(ConfigError::InvalidValue {
                key: "CHATLI_HISTORY_LIMIT",
                value: history_limit.to_string(),
                reason: format!("must be between 1 and {MAX_FETCH_LIMIT}"),
            });
        }
        for (key, value) in [
            ("CHATLI_REQUEST_TIMEOUT_MS", request_timeout_ms),
            ("CHATLI_RECONNECT_DELAY_MS", reconnect_delay_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }
        if event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHATLI_EVENT_BUFFER",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(Self {
            server_url,
            prefill_username,
            history_limit,
            request_timeout_ms,
            reconnect_delay_ms,
            event_buffer,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Engine tuning derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            history_limit: self.history_limit,
            request_timeout: self.request_timeout(),
            reconnect: RetryPolicy::fixed(self.reconnect_delay_ms),
            event_buffer: self.event_buffer,
        }
    }

    /// HTTP client settings derived from this configuration.
    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig::new(self.server_url.as_str()).with_request_timeout(self.request_timeout())
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_server_url(key: &'static str, value: String) -> Result<Url, ConfigError> {
    match Url::parse(&value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(url),
        Ok(url) => Err(ConfigError::InvalidValue {
            key,
            reason: format!("unsupported scheme '{}'", url.scheme()),
            value,
        }),
        Err(err) => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        }),
    }
}

fn parse_optional_u16_with_default<F>(
    key: &'static str,
    default: u16,
    lookup: &mut F,
) -> Result<u16, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u16>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
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
    let Some(value) = optional_trimmed_env(key, lookup) else {
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
