//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.

use std::time::Duration;

use tokio::sync::Semaphore;

use crate::domain::market::PairConfig;

/// Upstream reader settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSettings {
    /// Fixed delay between reader reconnection attempts.
    pub retry_interval: Duration,
    /// Random jitter applied to the retry delay, as a fraction of it.
    pub retry_jitter: f64,
    /// Connect timeout of the quote service channel.
    pub connect_timeout: Duration,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            retry_jitter: 0.0,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Downstream fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Maximum concurrently pending per-connection writes.
    pub max_in_flight_dispatches: usize,
    /// Deadline of a single downstream write.
    pub write_timeout: Duration,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            max_in_flight_dispatches: 65_536,
            write_timeout: Duration::from_secs(10),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// WebSocket gateway port.
    pub ws_port: u16,
    /// Health, metrics and admin HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Quote service endpoint URI.
    pub quote_service_addr: String,
    /// Server port settings.
    pub server: ServerSettings,
    /// Upstream reader settings.
    pub ingestion: IngestionSettings,
    /// Fan-out settings.
    pub broadcast: BroadcastSettings,
    /// Pairs activated at startup.
    pub pairs: Vec<PairConfig>,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// `GATEWAY_PAIRS` is not a JSON array of pair configurations.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let quote_service_addr = lookup("QUOTE_SERVICE_ADDR")
            .ok_or_else(|| ConfigError::MissingEnvVar("QUOTE_SERVICE_ADDR".to_string()))?;

        if quote_service_addr.trim().is_empty() {
            return Err(ConfigError::EmptyValue("QUOTE_SERVICE_ADDR".to_string()));
        }

        let server = ServerSettings {
            ws_port: parse_or("GATEWAY_WS_PORT", &lookup, ServerSettings::default().ws_port),
            health_port: parse_or(
                "GATEWAY_HEALTH_PORT",
                &lookup,
                ServerSettings::default().health_port,
            ),
        };

        let ingestion = IngestionSettings {
            retry_interval: parse_duration_secs(
                "GATEWAY_STREAM_RETRY_SECS",
                &lookup,
                IngestionSettings::default().retry_interval,
            ),
            retry_jitter: parse_jitter(
                "GATEWAY_STREAM_RETRY_JITTER",
                &lookup,
                IngestionSettings::default().retry_jitter,
            ),
            connect_timeout: parse_duration_secs(
                "GATEWAY_UPSTREAM_CONNECT_TIMEOUT_SECS",
                &lookup,
                IngestionSettings::default().connect_timeout,
            ),
        };

        let broadcast = BroadcastSettings {
            max_in_flight_dispatches: parse_or(
                "GATEWAY_MAX_IN_FLIGHT_DISPATCHES",
                &lookup,
                BroadcastSettings::default().max_in_flight_dispatches,
            )
            .min(Semaphore::MAX_PERMITS),
            write_timeout: parse_duration_secs(
                "GATEWAY_WRITE_TIMEOUT_SECS",
                &lookup,
                BroadcastSettings::default().write_timeout,
            ),
        };

        let pairs = match lookup("GATEWAY_PAIRS") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
                ConfigError::InvalidValue {
                    key: "GATEWAY_PAIRS".to_string(),
                    reason: e.to_string(),
                }
            })?,
            _ => Vec::new(),
        };

        Ok(Self {
            quote_service_addr: quote_service_addr.trim().to_string(),
            server,
            ingestion,
            broadcast,
            pairs,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parser message.
        reason: String,
    },
}

/// Parse a numeric variable. Zero counts as unset and yields the default.
fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .filter(|value| *value != T::default())
        .unwrap_or(default)
}

fn parse_duration_secs<F>(key: &str, lookup: &F, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_or(key, lookup, 0);
    if secs == 0 {
        default
    } else {
        Duration::from_secs(secs)
    }
}

/// Jitter must be a finite, non-negative fraction; it is capped at 1.
fn parse_jitter<F>(key: &str, lookup: &F, default: f64) -> f64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|jitter| jitter.is_finite() && *jitter >= 0.0)
        .map_or(default, |jitter| jitter.min(1.0))
}
