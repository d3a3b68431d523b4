//! Configuration for the exchange gateway.
//!
//! YAML with environment variable interpolation, validated on load.
//!
//! # Usage
//!
//! ```rust,ignore
//! use exchange_gateway::config::load_config;
//!
//! let config = load_config(Some("gateway.yaml"))?;
//! for exchange in config.enabled_exchanges() {
//!     println!("{} -> {}", exchange.venue, exchange.public_url());
//! }
//! ```

mod exchanges;
mod observability;
mod resilience;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use exchanges::{CircuitBreakerSettings, CredentialsConfig, ExchangeConfig, SubscriptionConfig};
pub use observability::{MetricsSettings, ObservabilityConfig, TracingSettings};
pub use resilience::{ResilienceSettings, RetrySettings};

use crate::domain::shared::Venue;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "gateway.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Venue connections.
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
    /// Resilience defaults.
    #[serde(default)]
    pub resilience: ResilienceSettings,
    /// Logging, tracing and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl GatewayConfig {
    /// Exchanges with `enabled: true`.
    pub fn enabled_exchanges(&self) -> impl Iterator<Item = &ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled)
    }

    /// Settings for one venue.
    #[must_use]
    pub fn exchange(&self, venue: Venue) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.venue == venue)
    }
}

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<GatewayConfig, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<GatewayConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: GatewayConfig = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables without a default become empty strings.
#[allow(clippy::expect_used)] // Regex is compile-time constant
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(value)) if !value.is_empty() => value,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration values.
fn validate_config(config: &GatewayConfig) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for exchange in &config.exchanges {
        let venue = exchange.venue;
        if !seen.insert(venue) {
            return Err(invalid(format!("{venue} is configured more than once")));
        }
        if !exchange.enabled {
            continue;
        }

        for (name, url) in [
            ("public_ws_url", exchange.public_ws_url.as_deref()),
            ("private_ws_url", exchange.private_ws_url.as_deref()),
        ] {
            if let Some(url) = url
                && !(url.starts_with("ws://") || url.starts_with("wss://"))
            {
                return Err(invalid(format!("{venue}.{name} must be a ws:// or wss:// URL")));
            }
        }
        if let Some(url) = exchange.rest_url.as_deref()
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(invalid(format!("{venue}.rest_url must be an http(s) URL")));
        }

        if exchange.ping_interval_secs == 0 || exchange.pong_timeout_secs == 0 {
            return Err(invalid(format!(
                "{venue}.ping_interval_secs and pong_timeout_secs must be positive"
            )));
        }
        if exchange.connect_timeout_secs == 0 {
            return Err(invalid(format!("{venue}.connect_timeout_secs must be positive")));
        }
        if exchange.reconnect_delay_ms > exchange.max_reconnect_delay_ms {
            return Err(invalid(format!(
                "{venue}.reconnect_delay_ms must not exceed max_reconnect_delay_ms"
            )));
        }
        if !exchange.backoff_multiplier.is_finite() || exchange.backoff_multiplier < 1.0 {
            return Err(invalid(format!("{venue}.backoff_multiplier must be at least 1.0")));
        }
        if exchange.rate_limit_per_second == 0 {
            return Err(invalid(format!("{venue}.rate_limit_per_second must be positive")));
        }
        if exchange.circuit_breaker.failure_threshold == 0 {
            return Err(invalid(format!(
                "{venue}.circuit_breaker.failure_threshold must be positive"
            )));
        }
        if venue == Venue::Grvt
            && exchange.has_private_access()
            && exchange.sub_account_id.as_deref().is_none_or(str::is_empty)
        {
            return Err(invalid("grvt.sub_account_id is required with credentials"));
        }
        if exchange
            .subscriptions
            .iter()
            .any(|s| s.stream.is_private() && !exchange.has_private_access())
        {
            return Err(invalid(format!(
                "{venue} has private subscriptions but no credentials"
            )));
        }
    }

    let retry = &config.resilience.retry;
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(invalid("resilience.retry.backoff_multiplier must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&retry.jitter_factor) {
        return Err(invalid(
            "resilience.retry.jitter_factor must be between 0.0 and 1.0",
        ));
    }
    if config.resilience.rate_limit_per_second == 0 {
        return Err(invalid("resilience.rate_limit_per_second must be positive"));
    }
    if config.resilience.dead_letter_capacity == 0 {
        return Err(invalid("resilience.dead_letter_capacity must be positive"));
    }

    Ok(())
}
