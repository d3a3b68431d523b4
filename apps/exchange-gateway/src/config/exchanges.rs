//! Per-venue connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::shared::{SessionCredentials, Venue};
use crate::infrastructure::venues::StreamKind;
use crate::infrastructure::websocket::{DEFAULT_MAX_FRAME_SIZE, SessionConfig};
use crate::resilience::{CircuitBreakerConfig, ServiceLimits};

/// One venue connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Venue.
    pub venue: Venue,
    /// Skip this venue entirely when false.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Credentials; empty fields mean public data only.
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Market-data WebSocket URL.
    #[serde(default)]
    pub public_ws_url: Option<String>,
    /// Account WebSocket URL. Binance appends the listen key.
    #[serde(default)]
    pub private_ws_url: Option<String>,
    /// REST base URL.
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Seconds between keepalive pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Seconds of silence tolerated after a ping.
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    /// Bound on connect plus handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Consecutive reconnects before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// First reconnect delay.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Reconnect delay ceiling.
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Reconnect delay growth factor.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Randomize reconnect delays.
    #[serde(default = "default_true")]
    pub reconnect_jitter: bool,
    /// Seconds between session-artifact renewals; 0 disables.
    #[serde(default = "default_session_refresh")]
    pub session_refresh_interval_secs: u64,
    /// REST timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Outbound requests per second for this venue.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    /// Circuit breaker thresholds for this venue.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Compact envelope variant (GRVT lite).
    #[serde(default)]
    pub compact: bool,
    /// GRVT trading sub-account.
    #[serde(default)]
    pub sub_account_id: Option<String>,
    /// GRVT login endpoint override.
    #[serde(default)]
    pub auth_url: Option<String>,
    /// Binance signed-request validity window.
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// Streams subscribed at startup.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

/// Venue credentials.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// API key (Binance, GRVT) or client id (Deribit).
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret (Binance) or client secret (Deribit).
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Pre-issued GRVT session cookie.
    #[serde(default)]
    pub session_cookie: Option<String>,
    /// GRVT account id.
    #[serde(default)]
    pub account_id: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "***"))
            .field("session_cookie", &self.session_cookie.as_ref().map(|_| "***"))
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds before a probe is allowed.
    #[serde(default = "default_retry_timeout")]
    pub retry_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            retry_timeout_secs: default_retry_timeout(),
        }
    }
}

impl CircuitBreakerSettings {
    /// Convert to the resilience module's breaker config.
    #[must_use]
    pub const fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            retry_timeout: Duration::from_secs(self.retry_timeout_secs),
        }
    }
}

/// A stream to open at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Stream kind.
    pub stream: StreamKind,
    /// Venue symbol (Deribit portfolio streams take a currency).
    pub symbol: String,
}

impl ExchangeConfig {
    /// Session timing for this venue.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ping_interval: Duration::from_secs(self.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            reconnect_attempts: self.reconnect_attempts,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            reconnect_jitter: self.reconnect_jitter,
            session_refresh_interval: (self.session_refresh_interval_secs > 0)
                .then(|| Duration::from_secs(self.session_refresh_interval_secs)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_buffer: SessionConfig::default().outbound_buffer,
        }
    }

    /// Rate limit and breaker for this venue's services.
    #[must_use]
    pub const fn service_limits(&self) -> ServiceLimits {
        ServiceLimits {
            circuit_breaker: self.circuit_breaker.to_resilience_config(),
            rate_limit_per_second: self.rate_limit_per_second,
        }
    }

    /// REST timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Credentials in session form.
    ///
    /// GRVT always gets cookie credentials so a login can fill the cookie
    /// in; the other venues use an API key pair when both halves are set.
    #[must_use]
    pub fn session_credentials(&self) -> SessionCredentials {
        let creds = &self.credentials;
        let api_key = creds.api_key.clone().filter(|k| !k.is_empty());
        match self.venue {
            Venue::Grvt => {
                let cookie = creds.session_cookie.clone().unwrap_or_default();
                let account_id = creds.account_id.clone().unwrap_or_default();
                if cookie.is_empty() && api_key.is_none() {
                    SessionCredentials::None
                } else {
                    SessionCredentials::Cookie {
                        session_cookie: cookie,
                        account_id,
                        api_key,
                    }
                }
            }
            Venue::Binance | Venue::Deribit => {
                match (api_key, creds.api_secret.clone().filter(|s| !s.is_empty())) {
                    (Some(api_key), Some(api_secret)) => SessionCredentials::ApiKey {
                        api_key,
                        api_secret,
                    },
                    _ => SessionCredentials::None,
                }
            }
        }
    }

    /// Public WebSocket URL, configured or venue default.
    #[must_use]
    pub fn public_url(&self) -> String {
        self.public_ws_url.clone().unwrap_or_else(|| {
            match self.venue {
                Venue::Binance => "wss://fstream.binance.com/ws",
                Venue::Deribit => "wss://www.deribit.com/ws/api/v2",
                Venue::Grvt => "wss://market-data.grvt.io/ws/full",
            }
            .to_string()
        })
    }

    /// Private WebSocket URL, configured or venue default.
    #[must_use]
    pub fn private_url(&self) -> String {
        self.private_ws_url.clone().unwrap_or_else(|| {
            match self.venue {
                Venue::Binance => "wss://fstream.binance.com/ws",
                Venue::Deribit => "wss://www.deribit.com/ws/api/v2",
                Venue::Grvt => "wss://trades.grvt.io/ws/full",
            }
            .to_string()
        })
    }

    /// REST base URL, configured or venue default.
    #[must_use]
    pub fn rest_base_url(&self) -> String {
        self.rest_url.clone().unwrap_or_else(|| {
            match self.venue {
                Venue::Binance => "https://fapi.binance.com",
                Venue::Deribit => "https://www.deribit.com",
                Venue::Grvt => "https://trades.grvt.io",
            }
            .to_string()
        })
    }

    /// Whether a private channel can be opened.
    #[must_use]
    pub fn has_private_access(&self) -> bool {
        !matches!(self.session_credentials(), SessionCredentials::None)
    }
}

pub(crate) const fn default_true() -> bool {
    true
}

const fn default_ping_interval() -> u64 {
    20
}

const fn default_pong_timeout() -> u64 {
    10
}

const fn default_connect_timeout() -> u64 {
    10
}

const fn default_reconnect_attempts() -> u32 {
    10
}

const fn default_reconnect_delay() -> u64 {
    1_000
}

const fn default_max_reconnect_delay() -> u64 {
    30_000
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

const fn default_session_refresh() -> u64 {
    30 * 60
}

const fn default_request_timeout() -> u64 {
    10
}

const fn default_rate_limit() -> u32 {
    10
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_retry_timeout() -> u64 {
    30
}

const fn default_recv_window() -> u64 {
    5_000
}
