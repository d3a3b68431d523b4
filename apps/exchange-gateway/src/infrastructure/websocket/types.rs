//! WebSocket Session Types and Configuration

use std::fmt;
use std::time::Duration;

use thiserror::Error;

pub use crate::application::ports::{ChannelKind, SessionEvent};
use crate::domain::shared::Venue;
use crate::error::{ErrorKind, GatewayError};

/// Default maximum inbound frame payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// How long an outstanding ping may go without inbound traffic.
    pub pong_timeout: Duration,
    /// Bound on TCP + TLS + upgrade.
    pub connect_timeout: Duration,
    /// Consecutive failed reconnects before giving up.
    pub reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub max_reconnect_delay: Duration,
    /// Growth factor between reconnect attempts (1.0 = fixed delay).
    pub backoff_multiplier: f64,
    /// Randomize reconnect delays (full jitter).
    pub reconnect_jitter: bool,
    /// Session-artifact renewal period, if the venue has one.
    pub session_refresh_interval: Option<Duration>,
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
    /// Outbound queue depth.
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(20),
            pong_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            reconnect_jitter: true,
            session_refresh_interval: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            outbound_buffer: 256,
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// Establishing or re-establishing.
    Connecting,
    /// Upgrade complete, frames flowing.
    Connected,
    /// Local close in progress.
    Disconnecting,
    /// Last attempt failed or reconnects were exhausted.
    Error,
}

impl ConnectionState {
    /// Gauge value.
    #[must_use]
    pub const fn code(&self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Connected => 2.0,
            Self::Disconnecting => 3.0,
            Self::Error => 4.0,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Error => "error",
        }
    }

    /// Check if a connect attempt is live or established.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Private channel without usable credentials.
    #[error("missing credentials for {venue} private channel")]
    MissingCredentials {
        /// Venue.
        venue: Venue,
    },

    /// URL could not be parsed.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Why.
        reason: String,
    },

    /// HTTP upgrade refused or malformed.
    #[error("handshake failed: {reason}")]
    Handshake {
        /// HTTP status, if one was read.
        status: Option<u16>,
        /// Why.
        reason: String,
    },

    /// TLS setup failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Frame-level protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation did not complete in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What timed out.
        operation: &'static str,
        /// Bound.
        timeout: Duration,
    },

    /// No live connection.
    #[error("not connected")]
    NotConnected,
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        let kind = match &err {
            SessionError::MissingCredentials { .. } => ErrorKind::AuthenticationError,
            SessionError::Handshake {
                status: Some(401 | 403),
                ..
            } => ErrorKind::AuthenticationError,
            SessionError::InvalidUrl { .. } => ErrorKind::ValidationError,
            SessionError::Handshake { .. }
            | SessionError::Tls(_)
            | SessionError::Protocol(_)
            | SessionError::Io(_)
            | SessionError::Timeout { .. }
            | SessionError::NotConnected => ErrorKind::NetworkError,
        };
        Self::new(kind, err.to_string())
    }
}

/// Parsed `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `wss`.
    pub secure: bool,
    /// Host name or address.
    pub host: String,
    /// Port, defaulted from the scheme.
    pub port: u16,
    /// Path plus query, always starting with `/`.
    pub resource: String,
}

impl Endpoint {
    /// Parse a WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidUrl`] for other schemes, an empty host or a bad port.
    pub fn parse(url: &str) -> Result<Self, SessionError> {
        let invalid = |reason: &str| SessionError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (secure, rest) = if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(invalid("scheme must be ws or wss"));
        };

        let split = rest.find(['/', '?']).unwrap_or(rest.len());
        let (authority, resource) = rest.split_at(split);
        let resource = match resource {
            "" => "/".to_string(),
            r if r.starts_with('?') => format!("/{r}"),
            r => r.to_string(),
        };

        let default_port = if secure { 443 } else { 80 };
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated ipv6 literal"))?;
            match tail.strip_prefix(':') {
                Some(port) => (host, port.parse::<u16>().map_err(|_| invalid("bad port"))?),
                None => (host, default_port),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid("bad port"))?),
                None => (authority, default_port),
            }
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            resource,
        })
    }

    /// Value for the `Host` header.
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.secure { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "wss" } else { "ws" };
        write!(f, "{scheme}://{}{}", self.host_header(), self.resource)
    }
}
