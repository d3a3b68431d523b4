//! Error taxonomy for the exchange gateway.
//!
//! Every fallible path in the crate converges on [`GatewayError`], which carries
//! an [`ErrorKind`] used by the resilience layer to decide what happens next.
//!
//! | Kind | Retried | Notes |
//! |------|---------|-------|
//! | `NETWORK_ERROR` | Yes | Socket, DNS, TLS, timeouts |
//! | `RATE_LIMIT_ERROR` | Yes | Local limiter or venue 429 |
//! | `API_ERROR` | No | Venue rejected the request |
//! | `AUTHENTICATION_ERROR` | No | Missing or invalid credentials |
//! | `VALIDATION_ERROR` | No | Caller input rejected locally |
//! | `SYSTEM_ERROR` | No | Circuit open, internal invariant failures |
//! | `UNKNOWN_ERROR` | No | Anything unclassified |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of gateway errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Transport-level failure.
    NetworkError,
    /// Venue returned an error response.
    ApiError,
    /// Request rejected by a rate limit.
    RateLimitError,
    /// Credentials missing or refused.
    AuthenticationError,
    /// Input failed local validation.
    ValidationError,
    /// Internal condition such as an open circuit breaker.
    SystemError,
    /// Unclassified.
    UnknownError,
}

impl ErrorKind {
    /// Wire name of the kind.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NetworkError => "NETWORK_ERROR",
            Self::ApiError => "API_ERROR",
            Self::RateLimitError => "RATE_LIMIT_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::SystemError => "SYSTEM_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Whether the retry policy may re-attempt an operation failing with this kind.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError | Self::RateLimitError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// A classified error with key/value context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct GatewayError {
    kind: ErrorKind,
    message: String,
    context: Vec<(String, String)>,
}

impl GatewayError {
    /// Create a new gateway error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Add context to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Get the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the context.
    #[must_use]
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    /// Look up a context value by key.
    #[must_use]
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Shorthand for `self.kind().is_retryable()`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.reason(), self.message)
    }
}

/// Convenience constructors for common errors.
impl GatewayError {
    /// Transport failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    /// Venue-side rejection.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiError, message)
    }

    /// Rate limit hit.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimitError, message)
    }

    /// Credentials missing or refused.
    #[must_use]
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationError, message)
    }

    /// Local validation failure.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    /// Internal failure.
    #[must_use]
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SystemError, message)
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        let kind = match err.status() {
            Some(status) => crate::resilience::classify_status(status.as_u16()),
            None if err.is_decode() => ErrorKind::ApiError,
            None => ErrorKind::NetworkError,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::network(err.to_string())
    }
}

/// Result alias used across the crate.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_and_rate_limit_are_retryable() {
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(ErrorKind::RateLimitError.is_retryable());
        assert!(!ErrorKind::ApiError.is_retryable());
        assert!(!ErrorKind::AuthenticationError.is_retryable());
        assert!(!ErrorKind::ValidationError.is_retryable());
        assert!(!ErrorKind::SystemError.is_retryable());
        assert!(!ErrorKind::UnknownError.is_retryable());
    }

    #[test]
    fn test_gateway_error_creation() {
        let error = GatewayError::new(ErrorKind::ApiError, "Order rejected")
            .with_context("venue", "binance")
            .with_context("cl_ord_id", "abc");

        assert_eq!(error.kind(), ErrorKind::ApiError);
        assert_eq!(error.message(), "Order rejected");
        assert_eq!(error.context().len(), 2);
        assert_eq!(error.context_value("venue"), Some("binance"));
        assert_eq!(error.context_value("missing"), None);
    }

    #[test]
    fn test_error_display() {
        let error = GatewayError::validation("quantity must be positive");
        assert_eq!(
            error.to_string(),
            "[VALIDATION_ERROR] quantity must be positive"
        );
    }

    #[test]
    fn test_kind_serde() {
        let json = serde_json::to_string(&ErrorKind::RateLimitError).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_ERROR\"");
    }

    #[test]
    fn test_io_error_maps_to_network() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(GatewayError::from(io).kind(), ErrorKind::NetworkError);
    }
}
