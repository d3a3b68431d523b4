//! Retry with capped exponential backoff.
//!
//! # Retryable Errors
//!
//! | Retryable | Non-Retryable |
//! |-----------|---------------|
//! | `NETWORK_ERROR` (timeouts, resets, 5xx) | `API_ERROR` (venue rejected) |
//! | `RATE_LIMIT_ERROR` (local limiter, 429, 418) | `AUTHENTICATION_ERROR` (401/403) |
//! | | `VALIDATION_ERROR`, `SYSTEM_ERROR` |
//!
//! # Example
//!
//! ```rust,ignore
//! let policy = RetryPolicy::default();
//! let body = policy.execute("binance", || client.request(&query)).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, GatewayResult};
use crate::observability::metrics;

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor between retries.
    pub backoff_multiplier: f64,
    /// Jitter factor (0.2 = ±20%), 0 for deterministic delays.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings.
    #[must_use]
    pub const fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
            jitter_factor: 0.0,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Add jitter to the computed delays.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Run `op`, retrying retryable failures per the policy.
    ///
    /// Returns the first success or the last error.
    pub async fn execute<T, F, Fut>(&self, service: &str, op: F) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let mut backoff = ExponentialBackoffCalculator::new(self);
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => match backoff.next_backoff() {
                    Some(delay) => {
                        metrics::record_retry_attempt(service);
                        tracing::debug!(
                            service,
                            attempt = backoff.current_attempt(),
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying after transient failure"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        tracing::warn!(
                            service,
                            attempts = backoff.current_attempt() + 1,
                            error = %err,
                            "Retries exhausted"
                        );
                        return Err(err.with_context(
                            "attempts",
                            (backoff.current_attempt() + 1).to_string(),
                        ));
                    }
                },
            }
        }
    }
}

/// Calculator for exponential backoff with optional jitter.
#[derive(Debug)]
pub struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Create a new backoff calculator from a retry policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            current_attempt: 0,
            max_attempts: policy.max_retries,
            initial_backoff_ms: policy.initial_delay.as_millis() as u64,
            max_backoff_ms: policy.max_delay.as_millis() as u64,
            backoff_multiplier: policy.backoff_multiplier,
            jitter_factor: policy.jitter_factor,
        }
    }

    /// Get the next backoff duration.
    ///
    /// Returns `None` once the retries are used up.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base = self.calculate_base_backoff_ms();
        let jittered = self.apply_jitter(base).min(self.max_backoff_ms);
        self.current_attempt += 1;

        Some(Duration::from_millis(jittered))
    }

    fn calculate_base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || backoff_ms == 0 {
            return backoff_ms;
        }
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;
        rand::rng().random_range(min..=max) as u64
    }

    /// Get the current attempt number.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Check if more retries are available.
    #[must_use]
    pub const fn has_remaining_attempts(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    /// Reset the calculator for a new request.
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Classify an HTTP status code.
#[must_use]
pub const fn classify_status(status_code: u16) -> ErrorKind {
    match status_code {
        // Binance answers 418 once an IP is banned for ignoring 429s
        429 | 418 => ErrorKind::RateLimitError,
        401 | 403 => ErrorKind::AuthenticationError,
        408 | 500..=599 => ErrorKind::NetworkError,
        400..=499 => ErrorKind::ApiError,
        _ => ErrorKind::UnknownError,
    }
}
