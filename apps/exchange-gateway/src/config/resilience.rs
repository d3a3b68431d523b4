//! Resilience defaults shared by every venue.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::exchanges::CircuitBreakerSettings;
use crate::resilience::{ResilienceConfig, RetryPolicy};

/// Defaults for services without venue overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Breaker defaults.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Requests per second per service.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,
    /// Failed operations kept for inspection.
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
            rate_limit_per_second: default_rate_limit(),
            dead_letter_capacity: default_dead_letter_capacity(),
        }
    }
}

impl ResilienceSettings {
    /// Convert to the resilience registry's defaults.
    #[must_use]
    pub const fn to_resilience_config(&self) -> ResilienceConfig {
        ResilienceConfig {
            circuit_breaker: self.circuit_breaker.to_resilience_config(),
            retry: self.retry.to_policy(),
            rate_limit_per_second: self.rate_limit_per_second,
            dead_letter_capacity: self.dead_letter_capacity,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    /// Retry delay ceiling.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Delay growth factor.
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Jitter factor, 0 for none.
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_multiplier(),
            jitter_factor: 0.0,
        }
    }
}

impl RetrySettings {
    /// Convert to a retry policy.
    #[must_use]
    pub const fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )
        .with_jitter(self.jitter_factor)
    }
}

const fn default_rate_limit() -> u32 {
    10
}

const fn default_dead_letter_capacity() -> usize {
    1_000
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_delay() -> u64 {
    100
}

const fn default_max_delay() -> u64 {
    5_000
}

const fn default_multiplier() -> f64 {
    2.0
}
