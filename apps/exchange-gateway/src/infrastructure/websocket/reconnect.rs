//! Reconnect Policy with Exponential Backoff and Optional Jitter

use std::time::{Duration, Instant};

use rand::Rng;

use super::SessionConfig;

/// Reconnect policy with capped exponential backoff.
///
/// With jitter enabled each delay is drawn uniformly from `0..=capped`
/// ("Full Jitter": <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>).
/// Without it the capped delay is used as is, so a multiplier of 1.0 gives
/// a fixed delay.
#[derive(Debug)]
pub struct ReconnectPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: bool,
    max_attempts: u32,
    current_attempt: u32,
    last_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    /// Create a policy from session configuration.
    #[must_use]
    pub const fn new(config: &SessionConfig) -> Self {
        Self {
            initial_backoff: config.reconnect_delay,
            max_backoff: config.max_reconnect_delay,
            multiplier: config.backoff_multiplier,
            jitter: config.reconnect_jitter,
            max_attempts: config.reconnect_attempts,
            current_attempt: 0,
            last_attempt: None,
        }
    }

    /// Create with custom parameters, jitter off.
    #[must_use]
    pub const fn with_params(
        initial_backoff: Duration,
        max_backoff: Duration,
        multiplier: f64,
        max_attempts: u32,
    ) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            multiplier,
            jitter: false,
            max_attempts,
            current_attempt: 0,
            last_attempt: None,
        }
    }

    /// Enable full jitter.
    #[must_use]
    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before the next attempt.
    ///
    /// Returns `None` once `max_attempts` delays have been handed out.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base_ms = self.initial_backoff.as_millis() as f64;
        let exponential = base_ms
            * self
                .multiplier
                .max(1.0)
                .powi(i32::try_from(self.current_attempt).unwrap_or(i32::MAX));
        let capped = exponential.min(self.max_backoff.as_millis() as f64);

        let delay_ms = if self.jitter && capped > 0.0 {
            rand::rng().random_range(0.0..=capped)
        } else {
            capped
        };

        self.current_attempt += 1;
        self.last_attempt = Some(Instant::now());

        Some(Duration::from_millis(delay_ms as u64))
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.current_attempt = 0;
        self.last_attempt = None;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Maximum attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Check if another attempt is allowed.
    #[must_use]
    pub const fn should_reconnect(&self) -> bool {
        self.current_attempt < self.max_attempts
    }

    /// Time since the last attempt.
    #[must_use]
    pub fn time_since_last_attempt(&self) -> Option<Duration> {
        self.last_attempt.map(|t| t.elapsed())
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_follows_session_config() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.current_attempt(), 0);
        assert_eq!(policy.max_attempts(), 10);
        assert!(policy.should_reconnect());
    }

    #[test]
    fn deterministic_exponential_backoff() {
        let mut policy = ReconnectPolicy::with_params(
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
            5,
        );

        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_millis(400)));
        assert_eq!(policy.current_attempt(), 3);
    }

    #[test]
    fn fixed_delay_with_unit_multiplier() {
        let mut policy =
            ReconnectPolicy::with_params(Duration::from_secs(1), Duration::from_secs(30), 1.0, 3);
        for _ in 0..3 {
            assert_eq!(policy.next_backoff(), Some(Duration::from_secs(1)));
        }
    }

    #[test]
    fn jitter_stays_under_cap() {
        let mut policy =
            ReconnectPolicy::with_params(Duration::from_secs(1), Duration::from_secs(5), 10.0, 10)
                .with_jitter();

        for _ in 0..5 {
            let backoff = policy.next_backoff().unwrap();
            assert!(backoff <= Duration::from_secs(5));
        }
    }

    #[test]
    fn exhausted_after_max_attempts() {
        let mut policy = ReconnectPolicy::with_params(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            3,
        );

        assert!(policy.next_backoff().is_some());
        assert!(policy.next_backoff().is_some());
        assert!(policy.next_backoff().is_some());
        assert!(policy.next_backoff().is_none());
        assert!(!policy.should_reconnect());
    }

    #[test]
    fn reset_clears_attempts() {
        let mut policy = ReconnectPolicy::with_params(
            Duration::from_millis(100),
            Duration::from_secs(1),
            2.0,
            3,
        );

        let _ = policy.next_backoff();
        let _ = policy.next_backoff();
        assert_eq!(policy.current_attempt(), 2);

        policy.reset();
        assert_eq!(policy.current_attempt(), 0);
        assert!(policy.should_reconnect());
        assert!(policy.time_since_last_attempt().is_none());
    }
}
