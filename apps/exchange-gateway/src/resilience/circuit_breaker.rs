//! Circuit breaker for outbound venue calls.
//!
//! Stops calling a venue that keeps failing until a cool-down has passed.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN       (failure_count >= failure_threshold)
//! OPEN → HALF_OPEN    (retry_timeout elapsed since the last failure)
//! HALF_OPEN → CLOSED  (probe call succeeds, failure_count reset)
//! HALF_OPEN → OPEN    (probe call fails)
//! ```
//!
//! State, failure count and last-failure time are atomics so the breaker can
//! be shared across tasks without a lock.
//!
//! # Example
//!
//! ```rust,ignore
//! let breaker = CircuitBreaker::new("binance", CircuitBreakerConfig::default());
//! let body = breaker.execute(|| client.request(&query)).await?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Circuit is closed, calls flow normally.
    Closed,
    /// Circuit is open, calls are rejected.
    Open,
    /// Circuit lets a probe call through.
    HalfOpen,
}

impl CircuitBreakerState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure before a probe is allowed.
    pub retry_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            retry_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Tighter settings for order entry, where a dead venue must be noticed fast.
    #[must_use]
    pub const fn order_entry() -> Self {
        Self {
            failure_threshold: 3,
            retry_timeout: Duration::from_secs(10),
        }
    }
}

/// Circuit breaker for external service calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    /// Nanoseconds after `origin` of the last failure, 0 when none.
    last_failure_ns: AtomicU64,
    origin: Instant,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    state_transitions: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitBreakerState::Closed.as_u8()),
            failure_count: AtomicU32::new(0),
            last_failure_ns: AtomicU64::new(0),
            origin: Instant::now(),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
        }
    }

    /// Get the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state without triggering time-based transitions.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        CircuitBreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Acquire)
    }

    /// Run `op` under the breaker.
    ///
    /// While `OPEN` and inside `retry_timeout`, fails fast with `SYSTEM_ERROR`
    /// and never invokes `op`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        if !self.try_acquire() {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            metrics::record_circuit_breaker_rejection(&self.name);
            return Err(GatewayError::system(format!(
                "circuit breaker {} is open",
                self.name
            ))
            .with_context("service", self.name.clone()));
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    /// Check whether a call may proceed, moving `OPEN → HALF_OPEN` once the
    /// retry timeout has elapsed.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => {
                if self.since_last_failure() < self.config.retry_timeout {
                    return false;
                }
                self.transition(CircuitBreakerState::Open, CircuitBreakerState::HalfOpen);
                true
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.store(0, Ordering::Release);
        let current = self.state();
        if current != CircuitBreakerState::Closed {
            self.transition(current, CircuitBreakerState::Closed);
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_failure_ns
            .store(elapsed.saturating_add(1), Ordering::Release);

        let current = self.state();
        if current != CircuitBreakerState::Open
            && (current == CircuitBreakerState::HalfOpen || count >= self.config.failure_threshold)
        {
            self.transition(current, CircuitBreakerState::Open);
        }
    }

    fn since_last_failure(&self) -> Duration {
        match self.last_failure_ns.load(Ordering::Acquire) {
            0 => Duration::MAX,
            stamp => self
                .origin
                .elapsed()
                .saturating_sub(Duration::from_nanos(stamp - 1)),
        }
    }

    fn transition(&self, from: CircuitBreakerState, to: CircuitBreakerState) {
        if self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
        metrics::record_circuit_breaker_transition(&self.name, to);

        match to {
            CircuitBreakerState::Open => tracing::warn!(
                name = %self.name,
                from = %from,
                to = "OPEN",
                failures = self.failure_count(),
                "Circuit breaker opened"
            ),
            CircuitBreakerState::HalfOpen => tracing::info!(
                name = %self.name,
                from = %from,
                to = "HALF_OPEN",
                "Circuit breaker testing"
            ),
            CircuitBreakerState::Closed => tracing::info!(
                name = %self.name,
                from = %from,
                to = "CLOSED",
                "Circuit breaker closed"
            ),
        }
    }

    /// Get metrics for this circuit breaker.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: self.state(),
            failure_count: self.failure_count(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit breaker open (operator kill switch).
    pub fn force_open(&self) {
        self.failure_count
            .fetch_max(self.config.failure_threshold, Ordering::AcqRel);
        let elapsed = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_failure_ns
            .store(elapsed.saturating_add(1), Ordering::Release);
        let current = self.state();
        if current != CircuitBreakerState::Open {
            self.transition(current, CircuitBreakerState::Open);
        }
    }

    /// Force the circuit breaker closed (manual recovery).
    pub fn force_close(&self) {
        self.failure_count.store(0, Ordering::Release);
        let current = self.state();
        if current != CircuitBreakerState::Closed {
            self.transition(current, CircuitBreakerState::Closed);
        }
    }
}

/// Metrics for a circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Service name.
    pub name: String,
    /// Current state.
    pub state: CircuitBreakerState,
    /// Consecutive failures.
    pub failure_count: u32,
    /// Total calls.
    pub total_calls: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Calls rejected while open.
    pub rejected_calls: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::AtomicUsize;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                retry_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> GatewayResult<()> {
        breaker
            .execute(|| async { Err::<(), _>(GatewayError::network("boom")) })
            .await
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.retry_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_initial_state_is_closed() {
        let breaker = breaker(3, 100);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.try_acquire());
    }

    #[tokio::test]
    async fn test_opens_at_threshold_and_fails_fast() {
        let breaker = breaker(3, 60_000);
        for _ in 0..2 {
            let _ = fail(&breaker).await;
            assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        }
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        let invoked = AtomicUsize::new(0);
        let result = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::SystemError);
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_resets() {
        let breaker = breaker(3, 20);
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        std::thread::sleep(Duration::from_millis(40));

        let observed = breaker
            .execute(|| async { Ok(breaker.state()) })
            .await
            .unwrap();
        assert_eq!(observed, CircuitBreakerState::HalfOpen);
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(3, 10);
        for _ in 0..3 {
            let _ = fail(&breaker).await;
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.try_acquire());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = breaker(3, 100);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        breaker.execute(|| async { Ok(()) }).await.unwrap();
        assert_eq!(breaker.failure_count(), 0);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_metrics() {
        let breaker = breaker(5, 100);
        breaker.record_success();
        breaker.record_success();
        breaker.record_failure();

        let metrics = breaker.metrics();
        assert_eq!(metrics.name, "test");
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.failure_count, 1);
    }

    #[test]
    fn test_force_open_and_close() {
        let breaker = breaker(3, 60_000);
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.try_acquire());

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }
}
