//! Resilience patterns for outbound venue calls.
//!
//! Circuit breaker, retry with backoff, fixed-window rate limiting and a
//! dead-letter queue, combined by [`ResilienceManager`].

mod circuit_breaker;
mod dead_letter;
mod manager;
mod rate_limiter;
mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerState,
};
pub use dead_letter::{DeadLetter, DeadLetterQueue};
pub use manager::{ResilienceConfig, ResilienceManager, ServiceLimits};
pub use rate_limiter::RateLimiter;
pub use retry::{ExponentialBackoffCalculator, RetryPolicy, classify_status};
