//! Registry of resilience primitives, keyed by service name.
//!
//! Constructed once at startup and handed to every component that makes
//! outbound calls. Breakers and limiters are created lazily per service,
//! from per-service overrides when configured and from defaults otherwise.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use super::dead_letter::DeadLetterQueue;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use crate::error::GatewayResult;

/// Defaults applied to services without overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings, shared by all services.
    pub retry: RetryPolicy,
    /// Requests per second per service.
    pub rate_limit_per_second: u32,
    /// Dead-letter queue capacity.
    pub dead_letter_capacity: usize,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            rate_limit_per_second: 10,
            dead_letter_capacity: 1_000,
        }
    }
}

/// Per-service settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ServiceLimits {
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Requests per second.
    pub rate_limit_per_second: u32,
}

/// Explicitly injected registry of breakers, limiters, retry and dead letters.
#[derive(Debug)]
pub struct ResilienceManager {
    defaults: ResilienceConfig,
    overrides: RwLock<HashMap<String, ServiceLimits>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    dead_letters: DeadLetterQueue,
}

impl ResilienceManager {
    /// Create a manager with the given defaults.
    #[must_use]
    pub fn new(defaults: ResilienceConfig) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
            limiters: RwLock::new(HashMap::new()),
            dead_letters: DeadLetterQueue::new(defaults.dead_letter_capacity),
        }
    }

    /// Register per-service settings. Replaces any breaker or limiter
    /// already created for the service.
    pub fn configure_service(&self, service: &str, limits: ServiceLimits) {
        self.overrides.write().insert(service.to_string(), limits);
        self.breakers.write().insert(
            service.to_string(),
            Arc::new(CircuitBreaker::new(service, limits.circuit_breaker)),
        );
        self.limiters.write().insert(
            service.to_string(),
            Arc::new(RateLimiter::new(service, limits.rate_limit_per_second)),
        );
    }

    fn limits_for(&self, service: &str) -> ServiceLimits {
        self.overrides
            .read()
            .get(service)
            .copied()
            .unwrap_or(ServiceLimits {
                circuit_breaker: self.defaults.circuit_breaker,
                rate_limit_per_second: self.defaults.rate_limit_per_second,
            })
    }

    /// Circuit breaker for `service`, created on first use.
    pub fn circuit_breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service) {
            return Arc::clone(breaker);
        }
        let config = self.limits_for(service).circuit_breaker;
        Arc::clone(
            self.breakers
                .write()
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(service, config))),
        )
    }

    /// Rate limiter for `service`, created on first use.
    pub fn rate_limiter(&self, service: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = self.limiters.read().get(service) {
            return Arc::clone(limiter);
        }
        let limit = self.limits_for(service).rate_limit_per_second;
        Arc::clone(
            self.limiters
                .write()
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(RateLimiter::new(service, limit))),
        )
    }

    /// Take a rate-limit slot for `service`.
    pub fn check_rate_limit(&self, service: &str) -> GatewayResult<()> {
        self.rate_limiter(service).check()
    }

    /// Shared retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.defaults.retry
    }

    /// Dead-letter queue.
    #[must_use]
    pub const fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    /// `retry(circuit_breaker(op))`; the final failure is dead-lettered.
    pub async fn execute<T, F, Fut>(
        &self,
        service: &str,
        operation: &str,
        payload: Option<String>,
        op: F,
    ) -> GatewayResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        self.execute_counted(service, operation, payload, op).await.0
    }

    /// Like [`Self::execute`], also returning how many times `op` was attempted.
    pub async fn execute_counted<T, F, Fut>(
        &self,
        service: &str,
        operation: &str,
        payload: Option<String>,
        op: F,
    ) -> (GatewayResult<T>, u32)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let breaker = self.circuit_breaker(service);
        let attempts = AtomicU32::new(0);

        let breaker_ref = breaker.as_ref();
        let op_ref = &op;
        let attempts_ref = &attempts;
        let result = self
            .defaults
            .retry
            .execute(service, move || {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                breaker_ref.execute(op_ref)
            })
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        if let Err(err) = &result {
            self.dead_letters
                .push(service, operation, payload, err, attempts);
        }
        (result, attempts)
    }

    /// Snapshot of every breaker.
    #[must_use]
    pub fn metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let mut metrics: Vec<_> = self
            .breakers
            .read()
            .values()
            .map(|breaker| breaker.metrics())
            .collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new(ResilienceConfig::default())
    }
}
