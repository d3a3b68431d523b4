//! Fixed-window request rate limiter.
//!
//! Counts calls in one-second windows; calls above the ceiling inside the
//! current window are rejected locally before anything reaches the venue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{GatewayError, GatewayResult};
use crate::observability::metrics;

const WINDOW: Duration = Duration::from_secs(1);

/// Per-service fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    max_per_second: u32,
    origin: Instant,
    /// Window index (whole seconds since `origin`) in the high half, calls
    /// taken in that window in the low half.
    slot: AtomicU64,
}

const fn pack(window: u64, count: u64) -> u64 {
    (window << 32) | (count & 0xFFFF_FFFF)
}

const fn unpack(slot: u64) -> (u64, u64) {
    (slot >> 32, slot & 0xFFFF_FFFF)
}

impl RateLimiter {
    /// Create a limiter allowing `max_per_second` calls per window.
    #[must_use]
    pub fn new(name: impl Into<String>, max_per_second: u32) -> Self {
        Self {
            name: name.into(),
            max_per_second,
            origin: Instant::now(),
            slot: AtomicU64::new(0),
        }
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured ceiling.
    #[must_use]
    pub const fn max_per_second(&self) -> u32 {
        self.max_per_second
    }

    /// Take one slot from the current window.
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_in(self.current_window())
    }

    fn current_window(&self) -> u64 {
        self.origin.elapsed().as_secs() / WINDOW.as_secs()
    }

    fn try_acquire_in(&self, now_window: u64) -> bool {
        let limit = u64::from(self.max_per_second);
        let mut current = self.slot.load(Ordering::Acquire);
        loop {
            let (window, count) = unpack(current);
            // A caller that read the clock late never rolls the window back.
            let window_now = now_window.max(window);
            let taken = if window_now == window { count } else { 0 };
            if taken >= limit {
                return false;
            }
            match self.slot.compare_exchange_weak(
                current,
                pack(window_now, taken + 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Like [`Self::try_acquire`] but returns `RATE_LIMIT_ERROR` on rejection.
    pub fn check(&self) -> GatewayResult<()> {
        if self.try_acquire() {
            return Ok(());
        }
        metrics::record_rate_limit_rejection(&self.name);
        tracing::debug!(
            service = %self.name,
            limit = self.max_per_second,
            "Request rejected by local rate limiter"
        );
        Err(GatewayError::rate_limited(format!(
            "{} exceeded {} requests per second",
            self.name, self.max_per_second
        ))
        .with_context("service", self.name.clone()))
    }

    /// Calls taken in the current window.
    #[must_use]
    pub fn used(&self) -> u32 {
        let (window, count) = unpack(self.slot.load(Ordering::Acquire));
        if window == self.current_window() {
            u32::try_from(count).unwrap_or(u32::MAX)
        } else {
            0
        }
    }
}
