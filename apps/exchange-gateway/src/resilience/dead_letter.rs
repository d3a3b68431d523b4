//! Bounded dead-letter queue for outbound calls that failed for good.
//!
//! Diagnostic only: nothing on the hot path reads it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::domain::shared::now_micros;
use crate::error::{ErrorKind, GatewayError};
use crate::observability::metrics;

/// A failed outbound message with its error context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Monotonic sequence number.
    pub sequence: u64,
    /// Service the call was made against.
    pub service: String,
    /// Operation name (`send_order`, `reconcile_positions`...).
    pub operation: String,
    /// Serialized request, if any.
    pub payload: Option<String>,
    /// Final error kind.
    pub error_kind: ErrorKind,
    /// Final error message.
    pub error_message: String,
    /// Error context pairs.
    pub context: Vec<(String, String)>,
    /// Attempts made.
    pub attempts: u32,
    /// When it was recorded (µs).
    pub recorded_at_us: i64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: VecDeque<DeadLetter>,
    next_sequence: u64,
    evicted: u64,
}

/// FIFO of [`DeadLetter`]s; the oldest entry is evicted at capacity.
#[derive(Debug)]
pub struct DeadLetterQueue {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record a failure.
    pub fn push(
        &self,
        service: &str,
        operation: &str,
        payload: Option<String>,
        error: &GatewayError,
        attempts: u32,
    ) -> u64 {
        let mut inner = self.inner.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            inner.evicted += 1;
        }
        inner.entries.push_back(DeadLetter {
            sequence,
            service: service.to_string(),
            operation: operation.to_string(),
            payload,
            error_kind: error.kind(),
            error_message: error.message().to_string(),
            context: error.context().to_vec(),
            attempts,
            recorded_at_us: now_micros(),
        });
        drop(inner);

        metrics::record_dead_letter(service);
        tracing::warn!(
            service,
            operation,
            sequence,
            kind = %error.kind(),
            error = %error.message(),
            "Outbound call dead-lettered"
        );
        sequence
    }

    /// Number of entries held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns true when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Entries evicted to make room.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }

    /// Copy of the held entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetter> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Remove and return all entries.
    pub fn drain(&self) -> Vec<DeadLetter> {
        self.inner.lock().entries.drain(..).collect()
    }
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(1_000)
    }
}
