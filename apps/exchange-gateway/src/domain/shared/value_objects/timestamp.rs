//! Epoch timestamps in microseconds.
//!
//! Venues report times in milliseconds (Binance, Deribit) or nanoseconds
//! (GRVT), sometimes as JSON strings. Everything canonical is microseconds.

use chrono::Utc;

/// Raw integers above this are nanoseconds, at or below it milliseconds.
pub const NANOS_THRESHOLD: i64 = 4_100_000_000_000;

/// Normalize a raw epoch integer to microseconds.
#[must_use]
pub const fn normalize_epoch_micros(raw: i64) -> i64 {
    if raw > NANOS_THRESHOLD {
        raw / 1_000
    } else {
        raw.saturating_mul(1_000)
    }
}

/// Normalize a string-encoded epoch integer to microseconds.
#[must_use]
pub fn parse_epoch_micros(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok().map(normalize_epoch_micros)
}

/// Current wall-clock time in microseconds.
#[must_use]
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// Current wall-clock time in milliseconds, as used by signed REST queries.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
