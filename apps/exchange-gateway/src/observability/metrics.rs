//! Prometheus metrics for the exchange gateway.
//!
//! Sessions, resilience primitives and the order lifecycle all report
//! through the `metrics` facade; [`init_metrics`] installs the exporter.
//! Without an installed recorder every call is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use exchange_gateway::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! record_order_event("binance", "FILL");
//! ```

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

use crate::resilience::CircuitBreakerState;

/// Configuration for the metrics exporter.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            // Latency buckets from 100us to 1s
            latency_buckets: vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Session Metrics
// ============================================================================

/// Update the connection state gauge.
///
/// `state` is the numeric [`ConnectionState`](crate::infrastructure::websocket::ConnectionState)
/// code (0=disconnected .. 4=error).
pub fn record_session_state(venue: &str, channel: &str, state: f64) {
    gauge!(
        "session_state",
        "venue" => venue.to_string(),
        "channel" => channel.to_string()
    )
    .set(state);
}

/// Record a reconnect attempt.
pub fn record_reconnect_attempt(venue: &str, channel: &str) {
    counter!(
        "session_reconnect_attempts_total",
        "venue" => venue.to_string(),
        "channel" => channel.to_string()
    )
    .increment(1);
}

/// Record a WebSocket frame, `direction` being `"in"` or `"out"`.
pub fn record_frame(venue: &str, channel: &str, direction: &'static str, bytes: usize) {
    counter!(
        "session_frames_total",
        "venue" => venue.to_string(),
        "channel" => channel.to_string(),
        "direction" => direction
    )
    .increment(1);
    counter!(
        "session_bytes_total",
        "venue" => venue.to_string(),
        "direction" => direction
    )
    .increment(bytes as u64);
}

/// Record a session-artifact renewal outcome.
pub fn record_session_refresh(venue: &str, success: bool) {
    counter!(
        "session_refresh_total",
        "venue" => venue.to_string(),
        "outcome" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a wire message the adapter could not decode.
pub fn record_malformed_message(venue: &str) {
    counter!(
        "malformed_messages_total",
        "venue" => venue.to_string()
    )
    .increment(1);
}

/// Record an adapter decode latency.
pub fn record_decode_latency(venue: &str, latency_seconds: f64) {
    histogram!(
        "decode_latency_seconds",
        "venue" => venue.to_string()
    )
    .record(latency_seconds);
}

// ============================================================================
// Order Lifecycle Metrics
// ============================================================================

/// Record an applied order event.
pub fn record_order_event(venue: &str, kind: &str) {
    counter!(
        "order_events_total",
        "venue" => venue.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an order event the state machine absorbed without a transition.
pub fn record_ignored_transition(venue: &str, state: &str, kind: &str) {
    counter!(
        "order_ignored_transitions_total",
        "venue" => venue.to_string(),
        "state" => state.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record an outbound order request, `operation` being send/cancel/modify.
pub fn record_order_request(venue: &str, operation: &str, status: &str, latency_seconds: f64) {
    counter!(
        "order_requests_total",
        "venue" => venue.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(
        "order_request_latency_seconds",
        "venue" => venue.to_string(),
        "operation" => operation.to_string()
    )
    .record(latency_seconds);
}

/// Update the open orders gauge.
pub fn update_open_orders(venue: &str, count: usize) {
    gauge!("open_orders", "venue" => venue.to_string()).set(count as f64);
}

/// Record a reconciliation run and the mismatches it found.
pub fn record_reconciliation(venue: &str, mismatches: usize) {
    counter!(
        "reconciliation_runs_total",
        "venue" => venue.to_string()
    )
    .increment(1);
    counter!(
        "reconciliation_mismatches_total",
        "venue" => venue.to_string()
    )
    .increment(mismatches as u64);
}

// ============================================================================
// Resilience Metrics
// ============================================================================

/// Numeric circuit breaker state for the gauge.
const fn circuit_state_value(state: CircuitBreakerState) -> f64 {
    match state {
        CircuitBreakerState::Closed => 0.0,
        CircuitBreakerState::Open => 1.0,
        CircuitBreakerState::HalfOpen => 2.0,
    }
}

/// Record a circuit breaker state change.
pub fn record_circuit_breaker_transition(service: &str, to: CircuitBreakerState) {
    gauge!(
        "circuit_breaker_state",
        "service" => service.to_string()
    )
    .set(circuit_state_value(to));
    counter!(
        "circuit_breaker_transitions_total",
        "service" => service.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Record a call rejected because the circuit is open.
pub fn record_circuit_breaker_rejection(service: &str) {
    counter!(
        "circuit_breaker_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a call rejected by the local rate limiter.
pub fn record_rate_limit_rejection(service: &str) {
    counter!(
        "rate_limit_rejected_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a retry.
pub fn record_retry_attempt(service: &str) {
    counter!(
        "retry_attempts_total",
        "service" => service.to_string()
    )
    .increment(1);
}

/// Record a dead-lettered call.
pub fn record_dead_letter(service: &str) {
    counter!(
        "dead_letters_total",
        "service" => service.to_string()
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================
