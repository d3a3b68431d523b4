//! Observability: Prometheus metrics and tracing setup.

pub mod metrics;
mod telemetry;

pub use metrics::{MetricsConfig, MetricsError, init_metrics};
pub use telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
