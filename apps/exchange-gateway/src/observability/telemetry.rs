//! Logging and OpenTelemetry tracing setup.
//!
//! # Configuration
//!
//! - `RUST_LOG`: filter directives (default: `info`)
//! - `OTEL_ENABLED`: set to `false` to log to the console only
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP gRPC endpoint (default: `http://localhost:4317`)
//! - `OTEL_SERVICE_NAME`: service name for traces (default: `exchange-gateway`)
//! - `LOG_ANSI`: set to `true` for coloured console output
//!
//! # Usage
//!
//! ```rust,ignore
//! let _guard = init_telemetry(&TelemetryConfig::from_env());
//! ```

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Telemetry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Export spans over OTLP.
    pub otel_enabled: bool,
    /// OTLP gRPC endpoint.
    pub otlp_endpoint: String,
    /// Service name attached to spans.
    pub service_name: String,
    /// Coloured console output.
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otel_enabled: true,
            otlp_endpoint: "http://localhost:4317".to_string(),
            service_name: "exchange-gateway".to_string(),
            ansi: false,
        }
    }
}

impl TelemetryConfig {
    /// Settings from the environment, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            otel_enabled: std::env::var("OTEL_ENABLED").map_or(defaults.otel_enabled, |v| v != "false"),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
            ansi: std::env::var("LOG_ANSI").is_ok_and(|v| v == "true"),
        }
    }
}

/// Guard that shuts down the tracer provider on drop.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Error shutting down tracer provider: {e:?}");
        }
    }
}

fn init_console(env_filter: EnvFilter, ansi: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(ansi)
        .try_init();
}

/// Install the tracing subscriber.
///
/// Falls back to console-only logging when OTLP is disabled or the exporter
/// cannot be built. Returns a guard that flushes spans when dropped.
#[must_use]
pub fn init_telemetry(config: &TelemetryConfig) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if !config.otel_enabled {
        init_console(env_filter, config.ansi);
        tracing::info!("OpenTelemetry disabled (OTEL_ENABLED=false), using console logging only");
        return TelemetryGuard { provider: None };
    }

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()
    {
        Ok(exp) => exp,
        Err(e) => {
            init_console(env_filter, config.ansi);
            tracing::warn!(error = ?e, "Failed to create OTLP exporter, using console logging");
            return TelemetryGuard { provider: None };
        }
    };

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();
    let tracer = provider.tracer(config.service_name.clone());
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
    let fmt_layer = tracing_subscriber::fmt::layer().with_ansi(config.ansi);

    let _ = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init();

    tracing::info!(
        service_name = %config.service_name,
        endpoint = %config.otlp_endpoint,
        "OpenTelemetry initialized"
    );

    TelemetryGuard {
        provider: Some(provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert!(config.otel_enabled);
        assert_eq!(config.service_name, "exchange-gateway");
    }

    #[test]
    fn test_console_only_guard_has_no_provider() {
        let guard = init_telemetry(&TelemetryConfig {
            otel_enabled: false,
            ..TelemetryConfig::default()
        });
        assert!(guard.provider.is_none());
    }
}
