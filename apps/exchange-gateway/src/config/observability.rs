//! Logging, tracing export and metrics settings.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::observability::{MetricsConfig, TelemetryConfig};

/// Observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing export overrides; unset fields come from the environment.
    #[serde(default)]
    pub tracing: TracingSettings,
    /// Prometheus exporter.
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Tracing export overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TracingSettings {
    /// Export spans over OTLP.
    #[serde(default)]
    pub otel_enabled: Option<bool>,
    /// OTLP endpoint.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Service name.
    #[serde(default)]
    pub service_name: Option<String>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Start the exporter.
    #[serde(default = "super::exchanges::default_true")]
    pub enabled: bool,
    /// Listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_listen_addr(),
        }
    }
}

impl ObservabilityConfig {
    /// Environment telemetry settings with configured overrides applied.
    #[must_use]
    pub fn telemetry_config(&self) -> TelemetryConfig {
        let mut config = TelemetryConfig::from_env();
        if let Some(enabled) = self.tracing.otel_enabled {
            config.otel_enabled = enabled;
        }
        if let Some(endpoint) = &self.tracing.otlp_endpoint {
            config.otlp_endpoint.clone_from(endpoint);
        }
        if let Some(name) = &self.tracing.service_name {
            config.service_name.clone_from(name);
        }
        config
    }

    /// Exporter settings, `None` when disabled.
    #[must_use]
    pub fn metrics_config(&self) -> Option<MetricsConfig> {
        self.metrics
            .enabled
            .then(|| MetricsConfig::with_addr(self.metrics.listen_addr))
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}
