//! Telemetry configuration.
//!
//! This module defines log filtering and OpenTelemetry export settings.

use serde::Deserialize;

/// Telemetry configuration settings.
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetrySettings {
    /// Service name for telemetry.
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// OTLP endpoint for traces. Traces are only exported when set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio for traces.
    #[serde(default = "default_sampling")]
    pub sampling_ratio: f64,
    /// Default log filter, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            sampling_ratio: default_sampling(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "brio-parallel".to_string()
}

pub(super) fn default_sampling() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}
