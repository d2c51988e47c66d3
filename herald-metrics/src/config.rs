//! Metrics configuration

use serde::Deserialize;

use crate::MetricsError;

/// Configuration for metrics collection and export
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Enable or disable metrics collection
    ///
    /// When disabled, dispatch runs without any instruments attached.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// OTLP/HTTP endpoint metrics are pushed to
    ///
    /// Usually an OpenTelemetry Collector, e.g. `http://localhost:4318/v1/metrics`
    /// for local development.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Seconds between pushes to the endpoint
    #[serde(default = "default_export_interval_secs")]
    pub export_interval_secs: u64,
}

const fn default_enabled() -> bool {
    false
}

fn default_endpoint() -> String {
    "http://localhost:4318/v1/metrics".to_string()
}

const fn default_export_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            endpoint: default_endpoint(),
            export_interval_secs: default_export_interval_secs(),
        }
    }
}

impl MetricsConfig {
    /// Reject an endpoint the OTLP/HTTP exporter could never reach
    pub fn validate(&self) -> Result<(), MetricsError> {
        let endpoint = self.endpoint.trim();
        let has_host = ["http://", "https://"]
            .iter()
            .find_map(|scheme| endpoint.strip_prefix(scheme))
            .is_some_and(|rest| !rest.is_empty());

        if has_host {
            Ok(())
        } else {
            Err(MetricsError::InvalidEndpoint {
                endpoint: self.endpoint.clone(),
            })
        }
    }
}
