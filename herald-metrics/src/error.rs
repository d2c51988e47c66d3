//! Metrics errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// [`init_metrics`](crate::init_metrics) ran twice in one process
    #[error("Metrics already initialized for this process")]
    AlreadyInitialized,

    #[error("Invalid metrics endpoint '{endpoint}': expected an http:// or https:// URL")]
    InvalidEndpoint { endpoint: String },

    #[error("Failed to build OTLP exporter for {endpoint}: {message}")]
    Exporter { endpoint: String, message: String },
}
