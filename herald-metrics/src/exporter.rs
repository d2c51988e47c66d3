//! OTLP metrics exporter

use std::time::Duration;

use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

use crate::{MetricsConfig, MetricsError};

/// Build a meter provider that pushes to the configured OTLP/HTTP endpoint
///
/// # Errors
///
/// Returns an error if the OTLP exporter cannot be initialized.
pub fn init_otlp_exporter(config: &MetricsConfig) -> Result<SdkMeterProvider, MetricsError> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_endpoint(config.endpoint.clone())
        .build()
        .map_err(|e| MetricsError::Exporter {
            endpoint: config.endpoint.clone(),
            message: e.to_string(),
        })?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(config.export_interval_secs.max(1)))
        .build();

    Ok(SdkMeterProvider::builder().with_reader(reader).build())
}
