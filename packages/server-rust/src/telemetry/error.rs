//! Telemetry error types.

use thiserror::Error;

/// Failure to set up tracing or logging. Startup-fatal.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("unsupported exporter type {0:?} (expected otlp_grpc, otlp_http, zipkin or stdout)")]
    UnsupportedExporterType(String),

    #[error("unsupported processor type {0:?} (expected batch or simple)")]
    UnsupportedProcessorType(String),

    #[error("failed to build {exporter} span exporter: {message}")]
    Exporter {
        exporter: &'static str,
        message: String,
    },

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}
