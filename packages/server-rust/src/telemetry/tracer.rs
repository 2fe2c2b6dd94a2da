//! Tracer lifecycle: exporter and processor selection, provider
//! construction and shutdown.
//!
//! The provider is never installed globally; the [`Tracer`] is handed to
//! the trace propagation layer explicitly.

use std::fmt;
use std::str::FromStr;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::trace::{Sampler, Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tracing::{info, warn};

use super::error::TelemetryError;
use crate::config::{AppConfig, OtlpGrpcConfig, OtlpHttpConfig, ZipkinConfig};

const TRACER_NAME: &str = env!("CARGO_PKG_NAME");

// ---------------------------------------------------------------------------
// Name tables
// ---------------------------------------------------------------------------

/// Span exporters selectable through `telemetry.tracing.exporter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterKind {
    OtlpGrpc,
    OtlpHttp,
    Zipkin,
    Stdout,
}

pub const EXPORTERS: &[(&str, ExporterKind)] = &[
    ("otlp_grpc", ExporterKind::OtlpGrpc),
    ("otlp_http", ExporterKind::OtlpHttp),
    ("zipkin", ExporterKind::Zipkin),
    ("stdout", ExporterKind::Stdout),
];

impl ExporterKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OtlpGrpc => "otlp_grpc",
            Self::OtlpHttp => "otlp_http",
            Self::Zipkin => "zipkin",
            Self::Stdout => "stdout",
        }
    }
}

impl FromStr for ExporterKind {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(EXPORTERS, s).ok_or_else(|| TelemetryError::UnsupportedExporterType(s.to_string()))
    }
}

impl fmt::Display for ExporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Span processors selectable through `telemetry.tracing.processor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorKind {
    /// Queues spans and exports them from a background task.
    Batch,
    /// Exports every span synchronously when it ends.
    Simple,
}

pub const PROCESSORS: &[(&str, ProcessorKind)] = &[
    ("batch", ProcessorKind::Batch),
    ("simple", ProcessorKind::Simple),
];

impl FromStr for ProcessorKind {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(PROCESSORS, s).ok_or_else(|| TelemetryError::UnsupportedProcessorType(s.to_string()))
    }
}

fn lookup<T: Copy>(table: &[(&str, T)], name: &str) -> Option<T> {
    table
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name.trim()))
        .map(|(_, kind)| *kind)
}

// ---------------------------------------------------------------------------
// TracerLifecycle
// ---------------------------------------------------------------------------

/// Owns the tracer provider for the lifetime of the process.
///
/// [`shutdown`](Self::shutdown) consumes the lifecycle, so it runs at most
/// once. Dropping the lifecycle without calling it shuts the provider down
/// as well.
pub struct TracerLifecycle {
    provider: Option<TracerProvider>,
    tracer: Tracer,
}

impl TracerLifecycle {
    /// Builds the exporter and processor named in `telemetry.tracing`.
    ///
    /// Both names are checked before any exporter is constructed. Must be
    /// called inside a Tokio runtime: the batch processor and the gRPC
    /// channel spawn onto it.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::UnsupportedExporterType`] or
    /// [`TelemetryError::UnsupportedProcessorType`] for unknown names, and
    /// [`TelemetryError::Exporter`] when the exporter cannot be built.
    pub fn init(config: &AppConfig) -> Result<Self, TelemetryError> {
        let tracing = &config.telemetry.tracing;
        let exporter: ExporterKind = tracing.exporter.parse()?;
        let processor: ProcessorKind = tracing.processor.parse()?;

        let resource = Resource::new([
            KeyValue::new(
                opentelemetry_semantic_conventions::attribute::SERVICE_NAME,
                config.service.clone(),
            ),
            KeyValue::new("deployment.environment", config.environment.clone()),
        ]);

        let provider = match exporter {
            ExporterKind::OtlpGrpc => assemble(otlp_grpc(&tracing.otlp_grpc)?, processor, resource),
            ExporterKind::OtlpHttp => assemble(otlp_http(&tracing.otlp_http)?, processor, resource),
            ExporterKind::Zipkin => {
                assemble(zipkin(&config.service, &tracing.zipkin)?, processor, resource)
            }
            ExporterKind::Stdout => assemble(
                opentelemetry_stdout::SpanExporter::default(),
                processor,
                resource,
            ),
        };

        info!(%exporter, processor = ?processor, "tracer provider initialized");
        Ok(Self::from_provider(provider))
    }

    /// Wraps an already built provider.
    #[must_use]
    pub fn from_provider(provider: TracerProvider) -> Self {
        let tracer = provider.tracer(TRACER_NAME);
        Self {
            provider: Some(provider),
            tracer,
        }
    }

    /// Tracer used for server spans.
    #[must_use]
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    /// Flushes pending spans and shuts the provider down.
    pub fn shutdown(mut self) {
        if let Some(provider) = self.provider.take() {
            shutdown_provider(&provider);
        }
    }
}

impl Drop for TracerLifecycle {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            shutdown_provider(&provider);
        }
    }
}

impl fmt::Debug for TracerLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerLifecycle")
            .field("active", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

fn shutdown_provider(provider: &TracerProvider) {
    match provider.shutdown() {
        Ok(()) => info!("tracer provider shut down"),
        Err(err) => warn!(error = %err, "error while shutting down tracer provider"),
    }
}

fn assemble<E>(exporter: E, processor: ProcessorKind, resource: Resource) -> TracerProvider
where
    E: SpanExporter + 'static,
{
    let builder = TracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_resource(resource);
    let builder = match processor {
        ProcessorKind::Batch => builder.with_batch_exporter(exporter, runtime::Tokio),
        ProcessorKind::Simple => builder.with_simple_exporter(exporter),
    };
    builder.build()
}

// ---------------------------------------------------------------------------
// Exporters
// ---------------------------------------------------------------------------

/// Prefixes `endpoint` with `https://` or `http://` unless it already
/// carries a scheme.
fn endpoint_url(endpoint: &str, tls: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if tls {
        format!("https://{endpoint}")
    } else {
        format!("http://{endpoint}")
    }
}

fn exporter_error(kind: ExporterKind, err: impl fmt::Display) -> TelemetryError {
    TelemetryError::Exporter {
        exporter: kind.name(),
        message: err.to_string(),
    }
}

fn otlp_grpc(config: &OtlpGrpcConfig) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
    opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint_url(&config.endpoint, config.tls.enabled))
        .build()
        .map_err(|err| exporter_error(ExporterKind::OtlpGrpc, err))
}

fn otlp_http(config: &OtlpHttpConfig) -> Result<opentelemetry_otlp::SpanExporter, TelemetryError> {
    let url = format!(
        "{}{}",
        endpoint_url(&config.endpoint, config.tls.enabled),
        config.url_path
    );
    opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(url)
        .build()
        .map_err(|err| exporter_error(ExporterKind::OtlpHttp, err))
}

fn zipkin(
    service: &str,
    config: &ZipkinConfig,
) -> Result<opentelemetry_zipkin::Exporter, TelemetryError> {
    opentelemetry_zipkin::new_pipeline()
        .with_service_name(service)
        .with_collector_endpoint(config.endpoint.as_str())
        .init_exporter()
        .map_err(|err| exporter_error(ExporterKind::Zipkin, err))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
