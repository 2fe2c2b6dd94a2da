//! Logging and distributed tracing setup.

pub mod error;
pub mod logging;
pub mod tracer;

pub use error::TelemetryError;
pub use logging::init_logging;
pub use tracer::{ExporterKind, ProcessorKind, TracerLifecycle};
