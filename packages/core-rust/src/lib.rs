//! Keystone Core: request identifiers, trace context and the B3 propagator.

pub mod context;
pub mod ids;
pub mod propagation;

pub use context::TraceContext;
pub use ids::{ParseIdError, RequestId, SpanId, TraceId};
pub use propagation::{B3Error, B3Propagator};
