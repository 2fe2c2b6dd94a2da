//! Per-request context threaded through the middleware pipeline.
//!
//! The identity stage inserts a [`RequestContext`] into the request
//! extensions; later stages enrich it in place (trace context, deadline)
//! and handlers extract a copy through [`FromRequestParts`]. The request ID
//! is fixed at construction and only readable afterwards.

use std::future::Future;
use std::time::Duration;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue};
use keystone_core::{B3Propagator, RequestId, TraceContext};
use opentelemetry::propagation::TextMapPropagator;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::handlers::ApiError;
use super::headers::{HeaderInjector, X_REQUEST_ID};

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// Cooperative per-request deadline.
///
/// The deadline stage cancels the token once the timeout elapses but never
/// aborts the handler; handlers observe expiry through [`Deadline::expired`]
/// or [`RequestContext::run`].
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    timeout: Duration,
}

impl Deadline {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// The configured timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the deadline has already passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the deadline passes.
    pub async fn expired(&self) {
        self.token.cancelled().await;
    }

    /// Token that is cancelled when the deadline passes, for handing to
    /// spawned work.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn expire(&self) {
        self.token.cancel();
    }
}

/// Returned by [`RequestContext::run`] when the deadline passes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("request deadline of {timeout:?} exceeded")]
pub struct DeadlineExceeded {
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Connection facts
// ---------------------------------------------------------------------------

/// Whether the connection was accepted over TLS by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionScheme {
    #[default]
    Http,
    Https,
}

impl ConnectionScheme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Client address resolved by the real-IP stage: a validated header IP, or
/// the peer socket text (which carries a port).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

// ---------------------------------------------------------------------------
// RequestContext
// ---------------------------------------------------------------------------

/// Request-scoped identity, trace position, logger span and deadline.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    trace: Option<TraceContext>,
    span: tracing::Span,
    deadline: Option<Deadline>,
}

impl RequestContext {
    /// Creates the context for a new request. `span` is the request's
    /// logger handle.
    #[must_use]
    pub fn new(request_id: RequestId, span: tracing::Span) -> Self {
        Self {
            request_id,
            trace: None,
            span,
            deadline: None,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Trace position, once the trace stage has run.
    #[must_use]
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Logger span carrying `request_id`, `trace_id` and `span_id`.
    #[must_use]
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    #[must_use]
    pub fn deadline(&self) -> Option<&Deadline> {
        self.deadline.as_ref()
    }

    pub(crate) fn attach_trace(&mut self, trace: TraceContext) {
        self.span
            .record("trace_id", tracing::field::display(trace.trace_id));
        self.span
            .record("span_id", tracing::field::display(trace.span_id));
        self.trace = Some(trace);
    }

    pub(crate) fn attach_deadline(&mut self, deadline: Deadline) {
        self.deadline = Some(deadline);
    }

    /// Awaits `work` unless the request deadline passes first.
    ///
    /// Without a deadline the work simply runs to completion.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineExceeded`] when the deadline fires before `work`
    /// completes; `work` is dropped at that point.
    pub async fn run<F: Future>(&self, work: F) -> Result<F::Output, DeadlineExceeded> {
        let Some(deadline) = &self.deadline else {
            return Ok(work.await);
        };
        let exceeded = DeadlineExceeded {
            timeout: deadline.timeout(),
        };
        if deadline.is_expired() {
            return Err(exceeded);
        }
        tokio::select! {
            biased;
            output = work => Ok(output),
            () = deadline.expired() => Err(exceeded),
        }
    }

    /// Headers to attach to calls made on behalf of this request: the
    /// request ID and the current trace position.
    #[must_use]
    pub fn outbound_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(self.request_id.as_str()) {
            headers.insert(X_REQUEST_ID, value);
        }
        if let Some(trace) = &self.trace {
            let cx = opentelemetry::Context::new().with_value(trace.clone());
            B3Propagator::new().inject_context(&cx, &mut HeaderInjector::overwrite(&mut headers));
        }
        headers
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(ApiError::MissingContext)
    }
}
