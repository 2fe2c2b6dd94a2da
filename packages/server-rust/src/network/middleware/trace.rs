//! B3 trace propagation stage.
//!
//! Continues the caller's trace when the request carries a valid B3 header
//! set, or starts a new root otherwise. The server span is exported through
//! the configured tracer; its position is written to the forwarded request
//! headers, the response headers and the [`RequestContext`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::{HOST, USER_AGENT};
use axum::http::{HeaderMap, Version};
use axum::response::Response;
use keystone_core::{B3Propagator, SpanId, TraceContext, TraceId};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span as _, SpanContext, SpanKind, Status, Tracer as _};
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::Tracer;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, NETWORK_PROTOCOL_VERSION, NETWORK_TRANSPORT,
    SERVER_ADDRESS, URL_PATH, URL_QUERY, USER_AGENT_ORIGINAL,
};
use tower::{Layer, Service};

use crate::network::context::RequestContext;
use crate::network::headers::{HeaderExtractor, HeaderInjector};

// ---------------------------------------------------------------------------
// TracePropagationLayer
// ---------------------------------------------------------------------------

/// Tower layer that starts a server span per request.
#[derive(Debug, Clone)]
pub struct TracePropagationLayer {
    tracer: Tracer,
    propagator: B3Propagator,
}

impl TracePropagationLayer {
    #[must_use]
    pub fn new(tracer: Tracer) -> Self {
        Self {
            tracer,
            propagator: B3Propagator::new(),
        }
    }
}

impl<S> Layer<S> for TracePropagationLayer {
    type Service = TracePropagationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracePropagationService {
            inner,
            tracer: self.tracer.clone(),
            propagator: self.propagator,
        }
    }
}

// ---------------------------------------------------------------------------
// TracePropagationService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TracePropagationService<S> {
    inner: S,
    tracer: Tracer,
    propagator: B3Propagator,
}

impl<S> Service<Request> for TracePropagationService<S>
where
    S: Service<Request, Response = Response> + Send,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let parent = self
            .propagator
            .extract_with_context(&opentelemetry::Context::new(), &HeaderExtractor(req.headers()));
        let inbound = parent.get::<TraceContext>().cloned();

        // The SDK span ends itself on drop, which covers requests that are
        // cancelled before a response is produced.
        let mut span = self
            .tracer
            .span_builder(format!("{} {}", req.method(), req.uri()))
            .with_kind(SpanKind::Server)
            .with_attributes(request_attributes(&req))
            .start_with_context(&self.tracer, &parent);

        let trace = local_trace(span.span_context(), inbound.as_ref());

        let outbound = opentelemetry::Context::new().with_value(trace.clone());
        let propagator = self.propagator;

        let headers = req.headers_mut();
        for stale in propagator.fields() {
            headers.remove(stale);
        }
        propagator.inject_context(&outbound, &mut HeaderInjector::overwrite(headers));
        if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
            ctx.attach_trace(trace);
        }

        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            if let Ok(response) = &result {
                let status = response.status();
                span.set_attribute(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(status.as_u16()),
                ));
                if status.is_server_error() {
                    span.set_status(Status::error(status.to_string()));
                }
            }
            span.end();

            result.map(|mut response| {
                propagator.inject_context(
                    &outbound,
                    &mut HeaderInjector::first_write_wins(response.headers_mut()),
                );
                response
            })
        })
    }
}

/// Converts the started span's identity into the propagated context. The
/// inbound span becomes the parent and its baggage is carried forward.
fn local_trace(span: &SpanContext, inbound: Option<&TraceContext>) -> TraceContext {
    let ids = TraceId::from_bytes(span.trace_id().to_bytes())
        .zip(SpanId::from_bytes(span.span_id().to_bytes()));
    match (ids, inbound) {
        (Some((trace_id, span_id)), Some(parent)) => TraceContext {
            trace_id,
            span_id,
            parent_span_id: Some(parent.span_id),
            sampled: span.is_sampled(),
            baggage: parent.baggage.clone(),
        },
        (Some((trace_id, span_id)), None) => TraceContext {
            trace_id,
            span_id,
            parent_span_id: None,
            sampled: span.is_sampled(),
            baggage: Vec::new(),
        },
        (None, Some(parent)) => parent.child(SpanId::random()),
        (None, None) => TraceContext::new_root(true),
    }
}

fn request_attributes(req: &Request) -> Vec<KeyValue> {
    let mut attributes = vec![
        KeyValue::new(NETWORK_TRANSPORT, "tcp"),
        KeyValue::new(HTTP_REQUEST_METHOD, req.method().to_string()),
        KeyValue::new(URL_PATH, req.uri().path().to_string()),
        KeyValue::new(NETWORK_PROTOCOL_VERSION, protocol_version(req.version())),
    ];
    if let Some(query) = req.uri().query() {
        attributes.push(KeyValue::new(URL_QUERY, query.to_string()));
    }
    if let Some(host) = header_str(req.headers(), &HOST).or_else(|| req.uri().host()) {
        attributes.push(KeyValue::new(SERVER_ADDRESS, host.to_string()));
    }
    if let Some(agent) = header_str(req.headers(), &USER_AGENT) {
        attributes.push(KeyValue::new(USER_AGENT_ORIGINAL, agent.to_string()));
    }
    attributes
}

fn header_str<'a>(headers: &'a HeaderMap, name: &axum::http::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// `network.protocol.version` value: the part after `HTTP/`.
pub(crate) fn protocol_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
