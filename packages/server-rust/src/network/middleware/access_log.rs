//! Access log stage.
//!
//! Emits exactly one [`AccessLogRecord`] per request. The record is held by
//! a guard that travels with the response body, so the byte count is final
//! when it is written:
//!
//! - body finished or dropped: the response status
//! - inner chain panicked: `500`, then the panic continues outward
//! - request future dropped before a response: `499`

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::HOST;
use axum::response::Response;
use bytes::Bytes;
use futures_util::FutureExt;
use http_body::{Frame, SizeHint};
use parking_lot::Mutex;
use tower::{Layer, Service};

use crate::config::duration::format_duration;
use crate::network::context::{ClientAddr, ConnectionScheme, RequestContext};

/// Status logged when the client went away before a response was produced.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

const CATEGORY: &str = "router";

// ---------------------------------------------------------------------------
// Records and sinks
// ---------------------------------------------------------------------------

/// One inbound request as seen by the access log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessLogRecord {
    pub status_code: u16,
    pub bytes: u64,
    pub duration: Duration,
    pub category: &'static str,
    pub remote_ip: String,
    pub proto: String,
    pub scheme: ConnectionScheme,
    pub method: String,
    pub host: String,
    pub uri: String,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl AccessLogRecord {
    fn from_request(req: &Request) -> Self {
        let ctx = req.extensions().get::<RequestContext>();
        let trace = ctx.and_then(RequestContext::trace);
        Self {
            status_code: 0,
            bytes: 0,
            duration: Duration::ZERO,
            category: CATEGORY,
            remote_ip: remote_ip(req),
            proto: format!("{:?}", req.version()),
            scheme: req
                .extensions()
                .get::<ConnectionScheme>()
                .copied()
                .unwrap_or_default(),
            method: req.method().to_string(),
            host: req
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .or_else(|| req.uri().host())
                .unwrap_or_default()
                .to_string(),
            uri: req
                .uri()
                .path_and_query()
                .map_or_else(|| req.uri().path().to_string(), ToString::to_string),
            request_id: ctx.map(|ctx| ctx.request_id().to_string()),
            trace_id: trace.map(|trace| trace.trace_id.to_string()),
            span_id: trace.map(|trace| trace.span_id.to_string()),
        }
    }
}

/// Client address with any port removed. Values that do not parse as a
/// socket address are kept as they are.
fn remote_ip(req: &Request) -> String {
    let raw = req
        .extensions()
        .get::<ClientAddr>()
        .map(|addr| addr.0.clone())
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.to_string())
        })
        .unwrap_or_default();
    raw.parse::<SocketAddr>()
        .map_or(raw, |addr| addr.ip().to_string())
}

/// Destination for access log records.
pub trait AccessLogSink: Send + Sync + 'static {
    fn emit(&self, record: &AccessLogRecord);
}

/// Writes each record as an INFO event on the `access` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAccessLog;

impl AccessLogSink for TracingAccessLog {
    fn emit(&self, record: &AccessLogRecord) {
        let duration = u64::try_from(record.duration.as_nanos()).unwrap_or(u64::MAX);
        tracing::info!(
            target: "access",
            status_code = record.status_code,
            bytes = record.bytes,
            duration,
            duration_display = %format_duration(record.duration),
            category = record.category,
            remote_ip = %record.remote_ip,
            proto = %record.proto,
            scheme = record.scheme.as_str(),
            method = %record.method,
            host = %record.host,
            uri = %record.uri,
            request_id = record.request_id.as_deref(),
            trace_id = record.trace_id.as_deref(),
            span = record.span_id.as_deref(),
            "Inbound Request"
        );
    }
}

/// Keeps records in memory; used by tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessLog {
    records: Arc<Mutex<Vec<AccessLogRecord>>>,
}

impl MemoryAccessLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<AccessLogRecord> {
        self.records.lock().clone()
    }
}

impl AccessLogSink for MemoryAccessLog {
    fn emit(&self, record: &AccessLogRecord) {
        self.records.lock().push(record.clone());
    }
}

// ---------------------------------------------------------------------------
// Pending entry
// ---------------------------------------------------------------------------

/// Record waiting for its final status and byte count. Emits on drop if
/// [`finish`](Self::finish) was never reached.
struct PendingEntry {
    sink: Arc<dyn AccessLogSink>,
    record: Option<AccessLogRecord>,
    started: Instant,
    status: u16,
    bytes: u64,
}

impl PendingEntry {
    fn new(sink: Arc<dyn AccessLogSink>, record: AccessLogRecord) -> Self {
        Self {
            sink,
            record: Some(record),
            started: Instant::now(),
            status: CLIENT_CLOSED_REQUEST,
            bytes: 0,
        }
    }

    fn finish(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.status_code = self.status;
            record.bytes = self.bytes;
            record.duration = self.started.elapsed();
            self.sink.emit(&record);
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Response body that counts data bytes and completes the entry when the
/// stream ends or the body is dropped.
struct CountingBody {
    inner: Body,
    entry: PendingEntry,
}

impl http_body::Body for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.entry.bytes += data.len() as u64;
                }
            }
            Poll::Ready(None) => this.entry.finish(),
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

// ---------------------------------------------------------------------------
// AccessLogLayer
// ---------------------------------------------------------------------------

/// Tower layer that records one access log entry per request.
#[derive(Clone)]
pub struct AccessLogLayer {
    sink: Arc<dyn AccessLogSink>,
}

impl AccessLogLayer {
    #[must_use]
    pub fn new(sink: Arc<dyn AccessLogSink>) -> Self {
        Self { sink }
    }
}

impl Default for AccessLogLayer {
    fn default() -> Self {
        Self::new(Arc::new(TracingAccessLog))
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            sink: Arc::clone(&self.sink),
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    sink: Arc<dyn AccessLogSink>,
}

impl<S> Service<Request> for AccessLogService<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let mut entry = PendingEntry::new(
            Arc::clone(&self.sink),
            AccessLogRecord::from_request(&req),
        );
        let fut = self.inner.call(req);
        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(response)) => {
                    entry.status = response.status().as_u16();
                    let (parts, inner) = response.into_parts();
                    let body = Body::new(CountingBody { inner, entry });
                    Ok(Response::from_parts(parts, body))
                }
                Ok(Err(err)) => {
                    entry.status = 500;
                    entry.finish();
                    Err(err)
                }
                Err(panic) => {
                    entry.status = 500;
                    entry.finish();
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::http::{StatusCode, Version};
    use http_body_util::BodyExt;
    use keystone_core::{RequestId, TraceContext};
    use tower::{service_fn, ServiceExt};

    use super::*;

    fn layer() -> (AccessLogLayer, MemoryAccessLog) {
        let sink = MemoryAccessLog::new();
        (AccessLogLayer::new(Arc::new(sink.clone())), sink)
    }

    async fn hello(_req: Request) -> Result<Response, Infallible> {
        Ok(Response::new(Body::from("hello world")))
    }

    #[tokio::test]
    async fn logs_after_body_is_consumed() {
        let (layer, sink) = layer();
        let svc = layer.layer(service_fn(hello));
        let req = Request::builder()
            .uri("/welcome?x=1")
            .header(HOST, "example.com")
            .body(Body::empty())
            .unwrap();

        let response = svc.oneshot(req).await.unwrap();
        assert!(sink.records().is_empty());

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"hello world");

        let records = sink.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.status_code, 200);
        assert_eq!(record.bytes, 11);
        assert_eq!(record.category, "router");
        assert_eq!(record.method, "GET");
        assert_eq!(record.host, "example.com");
        assert_eq!(record.uri, "/welcome?x=1");
        assert_eq!(record.proto, "HTTP/1.1");
        assert_eq!(record.scheme, ConnectionScheme::Http);
        assert_eq!(record.request_id, None);
        assert_eq!(record.trace_id, None);
    }

    #[tokio::test]
    async fn dropped_body_still_logs_once() {
        let (layer, sink) = layer();
        let svc = layer.layer(service_fn(hello));
        let response = svc.oneshot(Request::new(Body::empty())).await.unwrap();
        drop(response);
        assert_eq!(sink.records().len(), 1);
        assert_eq!(sink.records()[0].status_code, 200);
    }

    #[tokio::test]
    async fn panic_logs_500_and_resumes() {
        let (layer, sink) = layer();
        let svc = layer.layer(service_fn(|_req: Request| async {
            if true {
                panic!("boom");
            }
            Ok::<Response, Infallible>(Response::new(Body::empty()))
        }));

        let outcome = AssertUnwindSafe(svc.oneshot(Request::new(Body::empty())))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status_code, 500);
    }

    #[tokio::test]
    async fn cancelled_request_logs_499() {
        let (layer, sink) = layer();
        let mut svc = layer.layer(service_fn(|_req: Request| async {
            std::future::pending::<Result<Response, Infallible>>().await
        }));
        let fut = svc.call(Request::new(Body::empty()));
        drop(fut);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status_code, CLIENT_CLOSED_REQUEST);
    }

    #[tokio::test]
    async fn carries_request_context_fields() {
        let (layer, sink) = layer();
        let svc = layer.layer(service_fn(|_req: Request| async {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_FOUND;
            Ok::<_, Infallible>(response)
        }));

        let trace = TraceContext::new_root(true);
        let mut ctx = RequestContext::new(RequestId::parse("req-9").unwrap(), tracing::Span::none());
        ctx.attach_trace(trace.clone());
        let req = Request::builder()
            .version(Version::HTTP_2)
            .extension(ctx)
            .extension(ClientAddr("203.0.113.7:5123".to_string()))
            .extension(ConnectionScheme::Https)
            .body(Body::empty())
            .unwrap();

        drop(svc.oneshot(req).await.unwrap());

        let record = &sink.records()[0];
        assert_eq!(record.status_code, 404);
        assert_eq!(record.remote_ip, "203.0.113.7");
        assert_eq!(record.proto, "HTTP/2.0");
        assert_eq!(record.scheme, ConnectionScheme::Https);
        assert_eq!(record.request_id.as_deref(), Some("req-9"));
        assert_eq!(record.trace_id, Some(trace.trace_id.to_string()));
        assert_eq!(record.span_id, Some(trace.span_id.to_string()));
    }

    #[tokio::test]
    async fn remote_ip_without_port_is_kept_raw() {
        let (layer, sink) = layer();
        let svc = layer.layer(service_fn(hello));
        let req = Request::builder()
            .extension(ClientAddr("198.51.100.4".to_string()))
            .body(Body::empty())
            .unwrap();
        drop(svc.oneshot(req).await.unwrap());
        assert_eq!(sink.records()[0].remote_ip, "198.51.100.4");
    }

    #[tokio::test]
    async fn peer_address_is_used_without_real_ip() {
        let (layer, sink) = layer();
        let svc = layer.layer(service_fn(hello));
        let req = Request::builder()
            .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
            .body(Body::empty())
            .unwrap();
        drop(svc.oneshot(req).await.unwrap());
        assert_eq!(sink.records()[0].remote_ip, "127.0.0.1");
    }

    #[test]
    fn tracing_sink_accepts_records_without_optional_fields() {
        TracingAccessLog.emit(&AccessLogRecord {
            status_code: 200,
            bytes: 0,
            duration: Duration::from_millis(3),
            category: CATEGORY,
            remote_ip: String::new(),
            proto: "HTTP/1.1".to_string(),
            scheme: ConnectionScheme::Http,
            method: "GET".to_string(),
            host: String::new(),
            uri: "/".to_string(),
            request_id: None,
            trace_id: None,
            span_id: None,
        });
    }
}
