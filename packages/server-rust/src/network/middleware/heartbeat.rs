//! Load balancer health check shortcut.
//!
//! `GET` or `HEAD` on the heartbeat path answers `200 "."` immediately; no
//! other stage runs, so the response carries no request ID or trace headers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use tower::{Layer, Service};

/// Tower layer answering the heartbeat path.
#[derive(Debug, Clone)]
pub struct HeartbeatLayer {
    path: Arc<str>,
}

impl HeartbeatLayer {
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self { path: path.into() }
    }
}

impl<S> Layer<S> for HeartbeatLayer {
    type Service = HeartbeatService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HeartbeatService {
            inner,
            path: Arc::clone(&self.path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatService<S> {
    inner: S,
    path: Arc<str>,
}

impl<S> Service<Request> for HeartbeatService<S>
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
        let is_health_check = matches!(*req.method(), Method::GET | Method::HEAD)
            && req.uri().path().eq_ignore_ascii_case(&self.path);
        if is_health_check {
            return Box::pin(async { Ok(heartbeat()) });
        }
        Box::pin(self.inner.call(req))
    }
}

fn heartbeat() -> Response {
    let mut response = Response::new(Body::from("."));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain"),
    );
    response
}
