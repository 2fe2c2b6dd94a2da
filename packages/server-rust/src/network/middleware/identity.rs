//! Request identity stage.
//!
//! Assigns every request a [`RequestId`] (the inbound `X-Request-ID` when it
//! is usable, a fresh UUID otherwise), creates the request's logger span and
//! inserts the [`RequestContext`] into the request extensions. The same ID is
//! written to the response unless an inner stage already set one.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::response::Response;
use keystone_core::RequestId;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::network::context::RequestContext;
use crate::network::headers::X_REQUEST_ID;

// ---------------------------------------------------------------------------
// IdentityLayer
// ---------------------------------------------------------------------------

/// Tower layer that stamps requests and responses with a request ID.
#[derive(Debug, Clone, Default)]
pub struct IdentityLayer;

impl<S> Layer<S> for IdentityLayer {
    type Service = IdentityService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IdentityService { inner }
    }
}

// ---------------------------------------------------------------------------
// IdentityService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IdentityService<S> {
    inner: S,
}

impl<S> Service<Request> for IdentityService<S>
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
        let ctx = if let Some(existing) = req.extensions().get::<RequestContext>() {
            existing.clone()
        } else {
            let inbound = req
                .headers()
                .get(X_REQUEST_ID)
                .and_then(|value| value.to_str().ok());
            let request_id = RequestId::from_header_or_generate(inbound);
            let span = tracing::info_span!(
                "request",
                request_id = %request_id,
                trace_id = tracing::field::Empty,
                span_id = tracing::field::Empty,
            );
            let ctx = RequestContext::new(request_id, span);
            req.extensions_mut().insert(ctx.clone());
            ctx
        };

        let header = HeaderValue::from_str(ctx.request_id().as_str()).ok();
        if let Some(value) = &header {
            req.headers_mut().insert(X_REQUEST_ID, value.clone());
        }

        let fut = self.inner.call(req).instrument(ctx.span().clone());
        Box::pin(async move {
            let mut response = fut.await?;
            if let Some(value) = header {
                if !response.headers().contains_key(X_REQUEST_ID) {
                    response.headers_mut().insert(X_REQUEST_ID, value);
                }
            }
            Ok(response)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
