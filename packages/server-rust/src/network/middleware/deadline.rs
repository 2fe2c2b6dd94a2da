//! Cooperative request deadline.
//!
//! Attaches a [`Deadline`] to the [`RequestContext`] and cancels it once the
//! configured timeout elapses. The handler is never aborted: it observes the
//! cancellation through [`RequestContext::run`] and answers `504` itself.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::Request;
use axum::response::Response;
use tower::{Layer, Service};

use crate::network::context::{Deadline, RequestContext};

// ---------------------------------------------------------------------------
// DeadlineLayer
// ---------------------------------------------------------------------------

/// Tower layer that gives every request a cooperative deadline.
#[derive(Debug, Clone, Copy)]
pub struct DeadlineLayer {
    timeout: Duration,
}

impl DeadlineLayer {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = DeadlineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DeadlineService {
            inner,
            timeout: self.timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// DeadlineService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    timeout: Duration,
}

impl<S> Service<Request> for DeadlineService<S>
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
        let deadline = Deadline::new(self.timeout);
        if let Some(ctx) = req.extensions_mut().get_mut::<RequestContext>() {
            ctx.attach_deadline(deadline.clone());
        }
        let fut = self.inner.call(req);
        Box::pin(async move {
            // Cancels the token when the request finishes first, releasing
            // anything still waiting on it.
            let _release = deadline.token().drop_guard();
            tokio::pin!(fut);
            tokio::select! {
                result = &mut fut => return result,
                () = tokio::time::sleep(deadline.timeout()) => {
                    deadline.expire();
                    tracing::debug!(timeout = ?deadline.timeout(), "request deadline exceeded");
                }
            }
            fut.await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
