//! Cross-origin resource sharing.
//!
//! Unlike `tower-http`'s CORS layer this one never answers preflight
//! requests itself: `OPTIONS` requests reach the router, and the CORS
//! headers are added to whatever the chain answers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN,
    VARY,
};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::Response;
use tower::{Layer, Service};

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Accept, Authorization, Content-Type, X-CSRF-Token";
const EXPOSED_HEADERS: &str = "Link";
const MAX_AGE_SECS: &str = "300";

/// Which origins may read responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    /// Exact origins, or prefixes when the entry ends in `*`
    /// (e.g. `https://*`).
    List(Vec<String>),
}

impl AllowedOrigins {
    /// `"*"` anywhere in the list allows every origin.
    #[must_use]
    pub fn from_config(origins: &[String]) -> Self {
        if origins.iter().any(|origin| origin.trim() == "*") {
            Self::Any
        } else {
            Self::List(origins.iter().map(|o| o.trim().to_string()).collect())
        }
    }

    fn allows(&self, origin: &str) -> bool {
        match self {
            Self::Any => true,
            Self::List(entries) => entries.iter().any(|entry| match entry.strip_suffix('*') {
                Some(prefix) => origin.starts_with(prefix),
                None => entry.eq_ignore_ascii_case(origin),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// CorsLayer
// ---------------------------------------------------------------------------

/// Tower layer adding CORS headers to responses.
#[derive(Debug, Clone)]
pub struct CorsLayer {
    origins: Arc<AllowedOrigins>,
}

impl CorsLayer {
    #[must_use]
    pub fn new(origins: AllowedOrigins) -> Self {
        Self {
            origins: Arc::new(origins),
        }
    }
}

impl<S> Layer<S> for CorsLayer {
    type Service = CorsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsService {
            inner,
            origins: Arc::clone(&self.origins),
        }
    }
}

// ---------------------------------------------------------------------------
// CorsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CorsService<S> {
    inner: S,
    origins: Arc<AllowedOrigins>,
}

impl<S> Service<Request> for CorsService<S>
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
        let origin = req
            .headers()
            .get(ORIGIN)
            .filter(|value| value.to_str().is_ok_and(|o| self.origins.allows(o)))
            .cloned();
        let preflight = req.method() == Method::OPTIONS
            && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD);
        let any = *self.origins == AllowedOrigins::Any;

        let fut = self.inner.call(req);
        Box::pin(async move {
            let mut response = fut.await?;
            let headers = response.headers_mut();
            headers.append(VARY, HeaderValue::from_static("Origin"));
            if let Some(origin) = origin {
                apply(headers, origin, any, preflight);
            }
            Ok(response)
        })
    }
}

fn apply(headers: &mut HeaderMap, origin: HeaderValue, any: bool, preflight: bool) {
    let allow_origin = if any {
        HeaderValue::from_static("*")
    } else {
        origin
    };
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    if preflight {
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOWED_HEADERS),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));
    } else {
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSED_HEADERS),
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::{service_fn, ServiceExt};

    use super::*;

    async fn no_content(_req: Request) -> Result<Response, Infallible> {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        Ok(response)
    }

    fn preflight(origin: &str) -> Request {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/users")
            .header(ORIGIN, origin)
            .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn preflight_passes_through_with_headers() {
        let svc = CorsLayer::new(AllowedOrigins::Any).layer(service_fn(no_content));
        let response = svc.oneshot(preflight("https://app.example")).await.unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], ALLOWED_HEADERS);
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "300");
        assert!(headers.get("access-control-allow-credentials").is_none());
    }

    #[tokio::test]
    async fn simple_request_exposes_link() {
        let svc = CorsLayer::new(AllowedOrigins::Any).layer(service_fn(no_content));
        let req = Request::builder()
            .header(ORIGIN, "https://app.example")
            .body(Body::empty())
            .unwrap();
        let response = svc.oneshot(req).await.unwrap();
        assert_eq!(response.headers()[ACCESS_CONTROL_EXPOSE_HEADERS], "Link");
        assert_eq!(response.headers()[VARY], "Origin");
        assert!(response.headers().get(ACCESS_CONTROL_MAX_AGE).is_none());
    }

    #[tokio::test]
    async fn request_without_origin_gets_no_cors_headers() {
        let svc = CorsLayer::new(AllowedOrigins::Any).layer(service_fn(no_content));
        let response = svc.oneshot(Request::new(Body::empty())).await.unwrap();
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(response.headers()[VARY], "Origin");
    }

    #[tokio::test]
    async fn listed_origins_are_echoed() {
        let origins = AllowedOrigins::from_config(&["https://*".to_string()]);
        let svc = CorsLayer::new(origins.clone()).layer(service_fn(no_content));
        let response = svc.oneshot(preflight("https://app.example")).await.unwrap();
        assert_eq!(
            response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://app.example"
        );

        let svc = CorsLayer::new(origins).layer(service_fn(no_content));
        let response = svc.oneshot(preflight("http://app.example")).await.unwrap();
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn wildcard_entry_allows_any() {
        assert_eq!(
            AllowedOrigins::from_config(&["https://a.example".to_string(), "*".to_string()]),
            AllowedOrigins::Any
        );
        let list = AllowedOrigins::from_config(&["https://a.example".to_string()]);
        assert!(list.allows("https://A.example"));
        assert!(!list.allows("https://b.example"));
    }
}
