//! HTTP middleware pipeline.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

pub mod access_log;
pub mod cors;
pub mod deadline;
pub mod heartbeat;
pub mod identity;
pub mod real_ip;
pub mod recovery;
pub mod trace;

pub use access_log::{
    AccessLogLayer, AccessLogRecord, AccessLogSink, MemoryAccessLog, TracingAccessLog,
};
pub use cors::{AllowedOrigins, CorsLayer};
pub use deadline::DeadlineLayer;
pub use heartbeat::HeartbeatLayer;
pub use identity::IdentityLayer;
pub use real_ip::RealIpLayer;
pub use recovery::recovery_layer;
pub use trace::TracePropagationLayer;

use std::sync::Arc;

use axum::Router;
use opentelemetry_sdk::trace::Tracer;
use tower::ServiceBuilder;

use super::config::NetworkConfig;

/// Wraps `router` in the full request pipeline.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `Heartbeat` -- answers the health check path, bypassing everything below
/// 2. `CORS` -- adds CORS headers, lets `OPTIONS` through to the routes
/// 3. `Identity` -- request ID, logger span and [`RequestContext`](super::RequestContext)
/// 4. `TracePropagation` -- B3 extraction, server span, header injection
/// 5. `RealIp` -- client address from proxy headers or the peer socket
/// 6. `Recovery` -- turns panics into `500` responses
/// 7. `AccessLog` -- one record per request, after the body is sent
/// 8. `Deadline` -- cooperative per-request timeout
///
/// Recovery sits outside the access log so a panicking request is logged
/// with status 500 before the panic is converted.
pub fn build_pipeline(
    router: Router,
    config: &NetworkConfig,
    tracer: Tracer,
    access_log: Arc<dyn AccessLogSink>,
) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(HeartbeatLayer::new(&config.heartbeat_path))
            .layer(CorsLayer::new(AllowedOrigins::from_config(
                &config.cors_origins,
            )))
            .layer(IdentityLayer)
            .layer(TracePropagationLayer::new(tracer))
            .layer(RealIpLayer)
            .map_response(recovery::into_axum_response)
            .layer(recovery_layer())
            .layer(AccessLogLayer::new(access_log))
            .layer(DeadlineLayer::new(config.request_timeout)),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use axum::routing::get;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::trace::TracerProvider;
    use tower::ServiceExt;

    use super::*;
    use crate::network::headers::X_REQUEST_ID;

    fn app(sink: &MemoryAccessLog) -> Router {
        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/panic",
                get(|| async {
                    if true {
                        panic!("handler failure");
                    }
                    "unreachable"
                }),
            );
        build_pipeline(
            router,
            &NetworkConfig::default(),
            TracerProvider::builder().build().tracer("test"),
            Arc::new(sink.clone()),
        )
    }

    #[tokio::test]
    async fn heartbeat_bypasses_identity_and_logging() {
        let sink = MemoryAccessLog::new();
        let response = app(&sink)
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_REQUEST_ID).is_none());
        assert!(response.headers().get("x-b3-traceid").is_none());
        drop(response);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn panic_is_logged_once_and_server_keeps_serving() {
        let sink = MemoryAccessLog::new();
        let app = app(&sink);

        let response = app
            .clone()
            .oneshot(Request::get("/panic").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().contains_key(X_REQUEST_ID));
        drop(response);

        let response = app
            .oneshot(Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        drop(response);

        let statuses: Vec<u16> = sink.records().iter().map(|r| r.status_code).collect();
        assert_eq!(statuses, vec![500, 200]);
    }
}
