//! Panic recovery.
//!
//! Built on `tower-http`'s `CatchPanicLayer` with a responder that hides the
//! panic payload from the client and logs it instead.

use std::any::Any;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tower_http::body::UnsyncBoxBody;
use tower_http::catch_panic::CatchPanicLayer;

/// Body sent for every recovered panic.
pub const PANIC_BODY: &str = r#"{"error":"internal server error"}"#;

/// Signature of the panic responder.
pub type PanicResponder = fn(Box<dyn Any + Send + 'static>) -> Response;

/// Response body type produced by `CatchPanic`.
pub type RecoveredBody = UnsyncBoxBody<Bytes, tower::BoxError>;

/// Panic recovery layer answering `500` with [`PANIC_BODY`].
#[must_use]
pub fn recovery_layer() -> CatchPanicLayer<PanicResponder> {
    CatchPanicLayer::custom(panic_response as PanicResponder)
}

/// Converts the recovered body back into an axum [`Body`] so the outer
/// stages see a uniform response type.
pub fn into_axum_response(response: axum::http::Response<RecoveredBody>) -> Response {
    response.map(Body::new)
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    tracing::error!(panic = %message, "recovered from panic in request handler");

    let mut response = Response::new(Body::from(PANIC_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
