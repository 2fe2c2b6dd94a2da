//! HTTP route handlers.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and [`router`], which binds every route. Middleware is
//! applied on top by [`build_pipeline`](crate::network::middleware::build_pipeline).

pub mod error;
pub mod users;
pub mod welcome;

pub use error::ApiError;
pub use users::{create_user, get_user, list_users};
pub use welcome::welcome;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;

use crate::traits::UserStore;

/// Shared application state passed to all axum handlers via `State` extraction.
#[derive(Clone)]
pub struct AppState {
    /// Storage for the `users` resource.
    pub users: Arc<dyn UserStore>,
}

/// Answers `OPTIONS` on every route; CORS headers are added by the pipeline.
pub async fn no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Binds all routes:
/// - `GET /welcome`
/// - `GET /users`
/// - `GET /users/{user_id}`
/// - `POST /users/new`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/welcome", get(welcome).options(no_content))
        .route("/users", get(list_users).options(no_content))
        .route("/users/new", post(create_user).options(no_content))
        .route("/users/{user_id}", get(get_user).options(no_content))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::storage::{EmbeddedConfig, EngineConfig, StorageProvider};

    async fn app() -> Router {
        let connection = StorageProvider::new(EngineConfig::Embedded(EmbeddedConfig::in_memory()))
            .resolve()
            .await
            .unwrap();
        router(AppState {
            users: Arc::new(connection),
        })
    }

    #[tokio::test]
    async fn welcome_route() {
        let response = app()
            .await
            .oneshot(Request::get("/welcome").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"welcome");
    }

    #[tokio::test]
    async fn every_route_answers_options() {
        let app = app().await;
        for uri in ["/welcome", "/users", "/users/new", "/users/abc"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT, "{uri}");
        }
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app()
            .await
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
