//! Handler error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::network::context::DeadlineExceeded;
use crate::storage::StorageError;

/// Failure of a route handler. Every variant renders as
/// `{"error": "<message>"}`; storage failures show a generic message and
/// keep the driver text in the log.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The identity stage did not run for this request.
    #[error("request context missing")]
    MissingContext,
    /// The request deadline passed before the handler finished.
    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),
    /// A read or write failed inside the storage layer.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The storage layer refused a write.
    #[error("{0}")]
    Rejected(#[source] StorageError),
}

const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingContext | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Rejected(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Text placed in the response body.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Storage(_) => INTERNAL_ERROR_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http_body_util::BodyExt;

    use super::*;
    use crate::storage::{Access, Role};

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::MissingContext.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(DeadlineExceeded {
                timeout: Duration::from_secs(2)
            })
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        let timeout = StorageError::Timeout {
            role: Role::Replica(1),
            access: Access::Read,
            timeout: Duration::from_secs(2),
        };
        assert_eq!(
            ApiError::from(timeout).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        let rejected = StorageError::Query {
            role: Role::Primary,
            access: Access::Write,
            source: sqlx::Error::RowNotFound,
        };
        assert_eq!(
            ApiError::Rejected(rejected).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn renders_error_body() {
        let response = ApiError::from(DeadlineExceeded {
            timeout: Duration::from_secs(2),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = body_json(response).await;
        assert_eq!(json["error"], "request deadline of 2s exceeded");
    }

    #[tokio::test]
    async fn storage_failures_hide_driver_text() {
        let err = ApiError::from(StorageError::Query {
            role: Role::Replica(0),
            access: Access::Read,
            source: sqlx::Error::Protocol("table users on db-7.internal is corrupt".to_string()),
        });
        assert!(err.to_string().contains("db-7.internal"));

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"], INTERNAL_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn rejected_writes_keep_their_message() {
        let err = ApiError::Rejected(StorageError::Query {
            role: Role::Primary,
            access: Access::Write,
            source: sqlx::Error::RowNotFound,
        });
        let expected = err.to_string();
        let json = body_json(err.into_response()).await;
        assert_eq!(json["error"], expected.as_str());
    }
}
