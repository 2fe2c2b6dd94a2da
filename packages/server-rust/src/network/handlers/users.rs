//! `users` resource handlers.
//!
//! Every storage call runs under the request deadline through
//! [`RequestContext::run`], so a slow database answers `504` once the
//! deadline passes instead of holding the connection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::{ApiError, AppState};
use crate::network::context::RequestContext;
use crate::storage::User;

/// `GET /users`: all users that are not soft-deleted.
pub async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = ctx.run(state.users.list_users()).await??;
    tracing::debug!(count = users.len(), "listed users");
    Ok(Json(users))
}

/// `GET /users/{user_id}`: the user, or a placeholder carrying only the
/// requested ID when there is no such user.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ctx: RequestContext,
) -> Result<Json<User>, ApiError> {
    let found = ctx.run(state.users.find_user(&user_id)).await??;
    let user = found.unwrap_or_else(|| {
        tracing::debug!(%user_id, "user not found");
        User::placeholder(&user_id)
    });
    Ok(Json(user))
}

/// `POST /users/new`: creates a user with a fresh ID.
pub async fn create_user(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = User::new();
    ctx.run(state.users.create_user(&user))
        .await?
        .map_err(ApiError::Rejected)?;
    tracing::info!(user_id = %user.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}
