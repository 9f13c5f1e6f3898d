use axum::extract::State;
use axum::Json;
use common_auth::Principal;
use common_http_errors::{ApiError, ApiResult};
use tracing::error;

use crate::app::AppState;
use crate::users::User;

pub async fn current_user(
    State(state): State<AppState>,
    principal: Principal,
) -> ApiResult<Json<User>> {
    let user = state
        .users
        .find_by_username(&principal.subject)
        .await
        .map_err(|err| {
            error!(error = %err, "failed to load profile");
            ApiError::internal("user directory unavailable", None)
        })?
        .ok_or(ApiError::NotFound {
            code: "user_not_found",
            trace_id: None,
        })?;
    Ok(Json(user))
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    let users = state.users.list().await.map_err(|err| {
        error!(error = %err, "failed to list users");
        ApiError::internal("user directory unavailable", None)
    })?;
    Ok(Json(users))
}
