use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use common_auth::Role;
use common_http_errors::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::app::AppState;
use crate::lifecycle::RotationError;
use crate::refresh_store::RefreshToken;
use crate::users::{check_credentials, hash_password, NewUser, User, UserStoreError};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(alias = "email", alias = "username")]
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub role: Role,
    pub token_type: &'static str,
    pub expires_in: i64,
}

pub(crate) fn invalid_payload(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest {
        code: "invalid_payload",
        trace_id: None,
        message: Some(rejection.body_text()),
    }
}

fn bad_field(message: &str) -> ApiError {
    ApiError::BadRequest {
        code: "invalid_payload",
        trace_id: None,
        message: Some(message.to_string()),
    }
}

fn user_store_failure(err: UserStoreError) -> ApiError {
    error!(error = %err, "user directory failure");
    ApiError::internal("user directory unavailable", None)
}

fn token_pair(state: &AppState, user: &User, refresh: RefreshToken) -> ApiResult<TokenPairResponse> {
    let access_token = state
        .token_signer
        .issue_access(&user.username, user.role)
        .map_err(|err| {
            error!(user_id = %user.id, error = %err, "failed to sign access token");
            ApiError::from(err)
        })?;

    Ok(TokenPairResponse {
        access_token,
        refresh_token: refresh.value,
        role: user.role,
        token_type: "Bearer",
        expires_in: state.token_signer.access_ttl().num_seconds(),
    })
}

async fn open_session(state: &AppState, user: &User) -> ApiResult<TokenPairResponse> {
    let refresh = state.sessions.issue(user.id).await.map_err(|err| {
        error!(user_id = %user.id, error = %err, "failed to issue refresh token");
        ApiError::internal("unable to issue refresh token", None)
    })?;
    token_pair(state, user, refresh)
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<TokenPairResponse>> {
    let Json(request) = payload.map_err(invalid_payload)?;

    let user = match state.users.find_by_identifier(&request.identifier).await {
        Ok(user) => user,
        Err(err) => {
            state.metrics.login_attempt("error");
            return Err(user_store_failure(err));
        }
    };

    // Unknown identifier and wrong password are indistinguishable to the caller.
    let Some(user) = check_credentials(state.credentials.as_ref(), &request.password, user) else {
        state.metrics.login_attempt("invalid_credentials");
        info!("login rejected");
        return Err(ApiError::InvalidCredentials);
    };

    let response = match open_session(&state, &user).await {
        Ok(response) => response,
        Err(err) => {
            state.metrics.login_attempt("error");
            return Err(err);
        }
    };
    state.metrics.login_attempt("success");
    info!(user_id = %user.id, role = %user.role, "login succeeded");
    Ok(Json(response))
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TokenPairResponse>)> {
    let Json(request) = payload.map_err(invalid_payload)?;

    let username = request.username.trim().to_lowercase();
    let email = request.email.trim().to_string();
    if username.is_empty() || username.contains('@') || username.contains(char::is_whitespace) {
        return Err(bad_field("username must be non-empty without '@' or spaces"));
    }
    if !email.contains('@') {
        return Err(bad_field("email must be a valid address"));
    }
    if request.password.is_empty() {
        return Err(bad_field("password must not be empty"));
    }

    if state
        .users
        .find_by_email(&email)
        .await
        .map_err(user_store_failure)?
        .is_some()
    {
        return Err(ApiError::conflict("email_taken", "Email is already registered"));
    }
    if state
        .users
        .find_by_username(&username)
        .await
        .map_err(user_store_failure)?
        .is_some()
    {
        return Err(ApiError::conflict("username_taken", "Username is already taken"));
    }

    let password_hash = hash_password(&request.password).map_err(|err| {
        error!(error = %err, "failed to hash password");
        ApiError::internal("unable to hash password", None)
    })?;

    let user = state
        .users
        .insert(NewUser {
            name: request
                .name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            username,
            email,
            password_hash,
            role: Role::default(),
        })
        .await
        .map_err(|err| match err {
            UserStoreError::EmailTaken => {
                ApiError::conflict("email_taken", "Email is already registered")
            }
            UserStoreError::UsernameTaken => {
                ApiError::conflict("username_taken", "Username is already taken")
            }
            other => user_store_failure(other),
        })?;

    info!(user_id = %user.id, "registered user");
    let response = open_session(&state, &user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<TokenPairResponse>> {
    let Json(request) = payload.map_err(invalid_payload)?;

    let rotated = match state.sessions.rotate(request.refresh_token.trim()).await {
        Ok(token) => token,
        Err(RotationError::Invalid) => {
            state.metrics.refresh("rejected");
            return Err(ApiError::unauthenticated());
        }
        Err(RotationError::TimedOut) => {
            state.metrics.refresh("timeout");
            return Err(ApiError::unauthenticated());
        }
        Err(RotationError::Store(err)) => {
            state.metrics.refresh("error");
            error!(error = %err, "refresh token store failure");
            return Err(ApiError::internal("refresh token store unavailable", None));
        }
    };

    let user = match state.users.find_by_id(rotated.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(user_id = %rotated.user_id, "refresh token owner no longer exists");
            discard_rotated(&state, &rotated).await;
            state.metrics.refresh("rejected");
            return Err(ApiError::unauthenticated());
        }
        Err(err) => {
            discard_rotated(&state, &rotated).await;
            state.metrics.refresh("error");
            return Err(user_store_failure(err));
        }
    };

    let response = token_pair(&state, &user, rotated)?;
    state.metrics.refresh("success");
    Ok(Json(response))
}

/// Revokes a freshly rotated token that will never reach the caller.
async fn discard_rotated(state: &AppState, rotated: &RefreshToken) {
    if let Err(err) = state.sessions.revoke(&rotated.value).await {
        warn!(error = %err, user_id = %rotated.user_id, "failed to revoke undelivered refresh token");
    }
}

/// Always succeeds; an unknown, malformed or missing token is simply nothing to revoke.
pub async fn logout(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Json<Value> {
    if let Ok(Json(request)) = payload {
        if let Err(err) = state.sessions.revoke(request.refresh_token.trim()).await {
            warn!(error = %err, "failed to revoke refresh token on logout");
        }
    }
    Json(json!({ "message": "Logout successful" }))
}
