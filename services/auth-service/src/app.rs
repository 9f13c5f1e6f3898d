use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, ORIGIN},
    HeaderValue, Method,
};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use common_auth::{AuthenticateLayer, PublicRoute, PublicRoutes, RequireLayer, Role, TokenSigner};
use common_http_errors::{ApiError, ApiResult};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, warn};

use crate::lifecycle::TokenLifecycle;
use crate::metrics::AuthMetrics;
use crate::session_handlers::{login, logout, refresh, register};
use crate::user_handlers::{current_user, list_users};
use crate::users::{CredentialVerifier, UserDirectory};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserDirectory>,
    pub credentials: Arc<dyn CredentialVerifier>,
    pub sessions: Arc<TokenLifecycle>,
    pub token_signer: Arc<TokenSigner>,
    pub metrics: Arc<AuthMetrics>,
}

impl FromRef<AppState> for Arc<TokenSigner> {
    fn from_ref(state: &AppState) -> Self {
        state.token_signer.clone()
    }
}

impl FromRef<AppState> for Arc<TokenLifecycle> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<AuthMetrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}

/// Routes reachable without credentials.
pub fn public_routes() -> PublicRoutes {
    PublicRoutes::new()
        .allow(PublicRoute::with_method(Method::OPTIONS, "*"))
        .allow(PublicRoute::any("/api/auth/**"))
        .allow(PublicRoute::any("/api/public/**"))
        .allow(PublicRoute::any("/error"))
        .allow(PublicRoute::any("/healthz"))
        .allow(PublicRoute::with_method(Method::POST, "/api/orders"))
        .allow(PublicRoute::with_method(Method::GET, "/api/items/**"))
        .allow(PublicRoute::with_method(
            Method::GET,
            "/api/admin/admin-settings/public",
        ))
}

pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT, ORIGIN])
        .allow_credentials(true)
}

async fn health() -> &'static str {
    "ok"
}

async fn render_metrics(State(metrics): State<Arc<AuthMetrics>>) -> ApiResult<Response> {
    metrics.render().map_err(|err| {
        error!(error = %err, "failed to render metrics");
        ApiError::internal("metrics unavailable", None)
    })
}

/// Assembles the HTTP surface: authentication runs on every request, then each route group
/// enforces its own requirement.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(health))
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/logout", post(logout));

    let authenticated = Router::new()
        .route("/api/users/me", get(current_user))
        .route_layer(RequireLayer::authenticated());

    let admin = Router::new()
        .route("/api/users", get(list_users))
        .route("/metrics", get(render_metrics))
        .route_layer(RequireLayer::role(Role::Admin));

    let authenticate =
        AuthenticateLayer::new(state.token_signer.clone()).with_public_routes(public_routes());

    Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(admin)
        .with_state(state)
        .layer(authenticate)
}
