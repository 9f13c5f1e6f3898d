use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use common_http_errors::ApiError;
use tower::{Layer, Service};
use tracing::warn;

use crate::principal::Principal;
use crate::roles::Role;

/// What a route demands from the request's principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    Role(Role),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    Unauthenticated,
    Forbidden { required: Role, actual: Role },
}

impl GuardError {
    pub fn status(&self) -> StatusCode {
        match self {
            GuardError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GuardError::Forbidden { .. } => StatusCode::FORBIDDEN,
        }
    }
}

impl From<GuardError> for ApiError {
    fn from(value: GuardError) -> Self {
        match value {
            GuardError::Unauthenticated => ApiError::unauthenticated(),
            GuardError::Forbidden { required, .. } => ApiError::ForbiddenMissingRole {
                role: required.as_str(),
                trace_id: None,
            },
        }
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}

pub fn authorize(principal: Option<&Principal>, requirement: Requirement) -> Result<(), GuardError> {
    let principal = principal.ok_or(GuardError::Unauthenticated)?;
    match requirement {
        Requirement::Authenticated => Ok(()),
        Requirement::Role(required) => ensure_role(principal, required),
    }
}

pub fn ensure_role(principal: &Principal, required: Role) -> Result<(), GuardError> {
    if principal.has_role(required) {
        return Ok(());
    }
    warn!(subject = %principal.subject, %required, actual = %principal.role, "role_check_failed");
    Err(GuardError::Forbidden {
        required,
        actual: principal.role,
    })
}

/// Route layer enforcing a [`Requirement`] against the principal left by the authentication pass.
///
/// ```ignore
/// Router::new()
///     .route("/api/users", get(list_users))
///     .route_layer(RequireLayer::role(Role::Admin))
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequireLayer {
    requirement: Requirement,
}

impl RequireLayer {
    pub fn authenticated() -> Self {
        Self {
            requirement: Requirement::Authenticated,
        }
    }

    pub fn role(role: Role) -> Self {
        Self {
            requirement: Requirement::Role(role),
        }
    }
}

impl<S> Layer<S> for RequireLayer {
    type Service = RequireMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireMiddleware {
            inner,
            requirement: self.requirement,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequireMiddleware<S> {
    inner: S,
    requirement: Requirement,
}

impl<S> Service<Request<Body>> for RequireMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        if let Err(err) = authorize(req.extensions().get::<Principal>(), self.requirement) {
            return Box::pin(async move { Ok(err.into_response()) });
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tower::ServiceExt;

    #[test]
    fn missing_principal_is_unauthenticated() {
        assert_eq!(
            authorize(None, Requirement::Authenticated),
            Err(GuardError::Unauthenticated)
        );
        assert_eq!(
            authorize(None, Requirement::Role(Role::Admin)),
            Err(GuardError::Unauthenticated)
        );
    }

    #[test]
    fn guest_is_forbidden_on_admin_requirement() {
        let guest = Principal::new("gary", Role::Guest);
        let err = authorize(Some(&guest), Requirement::Role(Role::Admin)).expect_err("forbidden");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn admin_satisfies_admin_requirement() {
        let admin = Principal::new("alice", Role::Admin);
        assert!(authorize(Some(&admin), Requirement::Role(Role::Admin)).is_ok());
        assert!(authorize(Some(&admin), Requirement::Authenticated).is_ok());
    }

    #[test]
    fn roles_are_not_hierarchical() {
        let admin = Principal::new("alice", Role::Admin);
        assert!(authorize(Some(&admin), Requirement::Role(Role::Editor)).is_err());
    }

    async fn status_for(layer: RequireLayer, principal: Option<Principal>) -> StatusCode {
        let ok = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(StatusCode::NO_CONTENT.into_response())
        });
        let mut req = Request::builder().uri("/").body(Body::empty()).unwrap();
        if let Some(principal) = principal {
            req.extensions_mut().insert(principal);
        }
        layer.layer(ok).oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn require_layer_maps_outcomes_to_status() {
        let admin = RequireLayer::role(Role::Admin);
        assert_eq!(status_for(admin, None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(admin, Some(Principal::new("gary", Role::Guest))).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(admin, Some(Principal::new("alice", Role::Admin))).await,
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            status_for(RequireLayer::authenticated(), Some(Principal::new("vic", Role::Viewer))).await,
            StatusCode::NO_CONTENT
        );
    }
}
