//! Per-request authentication pass.
//!
//! Every request goes through [`AuthenticateLayer`] exactly once. Requests matching the public
//! allow-list skip credential inspection. For everything else a bearer token, when present and
//! valid, becomes the request's [`Principal`]. A missing, malformed, tampered or expired token
//! leaves the request without a principal; rejection is the job of the authorization gate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Method, Request};
use tower::{Layer, Service};
use tracing::debug;

use crate::error::AuthError;
use crate::principal::{bearer_token, Principal};
use crate::signer::TokenSigner;

/// A route that is reachable without credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicRoute {
    method: Option<Method>,
    pattern: String,
}

impl PublicRoute {
    /// Matches every method. Patterns ending in `/*` or `/**` match the prefix and anything
    /// below it; `*` matches every path.
    pub fn any(pattern: impl Into<String>) -> Self {
        Self {
            method: None,
            pattern: pattern.into(),
        }
    }

    pub fn with_method(method: Method, pattern: impl Into<String>) -> Self {
        Self {
            method: Some(method),
            pattern: pattern.into(),
        }
    }

    pub fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(expected) = &self.method {
            if expected != method {
                return false;
            }
        }

        if self.pattern == "*" {
            return true;
        }

        let prefix = self
            .pattern
            .strip_suffix("/**")
            .or_else(|| self.pattern.strip_suffix("/*"));

        match prefix {
            Some(prefix) => {
                path == prefix
                    || path
                        .strip_prefix(prefix)
                        .is_some_and(|rest| rest.starts_with('/'))
            }
            None => path == self.pattern,
        }
    }
}

/// Allow-list of public routes.
#[derive(Debug, Clone, Default)]
pub struct PublicRoutes {
    routes: Vec<PublicRoute>,
}

impl PublicRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, route: PublicRoute) -> Self {
        self.routes.push(route);
        self
    }

    pub fn is_public(&self, method: &Method, path: &str) -> bool {
        self.routes.iter().any(|route| route.matches(method, path))
    }
}

/// Layer that runs the authentication pass in front of the wrapped service.
#[derive(Clone)]
pub struct AuthenticateLayer {
    signer: Arc<TokenSigner>,
    public_routes: Arc<PublicRoutes>,
}

impl AuthenticateLayer {
    pub fn new(signer: Arc<TokenSigner>) -> Self {
        Self {
            signer,
            public_routes: Arc::new(PublicRoutes::new()),
        }
    }

    pub fn with_public_routes(mut self, routes: PublicRoutes) -> Self {
        self.public_routes = Arc::new(routes);
        self
    }
}

impl<S> Layer<S> for AuthenticateLayer {
    type Service = AuthenticateMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthenticateMiddleware {
            inner,
            signer: self.signer.clone(),
            public_routes: self.public_routes.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthenticateMiddleware<S> {
    inner: S,
    signer: Arc<TokenSigner>,
    public_routes: Arc<PublicRoutes>,
}

impl<S> AuthenticateMiddleware<S> {
    fn authenticate(&self, request: &Request<Body>) -> Option<Principal> {
        if self
            .public_routes
            .is_public(request.method(), request.uri().path())
        {
            return None;
        }

        let token = match bearer_token(request.headers()) {
            Ok(token) => token,
            Err(AuthError::MissingAuthorization) => return None,
            Err(err) => {
                debug!(reason = err.kind(), path = %request.uri().path(), "ignoring authorization header");
                return None;
            }
        };

        match self.signer.verify(&token) {
            Ok(claims) => Some(Principal::from(claims)),
            Err(err) => {
                debug!(reason = err.kind(), path = %request.uri().path(), "access token rejected");
                None
            }
        }
    }
}

impl<S> Service<Request<Body>> for AuthenticateMiddleware<S>
where
    S: Service<Request<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        // Only this pass may establish a principal.
        req.extensions_mut().remove::<Principal>();
        if let Some(principal) = self.authenticate(&req) {
            req.extensions_mut().insert(principal);
        }

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}
