#![allow(dead_code)]

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use common_auth::{Clock, JwtConfig, Role, TokenSigner};
use http_body_util::BodyExt;
use serde_json::Value;
use sqlx::migrate::MigrateError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use storefront_auth::app::{build_router, AppState};
use storefront_auth::lifecycle::TokenLifecycle;
use storefront_auth::metrics::AuthMetrics;
use storefront_auth::refresh_store::InMemoryRefreshTokenStore;
use storefront_auth::users::{
    hash_password, verify_password, CredentialVerifier, InMemoryUserDirectory, NewUser, User,
    UserDirectory,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret-with-enough-bytes";
pub const ACCESS_TTL_MINUTES: i64 = 15;
pub const REFRESH_TTL_DAYS: i64 = 7;

/// Clock whose time only moves when a test says so.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

/// Argon2 verification that records how often it ran.
#[derive(Default)]
pub struct CountingVerifier {
    calls: AtomicUsize,
}

impl CountingVerifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CredentialVerifier for CountingVerifier {
    fn verify(&self, password: &str, password_hash: &str) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        verify_password(password, password_hash)
    }
}

/// The full router wired to in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub users: Arc<InMemoryUserDirectory>,
    pub store: Arc<InMemoryRefreshTokenStore>,
    pub credentials: Arc<CountingVerifier>,
    pub sessions: Arc<TokenLifecycle>,
    pub signer: Arc<TokenSigner>,
    pub clock: ManualClock,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_store(InMemoryRefreshTokenStore::new())
    }

    pub fn with_store(store: InMemoryRefreshTokenStore) -> Self {
        let clock = ManualClock::new(Utc::now());
        let users = Arc::new(InMemoryUserDirectory::new());
        let store = Arc::new(store);
        let credentials = Arc::new(CountingVerifier::default());

        let signer = Arc::new(
            TokenSigner::new(
                JwtConfig::new(TEST_SECRET).with_access_ttl(Duration::minutes(ACCESS_TTL_MINUTES)),
            )
            .expect("signer")
            .with_clock(clock.clock()),
        );
        let sessions = Arc::new(
            TokenLifecycle::new(
                store.clone(),
                Duration::days(REFRESH_TTL_DAYS),
                std::time::Duration::from_millis(500),
            )
            .with_clock(clock.clock()),
        );

        let state = AppState {
            users: users.clone(),
            credentials: credentials.clone(),
            sessions: sessions.clone(),
            token_signer: signer.clone(),
            metrics: Arc::new(AuthMetrics::new().expect("metrics")),
        };

        Self {
            router: build_router(state),
            users,
            store,
            credentials,
            sessions,
            signer,
            clock,
        }
    }

    pub async fn seed_user(&self, username: &str, password: &str, role: Role) -> User {
        self.users
            .insert(NewUser {
                name: None,
                username: username.to_string(),
                email: format!("{username}@shop.test"),
                password_hash: hash_password(password).expect("hash"),
                role,
            })
            .await
            .expect("seed user")
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn post_json(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, path: &str, access_token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = access_token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// Logs in and returns `(access_token, refresh_token)`.
    pub async fn login(&self, identifier: &str, password: &str) -> (String, String) {
        let (status, body) = self
            .post_json(
                "/api/auth/login",
                serde_json::json!({ "identifier": identifier, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        tokens(&body)
    }
}

pub fn tokens(body: &Value) -> (String, String) {
    (
        body["accessToken"].as_str().expect("accessToken").to_string(),
        body["refreshToken"].as_str().expect("refreshToken").to_string(),
    )
}

/// Postgres pool for store tests, available when `AUTH_TEST_DATABASE_URL` is set.
pub struct TestDatabase {
    pool: PgPool,
}

impl TestDatabase {
    pub async fn setup() -> anyhow::Result<Option<Self>> {
        let Ok(database_url) = env::var("AUTH_TEST_DATABASE_URL") else {
            eprintln!(
                "Skipping storefront-auth Postgres tests: set AUTH_TEST_DATABASE_URL to run them.",
            );
            return Ok(None);
        };

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&database_url)
            .await?;
        if let Err(err) = sqlx::migrate!("./migrations").run(&pool).await {
            if !matches!(err, MigrateError::VersionMissing(_)) {
                return Err(err.into());
            }
        }
        Ok(Some(Self { pool }))
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Inserts a throwaway account that owns refresh tokens in the test.
    pub async fn seed_user(&self) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let handle = format!("user-{}", id.simple());
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&handle)
        .bind(format!("{handle}@shop.test"))
        .bind(hash_password("CorrectHorseBatteryStaple!").map_err(|err| anyhow::anyhow!("{err}"))?)
        .bind(Role::Guest.as_str())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}
