//! Persistence of opaque refresh tokens.
//!
//! Raw token values never reach storage; every backend keys rows by the SHA-256 digest of the
//! value. Two backends implement [`RefreshTokenStore`]:
//! [`PgRefreshTokenStore`] for production and [`InMemoryRefreshTokenStore`] for tests and local
//! runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Attempts made to find an unused token value before giving up.
pub const MAX_CREATE_ATTEMPTS: usize = 3;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("refresh token value already exists")]
    Duplicate,
    #[error("could not generate a unique refresh token after {0} attempts")]
    CollisionRetriesExhausted(usize),
    #[error("refresh token store timed out")]
    Timeout,
    #[error("refresh token store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A freshly minted refresh token. Only the caller that created it ever sees the raw value.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub value: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    fn generate(user_id: Uuid, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            value: generate_token_value(),
            user_id,
            expires_at: now + ttl,
            created_at: now,
        }
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("value", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A persisted refresh token row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub fn generate_token_value() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_refresh_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persists `token`; fails with [`StoreError::Duplicate`] when the value is already taken.
    async fn insert(&self, token: &RefreshToken) -> Result<(), StoreError>;

    async fn find(&self, value: &str) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Removes the row for `value`. Returns whether a row existed; absence is not an error.
    async fn delete(&self, value: &str) -> Result<bool, StoreError>;

    /// Atomically consumes `old` if it is present and unexpired at `now`, and persists
    /// `new_value` for the same owner. Returns `None` without mutating anything when `old` is
    /// absent or expired. A [`StoreError::Duplicate`] on the new value leaves `old` in place.
    async fn swap(
        &self,
        old: &str,
        new_value: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError>;

    /// Deletes rows that expired at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn create(
        &self,
        user_id: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken, StoreError> {
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            let token = RefreshToken::generate(user_id, ttl, now);
            match self.insert(&token).await {
                Ok(()) => return Ok(token),
                Err(StoreError::Duplicate) => {
                    warn!(attempt, %user_id, "refresh token collision, regenerating");
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::CollisionRetriesExhausted(MAX_CREATE_ATTEMPTS))
    }

    async fn rotate(
        &self,
        old: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError> {
        for attempt in 1..=MAX_CREATE_ATTEMPTS {
            match self.swap(old, &generate_token_value(), ttl, now).await {
                Err(StoreError::Duplicate) => {
                    warn!(attempt, "refresh token collision during rotation, regenerating");
                }
                other => return other,
            }
        }
        Err(StoreError::CollisionRetriesExhausted(MAX_CREATE_ATTEMPTS))
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    id: Uuid,
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<&StoredRow> for RefreshTokenRecord {
    fn from(row: &StoredRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

/// Process-local store. All mutations happen under a single lock, which gives `swap` the same
/// compare-and-delete semantics as the database transaction.
#[derive(Debug, Default)]
pub struct InMemoryRefreshTokenStore {
    rows: Mutex<HashMap<Vec<u8>, StoredRow>>,
    latency: Option<std::time::Duration>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every operation, used to exercise store timeouts.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rows owned by `user_id`.
    pub fn count_for(&self, user_id: Uuid) -> usize {
        self.lock()
            .map(|rows| rows.values().filter(|row| row.user_id == user_id).count())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Vec<u8>, StoredRow>>, StoreError> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Unavailable("refresh token map poisoned".to_string()))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let hash = hash_refresh_token(&token.value);
        let mut rows = self.lock()?;
        if rows.contains_key(&hash) {
            return Err(StoreError::Duplicate);
        }
        rows.insert(
            hash,
            StoredRow {
                id: Uuid::new_v4(),
                user_id: token.user_id,
                expires_at: token.expires_at,
                created_at: token.created_at,
            },
        );
        Ok(())
    }

    async fn find(&self, value: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.simulate_latency().await;
        let rows = self.lock()?;
        Ok(rows.get(&hash_refresh_token(value)).map(RefreshTokenRecord::from))
    }

    async fn delete(&self, value: &str) -> Result<bool, StoreError> {
        self.simulate_latency().await;
        let mut rows = self.lock()?;
        Ok(rows.remove(&hash_refresh_token(value)).is_some())
    }

    async fn swap(
        &self,
        old: &str,
        new_value: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError> {
        self.simulate_latency().await;
        let old_hash = hash_refresh_token(old);
        let new_hash = hash_refresh_token(new_value);
        let mut rows = self.lock()?;

        let user_id = match rows.get(&old_hash) {
            Some(row) if now < row.expires_at => row.user_id,
            _ => return Ok(None),
        };
        if rows.contains_key(&new_hash) {
            return Err(StoreError::Duplicate);
        }

        rows.remove(&old_hash);
        let token = RefreshToken {
            value: new_value.to_string(),
            user_id,
            expires_at: now + ttl,
            created_at: now,
        };
        rows.insert(
            new_hash,
            StoredRow {
                id: Uuid::new_v4(),
                user_id,
                expires_at: token.expires_at,
                created_at: now,
            },
        );
        Ok(Some(token))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.simulate_latency().await;
        let mut rows = self.lock()?;
        let before = rows.len();
        rows.retain(|_, row| now < row.expires_at);
        Ok((before - rows.len()) as u64)
    }
}

/// Postgres-backed store over the `refresh_tokens` table.
#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_insert_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::Duplicate;
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn insert(&self, token: &RefreshToken) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(token.user_id)
        .bind(hash_refresh_token(&token.value))
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(map_insert_error)
    }

    async fn find(&self, value: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT id, user_id, expires_at, created_at FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(hash_refresh_token(value))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(RefreshTokenRecord {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                expires_at: row.try_get("expires_at")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn delete(&self, value: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(hash_refresh_token(value))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn swap(
        &self,
        old: &str,
        new_value: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshToken>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Concurrent swaps of the same value serialize on the row lock; the loser sees no row.
        let consumed = sqlx::query(
            "DELETE FROM refresh_tokens WHERE token_hash = $1 AND expires_at > $2 RETURNING user_id",
        )
        .bind(hash_refresh_token(old))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(consumed) = consumed else {
            tx.rollback().await?;
            return Ok(None);
        };
        let user_id: Uuid = consumed.try_get("user_id")?;

        let token = RefreshToken {
            value: new_value.to_string(),
            user_id,
            expires_at: now + ttl,
            created_at: now,
        };
        sqlx::query(
            "INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(hash_refresh_token(new_value))
        .bind(token.expires_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_insert_error)?;

        tx.commit().await?;
        Ok(Some(token))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
