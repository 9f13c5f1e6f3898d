use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common_auth::{system_clock, Clock};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::refresh_store::{RefreshToken, RefreshTokenStore, StoreError};

#[derive(Debug, Error)]
pub enum RotationError {
    /// The presented token is absent, consumed or expired.
    #[error("refresh token is not valid")]
    Invalid,
    #[error("refresh token rotation timed out")]
    TimedOut,
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RotationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Timeout => RotationError::TimedOut,
            other => RotationError::Store(other),
        }
    }
}

/// Owns the lifecycle of refresh tokens: creation, validity checks, single-use rotation and
/// revocation. Every store call is bounded by the configured timeout.
#[derive(Clone)]
pub struct TokenLifecycle {
    store: Arc<dyn RefreshTokenStore>,
    refresh_ttl: Duration,
    timeout: std::time::Duration,
    clock: Clock,
}

impl TokenLifecycle {
    pub fn new(
        store: Arc<dyn RefreshTokenStore>,
        refresh_ttl: Duration,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            refresh_ttl,
            timeout,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "refresh token store timed out");
                Err(StoreError::Timeout)
            }
        }
    }

    pub async fn create_token(&self, user_id: Uuid, ttl: Duration) -> Result<RefreshToken, StoreError> {
        let now = self.now();
        let token = self
            .bounded("create", self.store.create(user_id, ttl, now))
            .await?;
        info!(%user_id, expires_at = %token.expires_at, "issued refresh token");
        Ok(token)
    }

    /// Issues a refresh token with the policy lifetime.
    pub async fn issue(&self, user_id: Uuid) -> Result<RefreshToken, StoreError> {
        self.create_token(user_id, self.refresh_ttl).await
    }

    /// True when the token is present and unexpired. Store failures count as invalid.
    pub async fn is_valid(&self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        let now = self.now();
        match self.bounded("find", self.store.find(value)).await {
            Ok(Some(record)) => record.is_live_at(now),
            Ok(None) => false,
            Err(err) => {
                warn!(error = %err, "refresh token lookup failed, treating as invalid");
                false
            }
        }
    }

    /// Consumes `old` and returns its replacement for the same owner. On failure `old` is left
    /// exactly as it was.
    pub async fn rotate(&self, old: &str) -> Result<RefreshToken, RotationError> {
        if old.is_empty() {
            return Err(RotationError::Invalid);
        }
        let now = self.now();
        match self
            .bounded("rotate", self.store.rotate(old, self.refresh_ttl, now))
            .await
        {
            Ok(Some(token)) => {
                info!(user_id = %token.user_id, "rotated refresh token");
                Ok(token)
            }
            Ok(None) => {
                warn!("refresh token rejected: absent, consumed or expired");
                Err(RotationError::Invalid)
            }
            Err(err) => {
                if !matches!(err, StoreError::Timeout) {
                    error!(error = %err, "refresh token rotation failed");
                }
                Err(err.into())
            }
        }
    }

    /// Deletes the token. Succeeds whether or not it existed.
    pub async fn revoke(&self, value: &str) -> Result<(), StoreError> {
        if value.is_empty() {
            return Ok(());
        }
        let existed = self.bounded("delete", self.store.delete(value)).await?;
        info!(existed, "revoked refresh token");
        Ok(())
    }

    /// Deletes every token that has expired by now.
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.now();
        let purged = self
            .bounded("purge_expired", self.store.purge_expired(now))
            .await?;
        info!(purged, "purged expired refresh tokens");
        Ok(purged)
    }
}
