use std::fmt;

use chrono::Duration;

use crate::error::{AuthError, AuthResult};

/// Minimum HS256 key length in bytes.
pub const MIN_SECRET_BYTES: usize = 32;

/// Runtime configuration for access-token signing and verification.
#[derive(Clone)]
pub struct JwtConfig {
    /// Shared HMAC signing key.
    pub secret: String,
    /// Lifetime of issued access tokens.
    pub access_ttl: Duration,
}

impl JwtConfig {
    /// Construct config with the default 15 minute access lifetime.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl: Duration::minutes(15),
        }
    }

    pub fn with_access_ttl(mut self, ttl: Duration) -> Self {
        self.access_ttl = ttl;
        self
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.secret.len() < MIN_SECRET_BYTES {
            return Err(AuthError::KeyConfig(format!(
                "secret must be at least {MIN_SECRET_BYTES} bytes"
            )));
        }
        if self.access_ttl <= Duration::zero() {
            return Err(AuthError::KeyConfig(
                "access token ttl must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_secret_is_rejected() {
        let err = JwtConfig::new("too-short").validate().expect_err("short key");
        assert!(matches!(err, AuthError::KeyConfig(_)));
    }

    #[test]
    fn non_positive_ttl_is_rejected() {
        let config = JwtConfig::new("0123456789abcdef0123456789abcdef")
            .with_access_ttl(Duration::zero());
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let config = JwtConfig::new("0123456789abcdef0123456789abcdef");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(rendered.contains("<redacted>"));
    }
}
