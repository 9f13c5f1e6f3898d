use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

use crate::claims::{Claims, ClaimsRepr};
use crate::clock::{system_clock, Clock};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Issues and verifies HS256 access tokens.
///
/// The signer is built once at startup from [`JwtConfig`] and shared immutably; it performs no
/// I/O. Verification never panics on untrusted input: every failure is an [`AuthError`] of kind
/// `Malformed`, `SignatureInvalid` or `Expired`.
#[derive(Clone)]
pub struct TokenSigner {
    access_ttl: Duration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    clock: Clock,
}

impl TokenSigner {
    pub fn new(config: JwtConfig) -> AuthResult<Self> {
        config.validate()?;

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the signer's clock after the signature passes.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();
        validation.leeway = 0;

        Ok(Self {
            access_ttl: config.access_ttl,
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            clock: system_clock(),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Issues an access token with the configured lifetime.
    pub fn issue_access(&self, subject: &str, role: Role) -> AuthResult<String> {
        self.issue(subject, role, self.access_ttl)
    }

    pub fn issue(&self, subject: &str, role: Role, ttl: Duration) -> AuthResult<String> {
        self.issue_at(subject, role, ttl, self.now())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        role: Role,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AuthResult<String> {
        let issued_at = now.timestamp();
        let claims = ClaimsRepr {
            sub: subject.to_string(),
            role: role.as_str().to_string(),
            iat: issued_at,
            exp: issued_at.saturating_add(ttl.num_seconds()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }

    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        self.verify_at(token, self.now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        let data = decode::<ClaimsRepr>(token, &self.decoding_key, &self.validation)?;
        let claims = Claims::try_from(data.claims)?;

        if now >= claims.expires_at {
            return Err(AuthError::Expired);
        }

        debug!(subject = %claims.subject, role = %claims.role, "verified access token");
        Ok(claims)
    }
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("algorithm", &Algorithm::HS256)
            .field("access_ttl", &self.access_ttl)
            .finish()
    }
}
