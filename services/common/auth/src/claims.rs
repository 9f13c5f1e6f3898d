use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::roles::Role;

/// Application-focused representation of verified access-token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claims {
    pub subject: String,
    pub role: Role,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn has_role(&self, role: Role) -> bool {
        self.role == role
    }
}

/// Wire form of the claims as they appear inside the signed token.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ClaimsRepr {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        if value.sub.trim().is_empty() {
            return Err(AuthError::Malformed("empty subject".to_string()));
        }

        let role = value
            .role
            .parse::<Role>()
            .map_err(|err| AuthError::Malformed(err.to_string()))?;

        let issued_at = timestamp("iat", value.iat)?;
        let expires_at = timestamp("exp", value.exp)?;

        Ok(Self {
            subject: value.sub,
            role,
            issued_at,
            expires_at,
        })
    }
}

fn timestamp(name: &str, seconds: i64) -> AuthResult<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| AuthError::Malformed(format!("claim '{name}' out of range")))
}
