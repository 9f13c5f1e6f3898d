use anyhow::{Context, Result};
use chrono::Duration;
use common_auth::JwtConfig;
use std::env;
use std::fmt;
use thiserror::Error;

pub const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
pub const DEFAULT_REFRESH_TTL_MINUTES: i64 = 7 * 24 * 60;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://localhost:5173";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is not a valid number: '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{0} must be positive")]
    NotPositive(&'static str),
    #[error("access token ttl ({access} min) must be shorter than refresh token ttl ({refresh} min)")]
    AccessNotShorterThanRefresh { access: i64, refresh: i64 },
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub refresh_ttl: Duration,
    pub store_timeout: std::time::Duration,
    pub cors_allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"<redacted>")
            .field("jwt", &self.jwt)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("store_timeout", &self.store_timeout)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

pub fn load_app_config() -> Result<AppConfig> {
    load_from(|key| env::var(key).ok())
}

/// Builds the configuration from an arbitrary key lookup.
pub fn load_from<F>(lookup: F) -> Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

    let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
    let secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

    let access_minutes = number_or(
        "ACCESS_TOKEN_TTL_MINUTES",
        get("ACCESS_TOKEN_TTL_MINUTES"),
        DEFAULT_ACCESS_TTL_MINUTES,
    )?;
    let refresh_minutes = number_or(
        "REFRESH_TOKEN_TTL_MINUTES",
        get("REFRESH_TOKEN_TTL_MINUTES"),
        DEFAULT_REFRESH_TTL_MINUTES,
    )?;
    let timeout_ms = number_or(
        "TOKEN_STORE_TIMEOUT_MS",
        get("TOKEN_STORE_TIMEOUT_MS"),
        DEFAULT_STORE_TIMEOUT_MS,
    )?;
    validate_ttls(access_minutes, refresh_minutes)?;
    if timeout_ms == 0 {
        return Err(ConfigError::NotPositive("TOKEN_STORE_TIMEOUT_MS").into());
    }

    let jwt = JwtConfig::new(secret).with_access_ttl(Duration::minutes(access_minutes));
    jwt.validate().context("Invalid JWT_SECRET")?;

    let cors_allowed_origins = parse_origins(
        &get("CORS_ALLOWED_ORIGINS").unwrap_or_else(|| DEFAULT_CORS_ORIGINS.to_string()),
    );

    let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    let port = number_or("PORT", get("PORT"), 8080u16)?;

    Ok(AppConfig {
        database_url,
        jwt,
        refresh_ttl: Duration::minutes(refresh_minutes),
        store_timeout: std::time::Duration::from_millis(timeout_ms),
        cors_allowed_origins,
        host,
        port,
    })
}

fn validate_ttls(access: i64, refresh: i64) -> Result<(), ConfigError> {
    if access <= 0 {
        return Err(ConfigError::NotPositive("ACCESS_TOKEN_TTL_MINUTES"));
    }
    if refresh <= 0 {
        return Err(ConfigError::NotPositive("REFRESH_TOKEN_TTL_MINUTES"));
    }
    if access >= refresh {
        return Err(ConfigError::AccessNotShorterThanRefresh { access, refresh });
    }
    Ok(())
}

fn number_or<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split([',', ';', ' '])
        .filter_map(normalize_optional)
        .collect()
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
