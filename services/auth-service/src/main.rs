use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common_auth::TokenSigner;
use sqlx::postgres::PgPoolOptions;
use storefront_auth::app::{build_router, cors_layer, AppState};
use storefront_auth::config::load_app_config;
use storefront_auth::lifecycle::TokenLifecycle;
use storefront_auth::metrics::AuthMetrics;
use storefront_auth::refresh_store::PgRefreshTokenStore;
use storefront_auth::users::{placeholder_password_hash, Argon2Verifier, PgUserDirectory};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_app_config()?;
    info!(?config, "loaded configuration");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to DATABASE_URL")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to apply migrations")?;

    let token_signer = Arc::new(TokenSigner::new(config.jwt.clone())?);
    let sessions = Arc::new(TokenLifecycle::new(
        Arc::new(PgRefreshTokenStore::new(pool.clone())),
        config.refresh_ttl,
        config.store_timeout,
    ));

    placeholder_password_hash();

    let state = AppState {
        users: Arc::new(PgUserDirectory::new(pool)),
        credentials: Arc::new(Argon2Verifier),
        sessions,
        token_signer,
        metrics: Arc::new(AuthMetrics::new()?),
    };

    let app = build_router(state).layer(cors_layer(&config.cors_allowed_origins));

    let ip: std::net::IpAddr = config.host.parse().context("Invalid HOST")?;
    let addr = SocketAddr::from((ip, config.port));

    info!(%addr, "starting storefront-auth");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
