//! Blog Auth - account and session service for the blog backend
//! Mission: Register, authenticate and keep sessions short-lived and revocable

use anyhow::{Context, Result};
use blog_auth::{
    auth::{
        AuthService, Deadline, JwtHandler, PasswordHasher, RefreshTokenStore, SqliteUserStore,
        TokenService,
    },
    create_router,
    middleware::RateLimiter,
    Cli, Config,
};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Cli::parse().into_config()?;
    info!(
        bind_addr = %config.bind_addr,
        db_path = %config.db_path,
        access_ttl_secs = config.access_ttl.num_seconds(),
        refresh_ttl_secs = config.refresh_ttl.num_seconds(),
        bcrypt_cost = config.bcrypt_cost,
        "🚀 Starting blog-auth"
    );

    let refresh_store = RefreshTokenStore::new(&config.db_path, config.refresh_ttl)
        .context("Failed to open refresh token store")?;
    let user_store =
        SqliteUserStore::new(&config.db_path).context("Failed to open user store")?;

    let service = build_service(&config, user_store, refresh_store.clone());
    let limiter = RateLimiter::new(config.rate_limit.clone());

    tokio::spawn(prune_refresh_tokens(
        refresh_store,
        config.refresh_prune_interval,
    ));

    let app = create_router(service, limiter);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("🎯 API server listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("👋 Server stopped");
    Ok(())
}

fn build_service(
    config: &Config,
    user_store: SqliteUserStore,
    refresh_store: RefreshTokenStore,
) -> Arc<AuthService> {
    let deadline = Deadline::new(config.store_timeout);
    let jwt = Arc::new(JwtHandler::with_ttl(
        &config.jwt_secret,
        config.access_ttl,
        config.token_leeway,
    ));
    let tokens = TokenService::new(jwt, refresh_store, deadline);

    Arc::new(AuthService::new(
        Arc::new(user_store),
        tokens,
        PasswordHasher::new(config.bcrypt_cost),
        deadline,
    ))
}

/// Delete refresh tokens that expired more than a day ago
async fn prune_refresh_tokens(store: RefreshTokenStore, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match store.purge_expired(chrono::Duration::days(1)).await {
            Ok(0) => debug!("No expired refresh tokens to purge"),
            Ok(purged) => info!(purged, "🧹 Purged expired refresh tokens"),
            Err(e) => error!(error = ?e, "Refresh token purge failed"),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Initialize tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blog_auth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate root
    let _ = dotenv();

    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
