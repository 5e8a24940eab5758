//! Runtime Configuration
//! Mission: Parse every knob once at startup (flags or environment) and validate it

use crate::auth::password::{DEFAULT_COST, MAX_COST};
use crate::middleware::rate_limit::{RateLimitConfig, RouteLimit};
use anyhow::{bail, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// Shortest secret accepted without a warning (256 bits)
const RECOMMENDED_SECRET_BYTES: usize = 32;

#[derive(Parser, Debug, Clone)]
#[command(name = "blog-auth")]
#[command(about = "Blog authentication service - accounts, sessions and token rotation")]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,

    /// SQLite database file for users and refresh tokens
    #[arg(long, env = "AUTH_DB_PATH", default_value = "auth.db")]
    pub db_path: String,

    /// HS256 signing secret for access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Access token lifetime in seconds
    #[arg(long, env = "ACCESS_TOKEN_TTL_SECS", default_value = "900")]
    pub access_token_ttl_secs: i64,

    /// Refresh token lifetime in seconds
    #[arg(long, env = "REFRESH_TOKEN_TTL_SECS", default_value = "604800")]
    pub refresh_token_ttl_secs: i64,

    /// Clock skew tolerated when checking access token expiry
    #[arg(long, env = "TOKEN_LEEWAY_SECS", default_value = "0")]
    pub token_leeway_secs: i64,

    /// bcrypt work factor
    #[arg(long, env = "BCRYPT_COST", default_value_t = DEFAULT_COST)]
    pub bcrypt_cost: u32,

    /// Upper bound for a single store call in milliseconds
    #[arg(long, env = "STORE_TIMEOUT_MS", default_value = "5000")]
    pub store_timeout_ms: u64,

    /// How often expired refresh tokens are deleted
    #[arg(long, env = "REFRESH_PRUNE_INTERVAL_SECS", default_value = "3600")]
    pub refresh_prune_interval_secs: u64,

    #[arg(long, env = "RATE_LIMIT_LOGIN_PER_MIN", default_value = "5")]
    pub rate_limit_login_per_min: u32,

    #[arg(long, env = "RATE_LIMIT_LOGIN_BURST", default_value = "5")]
    pub rate_limit_login_burst: u32,

    #[arg(long, env = "RATE_LIMIT_REGISTER_PER_MIN", default_value = "3")]
    pub rate_limit_register_per_min: u32,

    #[arg(long, env = "RATE_LIMIT_REGISTER_BURST", default_value = "3")]
    pub rate_limit_register_burst: u32,

    #[arg(long, env = "RATE_LIMIT_WRITE_PER_MIN", default_value = "30")]
    pub rate_limit_write_per_min: u32,

    #[arg(long, env = "RATE_LIMIT_WRITE_BURST", default_value = "30")]
    pub rate_limit_write_burst: u32,

    #[arg(long, env = "RATE_LIMIT_READ_PER_MIN", default_value = "60")]
    pub rate_limit_read_per_min: u32,

    #[arg(long, env = "RATE_LIMIT_READ_BURST", default_value = "60")]
    pub rate_limit_read_burst: u32,

    /// Maximum (client, route class) buckets kept in memory
    #[arg(long, env = "RATE_LIMIT_MAX_CLIENTS", default_value = "100000")]
    pub rate_limit_max_clients: usize,
}

/// Validated configuration handed to the rest of the service
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub db_path: String,
    pub jwt_secret: String,
    pub access_ttl: chrono::Duration,
    pub refresh_ttl: chrono::Duration,
    pub token_leeway: chrono::Duration,
    pub bcrypt_cost: u32,
    pub store_timeout: Duration,
    pub refresh_prune_interval: Duration,
    pub rate_limit: RateLimitConfig,
}

impl Cli {
    pub fn into_config(self) -> Result<Config> {
        let secret = self.jwt_secret.trim().to_string();
        if secret.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }
        if secret.len() < RECOMMENDED_SECRET_BYTES {
            warn!(
                len = secret.len(),
                "⚠️ JWT_SECRET is shorter than {} bytes", RECOMMENDED_SECRET_BYTES
            );
        }

        if self.bcrypt_cost < DEFAULT_COST || self.bcrypt_cost > MAX_COST {
            bail!(
                "BCRYPT_COST must be between {} and {}, got {}",
                DEFAULT_COST,
                MAX_COST,
                self.bcrypt_cost
            );
        }
        if self.access_token_ttl_secs <= 0 {
            bail!("ACCESS_TOKEN_TTL_SECS must be positive");
        }
        if self.refresh_token_ttl_secs <= self.access_token_ttl_secs {
            bail!("REFRESH_TOKEN_TTL_SECS must be longer than ACCESS_TOKEN_TTL_SECS");
        }
        if self.token_leeway_secs < 0 {
            bail!("TOKEN_LEEWAY_SECS must not be negative");
        }
        if self.store_timeout_ms == 0 {
            bail!("STORE_TIMEOUT_MS must be positive");
        }
        if self.refresh_prune_interval_secs == 0 {
            bail!("REFRESH_PRUNE_INTERVAL_SECS must be positive");
        }
        if self.rate_limit_max_clients == 0 {
            bail!("RATE_LIMIT_MAX_CLIENTS must be positive");
        }

        let rate_limit = RateLimitConfig {
            login: route_limit(
                "LOGIN",
                self.rate_limit_login_per_min,
                self.rate_limit_login_burst,
            )?,
            register: route_limit(
                "REGISTER",
                self.rate_limit_register_per_min,
                self.rate_limit_register_burst,
            )?,
            write: route_limit(
                "WRITE",
                self.rate_limit_write_per_min,
                self.rate_limit_write_burst,
            )?,
            read: route_limit(
                "READ",
                self.rate_limit_read_per_min,
                self.rate_limit_read_burst,
            )?,
            max_tracked_clients: self.rate_limit_max_clients,
        };

        Ok(Config {
            bind_addr: self.bind_addr,
            db_path: self.db_path,
            jwt_secret: secret,
            access_ttl: chrono::Duration::seconds(self.access_token_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(self.refresh_token_ttl_secs),
            token_leeway: chrono::Duration::seconds(self.token_leeway_secs),
            bcrypt_cost: self.bcrypt_cost,
            store_timeout: Duration::from_millis(self.store_timeout_ms),
            refresh_prune_interval: Duration::from_secs(self.refresh_prune_interval_secs),
            rate_limit,
        })
    }
}

fn route_limit(class: &str, per_min: u32, burst: u32) -> Result<RouteLimit> {
    if per_min == 0 || burst == 0 {
        bail!("RATE_LIMIT_{class}_PER_MIN and RATE_LIMIT_{class}_BURST must be positive");
    }
    Ok(RouteLimit::new(per_min, burst))
}
