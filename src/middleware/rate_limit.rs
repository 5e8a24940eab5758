//! Rate limiting middleware.
//!
//! Token bucket per (client IP, route class). Buckets start full, refill continuously
//! and live in a bounded LRU map so an address-spraying client cannot grow memory
//! without limit.

use crate::error::{insert_rate_limit_headers, AuthError};
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use lru::LruCache;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

pub const DEFAULT_MAX_TRACKED_CLIENTS: usize = 100_000;

/// Which limit applies to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Login,
    Register,
    Write,
    Read,
}

impl RouteClass {
    pub fn classify(method: &Method, path: &str) -> Self {
        let path = path.trim_end_matches('/');
        if method == Method::POST {
            if path.ends_with("/auth/login") {
                return RouteClass::Login;
            }
            if path.ends_with("/auth/register") {
                return RouteClass::Register;
            }
        }
        match *method {
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE => RouteClass::Write,
            _ => RouteClass::Read,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Login => "login",
            RouteClass::Register => "register",
            RouteClass::Write => "write",
            RouteClass::Read => "read",
        }
    }
}

/// Refill rate and bucket size for one route class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteLimit {
    pub refill_per_minute: u32,
    pub burst: u32,
}

impl RouteLimit {
    pub const fn new(refill_per_minute: u32, burst: u32) -> Self {
        Self {
            refill_per_minute,
            burst,
        }
    }

    fn refilled(&self, elapsed: Duration) -> f64 {
        elapsed.as_secs_f64() * self.refill_per_minute as f64 / 60.0
    }

    /// Time needed to accumulate `missing` tokens
    fn time_for(&self, missing: f64) -> Duration {
        if self.refill_per_minute == 0 || missing <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(missing * 60.0 / self.refill_per_minute as f64)
    }
}

/// Configuration for rate limiting.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: RouteLimit,
    pub register: RouteLimit,
    pub write: RouteLimit,
    pub read: RouteLimit,
    /// Upper bound on tracked (client, class) buckets before LRU eviction.
    pub max_tracked_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login: RouteLimit::new(5, 5),
            register: RouteLimit::new(3, 3),
            write: RouteLimit::new(30, 30),
            read: RouteLimit::new(60, 60),
            max_tracked_clients: DEFAULT_MAX_TRACKED_CLIENTS,
        }
    }
}

impl RateLimitConfig {
    pub fn limit_for(&self, class: RouteClass) -> RouteLimit {
        match class {
            RouteClass::Login => self.login,
            RouteClass::Register => self.register,
            RouteClass::Write => self.write,
            RouteClass::Read => self.read,
        }
    }
}

/// Outcome of a bucket check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateLimitDecision {
    Allowed {
        remaining: u32,
        /// Time until the bucket is full again
        reset_after: Duration,
    },
    Limited {
        /// Time until one token is available
        retry_after: Duration,
    },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(limit: RouteLimit, now: Instant) -> Self {
        Self {
            tokens: limit.burst as f64,
            last_refill: now,
        }
    }

    fn take(&mut self, limit: RouteLimit, now: Instant) -> RateLimitDecision {
        let capacity = limit.burst as f64;

        // Instants from a caller-supplied clock may step backwards; never refill negatively.
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + limit.refilled(elapsed)).min(capacity);
        self.last_refill = self.last_refill.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            RateLimitDecision::Allowed {
                remaining: self.tokens.floor() as u32,
                reset_after: limit.time_for(capacity - self.tokens),
            }
        } else {
            RateLimitDecision::Limited {
                retry_after: limit.time_for(1.0 - self.tokens),
            }
        }
    }
}

type BucketKey = (String, RouteClass);

/// Shared limiter; clone freely.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    buckets: Arc<Mutex<LruCache<BucketKey, Arc<Mutex<TokenBucket>>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_tracked_clients).unwrap_or(NonZeroUsize::MIN);
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume one token if available
    pub fn allow(&self, client_key: &str, class: RouteClass) -> bool {
        self.check(client_key, class).is_allowed()
    }

    pub fn check(&self, client_key: &str, class: RouteClass) -> RateLimitDecision {
        self.check_at(client_key, class, Instant::now())
    }

    pub fn check_at(&self, client_key: &str, class: RouteClass, now: Instant) -> RateLimitDecision {
        let limit = self.config.limit_for(class);
        let bucket = {
            let mut buckets = self.buckets.lock();
            buckets
                .get_or_insert((client_key.to_string(), class), || {
                    Arc::new(Mutex::new(TokenBucket::full(limit, now)))
                })
                .clone()
        };

        let mut bucket = bucket.lock();
        bucket.take(limit, now)
    }

    /// Number of buckets currently tracked
    pub fn tracked(&self) -> usize {
        self.buckets.lock().len()
    }
}

/// Pipeline step: admit the request or fail with `RateLimitExceeded`.
pub fn guard(
    limiter: &RateLimiter,
    client_key: &str,
    method: &Method,
    path: &str,
) -> Result<(u32, Duration), AuthError> {
    let class = RouteClass::classify(method, path);
    match limiter.check(client_key, class) {
        RateLimitDecision::Allowed {
            remaining,
            reset_after,
        } => Ok((remaining, reset_after)),
        RateLimitDecision::Limited { retry_after } => {
            warn!(
                client = %client_key,
                class = class.as_str(),
                retry_after_ms = retry_after.as_millis() as u64,
                "🚫 Rate limit exceeded"
            );
            Err(AuthError::RateLimitExceeded {
                remaining: 0,
                reset_after: retry_after,
            })
        }
    }
}

/// Rate limiting middleware function.
pub async fn rate_limit_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client_key = addr.ip().to_string();

    match guard(&limiter, &client_key, request.method(), request.uri().path()) {
        Ok((remaining, reset_after)) => {
            let mut response = next.run(request).await;
            insert_rate_limit_headers(response.headers_mut(), remaining, reset_after);
            response
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn test_classify_routes() {
        assert_eq!(
            RouteClass::classify(&Method::POST, "/auth/login"),
            RouteClass::Login
        );
        assert_eq!(
            RouteClass::classify(&Method::POST, "/api/v1/auth/register/"),
            RouteClass::Register
        );
        assert_eq!(
            RouteClass::classify(&Method::POST, "/auth/refresh"),
            RouteClass::Write
        );
        assert_eq!(
            RouteClass::classify(&Method::PUT, "/auth/me"),
            RouteClass::Write
        );
        assert_eq!(
            RouteClass::classify(&Method::GET, "/auth/login"),
            RouteClass::Read
        );
        assert_eq!(
            RouteClass::classify(&Method::OPTIONS, "/anything"),
            RouteClass::Read
        );
    }

    #[test]
    fn test_login_burst_then_refill() {
        let limiter = limiter();
        let start = Instant::now();

        for i in 0..5 {
            let decision = limiter.check_at("10.0.0.1", RouteClass::Login, start);
            match decision {
                RateLimitDecision::Allowed { remaining, .. } => assert_eq!(remaining, 4 - i),
                other => panic!("request {} should be allowed, got {:?}", i + 1, other),
            }
        }

        let sixth = limiter.check_at("10.0.0.1", RouteClass::Login, start);
        match sixth {
            RateLimitDecision::Limited { retry_after } => {
                assert_eq!(retry_after.as_secs(), 12);
            }
            other => panic!("6th request should be limited, got {:?}", other),
        }

        // 5/min refills one token every 12s
        let later = start + Duration::from_secs(12);
        assert!(limiter
            .check_at("10.0.0.1", RouteClass::Login, later)
            .is_allowed());
        assert!(!limiter
            .check_at("10.0.0.1", RouteClass::Login, later)
            .is_allowed());
    }

    #[test]
    fn test_buckets_are_per_client_and_class() {
        let limiter = limiter();
        let now = Instant::now();

        for _ in 0..3 {
            assert!(limiter
                .check_at("10.0.0.1", RouteClass::Register, now)
                .is_allowed());
        }
        assert!(!limiter
            .check_at("10.0.0.1", RouteClass::Register, now)
            .is_allowed());

        assert!(limiter
            .check_at("10.0.0.2", RouteClass::Register, now)
            .is_allowed());
        assert!(limiter
            .check_at("10.0.0.1", RouteClass::Login, now)
            .is_allowed());
    }

    #[test]
    fn test_refill_caps_at_burst() {
        let limiter = limiter();
        let start = Instant::now();
        assert!(limiter.check_at("c", RouteClass::Login, start).is_allowed());

        let much_later = start + Duration::from_secs(3600);
        match limiter.check_at("c", RouteClass::Login, much_later) {
            RateLimitDecision::Allowed { remaining, .. } => assert_eq!(remaining, 4),
            other => panic!("expected allowed, got {:?}", other),
        }
    }

    #[test]
    fn test_lru_eviction_bounds_memory() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_tracked_clients: 2,
            ..Default::default()
        });
        let now = Instant::now();

        for _ in 0..5 {
            limiter.check_at("a", RouteClass::Login, now);
        }
        assert!(!limiter.allow("a", RouteClass::Login));

        limiter.check_at("b", RouteClass::Login, now);
        limiter.check_at("c", RouteClass::Login, now);
        assert_eq!(limiter.tracked(), 2);

        // "a" was least recently seen and got evicted, so it starts full again.
        assert!(limiter.check_at("a", RouteClass::Login, now).is_allowed());
    }

    #[test]
    fn test_guard_maps_to_rate_limit_error() {
        let limiter = limiter();
        for _ in 0..5 {
            assert!(guard(&limiter, "1.2.3.4", &Method::POST, "/auth/login").is_ok());
        }
        let err = guard(&limiter, "1.2.3.4", &Method::POST, "/auth/login").unwrap_err();
        assert_eq!(err.code(), "ERR_RATE_LIMIT_EXCEEDED");
    }
}
