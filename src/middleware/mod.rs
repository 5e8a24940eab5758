//! Request pipeline middleware.
//!
//! - Per-client, per-route-class rate limiting
//! - Request logging with latency and client address

pub mod logging;
pub mod rate_limit;

pub use logging::request_logging;
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimiter, RouteClass, RouteLimit};
