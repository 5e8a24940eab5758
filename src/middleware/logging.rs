//! Request logging middleware.
//!
//! One line per request with method, path, status, latency and client address. Auth
//! failures and throttling land at WARN so they stand out from routine traffic.

use axum::{body::Body, extract::ConnectInfo, http::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn, Instrument};

pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    // Health probes are noise
    if path == "/health" {
        return next.run(request).await;
    }

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        client_ip = %addr.ip(),
    );

    let start = Instant::now();
    let response = next.run(request).instrument(span).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    let status = response.status().as_u16();

    match status {
        500.. => warn!(method = %method, path = %path, status, latency_ms, client_ip = %addr.ip(), "Request failed (5xx)"),
        401 | 403 | 429 => warn!(method = %method, path = %path, status, latency_ms, client_ip = %addr.ip(), "Request rejected"),
        400.. => info!(method = %method, path = %path, status, latency_ms, client_ip = %addr.ip(), "Request completed (4xx)"),
        _ => info!(method = %method, path = %path, status, latency_ms, "Request completed"),
    }

    response
}
