use axum::{
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{api as auth_api, auth_middleware, AuthService, AuthState};
use crate::middleware::{rate_limit_middleware, request_logging, RateLimiter};

/// Create the API router.
///
/// Pipeline per request: trace, request logging, rate limit, then the bearer guard on
/// authenticated routes. `/health` skips the rate limiter.
pub fn create_router(service: Arc<AuthService>, limiter: RateLimiter) -> Router {
    let jwt_handler = service.tokens().jwt().clone();
    let state = AuthState::new(service);

    let public_routes = Router::new()
        .route("/auth/register", post(auth_api::register))
        .route("/auth/login", post(auth_api::login))
        .route("/auth/refresh", post(auth_api::refresh));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth_api::logout))
        .route("/auth/logout-all", post(auth_api::logout_all))
        .route("/auth/change-password", post(auth_api::change_password))
        .route(
            "/auth/me",
            get(auth_api::get_current_user).put(auth_api::update_current_user),
        )
        .route_layer(middleware::from_fn_with_state(jwt_handler, auth_middleware));

    let auth_routes = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(auth_routes)
        .layer(middleware::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
