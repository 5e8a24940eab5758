//! Authentication API Endpoints
//! Mission: Expose register, login, refresh, logout and profile endpoints over HTTP

use crate::auth::{
    models::{
        ChangePasswordRequest, Claims, LoginRequest, LoginResponse, LogoutRequest,
        RefreshRequest, RegisterRequest, TokenPair, UpdateProfileRequest, UserResponse,
    },
    service::AuthService,
};
use crate::error::AuthError;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AuthService>,
}

impl AuthState {
    pub fn new(service: Arc<AuthService>) -> Self {
        Self { service }
    }
}

/// Malformed or missing JSON bodies are plain validation failures
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|rejection| AuthError::validation(rejection.body_text()))
}

/// Register endpoint - POST /auth/register
pub async fn register(
    State(state): State<AuthState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserResponse>), AuthError> {
    let user = state.service.register(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Login endpoint - POST /auth/login
pub async fn login(
    State(state): State<AuthState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthError> {
    let request = body(payload)?;
    debug!("🔐 Login attempt");
    Ok(Json(state.service.login(request).await?))
}

/// Refresh endpoint - POST /auth/refresh
pub async fn refresh(
    State(state): State<AuthState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<TokenPair>, AuthError> {
    let request = body(payload)?;
    Ok(Json(state.service.refresh_token(&request.refresh_token).await?))
}

/// Logout endpoint - POST /auth/logout (requires auth). Always 200.
pub async fn logout(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let token = payload
        .map(|Json(req)| req.refresh_token)
        .unwrap_or_default();
    state.service.logout(claims.sub, &token).await?;
    Ok(Json(json!({ "success": true })))
}

/// Logout everywhere - POST /auth/logout-all (requires auth)
pub async fn logout_all(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Value>, AuthError> {
    let revoked = state.service.logout_all(claims.sub).await?;
    Ok(Json(json!({ "revoked": revoked })))
}

/// Change password - POST /auth/change-password (requires auth)
pub async fn change_password(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let request = body(payload)?;
    state
        .service
        .change_password(claims.sub, &request.current_password, &request.new_password)
        .await?;
    Ok(Json(json!({ "success": true })))
}

/// Current user - GET /auth/me (requires auth)
pub async fn get_current_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AuthError> {
    Ok(Json(state.service.get_profile(claims.sub).await?))
}

/// Update profile - PUT /auth/me (requires auth)
pub async fn update_current_user(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, AuthError> {
    let request = body(payload)?;
    Ok(Json(state.service.update_profile(claims.sub, request).await?))
}
