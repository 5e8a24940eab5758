//! Authentication Middleware
//! Mission: Protect API endpoints with bearer-token validation

use crate::auth::{jwt::JwtHandler, models::Claims};
use crate::error::AuthError;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Pull `Bearer <token>` out of the Authorization header and verify it.
///
/// A missing header or one without the Bearer scheme is `MissingToken`; everything
/// else is whatever the codec decided.
pub fn bearer_guard(jwt: &JwtHandler, headers: &HeaderMap) -> Result<Claims, AuthError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| {
            let (scheme, token) = s.trim().split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then_some(token.trim())
        })
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    jwt.verify_access_token(token)
}

/// Auth middleware that validates access tokens and stores the claims on the request
pub async fn auth_middleware(
    State(jwt_handler): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let claims = bearer_guard(&jwt_handler, req.headers())?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
