//! Error Types
//! Mission: One stable status/code pair per failure, no internals at the HTTP boundary

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the auth subsystem to its callers.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Username is already taken")]
    UsernameTaken,

    #[error("Email is already registered")]
    EmailTaken,

    /// Unknown identity and wrong password both land here.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Current password is incorrect")]
    InvalidCurrentPassword,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Access token has expired")]
    TokenExpired,

    #[error("Access token is invalid")]
    TokenInvalid,

    #[error("Access token is malformed")]
    TokenMalformed,

    #[error("Refresh token is invalid")]
    RefreshTokenInvalid,

    #[error("User not found")]
    UserNotFound,

    #[error("Rate limit exceeded")]
    RateLimitExceeded { remaining: u32, reset_after: Duration },

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AuthError::Validation(msg.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        AuthError::Internal(err.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::UsernameTaken | AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::InvalidCredentials
            | AuthError::InvalidCurrentPassword
            | AuthError::MissingToken
            | AuthError::TokenExpired
            | AuthError::TokenInvalid
            | AuthError::TokenMalformed
            | AuthError::RefreshTokenInvalid => StatusCode::UNAUTHORIZED,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code returned in the error body.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "ERR_VALIDATION",
            AuthError::UsernameTaken => "ERR_USERNAME_TAKEN",
            AuthError::EmailTaken => "ERR_EMAIL_TAKEN",
            AuthError::InvalidCredentials => "ERR_AUTH_INVALID_CREDENTIALS",
            AuthError::InvalidCurrentPassword => "ERR_AUTH_INVALID_CURRENT_PASSWORD",
            AuthError::MissingToken => "ERR_AUTH_MISSING_TOKEN",
            AuthError::TokenExpired => "ERR_AUTH_TOKEN_EXPIRED",
            // Clients only distinguish "expired" from "unusable".
            AuthError::TokenInvalid | AuthError::TokenMalformed => "ERR_AUTH_TOKEN_INVALID",
            AuthError::RefreshTokenInvalid => "ERR_AUTH_REFRESH_TOKEN_INVALID",
            AuthError::UserNotFound => "ERR_USER_NOT_FOUND",
            AuthError::RateLimitExceeded { .. } => "ERR_RATE_LIMIT_EXCEEDED",
            AuthError::Internal(_) => "ERR_INTERNAL",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(err) = &self {
            error!(error = ?err, "Internal error while handling auth request");
        }

        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        let mut response = (status, body).into_response();

        if let AuthError::RateLimitExceeded {
            remaining,
            reset_after,
        } = self
        {
            insert_rate_limit_headers(response.headers_mut(), remaining, reset_after);
        }

        response
    }
}

/// `X-Rate-Limit-Remaining` and `X-Rate-Limit-Reset` (whole seconds, rounded up)
pub(crate) fn insert_rate_limit_headers(headers: &mut HeaderMap, remaining: u32, reset_after: Duration) {
    let reset_secs = reset_after.as_secs_f64().ceil() as u64;
    headers.insert("X-Rate-Limit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-Rate-Limit-Reset", HeaderValue::from(reset_secs));
}

/// Field that violated a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl std::fmt::Display for UniqueField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UniqueField::Username => write!(f, "username"),
            UniqueField::Email => write!(f, "email"),
        }
    }
}

/// Storage-layer failures. Never returned to HTTP callers directly.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("{0} already exists")]
    Conflict(UniqueField),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.into())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::UserNotFound,
            StoreError::Conflict(UniqueField::Username) => AuthError::UsernameTaken,
            StoreError::Conflict(UniqueField::Email) => AuthError::EmailTaken,
            StoreError::Backend(err) => AuthError::Internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuthError::validation("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AuthError::EmailTaken.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AuthError::RefreshTokenInvalid.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::internal(anyhow::anyhow!("disk on fire")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_malformed_and_invalid_share_a_code() {
        assert_eq!(AuthError::TokenMalformed.code(), AuthError::TokenInvalid.code());
        assert_eq!(AuthError::TokenExpired.code(), "ERR_AUTH_TOKEN_EXPIRED");
    }

    #[test]
    fn test_store_error_translation() {
        assert!(matches!(
            AuthError::from(StoreError::Conflict(UniqueField::Username)),
            AuthError::UsernameTaken
        ));
        assert!(matches!(
            AuthError::from(StoreError::NotFound),
            AuthError::UserNotFound
        ));
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = AuthError::internal(anyhow::anyhow!("table users is locked")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("ERR_INTERNAL"));
        assert!(!text.contains("locked"));
    }

    #[test]
    fn test_rate_limit_headers() {
        let response = AuthError::RateLimitExceeded {
            remaining: 0,
            reset_after: Duration::from_secs(12),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["X-Rate-Limit-Remaining"], "0");
        assert_eq!(response.headers()["X-Rate-Limit-Reset"], "12");
    }
}
