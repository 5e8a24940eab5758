//! JWT Token Handler
//! Mission: Issue and verify short-lived signed access tokens

use crate::auth::models::{Claims, UserRole};
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use tracing::debug;
use uuid::Uuid;

/// Default access token lifetime
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;

/// JWT Handler for token operations
pub struct JwtHandler {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    leeway: Duration,
}

impl JwtHandler {
    /// Create a new JWT handler with secret key and default lifetime
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(
            secret,
            Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            Duration::zero(),
        )
    }

    pub fn with_ttl(secret: &str, access_ttl: Duration, leeway: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against our own clock in `verify_access_token_at`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl,
            leeway,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Generate an access token for a user
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        self.issue_access_token_at(user_id, role, Utc::now())
    }

    pub(crate) fn issue_access_token_at(
        &self,
        user_id: Uuid,
        role: UserRole,
        issued_at: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let expires_at = issued_at + self.access_ttl;
        let claims = Claims {
            sub: user_id,
            role,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::internal)?;

        debug!(user_id = %user_id, role = role.as_str(), "Issued access token");

        Ok((token, expires_at))
    }

    /// Validate an access token and extract claims
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_access_token_at(token, Utc::now())
    }

    pub(crate) fn verify_access_token_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthError> {
        let decoded = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| classify(e.kind()))?;
        let claims = decoded.claims;

        if now.timestamp() >= claims.exp + self.leeway.num_seconds() {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }
}

fn classify(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthError::TokenMalformed,
        _ => AuthError::TokenInvalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-key-12345-test-secret-key";

    fn handler() -> JwtHandler {
        JwtHandler::new(SECRET)
    }

    #[test]
    fn test_jwt_generation_and_validation() {
        let handler = handler();
        let user_id = Uuid::new_v4();

        let (token, expires_at) = handler
            .issue_access_token(user_id, UserRole::Author)
            .unwrap();
        assert!(!token.is_empty());
        assert!(expires_at > Utc::now());

        let claims = handler.verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.role, UserRole::Author);
        assert_eq!(claims.exp - claims.iat, DEFAULT_ACCESS_TTL_SECS);
    }

    #[test]
    fn test_expiry_boundaries() {
        let handler = handler();
        let issued_at = Utc::now();
        let ttl = handler.access_ttl();
        let (token, _) = handler
            .issue_access_token_at(Uuid::new_v4(), UserRole::Admin, issued_at)
            .unwrap();

        let just_before = issued_at + ttl - Duration::seconds(1);
        assert!(handler.verify_access_token_at(&token, just_before).is_ok());

        let just_after = issued_at + ttl + Duration::seconds(1);
        assert!(matches!(
            handler.verify_access_token_at(&token, just_after),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn test_leeway_extends_acceptance() {
        let handler = JwtHandler::with_ttl(SECRET, Duration::seconds(60), Duration::seconds(5));
        let issued_at = Utc::now();
        let (token, _) = handler
            .issue_access_token_at(Uuid::new_v4(), UserRole::Author, issued_at)
            .unwrap();

        assert!(handler
            .verify_access_token_at(&token, issued_at + Duration::seconds(63))
            .is_ok());
        assert!(handler
            .verify_access_token_at(&token, issued_at + Duration::seconds(66))
            .is_err());
    }

    #[test]
    fn test_different_secrets_reject() {
        let handler1 = JwtHandler::new("secret1");
        let handler2 = JwtHandler::new("secret2");

        let (token, _) = handler1
            .issue_access_token(Uuid::new_v4(), UserRole::Author)
            .unwrap();

        assert!(matches!(
            handler2.verify_access_token(&token),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let handler = handler();
        assert!(matches!(
            handler.verify_access_token("not-a-jwt"),
            Err(AuthError::TokenMalformed)
        ));
        assert!(matches!(
            handler.verify_access_token("invalid.token.here"),
            Err(AuthError::TokenMalformed)
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let handler = handler();
        let (token, _) = handler
            .issue_access_token(Uuid::new_v4(), UserRole::Author)
            .unwrap();
        let (other, _) = handler
            .issue_access_token(Uuid::new_v4(), UserRole::Admin)
            .unwrap();

        // Splice the admin payload onto the author signature.
        let mut parts: Vec<&str> = token.split('.').collect();
        let other_parts: Vec<&str> = other.split('.').collect();
        parts[1] = other_parts[1];
        let forged = parts.join(".");

        assert!(matches!(
            handler.verify_access_token(&forged),
            Err(AuthError::TokenInvalid)
        ));
    }
}
