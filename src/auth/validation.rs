//! Input checks for registration, login and profile updates

use crate::error::AuthError;
use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_EMAIL_LENGTH: usize = 254;
const MAX_DISPLAY_NAME_LENGTH: usize = 64;
const MAX_BIO_LENGTH: usize = 1024;

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{3,32}$").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$").unwrap();
}

/// Trimmed username, or a validation error
pub fn username(raw: &str) -> Result<String, AuthError> {
    let username = raw.trim();
    if !USERNAME_RE.is_match(username) {
        return Err(AuthError::validation(
            "Username must be 3-32 characters of letters, digits, '_', '.' or '-'",
        ));
    }
    Ok(username.to_string())
}

/// Trimmed, lowercased email, or a validation error
pub fn email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    if email.len() > MAX_EMAIL_LENGTH || !EMAIL_RE.is_match(&email) {
        return Err(AuthError::validation("Email address is not valid"));
    }
    Ok(email)
}

pub fn password(raw: &str) -> Result<(), AuthError> {
    let len = raw.chars().count();
    if len < MIN_PASSWORD_LENGTH {
        return Err(AuthError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    if len > MAX_PASSWORD_LENGTH {
        return Err(AuthError::validation(format!(
            "Password must be at most {MAX_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

pub fn display_name(raw: &str) -> Result<String, AuthError> {
    let name = raw.trim();
    if name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(AuthError::validation(format!(
            "Display name must be at most {MAX_DISPLAY_NAME_LENGTH} characters"
        )));
    }
    Ok(name.to_string())
}

pub fn bio(raw: &str) -> Result<String, AuthError> {
    if raw.chars().count() > MAX_BIO_LENGTH {
        return Err(AuthError::validation(format!(
            "Bio must be at most {MAX_BIO_LENGTH} characters"
        )));
    }
    Ok(raw.trim().to_string())
}
