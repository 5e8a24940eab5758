//! Password Hashing
//! Mission: Slow, salted, adaptive hashing for stored credentials

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

/// Work factor used in production. Configuration refuses anything lower.
pub const DEFAULT_COST: u32 = 12;

/// Work factor bounds accepted by bcrypt
pub const MIN_COST: u32 = 4;
pub const MAX_COST: u32 = 31;

/// bcrypt wrapper with a fixed work factor.
///
/// bcrypt only reads the first 72 bytes of its input, so passwords are run through
/// SHA-256 and base64-encoded (44 bytes) first. Every byte of the password counts.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self {
            cost: cost.clamp(MIN_COST, MAX_COST),
        }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// Hash a plaintext password. Only fails if the system RNG does.
    pub fn hash_password(&self, plaintext: &str) -> Result<String> {
        bcrypt::hash(prehash(plaintext), self.cost).context("Failed to hash password")
    }

    /// Check a plaintext password against a stored hash.
    ///
    /// Malformed hashes count as a mismatch.
    pub fn check_password(&self, plaintext: &str, hash: &str) -> bool {
        bcrypt::verify(prehash(plaintext), hash).unwrap_or(false)
    }
}

fn prehash(plaintext: &str) -> String {
    STANDARD.encode(Sha256::digest(plaintext.as_bytes()))
}
