//! Blog Auth Library
//!
//! Accounts, password hashing, access/refresh token sessions and request throttling
//! for the blog backend. Exposed as a library for the binary and integration tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;

pub use api::create_router;
pub use config::{Cli, Config};
pub use error::{AuthError, StoreError};
