//! Authentication Module
//! Mission: Password hashing, access/refresh tokens, sessions and account management

pub mod api;
pub mod deadline;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod refresh_store;
pub mod service;
pub mod tokens;
pub mod user_store;
pub mod validation;

pub use api::AuthState;
pub use deadline::Deadline;
pub use jwt::JwtHandler;
pub use middleware::{auth_middleware, bearer_guard};
pub use password::PasswordHasher;
pub use refresh_store::RefreshTokenStore;
pub use service::AuthService;
pub use tokens::TokenService;
pub use user_store::{SqliteUserStore, UserStore};
