//! Auth Service
//! Mission: Register, log in, refresh, log out and manage credentials
//!
//! Composes the user store with the token service. Storage detail never leaves this
//! module; callers only see `AuthError`.

use crate::auth::deadline::Deadline;
use crate::auth::models::{
    LoginRequest, LoginResponse, ProfileChanges, RegisterRequest, TokenPair,
    UpdateProfileRequest, User, UserResponse, UserRole,
};
use crate::auth::password::PasswordHasher;
use crate::auth::tokens::TokenService;
use crate::auth::user_store::UserStore;
use crate::auth::validation;
use crate::error::AuthError;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: TokenService,
    hasher: PasswordHasher,
    deadline: Deadline,
    // Hash checked against when the login identity does not exist.
    dummy_hash: OnceCell<String>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: TokenService,
        hasher: PasswordHasher,
        deadline: Deadline,
    ) -> Self {
        Self {
            users,
            tokens,
            hasher,
            deadline,
            dummy_hash: OnceCell::new(),
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create an account. The returned value never carries the password hash.
    pub async fn register(&self, req: RegisterRequest) -> Result<UserResponse, AuthError> {
        let username = validation::username(&req.username)?;
        let email = validation::email(&req.email)?;
        validation::password(&req.password)?;
        let role = match req.role.as_deref() {
            Some(raw) => raw.parse::<UserRole>()?,
            None => UserRole::default(),
        };

        if self.find_by_username(&username).await?.is_some() {
            return Err(AuthError::UsernameTaken);
        }
        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hash(req.password).await?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            password_hash,
            role,
            display_name: None,
            bio: None,
            created_at: now,
            updated_at: now,
        };

        let users = self.users.clone();
        let record = user.clone();
        self.deadline
            .detached("users.insert", async move {
                users.insert(&record).await.map_err(AuthError::from)
            })
            .await?;

        info!(user_id = %user.id, role = user.role.as_str(), "🆕 Registered user {}", user.username);
        Ok(UserResponse::from_user(&user))
    }

    /// Verify credentials and open a new session.
    ///
    /// Unknown identities and wrong passwords produce the same error.
    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AuthError> {
        let identifier = req.identifier().map(str::to_string);
        let user = match identifier.as_deref() {
            Some(id) if id.contains('@') => self.find_by_email(&id.to_lowercase()).await?,
            Some(id) => self.find_by_username(id).await?,
            None => None,
        };

        let Some(user) = user else {
            let dummy = self.dummy_hash().await;
            let _ = self.verify(req.password, dummy).await;
            warn!(identifier = identifier.as_deref().unwrap_or(""), "❌ Failed login: unknown identity");
            return Err(AuthError::InvalidCredentials);
        };

        if !self.verify(req.password, user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "❌ Failed login: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.tokens.issue_token_pair(user.id, user.role).await?;
        info!(user_id = %user.id, role = user.role.as_str(), "✅ Login successful: {}", user.username);

        Ok(LoginResponse {
            tokens,
            user: UserResponse::from_user(&user),
        })
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::RefreshTokenInvalid);
        }
        self.tokens.refresh_access_token(refresh_token.trim()).await
    }

    /// Revoke the presented refresh token. Always succeeds for the caller.
    pub async fn logout(&self, user_id: Uuid, refresh_token: &str) -> Result<(), AuthError> {
        let token = refresh_token.trim();
        if token.is_empty() {
            return Ok(());
        }

        match self.tokens.revoke_refresh_token(user_id, token).await {
            Ok(true) => info!(user_id = %user_id, "👋 Logged out"),
            Ok(false) => {
                warn!(user_id = %user_id, "Logout presented an unknown or foreign refresh token")
            }
            Err(err) => {
                warn!(user_id = %user_id, error = ?err, "Failed to revoke refresh token on logout")
            }
        }
        Ok(())
    }

    /// Revoke every session of the user
    pub async fn logout_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let revoked = self.tokens.revoke_all_user_tokens(user_id).await?;
        info!(user_id = %user_id, revoked, "👋 Logged out everywhere");
        Ok(revoked)
    }

    /// Replace the password and end every existing session
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        let user = self
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !self
            .verify(current_password.to_string(), user.password_hash.clone())
            .await?
        {
            warn!(user_id = %user_id, "Password change rejected: wrong current password");
            return Err(AuthError::InvalidCurrentPassword);
        }
        validation::password(new_password)?;

        let new_hash = self.hash(new_password.to_string()).await?;

        // Persist and revoke together so a dropped request cannot skip the revocation.
        let users = self.users.clone();
        let tokens = self.tokens.clone();
        let revoked = self
            .deadline
            .detached("users.change_password", async move {
                users
                    .update_password_hash(user_id, &new_hash)
                    .await
                    .map_err(AuthError::from)?;
                tokens.revoke_all_user_tokens(user_id).await
            })
            .await?;

        info!(user_id = %user_id, revoked, "🔑 Password changed, all sessions revoked");
        Ok(())
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserResponse, AuthError> {
        let user = self
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok(UserResponse::from_user(&user))
    }

    /// Update non-sensitive fields; username/email stay unique across other users
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        req: UpdateProfileRequest,
    ) -> Result<UserResponse, AuthError> {
        let changes = ProfileChanges {
            username: req.username.as_deref().map(validation::username).transpose()?,
            email: req.email.as_deref().map(validation::email).transpose()?,
            display_name: req
                .display_name
                .as_deref()
                .map(validation::display_name)
                .transpose()?,
            bio: req.bio.as_deref().map(validation::bio).transpose()?,
        };

        if let Some(username) = &changes.username {
            if let Some(existing) = self.find_by_username(username).await? {
                if existing.id != user_id {
                    return Err(AuthError::UsernameTaken);
                }
            }
        }
        if let Some(email) = &changes.email {
            if let Some(existing) = self.find_by_email(email).await? {
                if existing.id != user_id {
                    return Err(AuthError::EmailTaken);
                }
            }
        }

        let users = self.users.clone();
        let user = self
            .deadline
            .detached("users.update_profile", async move {
                users
                    .update_profile(user_id, &changes)
                    .await
                    .map_err(AuthError::from)
            })
            .await?;

        info!(user_id = %user_id, "Profile updated");
        Ok(UserResponse::from_user(&user))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        self.deadline
            .bounded("users.find_by_id", async {
                self.users.find_by_id(id).await.map_err(AuthError::from)
            })
            .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, AuthError> {
        self.deadline
            .bounded("users.find_by_username", async {
                self.users
                    .find_by_username(username)
                    .await
                    .map_err(AuthError::from)
            })
            .await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        self.deadline
            .bounded("users.find_by_email", async {
                self.users.find_by_email(email).await.map_err(AuthError::from)
            })
            .await
    }

    async fn hash(&self, plaintext: String) -> Result<String, AuthError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.hash_password(&plaintext))
            .await
            .map_err(AuthError::internal)?
            .map_err(AuthError::internal)
    }

    async fn verify(&self, plaintext: String, hash: String) -> Result<bool, AuthError> {
        let hasher = self.hasher;
        tokio::task::spawn_blocking(move || hasher.check_password(&plaintext, &hash))
            .await
            .map_err(AuthError::internal)
    }

    async fn dummy_hash(&self) -> String {
        self.dummy_hash
            .get_or_init(|| async {
                self.hash("not-a-real-password".to_string())
                    .await
                    .unwrap_or_default()
            })
            .await
            .clone()
    }
}
