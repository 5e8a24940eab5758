//! Token Service
//! Mission: Issue, rotate and revoke access/refresh token pairs
//!
//! A session is Active while its refresh token is unrevoked and unexpired. Refreshing
//! revokes the presented token and hands out a successor; logout revokes it; expiry
//! needs no transition. Revoked and expired tokens are terminal.

use crate::auth::deadline::Deadline;
use crate::auth::jwt::JwtHandler;
use crate::auth::models::{IssuedRefreshToken, TokenPair, UserRole};
use crate::auth::refresh_store::RefreshTokenStore;
use crate::error::{AuthError, StoreError};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct TokenService {
    jwt: Arc<JwtHandler>,
    store: RefreshTokenStore,
    deadline: Deadline,
}

impl TokenService {
    pub fn new(jwt: Arc<JwtHandler>, store: RefreshTokenStore, deadline: Deadline) -> Self {
        Self {
            jwt,
            store,
            deadline,
        }
    }

    pub fn jwt(&self) -> &Arc<JwtHandler> {
        &self.jwt
    }

    /// New session at login: one refresh token, one access token
    pub async fn issue_token_pair(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<TokenPair, AuthError> {
        let store = self.store.clone();
        let refresh = self
            .deadline
            .detached("refresh_token.create", async move {
                store
                    .create(user_id, role)
                    .await
                    .map_err(|e| AuthError::internal(anyhow::Error::from(e)))
            })
            .await?;

        self.pair(user_id, role, refresh)
    }

    /// Exchange a refresh token for a fresh pair, revoking the one presented
    pub async fn refresh_access_token(&self, presented: &str) -> Result<TokenPair, AuthError> {
        let store = self.store.clone();
        let token = presented.to_string();
        let rotated = self
            .deadline
            .detached("refresh_token.rotate", async move {
                match store.rotate(&token).await {
                    Ok(rotated) => Ok(Some(rotated)),
                    Err(StoreError::NotFound) => Ok(None),
                    Err(e) => Err(AuthError::internal(anyhow::Error::from(e))),
                }
            })
            .await?;

        let Some((old, next)) = rotated else {
            self.flag_reuse(presented).await;
            return Err(AuthError::RefreshTokenInvalid);
        };

        debug!(user_id = %old.user_id, "Refresh token rotated");
        self.pair(old.user_id, old.role, next)
    }

    /// Revoke one of `user_id`'s refresh tokens. Idempotent; `false` when the token is
    /// unknown or belongs to someone else.
    pub async fn revoke_refresh_token(&self, user_id: Uuid, token: &str) -> Result<bool, AuthError> {
        let store = self.store.clone();
        let token = token.to_string();
        self.deadline
            .detached("refresh_token.revoke", async move {
                store
                    .revoke_owned(&token, user_id)
                    .await
                    .map_err(|e| AuthError::internal(anyhow::Error::from(e)))
            })
            .await
    }

    /// Revoke every refresh token of a user, returning how many were active
    pub async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let store = self.store.clone();
        self.deadline
            .detached("refresh_token.revoke_all", async move {
                store
                    .revoke_all_for_user(user_id)
                    .await
                    .map_err(|e| AuthError::internal(anyhow::Error::from(e)))
            })
            .await
    }

    fn pair(
        &self,
        user_id: Uuid,
        role: UserRole,
        refresh: IssuedRefreshToken,
    ) -> Result<TokenPair, AuthError> {
        let (access_token, access_expires_at) = self.jwt.issue_access_token(user_id, role)?;
        Ok(TokenPair {
            access_token,
            refresh_token: refresh.token,
            token_type: "Bearer",
            expires_in: self.jwt.access_ttl().num_seconds(),
            access_expires_at,
            refresh_expires_at: refresh.expires_at,
        })
    }

    /// Log presentation of an already-rotated token. Never changes the outcome.
    async fn flag_reuse(&self, presented: &str) {
        let lookup = self
            .deadline
            .bounded("refresh_token.lookup", async {
                self.store
                    .lookup(presented)
                    .await
                    .map_err(|e| AuthError::internal(anyhow::Error::from(e)))
            })
            .await;

        match lookup {
            Ok(Some(record)) if record.revoked && record.replaced_by.is_some() => {
                warn!(
                    user_id = %record.user_id,
                    token_id = %record.id,
                    revoked_at = ?record.revoked_at,
                    "🚨 Rotated refresh token presented again, possible token theft"
                );
            }
            Ok(Some(record)) => {
                debug!(user_id = %record.user_id, "Refresh rejected: token revoked or expired");
            }
            Ok(None) => debug!("Refresh rejected: unknown token"),
            Err(_) => {}
        }
    }
}
