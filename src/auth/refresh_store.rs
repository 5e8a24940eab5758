//! Refresh Token Storage
//! Mission: Persist opaque refresh tokens with expiry, revocation and rotation links
//!
//! Only a SHA-256 digest of each token is stored. Rotation is a compare-and-swap on
//! the `revoked` column inside a single transaction, so two callers presenting the
//! same token can never both win.

use crate::auth::models::{IssuedRefreshToken, RefreshTokenRecord, UserRole};
use crate::error::StoreError;
use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{rngs::OsRng, RngCore};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

/// Default refresh token lifetime (7 days)
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Random bytes per token (256 bits)
const TOKEN_BYTES: usize = 32;

const SELECT_COLUMNS: &str =
    "id, user_id, role, created_at, expires_at, revoked, revoked_at, replaced_by";

/// Refresh token storage with SQLite backend
#[derive(Clone)]
pub struct RefreshTokenStore {
    conn: Arc<Mutex<Connection>>,
    ttl: Duration,
}

impl RefreshTokenStore {
    /// Open (or create) the store at `db_path`
    pub fn new(db_path: &str, ttl: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open refresh token db")?;
        Self::with_connection(conn, ttl)
    }

    pub fn with_connection(conn: Connection, ttl: Duration) -> anyhow::Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS refresh_tokens (
                id TEXT PRIMARY KEY,
                token_hash TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                revoked INTEGER NOT NULL DEFAULT 0,
                revoked_at INTEGER,
                replaced_by TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_user ON refresh_tokens(user_id, revoked)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_refresh_tokens_expires ON refresh_tokens(expires_at)",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint and persist a new unrevoked token for `user_id`
    pub async fn create(
        &self,
        user_id: Uuid,
        role: UserRole,
    ) -> Result<IssuedRefreshToken, StoreError> {
        let conn = self.conn.lock().await;
        let issued = insert_token(&conn, user_id, role, Utc::now() + self.ttl)?;

        debug!(user_id = %user_id, token_id = %issued.id, "Created refresh token");
        Ok(issued)
    }

    /// Return the record if the token exists, is unrevoked and unexpired
    pub async fn find_valid(&self, token: &str) -> Result<RefreshTokenRecord, StoreError> {
        let record = self.lookup(token).await?.ok_or(StoreError::NotFound)?;
        if record.is_active_at(Utc::now()) {
            Ok(record)
        } else {
            Err(StoreError::NotFound)
        }
    }

    /// Raw lookup regardless of state
    pub async fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let conn = self.conn.lock().await;
        let record = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token_hash = ?1"),
                params![digest(token)],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Consume `token` and mint its successor atomically.
    ///
    /// Returns the consumed record and the new token. Fails with `NotFound` when the
    /// presented token is unknown, expired or already revoked.
    pub async fn rotate(
        &self,
        token: &str,
    ) -> Result<(RefreshTokenRecord, IssuedRefreshToken), StoreError> {
        let mut conn = self.conn.lock().await;
        let now = Utc::now();
        let hash = digest(token);

        let tx = conn.transaction()?;
        let claimed = tx.execute(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?2
             WHERE token_hash = ?1 AND revoked = 0 AND expires_at > ?2",
            params![hash, now.timestamp()],
        )?;
        if claimed == 0 {
            return Err(StoreError::NotFound);
        }

        let mut old = tx.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token_hash = ?1"),
            params![hash],
            record_from_row,
        )?;
        let next = insert_token(&tx, old.user_id, old.role, now + self.ttl)?;
        tx.execute(
            "UPDATE refresh_tokens SET replaced_by = ?2 WHERE id = ?1",
            params![old.id.to_string(), next.id.to_string()],
        )?;
        tx.commit()?;

        old.replaced_by = Some(next.id);
        debug!(
            user_id = %old.user_id,
            old_token_id = %old.id,
            new_token_id = %next.id,
            "Rotated refresh token"
        );
        Ok((old, next))
    }

    /// Mark a token revoked. Unknown or already revoked tokens are fine.
    pub async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = COALESCE(revoked_at, ?2)
             WHERE token_hash = ?1",
            params![digest(token), Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Revoke `token` only if `user_id` owns it. Returns whether a row matched.
    pub async fn revoke_owned(&self, token: &str, user_id: Uuid) -> Result<bool, StoreError> {
        let conn = self.conn.lock().await;
        let matched = conn.execute(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = COALESCE(revoked_at, ?3)
             WHERE token_hash = ?1 AND user_id = ?2",
            params![digest(token), user_id.to_string(), Utc::now().timestamp()],
        )?;
        Ok(matched > 0)
    }

    /// Revoke every token owned by `user_id`, returning how many were still active
    pub async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let revoked = conn.execute(
            "UPDATE refresh_tokens SET revoked = 1, revoked_at = ?2
             WHERE user_id = ?1 AND revoked = 0",
            params![user_id.to_string(), Utc::now().timestamp()],
        )?;

        info!(user_id = %user_id, revoked, "Revoked all refresh tokens for user");
        Ok(revoked)
    }

    /// Delete rows that expired more than `grace` ago
    pub async fn purge_expired(&self, grace: Duration) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let cutoff = (Utc::now() - grace).timestamp();
        let purged = conn.execute(
            "DELETE FROM refresh_tokens WHERE expires_at <= ?1",
            params![cutoff],
        )?;
        Ok(purged)
    }
}

fn insert_token(
    conn: &Connection,
    user_id: Uuid,
    role: UserRole,
    expires_at: DateTime<Utc>,
) -> Result<IssuedRefreshToken, StoreError> {
    let id = Uuid::new_v4();
    let token = generate_token();

    conn.execute(
        "INSERT INTO refresh_tokens (id, token_hash, user_id, role, created_at, expires_at, revoked)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        params![
            id.to_string(),
            digest(&token),
            user_id.to_string(),
            role.as_str(),
            Utc::now().timestamp(),
            expires_at.timestamp(),
        ],
    )?;

    Ok(IssuedRefreshToken {
        id,
        token,
        expires_at,
    })
}

fn generate_token() -> String {
    let mut buffer = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buffer);
    URL_SAFE_NO_PAD.encode(buffer)
}

fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn timestamp(secs: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| rusqlite::Error::IntegralValueOutOfRange(0, secs))
}

fn parse_uuid(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RefreshTokenRecord> {
    let role_str: String = row.get(2)?;
    let revoked_at: Option<i64> = row.get(6)?;
    let replaced_by: Option<String> = row.get(7)?;

    Ok(RefreshTokenRecord {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        user_id: parse_uuid(1, &row.get::<_, String>(1)?)?,
        role: UserRole::from_str(&role_str).unwrap_or_default(),
        created_at: timestamp(row.get(3)?)?,
        expires_at: timestamp(row.get(4)?)?,
        revoked: row.get::<_, i64>(5)? != 0,
        revoked_at: revoked_at.map(timestamp).transpose()?,
        replaced_by: replaced_by.map(|s| parse_uuid(7, &s)).transpose()?,
    })
}
