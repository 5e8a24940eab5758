//! User Storage
//! Mission: Persist user accounts behind a narrow, swappable interface

use crate::auth::models::{ProfileChanges, User, UserRole};
use crate::error::{StoreError, UniqueField};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// User record store consumed by the auth service.
///
/// Lookups by username and email are case-insensitive.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Insert a new user, failing with `Conflict` on a duplicate username or email
    async fn insert(&self, user: &User) -> Result<(), StoreError>;
    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<User, StoreError>;
}

const SELECT_COLUMNS: &str =
    "id, username, email, password_hash, role, display_name, bio, created_at, updated_at";

/// User storage with SQLite backend
#[derive(Clone)]
pub struct SqliteUserStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUserStore {
    /// Create a new user store and initialize database
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path).context("open user db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL COLLATE NOCASE,
                email TEXT UNIQUE NOT NULL COLLATE NOCASE,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                display_name TEXT,
                bio TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn find_one(&self, column: &str, value: String) -> Result<Option<User>, StoreError> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM users WHERE {column} = ?1"),
                params![value],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.find_one("id", id.to_string()).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.find_one("username", username.to_string()).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_one("email", email.to_string()).await
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (id, username, email, password_hash, role, display_name, bio, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id.to_string(),
                user.username,
                user.email,
                user.password_hash,
                user.role.as_str(),
                user.display_name,
                user.bio,
                user.created_at.to_rfc3339(),
                user.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_write_error)?;

        info!(user_id = %user.id, role = user.role.as_str(), "✅ Created user: {}", user.username);
        Ok(())
    }

    async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute(
            "UPDATE users SET password_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.to_string(), password_hash, Utc::now().to_rfc3339()],
        )?;

        if rows == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<User, StoreError> {
        let conn = self.conn.lock().await;
        let rows = conn
            .execute(
                "UPDATE users SET
                    username = COALESCE(?2, username),
                    email = COALESCE(?3, email),
                    display_name = COALESCE(?4, display_name),
                    bio = COALESCE(?5, bio),
                    updated_at = ?6
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    changes.username,
                    changes.email,
                    changes.display_name,
                    changes.bio,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(map_write_error)?;

        if rows == 0 {
            return Err(StoreError::NotFound);
        }

        let user = conn.query_row(
            &format!("SELECT {SELECT_COLUMNS} FROM users WHERE id = ?1"),
            params![id.to_string()],
            user_from_row,
        )?;
        Ok(user)
    }
}

/// Translate UNIQUE violations into a conflict on the offending column
fn map_write_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, Some(message)) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            if message.contains("users.username") {
                return StoreError::Conflict(UniqueField::Username);
            }
            if message.contains("users.email") {
                return StoreError::Conflict(UniqueField::Email);
            }
        }
    }
    StoreError::from(err)
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let role_str: String = row.get(4)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;

    Ok(User {
        id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        role: UserRole::from_str(&role_str).unwrap_or_default(),
        display_name: row.get(5)?,
        bio: row.get(6)?,
        created_at: parse_time(7, &created_at)?,
        updated_at: parse_time(8, &updated_at)?,
    })
}
