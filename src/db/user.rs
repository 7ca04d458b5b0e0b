//! User storage.

use sqlx::sqlite::SqlitePool;

use super::{Metadata, User};

const SELECT_BY_ID: &str = "SELECT id, username, email, password_digest, created_at, updated_at, last_login_at, is_active, metadata FROM users WHERE id = ?";
const SELECT_BY_USERNAME: &str = "SELECT id, username, email, password_digest, created_at, updated_at, last_login_at, is_active, metadata FROM users WHERE username = ?";
const SELECT_BY_EMAIL: &str = "SELECT id, username, email, password_digest, created_at, updated_at, last_login_at, is_active, metadata FROM users WHERE email = ?";

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    password_digest: String,
    created_at: i64,
    updated_at: i64,
    last_login_at: Option<i64>,
    is_active: i32,
    metadata: String,
}

impl TryFrom<UserRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let metadata: Metadata =
            serde_json::from_str(&row.metadata).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            id: row.id,
            username: row.username,
            email: row.email,
            password_digest: row.password_digest,
            created_at: row.created_at as u64,
            updated_at: row.updated_at as u64,
            last_login_at: row.last_login_at.map(|t| t as u64),
            is_active: row.is_active != 0,
            metadata,
        })
    }
}

fn encode_metadata(metadata: &Metadata) -> Result<String, sqlx::Error> {
    serde_json::to_string(metadata).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

impl UserStore {
    /// Create a new store over `pool`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user row.
    pub async fn create(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_digest, created_at, updated_at, last_login_at, is_active, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_digest)
        .bind(user.created_at as i64)
        .bind(user.updated_at as i64)
        .bind(user.last_login_at.map(|t| t as i64))
        .bind(user.is_active as i32)
        .bind(encode_metadata(&user.metadata)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by(&self, sql: &'static str, value: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    /// Get a user by id.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        self.get_by(SELECT_BY_ID, id).await
    }

    /// Get a user by username.
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        self.get_by(SELECT_BY_USERNAME, username).await
    }

    /// Get a user by email.
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        self.get_by(SELECT_BY_EMAIL, email).await
    }

    /// Overwrite the profile fields (username, email, active flag, metadata).
    /// Returns false if no such user.
    pub async fn update(&self, user: &User) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET username = ?, email = ?, updated_at = ?, is_active = ?, metadata = ?
             WHERE id = ?",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.updated_at as i64)
        .bind(user.is_active as i32)
        .bind(encode_metadata(&user.metadata)?)
        .bind(&user.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the password digest. Returns false if no row matched.
    pub async fn set_password_digest(
        &self,
        id: &str,
        digest: &str,
        now: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_digest = ?, updated_at = ? WHERE id = ?")
            .bind(digest)
            .bind(now as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a login time. Returns false if no row matched.
    pub async fn set_last_login(&self, id: &str, now: u64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(now as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a user by ID.
    pub async fn delete(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List users ordered by creation time.
    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<User>, sqlx::Error> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, username, email, password_digest, created_at, updated_at, last_login_at, is_active, metadata
             FROM users ORDER BY created_at, id LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }
}
