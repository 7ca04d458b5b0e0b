//! Revoked token storage.
//!
//! Only identifiers are stored, never token strings. The unique constraint on
//! `token_id` is what serializes concurrent revocations of the same token.

use sqlx::sqlite::SqlitePool;

use super::RevokedToken;

#[derive(Clone)]
pub struct RevokedTokenStore {
    pool: SqlitePool,
}

impl RevokedTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a revocation record. Fails with a unique violation if present.
    pub async fn insert(&self, record: &RevokedToken) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO revoked_tokens (token_id, expires_at, created_at) VALUES (?, ?, ?)")
            .bind(&record.token_id)
            .bind(record.expires_at as i64)
            .bind(record.created_at as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, token_id: &str) -> Result<Option<RevokedToken>, sqlx::Error> {
        let row: Option<(String, i64, i64)> = sqlx::query_as(
            "SELECT token_id, expires_at, created_at FROM revoked_tokens WHERE token_id = ?",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(token_id, expires_at, created_at)| RevokedToken {
            token_id,
            expires_at: expires_at as u64,
            created_at: created_at as u64,
        }))
    }

    pub async fn exists(&self, token_id: &str) -> Result<bool, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM revoked_tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 > 0)
    }

    /// Delete all records that expired before `now`.
    pub async fn delete_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
