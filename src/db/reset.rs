use sqlx::sqlite::SqlitePool;

use super::ResetToken;

/// Store for password reset tokens.
///
/// `user_id` is unique in the table, so storing a new token for a user
/// replaces the previous one in the same statement.
#[derive(Clone)]
pub struct ResetTokenStore {
    pool: SqlitePool,
}

impl ResetTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn store(&self, record: &ResetToken) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR REPLACE INTO reset_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(&record.token)
            .bind(&record.user_id)
            .bind(record.expires_at as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete and return a token in one statement.
    pub async fn take(&self, token: &str) -> Result<Option<ResetToken>, sqlx::Error> {
        let row: Option<(String, String, i64)> = sqlx::query_as(
            "DELETE FROM reset_tokens WHERE token = ? RETURNING token, user_id, expires_at",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(token, user_id, expires_at)| ResetToken {
            token,
            user_id,
            expires_at: expires_at as u64,
        }))
    }

    pub async fn delete_expired(&self, now: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM reset_tokens WHERE expires_at < ?")
            .bind(now as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
