//! SQLite backend built on a sqlx connection pool.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::error;

use super::{
    ResetToken, ResetTokenStore, RevokedToken, RevokedTokenStore, SchemaMigration,
    StorageAdapter, StorageError, StorageResult, User, UserStore,
};
use crate::migrations::Migration;

/// How long a caller waits for a pooled connection before getting a storage error.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long SQLite waits on a locked database before failing a statement.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    ///
    /// Only the migration bookkeeping table is created here; run the
    /// [`MigrationManager`](crate::migrations::MigrationManager) to build the schema.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        // Every in-memory connection would otherwise be its own database.
        let max_connections = if in_memory { 1 } else { 5 };

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT);
        if in_memory {
            // Closing the last connection would drop the database.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.pool.clone())
    }

    pub fn revoked_tokens(&self) -> RevokedTokenStore {
        RevokedTokenStore::new(self.pool.clone())
    }

    pub fn reset_tokens(&self) -> ResetTokenStore {
        ResetTokenStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn current_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<u32, sqlx::Error> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.0.unwrap_or(0) as u32)
    }

    /// Begin a transaction and execute a migration script in it, provided the
    /// schema is still at `expected_current`. The caller adds the bookkeeping
    /// statement and commits.
    async fn begin_migration(
        &self,
        expected_current: u32,
        statements: &[&'static str],
    ) -> StorageResult<sqlx::Transaction<'_, sqlx::Sqlite>> {
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        if Self::current_version(&mut tx).await.map_err(storage_error)? != expected_current {
            return Err(StorageError::Conflict);
        }
        for statement in statements {
            sqlx::query(*statement)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
        Ok(tx)
    }
}

/// Translate a sqlx failure into the backend-neutral error, logging the detail.
fn storage_error(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::AlreadyExists,
        _ => {
            error!(error = %e, "SQLite storage failure");
            StorageError::backend(e)
        }
    }
}

fn found(affected: bool) -> StorageResult<()> {
    if affected {
        Ok(())
    } else {
        Err(StorageError::NotFound)
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn create_user(&self, user: &User) -> StorageResult<()> {
        self.users().create(user).await.map_err(storage_error)
    }

    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        self.users().get_by_id(id).await.map_err(storage_error)
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        self.users()
            .get_by_username(username)
            .await
            .map_err(storage_error)
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        self.users().get_by_email(email).await.map_err(storage_error)
    }

    async fn update_user(&self, user: &User) -> StorageResult<()> {
        match self.users().update(user).await.map_err(storage_error) {
            Ok(affected) => found(affected),
            Err(StorageError::AlreadyExists) => Err(StorageError::Conflict),
            Err(e) => Err(e),
        }
    }

    async fn update_password_digest(
        &self,
        user_id: &str,
        digest: &str,
        now: u64,
    ) -> StorageResult<()> {
        let affected = self
            .users()
            .set_password_digest(user_id, digest, now)
            .await
            .map_err(storage_error)?;
        found(affected)
    }

    async fn record_login(&self, user_id: &str, now: u64) -> StorageResult<()> {
        let affected = self
            .users()
            .set_last_login(user_id, now)
            .await
            .map_err(storage_error)?;
        found(affected)
    }

    async fn delete_user(&self, user_id: &str) -> StorageResult<()> {
        let affected = self.users().delete(user_id).await.map_err(storage_error)?;
        found(affected)
    }

    async fn list_users(&self, limit: u32, offset: u32) -> StorageResult<Vec<User>> {
        self.users().list(limit, offset).await.map_err(storage_error)
    }

    async fn blacklist_token(&self, record: &RevokedToken) -> StorageResult<()> {
        self.revoked_tokens()
            .insert(record)
            .await
            .map_err(storage_error)
    }

    async fn is_token_blacklisted(&self, token_id: &str) -> StorageResult<bool> {
        self.revoked_tokens()
            .exists(token_id)
            .await
            .map_err(storage_error)
    }

    async fn cleanup_expired_tokens(&self, now: u64) -> StorageResult<u64> {
        let revoked = self
            .revoked_tokens()
            .delete_expired(now)
            .await
            .map_err(storage_error)?;
        let reset = self
            .reset_tokens()
            .delete_expired(now)
            .await
            .map_err(storage_error)?;
        Ok(revoked + reset)
    }

    async fn create_reset_token(&self, record: &ResetToken) -> StorageResult<()> {
        match self.reset_tokens().store(record).await {
            Ok(()) => Ok(()),
            // Foreign key failure: no such user.
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => {
                Err(StorageError::NotFound)
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn consume_reset_token(&self, token: &str) -> StorageResult<ResetToken> {
        self.reset_tokens()
            .take(token)
            .await
            .map_err(storage_error)?
            .ok_or(StorageError::NotFound)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn get_schema_version(&self) -> StorageResult<u32> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(version) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.0.unwrap_or(0) as u32)
    }

    async fn applied_migrations(&self) -> StorageResult<Vec<SchemaMigration>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT version, description, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|(version, description, applied_at)| SchemaMigration {
                version: version as u32,
                description,
                applied_at: applied_at as u64,
            })
            .collect())
    }

    async fn apply_migration(&self, migration: &Migration, now: u64) -> StorageResult<()> {
        let Some(expected_current) = migration.version.checked_sub(1) else {
            return Err(StorageError::Conflict);
        };
        let mut tx = self.begin_migration(expected_current, migration.up).await?;
        sqlx::query(
            "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)",
        )
        .bind(migration.version as i64)
        .bind(migration.description)
        .bind(now as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)
    }

    async fn rollback_migration(&self, migration: &Migration) -> StorageResult<()> {
        if migration.version == 0 {
            return Err(StorageError::Conflict);
        }
        let mut tx = self
            .begin_migration(migration.version, migration.down)
            .await?;
        sqlx::query("DELETE FROM schema_migrations WHERE version = ?")
            .bind(migration.version as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)
    }
}
