//! Durable state: the storage capability trait, its records, and backends.
//!
//! `StorageAdapter` is the only thing allowed to mutate persisted records.
//! Every mutation on a logical entity is indivisible from the caller's point
//! of view. `blacklist_token` doubles as the compare-and-set primitive used by
//! refresh rotation: it fails with [`StorageError::AlreadyExists`] when the
//! identifier is already recorded.

mod memory;
mod reset;
mod sqlite;
mod token;
mod user;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::migrations::Migration;

pub use memory::MemoryStorage;
pub use reset::ResetTokenStore;
pub use sqlite::SqliteStorage;
pub use token::RevokedTokenStore;
pub use user::UserStore;

/// Open key-value map carried on users and in custom claims.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Opaque identifier (UUID v4)
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_login_at: Option<u64>,
    pub is_active: bool,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A token identifier that must no longer be accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedToken {
    pub token_id: String,
    /// The revoked token's own expiry; past it the record is dead weight.
    pub expires_at: u64,
    pub created_at: u64,
}

impl RevokedToken {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at < now
    }
}

/// Single-use password reset secret. At most one is live per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetToken {
    pub token: String,
    pub user_id: String,
    pub expires_at: u64,
}

/// Bookkeeping row for an applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaMigration {
    pub version: u32,
    pub description: String,
    pub applied_at: u64,
}

/// Errors every backend reports. Backend-specific detail stays inside `Backend`.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Record not found")]
    NotFound,
    #[error("Record already exists")]
    AlreadyExists,
    #[error("Conflicting record")]
    Conflict,
    #[error("Storage backend failure")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StorageError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StorageError::Backend(Box::new(err))
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Capability interface for durable users, revocations, reset tokens and schema.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Insert a new user. `AlreadyExists` if the id, username or email is taken.
    async fn create_user(&self, user: &User) -> StorageResult<()>;

    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    /// Replace a user's profile fields: username, email, `is_active`,
    /// `metadata` and `updated_at`. The password digest, `created_at` and
    /// `last_login_at` are left as stored. `NotFound` if absent, `Conflict` if
    /// the new username or email belongs to someone else.
    async fn update_user(&self, user: &User) -> StorageResult<()>;

    async fn update_password_digest(
        &self,
        user_id: &str,
        digest: &str,
        now: u64,
    ) -> StorageResult<()>;

    /// Set `last_login_at` to `now`.
    async fn record_login(&self, user_id: &str, now: u64) -> StorageResult<()>;

    async fn delete_user(&self, user_id: &str) -> StorageResult<()>;

    /// Users ordered by creation time.
    async fn list_users(&self, limit: u32, offset: u32) -> StorageResult<Vec<User>>;

    /// Record a revocation. `AlreadyExists` if the identifier is already revoked.
    async fn blacklist_token(&self, record: &RevokedToken) -> StorageResult<()>;

    async fn is_token_blacklisted(&self, token_id: &str) -> StorageResult<bool>;

    /// Purge revocation records and reset tokens whose expiry has passed.
    /// Returns the number of records removed.
    async fn cleanup_expired_tokens(&self, now: u64) -> StorageResult<u64>;

    /// Store a reset token, replacing any outstanding one for the same user.
    async fn create_reset_token(&self, record: &ResetToken) -> StorageResult<()>;

    /// Remove and return a reset token. `NotFound` if unknown or already used.
    /// Expiry is left to the caller; the record is consumed either way.
    async fn consume_reset_token(&self, token: &str) -> StorageResult<ResetToken>;

    async fn ping(&self) -> StorageResult<()>;

    /// Highest applied migration version, 0 for a fresh store.
    async fn get_schema_version(&self) -> StorageResult<u32>;

    async fn applied_migrations(&self) -> StorageResult<Vec<SchemaMigration>>;

    /// Apply one migration together with its bookkeeping. `Conflict` unless
    /// `migration.version` is exactly one above the current version.
    async fn apply_migration(&self, migration: &Migration, now: u64) -> StorageResult<()>;

    /// Undo one migration. `Conflict` unless it is the current version.
    async fn rollback_migration(&self, migration: &Migration) -> StorageResult<()>;
}
