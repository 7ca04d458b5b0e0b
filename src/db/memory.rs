//! Volatile in-process backend.
//!
//! All state lives behind one lock, so each operation, including the
//! revocation check-and-set, happens entirely under a single write guard.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    ResetToken, RevokedToken, SchemaMigration, StorageAdapter, StorageError, StorageResult, User,
};
use crate::migrations::Migration;

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    revoked: HashMap<String, RevokedToken>,
    /// Keyed by the reset secret.
    reset_tokens: HashMap<String, ResetToken>,
    migrations: BTreeMap<u32, SchemaMigration>,
}

impl State {
    fn username_taken(&self, username: &str, except_id: Option<&str>) -> bool {
        self.users
            .values()
            .any(|u| u.username == username && Some(u.id.as_str()) != except_id)
    }

    fn email_taken(&self, email: &str, except_id: Option<&str>) -> bool {
        self.users
            .values()
            .any(|u| u.email == email && Some(u.id.as_str()) != except_id)
    }

    fn current_version(&self) -> u32 {
        self.migrations.keys().next_back().copied().unwrap_or(0)
    }
}

/// Map-backed storage. Cloning is not supported; share it behind an `Arc`.
#[derive(Default)]
pub struct MemoryStorage {
    state: RwLock<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn create_user(&self, user: &User) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.users.contains_key(&user.id)
            || state.username_taken(&user.username, None)
            || state.email_taken(&user.email, None)
        {
            return Err(StorageError::AlreadyExists);
        }
        state.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        Ok(self.state.read().await.users.get(id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> StorageResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_user(&self, user: &User) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&user.id) {
            return Err(StorageError::NotFound);
        }
        if state.username_taken(&user.username, Some(&user.id))
            || state.email_taken(&user.email, Some(&user.id))
        {
            return Err(StorageError::Conflict);
        }
        let stored = state.users.get_mut(&user.id).ok_or(StorageError::NotFound)?;
        // Digest, creation and login times only change through their own operations.
        *stored = User {
            password_digest: std::mem::take(&mut stored.password_digest),
            created_at: stored.created_at,
            last_login_at: stored.last_login_at,
            ..user.clone()
        };
        Ok(())
    }

    async fn update_password_digest(
        &self,
        user_id: &str,
        digest: &str,
        now: u64,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or(StorageError::NotFound)?;
        user.password_digest = digest.to_string();
        user.updated_at = now;
        Ok(())
    }

    async fn record_login(&self, user_id: &str, now: u64) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let user = state.users.get_mut(user_id).ok_or(StorageError::NotFound)?;
        user.last_login_at = Some(now);
        Ok(())
    }

    async fn delete_user(&self, user_id: &str) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .users
            .remove(user_id)
            .ok_or(StorageError::NotFound)?;
        state.reset_tokens.retain(|_, r| r.user_id != user_id);
        Ok(())
    }

    async fn list_users(&self, limit: u32, offset: u32) -> StorageResult<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<&User> = state.users.values().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn blacklist_token(&self, record: &RevokedToken) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if state.revoked.contains_key(&record.token_id) {
            return Err(StorageError::AlreadyExists);
        }
        state
            .revoked
            .insert(record.token_id.clone(), record.clone());
        Ok(())
    }

    async fn is_token_blacklisted(&self, token_id: &str) -> StorageResult<bool> {
        Ok(self.state.read().await.revoked.contains_key(token_id))
    }

    async fn cleanup_expired_tokens(&self, now: u64) -> StorageResult<u64> {
        let mut state = self.state.write().await;
        let before = state.revoked.len() + state.reset_tokens.len();
        state.revoked.retain(|_, r| !r.is_expired(now));
        state.reset_tokens.retain(|_, r| r.expires_at >= now);
        Ok((before - state.revoked.len() - state.reset_tokens.len()) as u64)
    }

    async fn create_reset_token(&self, record: &ResetToken) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&record.user_id) {
            return Err(StorageError::NotFound);
        }
        state.reset_tokens.retain(|_, r| r.user_id != record.user_id);
        state
            .reset_tokens
            .insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn consume_reset_token(&self, token: &str) -> StorageResult<ResetToken> {
        self.state
            .write()
            .await
            .reset_tokens
            .remove(token)
            .ok_or(StorageError::NotFound)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn get_schema_version(&self) -> StorageResult<u32> {
        Ok(self.state.read().await.current_version())
    }

    async fn applied_migrations(&self) -> StorageResult<Vec<SchemaMigration>> {
        Ok(self
            .state
            .read()
            .await
            .migrations
            .values()
            .cloned()
            .collect())
    }

    async fn apply_migration(&self, migration: &Migration, now: u64) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if migration.version != state.current_version() + 1 {
            return Err(StorageError::Conflict);
        }
        // No schema to change; only the bookkeeping is kept.
        state.migrations.insert(
            migration.version,
            SchemaMigration {
                version: migration.version,
                description: migration.description.to_string(),
                applied_at: now,
            },
        );
        Ok(())
    }

    async fn rollback_migration(&self, migration: &Migration) -> StorageResult<()> {
        let mut state = self.state.write().await;
        if migration.version == 0 || migration.version != state.current_version() {
            return Err(StorageError::Conflict);
        }
        state.migrations.remove(&migration.version);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: &str, email: &str) -> User {
        User {
            id: id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            password_digest: "digest".to_string(),
            created_at: 100,
            updated_at: 100,
            last_login_at: None,
            is_active: true,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let storage = MemoryStorage::new();
        storage
            .create_user(&user("1", "alice", "a@example.com"))
            .await
            .unwrap();
        let result = storage
            .create_user(&user("2", "bob", "a@example.com"))
            .await;
        assert!(matches!(result, Err(StorageError::AlreadyExists)));
    }

    #[tokio::test]
    async fn test_update_to_taken_username_conflicts() {
        let storage = MemoryStorage::new();
        storage
            .create_user(&user("1", "alice", "a@example.com"))
            .await
            .unwrap();
        storage
            .create_user(&user("2", "bob", "b@example.com"))
            .await
            .unwrap();

        let mut bob = storage.get_user_by_id("2").await.unwrap().unwrap();
        bob.username = "alice".to_string();
        assert!(matches!(
            storage.update_user(&bob).await,
            Err(StorageError::Conflict)
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_user_is_not_found() {
        let storage = MemoryStorage::new();
        storage
            .create_user(&user("1", "alice", "a@example.com"))
            .await
            .unwrap();
        // Unknown id wins over the taken username.
        let result = storage
            .update_user(&user("ghost", "alice", "a@example.com"))
            .await;
        assert!(matches!(result, Err(StorageError::NotFound)));
    }

    #[tokio::test]
    async fn test_update_keeps_last_login() {
        let storage = MemoryStorage::new();
        storage
            .create_user(&user("1", "alice", "a@example.com"))
            .await
            .unwrap();
        let mut stale = storage.get_user_by_id("1").await.unwrap().unwrap();
        storage.record_login("1", 500).await.unwrap();

        stale.is_active = false;
        storage.update_user(&stale).await.unwrap();

        let stored = storage.get_user_by_id("1").await.unwrap().unwrap();
        assert_eq!(stored.last_login_at, Some(500));
        assert!(!stored.is_active);
    }

    #[tokio::test]
    async fn test_blacklist_is_compare_and_set() {
        let storage = MemoryStorage::new();
        let record = RevokedToken {
            token_id: "jti-1".to_string(),
            expires_at: 200,
            created_at: 100,
        };
        storage.blacklist_token(&record).await.unwrap();
        assert!(matches!(
            storage.blacklist_token(&record).await,
            Err(StorageError::AlreadyExists)
        ));
        assert!(storage.is_token_blacklisted("jti-1").await.unwrap());
        assert_eq!(storage.cleanup_expired_tokens(201).await.unwrap(), 1);
        assert!(!storage.is_token_blacklisted("jti-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_user_drops_reset_tokens() {
        let storage = MemoryStorage::new();
        storage
            .create_user(&user("1", "alice", "a@example.com"))
            .await
            .unwrap();
        storage
            .create_reset_token(&ResetToken {
                token: "secret".to_string(),
                user_id: "1".to_string(),
                expires_at: 500,
            })
            .await
            .unwrap();
        storage.delete_user("1").await.unwrap();
        assert!(matches!(
            storage.consume_reset_token("secret").await,
            Err(StorageError::NotFound)
        ));
    }
}
