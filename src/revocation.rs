//! Revocation ("blacklist") of token identifiers.
//!
//! Records live in the storage adapter so that every process sharing a
//! backend sees the same view. A record expires together with the token it
//! blocks; purging lapsed records is an optimization only.

use std::sync::Arc;

use tracing::{debug, info};

use crate::db::{RevokedToken, StorageAdapter, StorageError};
use crate::error::{AuthError, AuthResult};
use crate::jwt::TokenCodec;
use crate::session::{SessionRegistry, TrackedToken};

#[derive(Clone)]
pub struct RevocationStore {
    storage: Arc<dyn StorageAdapter>,
    sessions: Arc<SessionRegistry>,
    codec: TokenCodec,
}

impl RevocationStore {
    /// Create a new store over `storage`, tracking sessions in `sessions`.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        sessions: Arc<SessionRegistry>,
        codec: TokenCodec,
    ) -> Self {
        Self {
            storage,
            sessions,
            codec,
        }
    }

    /// Get the session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Atomically revoke `token_id` unless it already is.
    /// Returns `false` when another caller got there first.
    pub async fn try_revoke(&self, token_id: &str, expires_at: u64) -> AuthResult<bool> {
        let record = RevokedToken {
            token_id: token_id.to_string(),
            expires_at,
            created_at: self.codec.clock().now(),
        };
        let revoked = match self.storage.blacklist_token(&record).await {
            Ok(()) => true,
            Err(StorageError::AlreadyExists) => false,
            Err(e) => return Err(e.into()),
        };
        self.sessions.untrack(token_id);
        Ok(revoked)
    }

    /// Revoke `token_id`. Revoking an already revoked id succeeds.
    pub async fn revoke(&self, token_id: &str, expires_at: u64) -> AuthResult<()> {
        if !self.try_revoke(token_id, expires_at).await? {
            debug!(token_id, "Token was already revoked");
        }
        Ok(())
    }

    /// Revoke each `(token_id, expires_at)` in turn.
    pub async fn revoke_many(&self, tokens: &[(String, u64)]) -> AuthResult<()> {
        for (token_id, expires_at) in tokens {
            self.revoke(token_id, *expires_at).await?;
        }
        Ok(())
    }

    /// Revoke a token string of either kind. A token that has already expired
    /// needs no record and is accepted as-is.
    pub async fn revoke_token(&self, token: &str) -> AuthResult<()> {
        match self.codec.decode_any(token) {
            Ok(claims) => self.revoke(&claims.jti, claims.exp).await,
            Err(AuthError::TokenExpired) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Check whether `token_id` has been revoked.
    pub async fn is_revoked(&self, token_id: &str) -> AuthResult<bool> {
        Ok(self.storage.is_token_blacklisted(token_id).await?)
    }

    /// Revoke every token the session registry knows for `user_id`.
    /// Returns how many were revoked. Ids the registry never saw, or has
    /// forgotten, are not reachable from here.
    ///
    /// Ids tracked while the revocations run (a rotation that consumed one of
    /// the listed refresh tokens first) are swept in further passes until the
    /// registry holds nothing for the user.
    pub async fn revoke_all_for_user(&self, user_id: &str) -> AuthResult<usize> {
        let mut count = 0;
        loop {
            let tokens = self.sessions.forget_user(user_id);
            if tokens.is_empty() {
                break;
            }
            for (position, token) in tokens.iter().enumerate() {
                if let Err(e) = self.revoke(&token.token_id, token.expires_at).await {
                    // Keep the ids we could not revoke so a retry can reach them.
                    for remaining in &tokens[position..] {
                        self.sessions.track(user_id, remaining.clone());
                    }
                    return Err(e);
                }
            }
            count += tokens.len();
        }
        info!(user_id, count, "Revoked all sessions for user");
        Ok(count)
    }

    /// Purge lapsed revocation records and prune expired sessions.
    pub async fn cleanup_expired(&self) -> AuthResult<u64> {
        let now = self.codec.clock().now();
        let purged = self.storage.cleanup_expired_tokens(now).await?;
        let pruned = self.sessions.prune_expired(now);
        debug!(purged, pruned, "Revocation cleanup finished");
        Ok(purged)
    }

    /// List the unexpired tracked tokens of `user_id`.
    pub fn list_active(&self, user_id: &str) -> Vec<TrackedToken> {
        self.sessions.list_active(user_id)
    }
}
