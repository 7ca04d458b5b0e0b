//! In-memory index of live token ids per user.
//!
//! This index is a cache, never the source of truth. Losing it only degrades
//! bulk revocation and session listing; validation always goes to storage.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use crate::jwt::TokenKind;

/// A token id the registry knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackedToken {
    pub token_id: String,
    pub kind: TokenKind,
    pub expires_at: u64,
}

#[derive(Default)]
struct Index {
    by_user: HashMap<String, HashSet<String>>,
    tokens: HashMap<String, (String, TrackedToken)>,
}

#[derive(Default)]
pub struct SessionRegistry {
    index: RwLock<Index>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, user_id: &str, token: TrackedToken) {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index
            .by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(token.token_id.clone());
        index
            .tokens
            .insert(token.token_id.clone(), (user_id.to_string(), token));
    }

    /// Forget a token id. Returns the owning user if it was tracked.
    pub fn untrack(&self, token_id: &str) -> Option<String> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let (user_id, _) = index.tokens.remove(token_id)?;
        if let Some(ids) = index.by_user.get_mut(&user_id) {
            ids.remove(token_id);
            if ids.is_empty() {
                index.by_user.remove(&user_id);
            }
        }
        Some(user_id)
    }

    /// Tracked tokens for a user, soonest expiry first.
    pub fn list_active(&self, user_id: &str) -> Vec<TrackedToken> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        let mut tokens: Vec<TrackedToken> = index
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| index.tokens.get(id).map(|(_, t)| t.clone()))
            .collect();
        tokens.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.token_id.cmp(&b.token_id))
        });
        tokens
    }

    /// Remove and return every tracked token for a user.
    pub fn forget_user(&self, user_id: &str) -> Vec<TrackedToken> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let Some(ids) = index.by_user.remove(user_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| index.tokens.remove(id).map(|(_, t)| t))
            .collect()
    }

    /// Drop tokens that expired before `now`. Returns how many were dropped.
    pub fn prune_expired(&self, now: u64) -> usize {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<(String, String)> = index
            .tokens
            .iter()
            .filter(|(_, (_, t))| t.expires_at < now)
            .map(|(id, (user_id, _))| (id.clone(), user_id.clone()))
            .collect();

        for (token_id, user_id) in &expired {
            index.tokens.remove(token_id);
            if let Some(ids) = index.by_user.get_mut(user_id) {
                ids.remove(token_id);
                if ids.is_empty() {
                    index.by_user.remove(user_id);
                }
            }
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
