//! Resolution of presented tokens to users.

use std::sync::Arc;

use futures::future::join_all;

use crate::db::{StorageAdapter, User};
use crate::error::{AuthError, AuthResult};
use crate::jwt::{Claims, TokenCodec, TokenKind};
use crate::revocation::RevocationStore;

/// Outcome for one token of a batch.
#[derive(Debug)]
pub struct BatchResult {
    pub result: AuthResult<User>,
}

impl BatchResult {
    pub fn is_valid(&self) -> bool {
        self.result.is_ok()
    }

    pub fn user(&self) -> Option<&User> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AuthError> {
        self.result.as_ref().err()
    }
}

#[derive(Clone)]
pub struct TokenValidator {
    codec: TokenCodec,
    revocations: RevocationStore,
    storage: Arc<dyn StorageAdapter>,
}

impl TokenValidator {
    /// Create a new validator.
    pub fn new(
        codec: TokenCodec,
        revocations: RevocationStore,
        storage: Arc<dyn StorageAdapter>,
    ) -> Self {
        Self {
            codec,
            revocations,
            storage,
        }
    }

    /// Decode, check revocation, then load the subject.
    pub async fn validate_as(&self, token: &str, kind: TokenKind) -> AuthResult<(Claims, User)> {
        let claims = self.codec.decode(token, kind)?;

        if self.revocations.is_revoked(&claims.jti).await? {
            return Err(AuthError::TokenRevoked);
        }

        let user = self
            .storage
            .get_user_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        Ok((claims, user))
    }

    /// Validate an access token and return its user.
    pub async fn validate(&self, token: &str) -> AuthResult<User> {
        self.validate_as(token, TokenKind::Access)
            .await
            .map(|(_, user)| user)
    }

    /// Validate an access token and return both its claims and its user.
    pub async fn validate_with_claims(&self, token: &str) -> AuthResult<(Claims, User)> {
        self.validate_as(token, TokenKind::Access).await
    }

    /// Validate a refresh token and return its claims and user.
    pub async fn validate_refresh(&self, token: &str) -> AuthResult<(Claims, User)> {
        self.validate_as(token, TokenKind::Refresh).await
    }

    /// Check an access token without surfacing the error.
    pub async fn is_valid(&self, token: &str) -> bool {
        self.validate(token).await.is_ok()
    }

    /// Validate each token independently. Results are in input order.
    pub async fn validate_batch<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<BatchResult> {
        join_all(tokens.iter().map(|token| async move {
            BatchResult {
                result: self.validate(token.as_ref()).await,
            }
        }))
        .await
    }
}
