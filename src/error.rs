//! Error taxonomy for the token lifecycle engine.

use crate::db::StorageError;

/// Errors returned by every public operation of the crate.
///
/// Token failures are kept distinct so a caller-facing layer can decide, for
/// example, to silently refresh on [`AuthError::TokenExpired`] but force a full
/// re-login on [`AuthError::TokenRevoked`].
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User already exists")]
    UserAlreadyExists,
    #[error("User not found")]
    UserNotFound,
    #[error("User is inactive")]
    UserInactive,
    #[error("Malformed token")]
    MalformedToken,
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token has expired")]
    TokenExpired,
    #[error("Token has been revoked")]
    TokenRevoked,
    /// The signing key for the requested token kind is unavailable.
    #[error("Failed to sign token")]
    SigningError,
    /// The password hasher failed at runtime.
    #[error("Password hashing failed")]
    HashingFailed,
    #[error("Signing secret is too weak")]
    WeakSecret,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Migration out of order: expected version {expected}, found {found}")]
    MigrationOutOfOrder { expected: u32, found: u32 },
    #[error("Migration to version {version} failed")]
    MigrationFailed {
        version: u32,
        #[source]
        source: StorageError,
    },
    #[error("Storage error")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// True for failures that mean the token itself is unusable (structure or signature).
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, AuthError::MalformedToken | AuthError::InvalidSignature)
    }

    /// True when the caller must log in again rather than attempt a refresh.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            AuthError::TokenRevoked
                | AuthError::MalformedToken
                | AuthError::InvalidSignature
                | AuthError::UserNotFound
                | AuthError::UserInactive
        )
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
