//! Single-use exchange of refresh tokens.
//!
//! A refresh token moves from issued to consumed, revoked or expired and
//! never back. Consumption is the storage compare-and-set performed by
//! [`RevocationStore::try_revoke`]: of any number of concurrent callers
//! presenting the same token, exactly one inserts the revocation record and
//! receives a new pair; every other caller sees [`AuthError::TokenRevoked`].

use tracing::{info, warn};

use crate::db::Metadata;
use crate::error::{AuthError, AuthResult};
use crate::issuer::{TokenIssuer, TokenPair};
use crate::jwt::TokenKind;
use crate::revocation::RevocationStore;
use crate::session::TrackedToken;
use crate::validator::TokenValidator;

#[derive(Clone)]
pub struct RefreshRotator {
    validator: TokenValidator,
    revocations: RevocationStore,
    issuer: TokenIssuer,
}

impl RefreshRotator {
    pub fn new(validator: TokenValidator, revocations: RevocationStore, issuer: TokenIssuer) -> Self {
        Self {
            validator,
            revocations,
            issuer,
        }
    }

    /// Exchange a refresh token for a new pair. Custom claims from the
    /// original login are not carried forward.
    pub async fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.rotate_with_claims(refresh_token, &Metadata::new()).await
    }

    /// Exchange a refresh token for a new pair whose access token carries
    /// `custom`, typically re-derived from current user state.
    pub async fn rotate_with_claims(
        &self,
        refresh_token: &str,
        custom: &Metadata,
    ) -> AuthResult<TokenPair> {
        let (claims, user) = self.validator.validate_refresh(refresh_token).await?;

        if !self.revocations.try_revoke(&claims.jti, claims.exp).await? {
            warn!(user_id = %user.id, jti = %claims.jti, "Refresh token replayed");
            return Err(AuthError::TokenRevoked);
        }

        let pair = self.issuer.issue(&user.id, custom)?;
        track_pair(&self.revocations, &pair);

        info!(user_id = %user.id, consumed = %claims.jti, "Rotated refresh token");
        Ok(pair)
    }
}

/// Record both halves of a freshly issued pair in the session registry.
pub(crate) fn track_pair(revocations: &RevocationStore, pair: &TokenPair) {
    let sessions = revocations.sessions();
    sessions.track(
        &pair.subject,
        TrackedToken {
            token_id: pair.access.jti.clone(),
            kind: TokenKind::Access,
            expires_at: pair.access.expires_at,
        },
    );
    sessions.track(
        &pair.subject,
        TrackedToken {
            token_id: pair.refresh.jti.clone(),
            kind: TokenKind::Refresh,
            expires_at: pair.refresh.expires_at,
        },
    );
}
