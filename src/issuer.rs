//! Issuance of linked access/refresh token pairs.

use std::time::Duration;

use tracing::warn;

use crate::clock::expiry;
use crate::db::Metadata;
use crate::error::AuthResult;
use crate::jwt::{Claims, RESERVED_CLAIMS, TokenCodec, TokenKind};

/// One signed token plus what the caller needs to track it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// JWT ID (unique identifier for revocation tracking)
    pub jti: String,
    pub expires_at: u64,
}

/// An access token and the refresh token that can replace it.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub subject: String,
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

#[derive(Clone)]
pub struct TokenIssuer {
    codec: TokenCodec,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    /// Create a new issuer over `codec` with the given lifetimes.
    pub fn new(codec: TokenCodec, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            codec,
            access_ttl,
            refresh_ttl,
        }
    }

    /// Get the underlying codec.
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Sign a fresh pair for `subject`. Custom claims go into the access token
    /// only. Nothing is persisted.
    pub fn issue(&self, subject: &str, custom: &Metadata) -> AuthResult<TokenPair> {
        let now = self.codec.clock().now();

        let access_claims = Claims {
            sub: subject.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iss: Some(self.codec.issuer().to_string()),
            iat: Some(now),
            exp: expiry(now, self.access_ttl)?,
            kind: TokenKind::Access,
            custom: sanitize_custom(custom),
        };
        let refresh_claims = Claims {
            sub: subject.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            iss: None,
            iat: None,
            exp: expiry(now, self.refresh_ttl)?,
            kind: TokenKind::Refresh,
            custom: Metadata::new(),
        };

        let access = IssuedToken {
            token: self.codec.encode(&access_claims)?,
            jti: access_claims.jti,
            expires_at: access_claims.exp,
        };
        let refresh = IssuedToken {
            token: self.codec.encode(&refresh_claims)?,
            jti: refresh_claims.jti,
            expires_at: refresh_claims.exp,
        };

        Ok(TokenPair {
            subject: subject.to_string(),
            access,
            refresh,
        })
    }
}

/// Drop custom entries that would shadow engine-owned claims.
fn sanitize_custom(custom: &Metadata) -> Metadata {
    custom
        .iter()
        .filter(|(key, _)| {
            let reserved = RESERVED_CLAIMS.contains(&key.as_str());
            if reserved {
                warn!(claim = %key, "Dropping custom claim that shadows a reserved claim");
            }
            !reserved
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
