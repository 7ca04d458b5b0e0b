//! JWT encoding and decoding.
//!
//! Access and refresh tokens are structurally identical but signed with
//! different keys and tagged with `typ`, so one can never stand in for the
//! other. Decoding is pure: it never touches storage. Expiry is judged against
//! the injected [`Clock`], after the signature has been verified.

use std::collections::HashSet;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::db::Metadata;
use crate::error::{AuthError, AuthResult};

/// Minimum secret length accepted for HMAC signing keys.
pub const MIN_SECRET_LENGTH: usize = 32;

/// Claim names the engine owns; custom claims may not override them.
pub const RESERVED_CLAIMS: &[&str] = &["sub", "jti", "iss", "iat", "exp", "typ"];

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived, presented on every protected call
    Access,
    /// Long-lived, single-use, exchanged for a new pair
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Signed claim set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Token id, unique per issuance
    pub jti: String,
    /// Issuer; absent on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued at; absent on refresh tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Token type
    #[serde(rename = "typ")]
    pub kind: TokenKind,
    /// Caller-supplied claims, flattened into the payload
    #[serde(flatten)]
    pub custom: Metadata,
}

/// Source of signing and verification keys, one pair per token kind.
///
/// Returning `None` means the key is unavailable; encoding then fails with
/// [`AuthError::SigningError`].
pub trait KeyProvider: Send + Sync {
    fn algorithm(&self) -> Algorithm;
    fn encoding_key(&self, kind: TokenKind) -> Option<&EncodingKey>;
    fn decoding_key(&self, kind: TokenKind) -> Option<&DecodingKey>;
}

/// HS256 keys derived from two distinct shared secrets.
#[derive(Clone)]
pub struct HmacKeys {
    access: (EncodingKey, DecodingKey),
    refresh: (EncodingKey, DecodingKey),
}

impl HmacKeys {
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> AuthResult<Self> {
        if access_secret.len() < MIN_SECRET_LENGTH || refresh_secret.len() < MIN_SECRET_LENGTH {
            return Err(AuthError::WeakSecret);
        }
        if access_secret == refresh_secret {
            return Err(AuthError::Config(
                "access and refresh secrets must differ".to_string(),
            ));
        }
        Ok(Self {
            access: (
                EncodingKey::from_secret(access_secret),
                DecodingKey::from_secret(access_secret),
            ),
            refresh: (
                EncodingKey::from_secret(refresh_secret),
                DecodingKey::from_secret(refresh_secret),
            ),
        })
    }

    fn pair(&self, kind: TokenKind) -> &(EncodingKey, DecodingKey) {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }
}

impl KeyProvider for HmacKeys {
    fn algorithm(&self) -> Algorithm {
        Algorithm::HS256
    }

    fn encoding_key(&self, kind: TokenKind) -> Option<&EncodingKey> {
        Some(&self.pair(kind).0)
    }

    fn decoding_key(&self, kind: TokenKind) -> Option<&DecodingKey> {
        Some(&self.pair(kind).1)
    }
}

/// Encodes and decodes claim sets for one issuer.
#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<dyn KeyProvider>,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(keys: Arc<dyn KeyProvider>, issuer: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            clock,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sign a claim set with the key for its kind.
    pub fn encode(&self, claims: &Claims) -> AuthResult<String> {
        let key = self
            .keys
            .encoding_key(claims.kind)
            .ok_or(AuthError::SigningError)?;
        jsonwebtoken::encode(&Header::new(self.keys.algorithm()), claims, key).map_err(|e| {
            tracing::error!(kind = claims.kind.as_str(), error = %e, "Failed to encode token");
            AuthError::SigningError
        })
    }

    /// Verify and decode a token that must be of `expected` kind.
    pub fn decode(&self, token: &str, expected: TokenKind) -> AuthResult<Claims> {
        let key = self
            .keys
            .decoding_key(expected)
            .ok_or(AuthError::SigningError)?;

        let mut validation = Validation::new(self.keys.algorithm());
        validation.leeway = 0;
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims =
            HashSet::from(["exp".to_string(), "sub".to_string()]);

        let claims = jsonwebtoken::decode::<Claims>(token, key, &validation)
            .map_err(decode_error)?
            .claims;

        if claims.kind != expected {
            return Err(AuthError::InvalidSignature);
        }
        match (&claims.iss, expected) {
            (Some(iss), _) if iss != &self.issuer => return Err(AuthError::InvalidSignature),
            (None, TokenKind::Access) => return Err(AuthError::InvalidSignature),
            _ => {}
        }
        if self.clock.now() > claims.exp {
            return Err(AuthError::TokenExpired);
        }

        Ok(claims)
    }

    /// Decode a token of either kind, trying the access key first.
    pub fn decode_any(&self, token: &str) -> AuthResult<Claims> {
        match self.decode(token, TokenKind::Access) {
            Err(AuthError::InvalidSignature) => self.decode(token, TokenKind::Refresh),
            result => result,
        }
    }
}

fn decode_error(e: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        _ => AuthError::MalformedToken,
    }
}
