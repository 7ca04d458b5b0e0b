//! User-facing authentication flows composed from the token components.

use std::sync::Arc;

use base64::Engine;
use rand::RngCore;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock, expiry};
use crate::config::{AuthArgs, AuthConfig};
use crate::db::{Metadata, ResetToken, SqliteStorage, StorageAdapter, StorageError, User};
use crate::error::{AuthError, AuthResult};
use crate::hasher::{Argon2Hasher, Hasher};
use crate::issuer::{TokenIssuer, TokenPair};
use crate::jwt::{KeyProvider, TokenCodec};
use crate::migrations::MigrationManager;
use crate::revocation::RevocationStore;
use crate::rotator::{RefreshRotator, track_pair};
use crate::session::{SessionRegistry, TrackedToken};
use crate::validator::{BatchResult, TokenValidator};

/// Bytes of entropy in a password reset token.
const RESET_TOKEN_BYTES: usize = 32;

/// Registration request.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub metadata: Metadata,
}

/// Authentication facade over a storage backend.
pub struct AuthService {
    storage: Arc<dyn StorageAdapter>,
    hasher: Arc<dyn Hasher>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    issuer: TokenIssuer,
    validator: TokenValidator,
    revocations: RevocationStore,
    rotator: RefreshRotator,
    migrations: MigrationManager,
}

impl AuthService {
    /// Create a new service. Fails if `config` does not validate.
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        keys: Arc<dyn KeyProvider>,
        hasher: Arc<dyn Hasher>,
        clock: Arc<dyn Clock>,
        config: AuthConfig,
    ) -> AuthResult<Self> {
        config.validate()?;

        let codec = TokenCodec::new(keys, config.issuer.clone(), clock.clone());
        let issuer = TokenIssuer::new(codec.clone(), config.access_ttl, config.refresh_ttl);
        let sessions = Arc::new(SessionRegistry::new());
        let revocations = RevocationStore::new(storage.clone(), sessions, codec.clone());
        let validator = TokenValidator::new(codec, revocations.clone(), storage.clone());
        let rotator = RefreshRotator::new(validator.clone(), revocations.clone(), issuer.clone());
        let migrations = MigrationManager::builtin().with_clock(clock.clone());

        Ok(Self {
            storage,
            hasher,
            clock,
            config,
            issuer,
            validator,
            revocations,
            rotator,
            migrations,
        })
    }

    /// Open the SQLite database named in `args`, load secrets and bring the
    /// schema up to date.
    pub async fn open(args: &AuthArgs) -> AuthResult<Self> {
        let config = args.auth_config()?;
        let keys = args.signing_keys()?;
        let storage = SqliteStorage::open(&args.database)
            .await
            .map_err(StorageError::backend)?;

        let service = Self::new(
            Arc::new(storage),
            Arc::new(keys),
            Arc::new(Argon2Hasher::new()),
            Arc::new(SystemClock),
            config,
        )?;
        service.migrate().await?;
        Ok(service)
    }

    /// Replace the migration registry, e.g. with one carrying extra steps.
    pub fn with_migrations(mut self, migrations: MigrationManager) -> Self {
        self.migrations = migrations.with_clock(self.clock.clone());
        self
    }

    /// Get the storage backend.
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Get the validated configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Get the token issuer.
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Get the token validator.
    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Get the revocation store.
    pub fn revocations(&self) -> &RevocationStore {
        &self.revocations
    }

    /// Get the refresh rotator.
    pub fn rotator(&self) -> &RefreshRotator {
        &self.rotator
    }

    /// Get the migration registry.
    pub fn migrations(&self) -> &MigrationManager {
        &self.migrations
    }

    /// Create an active account with a hashed password.
    pub async fn register(&self, new_user: NewUser) -> AuthResult<User> {
        let now = self.clock.now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: new_user.username,
            email: new_user.email,
            password_digest: self.hasher.hash(&new_user.password)?,
            created_at: now,
            updated_at: now,
            last_login_at: None,
            is_active: true,
            metadata: new_user.metadata,
        };

        match self.storage.create_user(&user).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists) => return Err(AuthError::UserAlreadyExists),
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user)
    }

    /// Authenticate by username or email and issue a tracked pair.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        custom: &Metadata,
    ) -> AuthResult<TokenPair> {
        let user = match self.storage.get_user_by_username(identifier).await? {
            Some(user) => Some(user),
            None => self.storage.get_user_by_email(identifier).await?,
        };
        let Some(user) = user else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.hasher.verify(password, &user.password_digest) {
            warn!(user_id = %user.id, "Failed login attempt");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_active {
            return Err(AuthError::UserInactive);
        }

        self.storage.record_login(&user.id, self.clock.now()).await?;
        let pair = self.issuer.issue(&user.id, custom)?;
        track_pair(&self.revocations, &pair);

        info!(user_id = %user.id, "User logged in");
        Ok(pair)
    }

    /// Validate an access token and return its user.
    pub async fn validate(&self, access_token: &str) -> AuthResult<User> {
        self.validator.validate(access_token).await
    }

    /// Check an access token without surfacing the error.
    pub async fn is_valid(&self, access_token: &str) -> bool {
        self.validator.is_valid(access_token).await
    }

    /// Validate several access tokens concurrently.
    pub async fn validate_batch<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<BatchResult> {
        self.validator.validate_batch(tokens).await
    }

    /// Exchange a refresh token for a new pair.
    pub async fn rotate(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        self.rotator.rotate(refresh_token).await
    }

    /// Exchange a refresh token for a new pair carrying `custom` claims.
    pub async fn rotate_with_claims(
        &self,
        refresh_token: &str,
        custom: &Metadata,
    ) -> AuthResult<TokenPair> {
        self.rotator.rotate_with_claims(refresh_token, custom).await
    }

    /// Revoke the presented access token and, if given, its refresh token.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> AuthResult<()> {
        self.revocations.revoke_token(access_token).await?;
        if let Some(refresh_token) = refresh_token {
            self.revocations.revoke_token(refresh_token).await?;
        }
        Ok(())
    }

    /// Revoke every tracked token of `user_id`. Returns how many were revoked.
    pub async fn logout_everywhere(&self, user_id: &str) -> AuthResult<usize> {
        self.revocations.revoke_all_for_user(user_id).await
    }

    /// Change a password after checking the current one. All sessions end.
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> AuthResult<()> {
        let user = self
            .storage
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !self.hasher.verify(current_password, &user.password_digest) {
            return Err(AuthError::InvalidCredentials);
        }

        self.set_password(&user.id, new_password).await?;
        info!(user_id = %user.id, "Password changed");
        Ok(())
    }

    /// Create a reset token for the account registered under `email`.
    ///
    /// Returns `None` for unknown or inactive accounts so callers can answer
    /// identically either way. A new token replaces any outstanding one.
    pub async fn request_password_reset(&self, email: &str) -> AuthResult<Option<String>> {
        let Some(user) = self.storage.get_user_by_email(email).await? else {
            return Ok(None);
        };
        if !user.is_active {
            return Ok(None);
        }

        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        let record = ResetToken {
            token: token.clone(),
            user_id: user.id.clone(),
            expires_at: expiry(self.clock.now(), self.config.reset_ttl)?,
        };
        self.storage.create_reset_token(&record).await?;

        info!(user_id = %user.id, "Password reset requested");
        Ok(Some(token))
    }

    /// Consume a reset token and set a new password. All sessions end.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> AuthResult<()> {
        let record = match self.storage.consume_reset_token(token).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => return Err(AuthError::MalformedToken),
            Err(e) => return Err(e.into()),
        };
        if self.clock.now() > record.expires_at {
            return Err(AuthError::TokenExpired);
        }

        self.set_password(&record.user_id, new_password).await?;
        info!(user_id = %record.user_id, "Password reset");
        Ok(())
    }

    /// Activate or deactivate an account. Deactivation ends all sessions.
    pub async fn set_active(&self, user_id: &str, active: bool) -> AuthResult<User> {
        let mut user = self
            .storage
            .get_user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        user.is_active = active;
        user.updated_at = self.clock.now();

        match self.storage.update_user(&user).await {
            Ok(()) => {}
            Err(StorageError::NotFound) => return Err(AuthError::UserNotFound),
            Err(e) => return Err(e.into()),
        }
        if !active {
            self.revocations.revoke_all_for_user(&user.id).await?;
        }
        Ok(user)
    }

    /// List the unexpired tracked tokens of `user_id`.
    pub fn active_sessions(&self, user_id: &str) -> Vec<TrackedToken> {
        self.revocations.list_active(user_id)
    }

    /// Purge lapsed records. Returns the number of storage records removed.
    pub async fn cleanup(&self) -> AuthResult<u64> {
        self.revocations.cleanup_expired().await
    }

    /// Apply every pending migration. Returns the resulting version.
    pub async fn migrate(&self) -> AuthResult<u32> {
        self.migrations.migrate(self.storage.as_ref()).await
    }

    /// Check that storage is reachable.
    pub async fn ping(&self) -> AuthResult<()> {
        Ok(self.storage.ping().await?)
    }

    async fn set_password(&self, user_id: &str, new_password: &str) -> AuthResult<()> {
        let digest = self.hasher.hash(new_password)?;
        match self
            .storage
            .update_password_digest(user_id, &digest, self.clock.now())
            .await
        {
            Ok(()) => {}
            Err(StorageError::NotFound) => return Err(AuthError::UserNotFound),
            Err(e) => return Err(e.into()),
        }
        self.revocations.revoke_all_for_user(user_id).await?;
        Ok(())
    }
}
