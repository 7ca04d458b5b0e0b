#![allow(dead_code)]

use std::sync::Arc;

use tokenwarden::db::{MemoryStorage, SqliteStorage};
use tokenwarden::{
    AuthConfig, AuthResult, AuthService, HmacKeys, Hasher, ManualClock, Metadata, NewUser,
    StorageAdapter, User,
};

pub const NOW: u64 = 1_700_000_000;
pub const ACCESS_SECRET: &[u8] = b"integration-access-secret-0123456789abcdef";
pub const REFRESH_SECRET: &[u8] = b"integration-refresh-secret-0123456789abcdef";
pub const PASSWORD: &str = "correct horse battery staple";

/// Storage backends every behavioral test runs against.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

/// Reversible digest so tests don't pay for Argon2.
pub struct PlainHasher;

impl Hasher for PlainHasher {
    fn hash(&self, plaintext: &str) -> AuthResult<String> {
        Ok(format!("plain${plaintext}"))
    }

    fn verify(&self, plaintext: &str, digest: &str) -> bool {
        digest.strip_prefix("plain$") == Some(plaintext)
    }
}

pub struct TestContext {
    pub service: Arc<AuthService>,
    pub clock: Arc<ManualClock>,
    pub backend: Backend,
}

impl TestContext {
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        self.service.storage()
    }

    /// Register a user whose password is [`PASSWORD`].
    pub async fn register(&self, username: &str) -> User {
        self.service
            .register(NewUser {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password: PASSWORD.to_string(),
                metadata: Metadata::new(),
            })
            .await
            .expect("Failed to register user")
    }
}

pub async fn open_storage(backend: Backend) -> Arc<dyn StorageAdapter> {
    match backend {
        Backend::Memory => Arc::new(MemoryStorage::new()),
        Backend::Sqlite => Arc::new(
            SqliteStorage::open(":memory:")
                .await
                .expect("Failed to open test database"),
        ),
    }
}

pub async fn setup(backend: Backend) -> TestContext {
    setup_with_config(backend, AuthConfig::default()).await
}

pub async fn setup_with_config(backend: Backend, config: AuthConfig) -> TestContext {
    setup_with_storage(backend, open_storage(backend).await, config).await
}

/// Build a migrated service over a caller-supplied storage handle.
pub async fn setup_with_storage(
    backend: Backend,
    storage: Arc<dyn StorageAdapter>,
    config: AuthConfig,
) -> TestContext {
    let clock = Arc::new(ManualClock::new(NOW));
    let keys = HmacKeys::new(ACCESS_SECRET, REFRESH_SECRET).expect("Failed to build keys");
    let service = AuthService::new(
        storage,
        Arc::new(keys),
        Arc::new(PlainHasher),
        clock.clone(),
        config,
    )
    .expect("Failed to build service");
    service.migrate().await.expect("Failed to migrate");

    TestContext {
        service: Arc::new(service),
        clock,
        backend,
    }
}
