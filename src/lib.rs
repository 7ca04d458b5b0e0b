//! Token lifecycle engine: issuance, validation, single-use refresh rotation,
//! revocation and session tracking over a pluggable storage backend.

pub mod cleanup;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod hasher;
pub mod issuer;
pub mod jwt;
pub mod migrations;
pub mod revocation;
pub mod rotator;
pub mod service;
pub mod session;
pub mod validator;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AuthArgs, AuthConfig, LogFormat};
pub use db::{MemoryStorage, Metadata, SqliteStorage, StorageAdapter, StorageError, User};
pub use error::{AuthError, AuthResult};
pub use hasher::{Argon2Hasher, Hasher};
pub use issuer::{IssuedToken, TokenIssuer, TokenPair};
pub use jwt::{Claims, HmacKeys, KeyProvider, TokenCodec, TokenKind};
pub use migrations::{Migration, MigrationManager};
pub use revocation::RevocationStore;
pub use rotator::RefreshRotator;
pub use service::{AuthService, NewUser};
pub use session::{SessionRegistry, TrackedToken};
pub use validator::{BatchResult, TokenValidator};
