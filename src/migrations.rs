//! Versioned schema migrations.
//!
//! A registry is an ordered list of steps with versions contiguous from 1.
//! Each step carries an `up` and a `down` script; the storage adapter executes
//! a script and the version bookkeeping as one unit, so a failed step never
//! leaves the schema half-applied.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::db::{StorageAdapter, StorageError};
use crate::error::{AuthError, AuthResult};

/// One schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static [&'static str],
    pub down: &'static [&'static str],
}

const BUILTIN: &[Migration] = &[
    Migration {
        version: 1,
        description: "create users",
        up: &[
            "CREATE TABLE users (
                id TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                last_login_at INTEGER,
                is_active INTEGER NOT NULL DEFAULT 1,
                metadata TEXT NOT NULL DEFAULT '{}'
            )",
            "CREATE INDEX idx_users_created_at ON users(created_at)",
        ],
        down: &["DROP INDEX idx_users_created_at", "DROP TABLE users"],
    },
    Migration {
        version: 2,
        description: "create revoked tokens",
        up: &[
            "CREATE TABLE revoked_tokens (
                token_id TEXT NOT NULL UNIQUE,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX idx_revoked_tokens_expires_at ON revoked_tokens(expires_at)",
        ],
        down: &[
            "DROP INDEX idx_revoked_tokens_expires_at",
            "DROP TABLE revoked_tokens",
        ],
    },
    Migration {
        version: 3,
        description: "create reset tokens",
        up: &[
            // One live reset token per user, enforced by the unique user_id.
            "CREATE TABLE reset_tokens (
                token TEXT NOT NULL UNIQUE,
                user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
                expires_at INTEGER NOT NULL
            )",
            "CREATE INDEX idx_reset_tokens_expires_at ON reset_tokens(expires_at)",
        ],
        down: &[
            "DROP INDEX idx_reset_tokens_expires_at",
            "DROP TABLE reset_tokens",
        ],
    },
];

/// Applies and rolls back a registry of migrations against a storage adapter.
pub struct MigrationManager {
    migrations: Vec<Migration>,
    clock: Arc<dyn Clock>,
}

impl MigrationManager {
    /// Build a manager over `migrations`, which must be sorted with versions
    /// unique and contiguous from 1.
    pub fn new(migrations: Vec<Migration>) -> AuthResult<Self> {
        for (index, migration) in migrations.iter().enumerate() {
            let expected = index as u32 + 1;
            if migration.version != expected {
                return Err(AuthError::MigrationOutOfOrder {
                    expected,
                    found: migration.version,
                });
            }
        }
        Ok(Self {
            migrations,
            clock: Arc::new(SystemClock),
        })
    }

    /// The schema used by [`SqliteStorage`](crate::db::SqliteStorage).
    pub fn builtin() -> Self {
        Self {
            migrations: BUILTIN.to_vec(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamp `applied_at` from this clock instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    fn get(&self, version: u32) -> Option<&Migration> {
        version
            .checked_sub(1)
            .and_then(|index| self.migrations.get(index as usize))
    }

    pub async fn current_version(&self, storage: &dyn StorageAdapter) -> AuthResult<u32> {
        Ok(storage.get_schema_version().await?)
    }

    /// Steps that `migrate` would apply.
    pub async fn pending(&self, storage: &dyn StorageAdapter) -> AuthResult<Vec<Migration>> {
        let current = self.current_version(storage).await?;
        Ok(self
            .migrations
            .iter()
            .filter(|m| m.version > current)
            .copied()
            .collect())
    }

    /// Apply exactly `version`, which must be one above the current version.
    pub async fn apply_version(&self, storage: &dyn StorageAdapter, version: u32) -> AuthResult<()> {
        let current = self.current_version(storage).await?;
        let expected = current + 1;
        let migration = match self.get(version) {
            Some(m) if version == expected => m,
            _ => {
                return Err(AuthError::MigrationOutOfOrder {
                    expected,
                    found: version,
                });
            }
        };

        match storage.apply_migration(migration, self.clock.now()).await {
            Ok(()) => {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "Applied migration"
                );
                Ok(())
            }
            // Someone else moved the schema between our read and the apply.
            Err(StorageError::Conflict) => Err(AuthError::MigrationOutOfOrder {
                expected,
                found: version,
            }),
            Err(source) => {
                warn!(version, error = %source, "Migration failed");
                Err(AuthError::MigrationFailed { version, source })
            }
        }
    }

    /// Apply the next pending step, if any. Returns the version applied.
    pub async fn apply_next(&self, storage: &dyn StorageAdapter) -> AuthResult<Option<u32>> {
        let next = self.current_version(storage).await? + 1;
        if next > self.latest_version() {
            return Ok(None);
        }
        self.apply_version(storage, next).await?;
        Ok(Some(next))
    }

    /// Apply every pending step in ascending order, stopping at the first
    /// failure. Returns the resulting schema version.
    pub async fn migrate(&self, storage: &dyn StorageAdapter) -> AuthResult<u32> {
        while self.apply_next(storage).await?.is_some() {}
        self.current_version(storage).await
    }

    /// Run `down` for every applied step above `target`, newest first.
    pub async fn rollback_to_version(
        &self,
        storage: &dyn StorageAdapter,
        target: u32,
    ) -> AuthResult<u32> {
        let mut current = self.current_version(storage).await?;
        while current > target {
            let Some(migration) = self.get(current) else {
                return Err(AuthError::MigrationOutOfOrder {
                    expected: self.latest_version(),
                    found: current,
                });
            };
            match storage.rollback_migration(migration).await {
                Ok(()) => {
                    info!(
                        version = migration.version,
                        description = migration.description,
                        "Rolled back migration"
                    );
                }
                Err(StorageError::Conflict) => {
                    return Err(AuthError::MigrationOutOfOrder {
                        expected: current,
                        found: self.current_version(storage).await?,
                    });
                }
                Err(source) => {
                    warn!(version = current, error = %source, "Rollback failed");
                    return Err(AuthError::MigrationFailed {
                        version: current,
                        source,
                    });
                }
            }
            current -= 1;
        }
        Ok(current)
    }

    /// Move the schema to exactly `target`, forwards or backwards.
    pub async fn migrate_to_version(
        &self,
        storage: &dyn StorageAdapter,
        target: u32,
    ) -> AuthResult<u32> {
        if target > self.latest_version() {
            return Err(AuthError::MigrationOutOfOrder {
                expected: self.latest_version(),
                found: target,
            });
        }
        let current = self.current_version(storage).await?;
        if target < current {
            return self.rollback_to_version(storage, target).await;
        }
        while self.current_version(storage).await? < target {
            self.apply_next(storage).await?;
        }
        self.current_version(storage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStorage;

    const STEP: &[&str] = &[];

    fn step(version: u32) -> Migration {
        Migration {
            version,
            description: "noop",
            up: STEP,
            down: STEP,
        }
    }

    #[test]
    fn test_builtin_registry_is_contiguous() {
        let builtin = MigrationManager::builtin();
        assert!(MigrationManager::new(builtin.migrations().to_vec()).is_ok());
        assert_eq!(builtin.latest_version(), 3);
    }

    #[test]
    fn test_registry_with_gap_rejected() {
        let result = MigrationManager::new(vec![step(1), step(3)]);
        assert!(matches!(
            result,
            Err(AuthError::MigrationOutOfOrder {
                expected: 2,
                found: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_skipping_a_version_is_an_error() {
        let storage = MemoryStorage::new();
        let manager = MigrationManager::new(vec![step(1), step(2), step(3)]).unwrap();
        let result = manager.apply_version(&storage, 2).await;
        assert!(matches!(
            result,
            Err(AuthError::MigrationOutOfOrder {
                expected: 1,
                found: 2
            })
        ));
        manager.apply_version(&storage, 1).await.unwrap();
        assert_eq!(manager.current_version(&storage).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_target_beyond_registry_rejected() {
        let storage = MemoryStorage::new();
        let manager = MigrationManager::new(vec![step(1)]).unwrap();
        assert!(manager.migrate_to_version(&storage, 2).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_shrinks_as_applied() {
        let storage = MemoryStorage::new();
        let manager = MigrationManager::new(vec![step(1), step(2)]).unwrap();
        assert_eq!(manager.pending(&storage).await.unwrap().len(), 2);
        assert_eq!(manager.apply_next(&storage).await.unwrap(), Some(1));
        assert_eq!(manager.pending(&storage).await.unwrap().len(), 1);
        assert_eq!(manager.migrate(&storage).await.unwrap(), 2);
        assert_eq!(manager.apply_next(&storage).await.unwrap(), None);
    }
}
