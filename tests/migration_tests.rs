//! Tests for versioned schema migrations.
//!
//! Tests cover:
//! - Idempotent migrate
//! - Full round trip down to an empty schema and back
//! - A failing step leaves the schema at the last good version
//! - Out-of-order application

mod common;

use common::{BACKENDS, open_storage};
use tokenwarden::db::SqliteStorage;
use tokenwarden::{AuthError, Migration, MigrationManager, StorageAdapter};

const AUDIT_LOG: Migration = Migration {
    version: 4,
    description: "create audit log",
    up: &[
        "CREATE TABLE audit_log (id TEXT NOT NULL UNIQUE, message TEXT NOT NULL)",
        // Fails: the table already exists.
        "CREATE TABLE users (id TEXT)",
    ],
    down: &["DROP TABLE audit_log"],
};

fn with_broken_step() -> MigrationManager {
    let mut migrations = MigrationManager::builtin().migrations().to_vec();
    migrations.push(AUDIT_LOG);
    MigrationManager::new(migrations).unwrap()
}

async fn table_exists(storage: &SqliteStorage, table: &'static str) -> bool {
    let sql: &'static str = match table {
        "users" => "SELECT 1 FROM users LIMIT 1",
        "audit_log" => "SELECT 1 FROM audit_log LIMIT 1",
        _ => unreachable!("unknown table {table}"),
    };
    sqlx::query(sql).execute(storage.pool()).await.is_ok()
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    for backend in BACKENDS {
        let storage = open_storage(backend).await;
        let manager = MigrationManager::builtin();

        assert_eq!(manager.migrate(storage.as_ref()).await.unwrap(), 3);
        assert_eq!(manager.migrate(storage.as_ref()).await.unwrap(), 3);
        assert!(manager.pending(storage.as_ref()).await.unwrap().is_empty());
        assert_eq!(storage.applied_migrations().await.unwrap().len(), 3);
    }
}

#[tokio::test]
async fn test_round_trip_to_empty_schema() {
    let storage = SqliteStorage::open(":memory:").await.unwrap();
    let manager = MigrationManager::builtin();

    assert_eq!(manager.migrate_to_version(&storage, 3).await.unwrap(), 3);
    assert!(table_exists(&storage, "users").await);

    assert_eq!(manager.migrate_to_version(&storage, 0).await.unwrap(), 0);
    assert!(!table_exists(&storage, "users").await);
    assert!(storage.applied_migrations().await.unwrap().is_empty());

    assert_eq!(manager.migrate_to_version(&storage, 3).await.unwrap(), 3);
    assert!(table_exists(&storage, "users").await);
}

#[tokio::test]
async fn test_failed_step_stops_at_last_good_version() {
    let storage = SqliteStorage::open(":memory:").await.unwrap();
    let manager = with_broken_step();

    let result = manager.migrate(&storage).await;
    assert!(
        matches!(result, Err(AuthError::MigrationFailed { version: 4, .. })),
        "{result:?}"
    );
    assert_eq!(storage.get_schema_version().await.unwrap(), 3);
    // The statements before the failure were rolled back with it.
    assert!(!table_exists(&storage, "audit_log").await);
    assert!(table_exists(&storage, "users").await);
}

#[tokio::test]
async fn test_apply_out_of_order() {
    for backend in BACKENDS {
        let storage = open_storage(backend).await;
        let manager = MigrationManager::builtin();

        let result = manager.apply_version(storage.as_ref(), 2).await;
        assert!(matches!(
            result,
            Err(AuthError::MigrationOutOfOrder {
                expected: 1,
                found: 2
            })
        ));

        manager.apply_version(storage.as_ref(), 1).await.unwrap();
        assert_eq!(manager.apply_next(storage.as_ref()).await.unwrap(), Some(2));

        let result = manager.apply_version(storage.as_ref(), 2).await;
        assert!(matches!(
            result,
            Err(AuthError::MigrationOutOfOrder {
                expected: 3,
                found: 2
            })
        ));
    }
}

#[tokio::test]
async fn test_target_beyond_registry() {
    let storage = SqliteStorage::open(":memory:").await.unwrap();
    let manager = MigrationManager::builtin();

    let result = manager.migrate_to_version(&storage, 9).await;
    assert!(matches!(
        result,
        Err(AuthError::MigrationOutOfOrder { found: 9, .. })
    ));
    assert_eq!(manager.current_version(&storage).await.unwrap(), 0);
}
