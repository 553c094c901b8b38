//! Migrator behavior against the in-memory target: ordering, idempotence,
//! partial failure, checksum guard and concurrent runs.

use std::fs;
use std::path::Path;

use devdb_migrate::testutil::MemoryTarget;
use devdb_migrate::{MigrateError, Migration, MigrationState, Migrator};

fn three_migrations() -> Vec<Migration> {
    vec![
        Migration::new(1, "create_users", "CREATE TABLE users (id BIGINT);"),
        Migration::new(2, "add_email", "ALTER TABLE users ADD COLUMN email TEXT;"),
        Migration::new(3, "create_posts", "CREATE TABLE posts (id BIGINT);"),
    ]
}

fn write(dir: &Path, name: &str, body: &str) {
    fs::write(dir.join(name), body).unwrap();
}

#[tokio::test]
async fn applies_everything_in_order_and_bootstraps_ledger() {
    let migrator = Migrator::from_migrations(three_migrations()).unwrap();
    let mut target = MemoryTarget::new();

    let summary = migrator.run(&mut target).await.unwrap();

    assert!(target.ledger_exists());
    assert_eq!(target.executed(), vec![1, 2, 3]);
    assert_eq!(target.ledger_versions(), vec![1, 2, 3]);
    assert_eq!(summary.applied.len(), 3);
    assert_eq!(summary.skipped, 0);
    assert!(!target.is_locked());
}

#[tokio::test]
async fn second_run_is_a_noop() {
    let migrator = Migrator::from_migrations(three_migrations()).unwrap();
    let mut target = MemoryTarget::new();

    migrator.run(&mut target).await.unwrap();
    let executed_before = target.executed().len();
    let ledger_before = target.ledger_versions();

    let summary = migrator.run(&mut target).await.unwrap();

    assert!(summary.is_noop());
    assert_eq!(summary.skipped, 3);
    assert_eq!(target.executed().len(), executed_before, "no statement may run again");
    assert_eq!(target.ledger_versions(), ledger_before, "no ledger rows may be added");
}

#[tokio::test]
async fn failure_keeps_earlier_migrations_and_stops() {
    let migrator = Migrator::from_migrations(three_migrations()).unwrap();
    let mut target = MemoryTarget::new();
    target.fail_on(2);

    let err = migrator.run(&mut target).await.unwrap_err();

    match &err {
        MigrateError::Execution { version, name, .. } => {
            assert_eq!(*version, 2);
            assert_eq!(name, "add_email");
        }
        other => panic!("expected Execution, got {other:?}"),
    }
    assert_eq!(target.ledger_versions(), vec![1]);
    assert_eq!(target.executed(), vec![1, 2], "3 must not run after 2 failed");
    assert!(!target.is_locked(), "lock must be released on failure");

    // Operator fixes migration 2 and re-runs: only 2 and 3 are attempted.
    target.clear_failures();
    let summary = migrator.run(&mut target).await.unwrap();

    let versions: Vec<i64> = summary.applied.iter().map(|r| r.version).collect();
    assert_eq!(versions, vec![2, 3]);
    assert_eq!(target.executed(), vec![1, 2, 2, 3]);
    assert_eq!(target.ledger_versions(), vec![1, 2, 3]);
}

#[tokio::test]
async fn edited_migration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "001_create_users.sql", "CREATE TABLE users (id BIGINT);");
    write(dir.path(), "002_add_email.sql", "ALTER TABLE users ADD COLUMN email TEXT;");

    let mut target = MemoryTarget::new();
    Migrator::discover(dir.path())
        .unwrap()
        .run(&mut target)
        .await
        .unwrap();

    write(dir.path(), "001_create_users.sql", "CREATE TABLE users (id UUID);");
    write(dir.path(), "003_more.sql", "SELECT 1;");
    let err = Migrator::discover(dir.path())
        .unwrap()
        .run(&mut target)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::ChecksumMismatch { version: 1, .. }));
    assert_eq!(target.executed(), vec![1, 2], "nothing may run after a mismatch");
    assert_eq!(target.ledger_versions(), vec![1, 2]);
}

#[tokio::test]
async fn recorded_checksum_drift_is_rejected() {
    let migrator = Migrator::from_migrations(three_migrations()).unwrap();
    let mut target = MemoryTarget::new();
    migrator.run(&mut target).await.unwrap();

    target.set_recorded_checksum(2, "deadbeef");
    let err = migrator.run(&mut target).await.unwrap_err();
    assert_eq!(err.kind(), "checksum-mismatch");
    assert_eq!(err.version(), Some(2));
}

#[tokio::test]
async fn new_migration_below_applied_is_history_conflict() {
    let mut target = MemoryTarget::new();
    let applied = vec![
        Migration::new(1, "a", "SELECT 1;"),
        Migration::new(3, "c", "SELECT 3;"),
    ];
    Migrator::from_migrations(applied)
        .unwrap()
        .run(&mut target)
        .await
        .unwrap();

    let with_backfill = vec![
        Migration::new(1, "a", "SELECT 1;"),
        Migration::new(2, "b", "SELECT 2;"),
        Migration::new(3, "c", "SELECT 3;"),
    ];
    let err = Migrator::from_migrations(with_backfill)
        .unwrap()
        .run(&mut target)
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::HistoryConflict(_)));
    assert_eq!(target.executed(), vec![1, 3]);
}

#[tokio::test]
async fn concurrent_runs_apply_each_migration_once() {
    let migrations: Vec<Migration> = (1..=20)
        .map(|v| Migration::new(v, format!("m{v}"), format!("SELECT {v};")))
        .collect();
    let migrator = std::sync::Arc::new(Migrator::from_migrations(migrations).unwrap());
    let shared = MemoryTarget::new();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let migrator = migrator.clone();
        let mut target = shared.clone();
        tasks.push(tokio::spawn(async move { migrator.run(&mut target).await }));
    }

    let mut total_applied = 0;
    for task in tasks {
        let summary = task.await.unwrap().unwrap();
        total_applied += summary.applied.len();
    }

    assert_eq!(total_applied, 20);
    assert_eq!(shared.executed(), (1..=20).collect::<Vec<i64>>());
    assert_eq!(shared.ledger_versions(), (1..=20).collect::<Vec<i64>>());
}

#[tokio::test]
async fn pending_and_status_do_not_mutate() {
    let migrator = Migrator::from_migrations(three_migrations()).unwrap();
    let mut target = MemoryTarget::new();

    let pending = migrator.pending(&mut target).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert!(!target.ledger_exists(), "dry run must not create the ledger");

    let rows = migrator.status(&mut target).await.unwrap();
    assert!(rows.iter().all(|r| r.state == MigrationState::Pending));
    assert!(target.executed().is_empty());
}

#[tokio::test]
async fn empty_directory_is_a_successful_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut target = MemoryTarget::new();
    let summary = Migrator::discover(dir.path())
        .unwrap()
        .run(&mut target)
        .await
        .unwrap();
    assert!(summary.is_noop());
    assert!(target.ledger_exists());
}
