//! Postgres migration target.
//!
//! Uses one dedicated connection: `pg_advisory_lock` is session scoped, so
//! the lock, the ledger reads and every migration transaction must share a
//! session. If the process dies the session ends, which releases the lock and
//! rolls back whatever transaction was open.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Connection, PgConnection};
use tracing::{debug, info, warn};

use crate::error::{BoxError, MigrateError, Result};
use crate::ledger::{AppliedMigration, LedgerTable};
use crate::migration::Migration;
use crate::target::MigrationTarget;

const CURRENT_TXID: &str = "SELECT txid_current()";

pub struct PgTarget {
    conn: PgConnection,
    table: LedgerTable,
    locked: bool,
}

impl PgTarget {
    pub async fn connect(database_url: &str, table: LedgerTable) -> Result<Self> {
        let conn = PgConnection::connect(database_url).await?;
        Ok(Self::from_connection(conn, table))
    }

    pub fn from_connection(conn: PgConnection, table: LedgerTable) -> Self {
        Self {
            conn,
            table,
            locked: false,
        }
    }

    pub fn table(&self) -> &LedgerTable {
        &self.table
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    async fn ledger_exists(&mut self) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.table.to_string())
            .fetch_one(&mut self.conn)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl MigrationTarget for PgTarget {
    async fn lock(&mut self) -> Result<()> {
        if self.locked {
            return Ok(());
        }
        let key = self.table.lock_key();
        debug!(key, table = %self.table, "Waiting for migration lock");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut self.conn)
            .await?;
        self.locked = true;
        debug!(key, "Migration lock acquired");
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        if !self.locked {
            return Ok(());
        }
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.table.lock_key())
            .execute(&mut self.conn)
            .await?;
        self.locked = false;
        Ok(())
    }

    async fn ensure_ledger(&mut self) -> Result<()> {
        let sql = self.table.create_sql();
        sqlx::Executor::execute(&mut self.conn, sqlx::raw_sql(&sql)).await?;
        Ok(())
    }

    async fn load_ledger(&mut self) -> Result<Vec<AppliedMigration>> {
        if !self.ledger_exists().await? {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, AppliedMigration>(&self.table.select_sql())
            .fetch_all(&mut self.conn)
            .await?;
        Ok(rows)
    }

    async fn apply(&mut self, migration: &Migration) -> Result<AppliedMigration> {
        let insert = self.table.insert_sql();
        let mut tx = self.conn.begin().await?;
        let txid: i64 = sqlx::query_scalar(CURRENT_TXID).fetch_one(&mut *tx).await?;
        let started = Instant::now();

        if let Err(e) = sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(&migration.sql)).await {
            let rollback = tx.rollback().await;
            return Err(execution_error(migration, Box::new(e), rollback));
        }
        let execution_ms = started.elapsed().as_millis() as i64;

        // A body that ran COMMIT or ROLLBACK leaves us outside the transaction
        // we opened; recording it now would not be atomic with the body.
        let txid_after: i64 = sqlx::query_scalar(CURRENT_TXID).fetch_one(&mut *tx).await?;
        if txid_after != txid {
            let rollback = tx.rollback().await;
            return Err(execution_error(
                migration,
                "body ended the migration transaction; remove COMMIT/ROLLBACK from it".into(),
                rollback,
            ));
        }

        let applied_at: DateTime<Utc> = sqlx::query_scalar(&insert)
            .bind(migration.version)
            .bind(&migration.name)
            .bind(&migration.checksum)
            .bind(execution_ms)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(
            version = migration.version,
            name = migration.name.as_str(),
            execution_ms,
            "Applied migration"
        );

        Ok(AppliedMigration {
            version: migration.version,
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at,
            execution_ms,
        })
    }
}

/// The error for a failed body. A failed rollback is only logged: the session
/// aborts the transaction anyway, and the caller needs to know which
/// migration failed.
fn execution_error(
    migration: &Migration,
    source: BoxError,
    rollback: std::result::Result<(), sqlx::Error>,
) -> MigrateError {
    if let Err(e) = rollback {
        warn!(
            version = migration.version,
            name = migration.name.as_str(),
            error = %e,
            "Rollback after failed migration also failed"
        );
    }
    MigrateError::Execution {
        version: migration.version,
        name: migration.name.clone(),
        source,
    }
}
