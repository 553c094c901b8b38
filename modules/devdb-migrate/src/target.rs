use async_trait::async_trait;

use crate::error::Result;
use crate::ledger::AppliedMigration;
use crate::migration::Migration;

/// A database the migrator can drive: a statement executor plus the ledger
/// that lives next to it.
#[async_trait]
pub trait MigrationTarget: Send {
    /// Block until this session holds the exclusive migration lock.
    async fn lock(&mut self) -> Result<()>;

    /// Release the lock taken by `lock`. No-op when not held.
    async fn unlock(&mut self) -> Result<()>;

    /// Create the ledger storage if it does not exist yet.
    async fn ensure_ledger(&mut self) -> Result<()>;

    /// All ledger rows ordered by version; empty when the ledger does not exist.
    async fn load_ledger(&mut self) -> Result<Vec<AppliedMigration>>;

    /// Run the body and record it in the ledger atomically. On error neither
    /// the body's effects nor the ledger row may persist.
    ///
    /// The body runs inside a transaction owned by the target and must not
    /// manage transactions itself (`COMMIT`, `ROLLBACK`); implementations
    /// reject a body that ends the transaction early.
    async fn apply(&mut self, migration: &Migration) -> Result<AppliedMigration>;
}
