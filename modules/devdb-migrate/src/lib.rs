//! Versioned SQL migrations with a ledger stored in the target database.
//!
//! Migrations are `<version>_<name>.sql` files. The ledger table records
//! every applied version together with the checksum of its body; applied
//! migrations are append-only history, so an edited body or a version that
//! sorts below already-applied ones is refused rather than re-run.
//!
//! Each migration body and its ledger row commit in one transaction, and a
//! whole run holds an advisory lock so concurrent invocations serialize.

pub mod error;
pub mod ledger;
pub mod migration;
pub mod migrator;
pub mod plan;
pub mod postgres;
pub mod target;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use error::{MigrateError, Result};
pub use ledger::{AppliedMigration, LedgerTable};
pub use migration::{discover, new_migration, Migration};
pub use migrator::{ApplySummary, Migrator};
pub use plan::{plan, status, MigrationInfo, MigrationState, PlanOptions};
pub use postgres::PgTarget;
pub use target::MigrationTarget;
