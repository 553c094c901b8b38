use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::ledger::AppliedMigration;
use crate::migration::{discover, Migration};
use crate::plan::{plan, status, MigrationInfo, PlanOptions};
use crate::target::MigrationTarget;

/// Outcome of a successful run.
#[derive(Debug, Clone, Default)]
pub struct ApplySummary {
    pub applied: Vec<AppliedMigration>,
    /// Known migrations that were already in the ledger.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl ApplySummary {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

impl fmt::Display for ApplySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "applied={} already_applied={} elapsed_ms={}",
            self.applied.len(),
            self.skipped,
            self.elapsed.as_millis()
        )?;
        if let (Some(first), Some(last)) = (self.applied.first(), self.applied.last()) {
            write!(f, " versions={}..={}", first.version, last.version)?;
        }
        Ok(())
    }
}

/// Applies a fixed, ordered set of migrations to a target.
#[derive(Debug, Clone)]
pub struct Migrator {
    migrations: Vec<Migration>,
    options: PlanOptions,
}

impl Migrator {
    /// Load migrations from a directory.
    pub fn discover(dir: &Path) -> Result<Self> {
        let migrations = discover(dir)?;
        info!(dir = %dir.display(), count = migrations.len(), "Loaded migrations");
        Ok(Self {
            migrations,
            options: PlanOptions::default(),
        })
    }

    /// Build from in-memory migrations; they must be strictly ascending.
    pub fn from_migrations(migrations: Vec<Migration>) -> Result<Self> {
        for pair in migrations.windows(2) {
            if pair[0].version >= pair[1].version {
                return Err(MigrateError::malformed(
                    &pair[1].path,
                    format!(
                        "version {} does not follow {}; migrations must be strictly ascending",
                        pair[1].version, pair[0].version
                    ),
                ));
            }
        }
        Ok(Self {
            migrations,
            options: PlanOptions::default(),
        })
    }

    pub fn ignore_missing(mut self, ignore: bool) -> Self {
        self.options.ignore_missing = ignore;
        self
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Bring the target up to date.
    ///
    /// Holds the target's migration lock for the whole ledger read, plan and
    /// apply sequence. Stops at the first failing migration; everything
    /// applied before it stays applied.
    pub async fn run<T>(&self, target: &mut T) -> Result<ApplySummary>
    where
        T: MigrationTarget + ?Sized,
    {
        target.lock().await?;
        let result = self.run_locked(target).await;
        let released = target.unlock().await;

        match (result, released) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unlock_err)) => {
                warn!(error = %unlock_err, "Failed to release migration lock after error");
                Err(e)
            }
        }
    }

    async fn run_locked<T>(&self, target: &mut T) -> Result<ApplySummary>
    where
        T: MigrationTarget + ?Sized,
    {
        let started = Instant::now();
        target.ensure_ledger().await?;
        let ledger = target.load_ledger().await?;
        let pending = plan(&self.migrations, &ledger, self.options)?;
        let skipped = self.migrations.len() - pending.len();

        if pending.is_empty() {
            info!(already_applied = skipped, "Schema is up to date");
        } else {
            info!(pending = pending.len(), already_applied = skipped, "Applying migrations");
        }

        let mut applied = Vec::with_capacity(pending.len());
        for migration in pending {
            match target.apply(migration).await {
                Ok(record) => applied.push(record),
                Err(e) => {
                    warn!(
                        version = migration.version,
                        name = migration.name.as_str(),
                        applied_before_failure = applied.len(),
                        error = %e,
                        "Migration failed, stopping"
                    );
                    return Err(e);
                }
            }
        }

        Ok(ApplySummary {
            applied,
            skipped,
            elapsed: started.elapsed(),
        })
    }

    /// Migrations that `run` would apply right now, without applying them.
    /// Does not create the ledger.
    pub async fn pending<T>(&self, target: &mut T) -> Result<Vec<Migration>>
    where
        T: MigrationTarget + ?Sized,
    {
        let ledger = target.load_ledger().await?;
        let pending = plan(&self.migrations, &ledger, self.options)?;
        Ok(pending.into_iter().cloned().collect())
    }

    /// Disk vs ledger listing. Read-only.
    pub async fn status<T>(&self, target: &mut T) -> Result<Vec<MigrationInfo>>
    where
        T: MigrationTarget + ?Sized,
    {
        let ledger = target.load_ledger().await?;
        Ok(status(&self.migrations, &ledger))
    }
}
