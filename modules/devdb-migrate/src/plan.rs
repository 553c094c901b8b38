use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{MigrateError, Result};
use crate::ledger::AppliedMigration;
use crate::migration::Migration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Tolerate ledger rows whose migration file no longer exists.
    pub ignore_missing: bool,
}

/// Compute the migrations still to apply, in version order.
///
/// Refuses to plan when history has diverged: an applied migration was
/// edited, an applied migration vanished from disk, or a pending migration
/// sorts below one that is already applied.
pub fn plan<'a>(
    migrations: &'a [Migration],
    applied: &[AppliedMigration],
    options: PlanOptions,
) -> Result<Vec<&'a Migration>> {
    let known: BTreeMap<i64, &Migration> = migrations.iter().map(|m| (m.version, m)).collect();
    let recorded: BTreeMap<i64, &AppliedMigration> = applied.iter().map(|a| (a.version, a)).collect();

    for record in recorded.values() {
        if let Some(migration) = known.get(&record.version) {
            if migration.checksum != record.checksum {
                return Err(MigrateError::ChecksumMismatch {
                    version: record.version,
                    name: migration.name.clone(),
                    recorded: record.checksum.clone(),
                    found: migration.checksum.clone(),
                });
            }
        }
    }

    if !options.ignore_missing {
        if let Some(record) = recorded.values().find(|r| !known.contains_key(&r.version)) {
            return Err(MigrateError::HistoryConflict(format!(
                "migration {} ({}) is recorded as applied but its file is missing",
                record.version, record.name
            )));
        }
    }

    let max_applied = recorded.keys().next_back().copied();
    let pending: Vec<&Migration> = known
        .values()
        .filter(|m| !recorded.contains_key(&m.version))
        .copied()
        .collect();

    if let (Some(max_applied), Some(first)) = (max_applied, pending.first()) {
        if first.version < max_applied {
            return Err(MigrateError::HistoryConflict(format!(
                "migration {} ({}) is pending but migration {max_applied} is already applied; \
                 give it a version above {max_applied}",
                first.version, first.name
            )));
        }
    }

    Ok(pending)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Applied { applied_at: DateTime<Utc> },
    Pending,
    /// Applied, but the file on disk no longer matches the recorded checksum.
    Modified { recorded_checksum: String },
    /// Recorded in the ledger with no file on disk.
    Missing { applied_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationInfo {
    pub version: i64,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Per-version view of disk vs ledger, in version order. Never fails on
/// divergence; that is what it is for.
pub fn status(migrations: &[Migration], applied: &[AppliedMigration]) -> Vec<MigrationInfo> {
    let mut rows: BTreeMap<i64, MigrationInfo> = BTreeMap::new();
    let recorded: BTreeMap<i64, &AppliedMigration> = applied.iter().map(|a| (a.version, a)).collect();

    for m in migrations {
        let state = match recorded.get(&m.version) {
            Some(r) if r.checksum == m.checksum => MigrationState::Applied {
                applied_at: r.applied_at,
            },
            Some(r) => MigrationState::Modified {
                recorded_checksum: r.checksum.clone(),
            },
            None => MigrationState::Pending,
        };
        rows.insert(
            m.version,
            MigrationInfo {
                version: m.version,
                name: m.name.clone(),
                state,
            },
        );
    }

    for r in applied {
        rows.entry(r.version).or_insert_with(|| MigrationInfo {
            version: r.version,
            name: r.name.clone(),
            state: MigrationState::Missing {
                applied_at: r.applied_at,
            },
        });
    }

    rows.into_values().collect()
}
