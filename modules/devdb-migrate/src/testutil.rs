//! In-memory migration target for tests.
//!
//! Clones share one ledger and one lock, so two clones behave like two
//! processes pointed at the same database.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;

use crate::error::{MigrateError, Result};
use crate::ledger::AppliedMigration;
use crate::migration::Migration;
use crate::target::MigrationTarget;

#[derive(Default)]
struct MemoryState {
    ledger_exists: bool,
    ledger: BTreeMap<i64, AppliedMigration>,
    /// Every body execution, including ones that were rolled back.
    executed: Vec<i64>,
    failing: HashSet<i64>,
}

pub struct MemoryTarget {
    state: Arc<Mutex<MemoryState>>,
    lock: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Default for MemoryTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryTarget {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            lock: Arc::clone(&self.lock),
            guard: None,
        }
    }
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            lock: Arc::new(tokio::sync::Mutex::new(())),
            guard: None,
        }
    }

    /// Make the body of `version` fail when executed.
    pub fn fail_on(&self, version: i64) {
        self.state.lock().unwrap().failing.insert(version);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing.clear();
    }

    pub fn ledger_exists(&self) -> bool {
        self.state.lock().unwrap().ledger_exists
    }

    pub fn ledger_versions(&self) -> Vec<i64> {
        self.state.lock().unwrap().ledger.keys().copied().collect()
    }

    /// Versions whose bodies ran, in execution order.
    pub fn executed(&self) -> Vec<i64> {
        self.state.lock().unwrap().executed.clone()
    }

    /// Overwrite a ledger row's checksum, as if the body had been recorded differently.
    pub fn set_recorded_checksum(&self, version: i64, checksum: &str) {
        if let Some(row) = self.state.lock().unwrap().ledger.get_mut(&version) {
            row.checksum = checksum.to_string();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

#[async_trait]
impl MigrationTarget for MemoryTarget {
    async fn lock(&mut self) -> Result<()> {
        if self.guard.is_none() {
            self.guard = Some(Arc::clone(&self.lock).lock_owned().await);
        }
        Ok(())
    }

    async fn unlock(&mut self) -> Result<()> {
        self.guard = None;
        Ok(())
    }

    async fn ensure_ledger(&mut self) -> Result<()> {
        self.state.lock().unwrap().ledger_exists = true;
        Ok(())
    }

    async fn load_ledger(&mut self) -> Result<Vec<AppliedMigration>> {
        let state = self.state.lock().unwrap();
        Ok(state.ledger.values().cloned().collect())
    }

    async fn apply(&mut self, migration: &Migration) -> Result<AppliedMigration> {
        // Give a concurrent run the chance to interleave between plan and apply.
        tokio::task::yield_now().await;

        let mut state = self.state.lock().unwrap();
        state.executed.push(migration.version);

        if state.failing.contains(&migration.version) {
            return Err(MigrateError::Execution {
                version: migration.version,
                name: migration.name.clone(),
                source: format!("syntax error in {}", migration.path.display()).into(),
            });
        }
        if state.ledger.contains_key(&migration.version) {
            return Err(MigrateError::HistoryConflict(format!(
                "duplicate ledger row for version {}",
                migration.version
            )));
        }

        let record = AppliedMigration {
            version: migration.version,
            name: migration.name.clone(),
            checksum: migration.checksum.clone(),
            applied_at: Utc::now(),
            execution_ms: 0,
        };
        state.ledger.insert(migration.version, record.clone());
        Ok(record)
    }
}
