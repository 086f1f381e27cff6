//! In-memory [`MigrationStore`] for exercising the executor without a
//! database. Statements containing `boom` fail, which lets tests drive the
//! failure path deterministically.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use vidra_migrate::ledger::{HistoryRecord, MigrationStore, StoreLock};
use vidra_migrate::script::MigrationScript;
use vidra_migrate::{MigrateError, Result};

#[derive(Default)]
struct StoreState {
    bootstrapped: bool,
    locked: bool,
    history: Vec<HistoryRecord>,
    /// Stand-in for schema state: every statement durably applied, in order.
    schema: Vec<String>,
}

/// Shared fake store; clones see the same state, like pool handles onto the
/// same database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("store mutex poisoned")
    }

    pub fn history(&self) -> Vec<HistoryRecord> {
        self.lock_state().history.clone()
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.lock_state().bootstrapped
    }

    pub fn schema(&self) -> Vec<String> {
        self.lock_state().schema.clone()
    }

    pub fn successful_versions(&self) -> Vec<i64> {
        self.lock_state()
            .history
            .iter()
            .filter(|r| r.success)
            .map(|r| r.version.0)
            .collect()
    }
}

struct MemoryLock {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl StoreLock for MemoryLock {
    async fn release(self: Box<Self>) -> Result<()> {
        self.state.lock().expect("store mutex poisoned").locked = false;
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for MemoryStore {
    async fn ensure_history(&self) -> Result<()> {
        self.lock_state().bootstrapped = true;
        Ok(())
    }

    async fn load_history(&self) -> Result<Vec<HistoryRecord>> {
        Ok(self.history())
    }

    async fn try_acquire_lock(&self) -> Result<Option<Box<dyn StoreLock>>> {
        let mut state = self.lock_state();
        if state.locked {
            return Ok(None);
        }
        state.locked = true;
        Ok(Some(Box::new(MemoryLock {
            state: Arc::clone(&self.state),
        })))
    }

    async fn apply(&self, script: &MigrationScript, actor: &str) -> Result<HistoryRecord> {
        let statements = script.statements()?;
        let mut state = self.lock_state();
        // All or nothing, like the real transaction.
        if let Some(bad) = statements.iter().find(|s| s.contains("boom")) {
            return Err(MigrateError::Execution {
                version: script.version,
                source: sqlx::Error::Protocol(format!("simulated failure in `{bad}`")),
            });
        }
        state.schema.extend(statements.iter().cloned());
        let record = HistoryRecord {
            version: script.version,
            description: script.description.clone(),
            checksum: script.checksum.clone(),
            applied_by: actor.to_string(),
            applied_at: Utc::now(),
            duration_ms: 0,
            success: true,
        };
        state.history.push(record.clone());
        Ok(record)
    }

    async fn record_failure(
        &self,
        script: &MigrationScript,
        actor: &str,
        duration_ms: i64,
    ) -> Result<()> {
        self.lock_state().history.push(HistoryRecord {
            version: script.version,
            description: script.description.clone(),
            checksum: script.checksum.clone(),
            applied_by: actor.to_string(),
            applied_at: Utc::now(),
            duration_ms,
            success: false,
        });
        Ok(())
    }

    async fn clean(&self) -> Result<()> {
        let mut state = self.lock_state();
        state.history.clear();
        state.schema.clear();
        state.bootstrapped = false;
        Ok(())
    }
}
