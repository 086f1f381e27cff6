//! The history ledger: durable, append-only record of applied migrations.
//!
//! The ledger is the single source of truth for coordination. The engine
//! never caches applied state across runs; every run replays the ledger
//! through the planner. [`MigrationStore`] is the transactional seam the
//! executor talks through - PostgreSQL in production
//! ([`postgres::PostgresStore`]), an in-memory fake in tests.

pub mod postgres;

pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::script::{MigrationScript, Version};

/// One ledger entry per apply attempt. Never updated or deleted by normal
/// operation; only the guarded clean path removes records, and it removes
/// the schema with them.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub version: Version,
    pub description: String,
    /// Checksum of the script at the time it was applied.
    pub checksum: String,
    pub applied_by: String,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub success: bool,
}

impl HistoryRecord {
    /// Whether this record marks `version` as durably applied.
    pub fn is_applied(&self) -> bool {
        self.success
    }
}

/// Exclusive hold on the cross-instance migration lock.
///
/// Dropping the handle without calling [`StoreLock::release`] must still
/// free the lock eventually (the PostgreSQL implementation ties it to a
/// session), so a crashed instance cannot wedge its peers forever.
#[async_trait]
pub trait StoreLock: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Transactional persistence seam consumed by the executor.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Creates the ledger relation if this is the first run.
    async fn ensure_history(&self) -> Result<()>;

    /// Every recorded attempt, oldest first.
    async fn load_history(&self) -> Result<Vec<HistoryRecord>>;

    /// Non-blocking attempt at the cross-instance lock. `None` means another
    /// instance currently holds it; the caller decides whether to retry.
    async fn try_acquire_lock(&self) -> Result<Option<Box<dyn StoreLock>>>;

    /// Runs the script's statements and appends the success record in one
    /// atomic unit: either both commit or neither does. Statement failures
    /// surface as [`crate::MigrateError::Execution`] with nothing persisted.
    async fn apply(&self, script: &MigrationScript, actor: &str) -> Result<HistoryRecord>;

    /// Appends a failed attempt. A failure record never blocks a retry of
    /// the same version on a later run.
    async fn record_failure(
        &self,
        script: &MigrationScript,
        actor: &str,
        duration_ms: i64,
    ) -> Result<()>;

    /// Drops schema and ledger together. Callers must consult the guard
    /// policy first; the store itself does not.
    async fn clean(&self) -> Result<()>;
}

/// The latest successful record per version, if any.
pub fn applied_record<'a>(
    history: &'a [HistoryRecord],
    version: Version,
) -> Option<&'a HistoryRecord> {
    history
        .iter()
        .rev()
        .find(|record| record.version == version && record.is_applied())
}
