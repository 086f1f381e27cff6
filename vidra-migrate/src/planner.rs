//! Reconciliation of the script repository against the history ledger.
//!
//! Planning is a pure function: same scripts and same history always produce
//! the same plan. Everything that touches a database lives in the executor
//! and the store.

use tracing::debug;

use crate::checksum;
use crate::error::{MigrateError, Result};
use crate::ledger::{HistoryRecord, applied_record};
use crate::script::MigrationScript;

/// Ordered set of migrations pending application in one run.
#[derive(Debug, Default)]
pub struct Plan {
    pub pending: Vec<MigrationScript>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

/// Computes the apply plan.
///
/// Scripts with no successful ledger record are pending. Scripts with one
/// are checksum-verified; a mismatch is fatal [`MigrateError::Drift`] - the
/// historical record no longer matches the script as currently defined, and
/// re-applying or ignoring it would both be wrong. With `strict` set, a
/// successful ledger record with no matching script raises
/// [`MigrateError::OrphanRecord`]; otherwise orphans are tolerated, since
/// scripts may legitimately be pruned post-release.
///
/// `scripts` must already be ordered ascending by version (every
/// [`crate::source::MigrationSource`] guarantees it); ordering never falls
/// back to discovery or filesystem order.
pub fn plan(scripts: &[MigrationScript], history: &[HistoryRecord], strict: bool) -> Result<Plan> {
    let mut pending = Vec::new();

    for script in scripts {
        match applied_record(history, script.version) {
            None => pending.push(script.clone()),
            Some(record) => {
                if !checksum::verify(&script.content, &record.checksum) {
                    return Err(MigrateError::Drift {
                        version: script.version,
                        recorded: record.checksum.clone(),
                        actual: script.checksum.clone(),
                    });
                }
                debug!(version = %script.version, "already applied, checksum verified");
            }
        }
    }

    if strict {
        for record in history.iter().filter(|r| r.success) {
            if !scripts.iter().any(|s| s.version == record.version) {
                return Err(MigrateError::OrphanRecord {
                    version: record.version,
                });
            }
        }
    }

    Ok(Plan { pending })
}
