//! The migration executor: applies a plan against the live database.
//!
//! One run is strictly sequential - each pending migration goes through its
//! own transaction, in version order, with the ledger entry committing in the
//! same atomic unit as the schema change. Across instances, a database-side
//! advisory lock totally orders runs: the plan is computed only after the
//! lock is held, so a racing peer's work is always visible before anything
//! is applied.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::error::{MigrateError, Result};
use crate::guard::GuardPolicy;
use crate::ledger::MigrationStore;
use crate::planner::{self, Plan};
use crate::script::Version;
use crate::source::MigrationSource;

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_RETRY: Duration = Duration::from_millis(500);

/// Outcome of one migrate run.
#[derive(Debug, Default)]
pub struct MigrateReport {
    /// How many migrations were pending when the plan was computed.
    pub pending: usize,
    /// Versions applied by this run, in order.
    pub applied: Vec<Version>,
}

/// Point-in-time reconciliation summary, read-only.
#[derive(Debug)]
pub struct StatusReport {
    pub applied: Vec<Version>,
    pub pending: Vec<Version>,
}

/// Orchestrates discovery, planning, and sequential apply.
pub struct Migrator {
    source: Box<dyn MigrationSource>,
    store: Arc<dyn MigrationStore>,
    guard: GuardPolicy,
    actor: String,
    strict_history: bool,
    lock_wait: Duration,
    lock_retry: Duration,
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("actor", &self.actor)
            .field("strict_history", &self.strict_history)
            .field("lock_wait", &self.lock_wait)
            .finish()
    }
}

impl Migrator {
    pub fn new(source: Box<dyn MigrationSource>, store: Arc<dyn MigrationStore>) -> Self {
        Self {
            source,
            store,
            guard: GuardPolicy::default(),
            actor: "vidra".to_string(),
            strict_history: false,
            lock_wait: DEFAULT_LOCK_WAIT,
            lock_retry: DEFAULT_LOCK_RETRY,
        }
    }

    pub fn with_guard(mut self, guard: GuardPolicy) -> Self {
        self.guard = guard;
        self
    }

    /// Actor/environment tag written into every ledger record.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Refuse to run when the ledger holds a successful record with no
    /// matching script.
    pub fn with_strict_history(mut self, strict: bool) -> Self {
        self.strict_history = strict;
        self
    }

    /// Bounded wait for the cross-instance lock before giving up with
    /// [`MigrateError::LockContention`].
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn with_lock_retry(mut self, retry: Duration) -> Self {
        self.lock_retry = retry;
        self
    }

    /// Applies every pending migration, in order, stopping at the first
    /// failure. The single entry point the platform calls at startup.
    pub async fn run(&self) -> Result<MigrateReport> {
        let lock = self.acquire_lock().await?;
        let outcome = self.apply_pending().await;
        let released = lock.release().await;

        let report = outcome?;
        released?;

        if report.applied.is_empty() {
            info!(pending = report.pending, "schema already up to date");
        } else {
            info!(
                applied = report.applied.len(),
                "schema migration complete"
            );
        }
        Ok(report)
    }

    /// Reconciliation summary for diagnostics. Never takes the lock and
    /// never applies anything, though it does bootstrap the ledger relation
    /// on a first run so the history can be read.
    pub async fn status(&self) -> Result<StatusReport> {
        self.store.ensure_history().await?;
        let scripts = self.source.discover().await?;
        let history = self.store.load_history().await?;
        let plan = planner::plan(&scripts, &history, self.strict_history)?;
        let pending: Vec<Version> = plan.pending.iter().map(|s| s.version).collect();
        let applied = scripts
            .iter()
            .map(|s| s.version)
            .filter(|v| !pending.contains(v))
            .collect();
        Ok(StatusReport { applied, pending })
    }

    /// Drops schema and ledger together. Consults the guard policy first and
    /// refuses with [`MigrateError::GuardedOperation`] unless destructive
    /// operations were explicitly enabled for this environment.
    pub async fn clean(&self) -> Result<()> {
        self.guard.ensure_destructive_allowed("clean")?;
        warn!(
            environment = self.guard.environment(),
            "dropping schema and migration history"
        );
        self.store.clean().await
    }

    async fn acquire_lock(&self) -> Result<Box<dyn crate::ledger::StoreLock>> {
        let started = Instant::now();
        let mut backoff = self.lock_retry;
        loop {
            if let Some(lock) = self.store.try_acquire_lock().await? {
                return Ok(lock);
            }
            let waited = started.elapsed();
            if waited >= self.lock_wait {
                return Err(MigrateError::LockContention {
                    waited_ms: waited.as_millis() as u64,
                });
            }
            warn!(
                waited_ms = waited.as_millis() as u64,
                "migration lock held by another instance, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(5));
        }
    }

    /// Plans and applies under the already-held lock.
    async fn apply_pending(&self) -> Result<MigrateReport> {
        // Bootstrap only while holding the lock: `IF NOT EXISTS` DDL is not
        // race-safe across sessions on a first concurrent boot.
        self.store.ensure_history().await?;

        let scripts = self.source.discover().await?;
        // History must be read after lock acquisition: a racing peer may have
        // applied part of the repository while we waited.
        let history = self.store.load_history().await?;
        let plan: Plan = planner::plan(&scripts, &history, self.strict_history)?;

        let mut report = MigrateReport {
            pending: plan.len(),
            ..MigrateReport::default()
        };

        for script in &plan.pending {
            info!(
                version = %script.version,
                description = %script.description,
                "applying migration"
            );
            let started = Instant::now();
            match self.store.apply(script, &self.actor).await {
                Ok(record) => {
                    info!(
                        version = %script.version,
                        duration_ms = record.duration_ms,
                        "migration applied"
                    );
                    report.applied.push(script.version);
                }
                Err(err @ MigrateError::Execution { .. }) => {
                    // The transaction rolled back; persist the failed attempt
                    // and halt. Later migrations may depend on this one.
                    error!(
                        version = %script.version,
                        error = %err,
                        "migration failed, halting run"
                    );
                    let duration_ms =
                        i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
                    if let Err(ledger_err) = self
                        .store
                        .record_failure(script, &self.actor, duration_ms)
                        .await
                    {
                        error!(error = %ledger_err, "could not record failed attempt");
                    }
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }
}
