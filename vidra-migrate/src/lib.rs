//! # Vidra Migrate
//!
//! Schema migration engine for the Vidra media platform. It evolves a single
//! PostgreSQL schema forward, deterministically and safely, and runs once at
//! process startup before the platform serves any traffic.
//!
//! ## Overview
//!
//! - **Script repository**: versioned `V<n>__<description>.sql` units,
//!   discovered from a directory or compiled into the binary
//! - **History ledger**: append-only `schema_history` relation recording
//!   every apply attempt with checksum, actor, and duration
//! - **Planner**: pure reconciliation of repository against ledger, with
//!   checksum drift detection
//! - **Executor**: one transaction per migration, ledger entry committed in
//!   the same atomic unit, halt on first failure
//! - **Guard policy**: destructive operations (schema clean) disabled unless
//!   explicitly enabled per environment
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vidra_migrate::{DirectorySource, Migrator, PostgresStore};
//!
//! async fn migrate_at_startup(pool: sqlx::PgPool) -> anyhow::Result<()> {
//!     let source = DirectorySource::new("migrations");
//!     let store = Arc::new(PostgresStore::with_defaults(pool));
//!     let report = Migrator::new(Box::new(source), store).run().await?;
//!     println!("applied {} migrations", report.applied.len());
//!     Ok(())
//! }
//! ```
//!
//! Concurrent instances coordinate through an advisory lock on the ledger;
//! exactly one applies each pending migration, the rest wait or fail fast
//! with [`MigrateError::LockContention`].

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Content fingerprints for drift detection
pub mod checksum;
/// Error types and the crate-wide `Result` alias
pub mod error;
/// Apply orchestration and the cross-instance run loop
pub mod executor;
/// Gate for destructive administrative operations
pub mod guard;
/// Durable history of applied migrations
pub mod ledger;
/// Repository/ledger reconciliation
pub mod planner;
/// Versioned migration scripts and SQL statement splitting
pub mod script;
/// Engine configuration (TOML file + environment overlay)
pub mod settings;
/// Script repositories
pub mod source;

pub use error::{MigrateError, Result};
pub use executor::{MigrateReport, Migrator, StatusReport};
pub use guard::GuardPolicy;
pub use ledger::{HistoryRecord, MigrationStore, PostgresStore, StoreLock};
pub use planner::{Plan, plan};
pub use script::{MigrationScript, Version};
pub use settings::{MigrateSettings, SettingsError};
pub use source::{DirectorySource, EmbeddedSource, MigrationSource};
