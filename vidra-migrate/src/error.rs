use thiserror::Error;

use crate::script::Version;

/// Failure modes of the migration engine.
///
/// Only [`MigrateError::LockContention`] is safe to retry automatically;
/// every other variant aborts startup so the platform never serves traffic
/// against a schema it cannot account for.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: Version,
        first: String,
        second: String,
    },

    #[error("malformed migration script {name}: {reason}")]
    MalformedScript { name: String, reason: String },

    #[error(
        "checksum drift on applied migration V{version}: ledger has {recorded}, script is now {actual}"
    )]
    Drift {
        version: Version,
        recorded: String,
        actual: String,
    },

    #[error("ledger records applied migration V{version} but no such script exists")]
    OrphanRecord { version: Version },

    #[error("another instance holds the migration lock (waited {waited_ms}ms)")]
    LockContention { waited_ms: u64 },

    #[error("destructive operation `{operation}` is disabled in environment `{environment}`")]
    GuardedOperation {
        operation: String,
        environment: String,
    },

    #[error("migration V{version} failed: {source}")]
    Execution {
        version: Version,
        #[source]
        source: sqlx::Error,
    },
}

pub type Result<T> = std::result::Result<T, MigrateError>;
