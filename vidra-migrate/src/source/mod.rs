//! Script repositories.
//!
//! Discovery is behind [`MigrationSource`] so the planner and executor never
//! care whether scripts come from a directory scan or are compiled into the
//! binary. Every source returns scripts sorted ascending by version and
//! rejects duplicate version tokens outright.

pub mod directory;
pub mod embedded;

pub use directory::DirectorySource;
pub use embedded::EmbeddedSource;

use async_trait::async_trait;

use crate::error::{MigrateError, Result};
use crate::script::MigrationScript;

/// A discoverable, read-only collection of migration scripts.
#[async_trait]
pub trait MigrationSource: Send + Sync {
    /// All known scripts, sorted ascending by version token.
    ///
    /// Fails with [`MigrateError::DuplicateVersion`] when two scripts share a
    /// token and [`MigrateError::MalformedScript`] when one cannot be parsed.
    async fn discover(&self) -> Result<Vec<MigrationScript>>;
}

/// Sorts by version and rejects duplicate tokens. Shared by every source.
pub(crate) fn order_and_validate(
    mut scripts: Vec<MigrationScript>,
) -> Result<Vec<MigrationScript>> {
    scripts.sort_by_key(|script| script.version);
    for pair in scripts.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(MigrateError::DuplicateVersion {
                version: pair[0].version,
                first: pair[0].origin.clone(),
                second: pair[1].origin.clone(),
            });
        }
    }
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Version;

    fn script(version: i64, origin: &str) -> MigrationScript {
        MigrationScript::new(Version(version), "test", "SELECT 1;", origin).unwrap()
    }

    #[test]
    fn orders_by_version_not_insertion() {
        let ordered = order_and_validate(vec![
            script(3, "V3__c.sql"),
            script(1, "V1__a.sql"),
            script(2, "V2__b.sql"),
        ])
        .unwrap();
        let versions: Vec<i64> = ordered.iter().map(|s| s.version.0).collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[test]
    fn rejects_duplicate_versions() {
        let err = order_and_validate(vec![
            script(2, "V2__first.sql"),
            script(2, "V2__second.sql"),
        ]);
        assert!(matches!(
            err,
            Err(MigrateError::DuplicateVersion {
                version: Version(2),
                ..
            })
        ));
    }
}
