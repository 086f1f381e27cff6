//! Directory-backed script repository.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::script::MigrationScript;
use crate::source::{MigrationSource, order_and_validate};

/// Discovers `V<version>__<description>.sql` scripts in a single directory.
///
/// Non-SQL files are ignored so the directory can also hold notes or
/// fixtures; an `.sql` file that does not follow the naming convention is a
/// malformed script, not silently skipped.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl MigrationSource for DirectorySource {
    async fn discover(&self) -> Result<Vec<MigrationScript>> {
        let mut scripts = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file()
                || path.extension().is_none_or(|ext| ext != "sql")
            {
                debug!(path = %path.display(), "skipping non-script entry");
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let content = tokio::fs::read_to_string(&path).await?;
            scripts.push(MigrationScript::from_file_name(&name, content)?);
        }
        order_and_validate(scripts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrateError;
    use crate::script::Version;

    async fn write(dir: &Path, name: &str, content: &str) {
        tokio::fs::write(dir.join(name), content).await.unwrap();
    }

    #[tokio::test]
    async fn discovers_scripts_in_version_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "V2__add_genre.sql", "CREATE TABLE genre (id INT);").await;
        write(tmp.path(), "V10__add_rating.sql", "ALTER TABLE video ADD rating INT;").await;
        write(tmp.path(), "V1__create_video.sql", "CREATE TABLE video (id INT);").await;
        write(tmp.path(), "README.md", "not a script").await;

        let scripts = DirectorySource::new(tmp.path()).discover().await.unwrap();
        let versions: Vec<i64> = scripts.iter().map(|s| s.version.0).collect();
        // Numeric order, not the alphabetical order a directory listing gives.
        assert_eq!(versions, vec![1, 2, 10]);
        assert_eq!(scripts[2].description, "add rating");
    }

    #[tokio::test]
    async fn directories_are_skipped_even_with_sql_names() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "V1__create_video.sql", "CREATE TABLE video (id INT);").await;
        tokio::fs::create_dir(tmp.path().join("V2__archive.sql"))
            .await
            .unwrap();

        let scripts = DirectorySource::new(tmp.path()).discover().await.unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].version, Version(1));
    }

    #[tokio::test]
    async fn duplicate_versions_fail_discovery() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "V3__one.sql", "SELECT 1;").await;
        write(tmp.path(), "V3__two.sql", "SELECT 2;").await;

        let err = DirectorySource::new(tmp.path()).discover().await;
        assert!(matches!(
            err,
            Err(MigrateError::DuplicateVersion {
                version: Version(3),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn misnamed_sql_file_is_malformed() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "create_stuff.sql", "SELECT 1;").await;

        let err = DirectorySource::new(tmp.path()).discover().await;
        assert!(matches!(err, Err(MigrateError::MalformedScript { .. })));
    }
}
