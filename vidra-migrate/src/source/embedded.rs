//! Compiled-in script repository.

use async_trait::async_trait;

use crate::error::Result;
use crate::script::{MigrationScript, Version};
use crate::source::MigrationSource;

/// Scripts baked into the binary as `(version, description, sql)` triples.
///
/// Used by deployments that ship their schema with the binary instead of a
/// scripts directory, and by tests that need a repository without touching
/// the filesystem.
#[derive(Debug, Clone)]
pub struct EmbeddedSource {
    scripts: &'static [(i64, &'static str, &'static str)],
}

impl EmbeddedSource {
    pub const fn new(scripts: &'static [(i64, &'static str, &'static str)]) -> Self {
        Self { scripts }
    }
}

#[async_trait]
impl MigrationSource for EmbeddedSource {
    async fn discover(&self) -> Result<Vec<MigrationScript>> {
        let mut scripts = Vec::with_capacity(self.scripts.len());
        for (version, description, sql) in self.scripts {
            scripts.push(MigrationScript::new(
                Version(*version),
                *description,
                *sql,
                format!("embedded V{version}"),
            )?);
        }
        crate::source::order_and_validate(scripts)
    }
}
