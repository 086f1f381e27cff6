//! PostgreSQL-backed history ledger.
//!
//! Layout per deployment: one `schema_history` relation (name configurable)
//! in the target schema. A surrogate `id` keeps the ledger append-only while
//! the partial unique index on `(version) WHERE success` lets a failed
//! attempt be retried without ever letting a version succeed twice.
//!
//! Cross-instance mutual exclusion uses a session-scoped advisory lock keyed
//! off the qualified ledger name. The lock lives on a dedicated connection;
//! if the process dies mid-run, PostgreSQL drops the session and the lock
//! with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Row, pool::PoolConnection};
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::ledger::{HistoryRecord, MigrationStore, StoreLock};
use crate::script::{MigrationScript, Version};

/// Default name of the ledger relation.
pub const DEFAULT_HISTORY_TABLE: &str = "schema_history";

/// [`MigrationStore`] backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    schema: String,
    table: String,
    lock_key: i64,
}

impl PostgresStore {
    pub fn new(pool: PgPool, schema: impl Into<String>, table: impl Into<String>) -> Self {
        let schema = schema.into();
        let table = table.into();
        let lock_key = advisory_lock_key(&schema, &table);
        Self {
            pool,
            schema,
            table,
            lock_key,
        }
    }

    /// Store over the `public` schema with the default ledger name.
    pub fn with_defaults(pool: PgPool) -> Self {
        Self::new(pool, "public", DEFAULT_HISTORY_TABLE)
    }

    fn qualified_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Stable lock key for the ledger resource, shared by all instances that
/// point at the same schema and table.
fn advisory_lock_key(schema: &str, table: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(schema.as_bytes());
    hasher.update(b".");
    hasher.update(table.as_bytes());
    let digest = hasher.finalize();
    i64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Double-quotes an identifier so configured schema/table names cannot
/// smuggle SQL into the DDL we interpolate them into.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct PostgresLock {
    conn: PoolConnection<Postgres>,
    key: i64,
}

#[async_trait]
impl StoreLock for PostgresLock {
    async fn release(self: Box<Self>) -> Result<()> {
        let mut conn = self.conn;
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut *conn)
            .await?;
        if !released {
            // Session teardown will still free it; worth a trace.
            warn!(key = self.key, "advisory unlock reported no lock held");
        }
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for PostgresStore {
    async fn ensure_history(&self) -> Result<()> {
        let table = self.qualified_table();
        let index = quote_ident(&format!("{}_version_success_idx", self.table));
        let ddl = format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS {schema};
            CREATE TABLE IF NOT EXISTS {table} (
                id BIGSERIAL PRIMARY KEY,
                version BIGINT NOT NULL,
                description TEXT NOT NULL,
                checksum TEXT NOT NULL,
                applied_by TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                duration_ms BIGINT NOT NULL,
                success BOOLEAN NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS {index}
                ON {table} (version) WHERE success;
            "#,
            schema = quote_ident(&self.schema),
        );
        sqlx::raw_sql(&ddl).execute(&self.pool).await?;
        debug!(table = %self.qualified_table(), "history ledger ready");
        Ok(())
    }

    async fn load_history(&self) -> Result<Vec<HistoryRecord>> {
        let query = format!(
            "SELECT version, description, checksum, applied_by, applied_at, duration_ms, success \
             FROM {} ORDER BY id",
            self.qualified_table()
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut history = Vec::with_capacity(rows.len());
        for row in rows {
            history.push(HistoryRecord {
                version: Version(row.try_get::<i64, _>("version")?),
                description: row.try_get("description")?,
                checksum: row.try_get("checksum")?,
                applied_by: row.try_get("applied_by")?,
                applied_at: row.try_get::<DateTime<Utc>, _>("applied_at")?,
                duration_ms: row.try_get("duration_ms")?,
                success: row.try_get("success")?,
            });
        }
        Ok(history)
    }

    async fn try_acquire_lock(&self) -> Result<Option<Box<dyn StoreLock>>> {
        // Advisory locks are session-scoped, so the lock needs its own
        // connection held for the whole run.
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await?;
        if acquired {
            Ok(Some(Box::new(PostgresLock {
                conn,
                key: self.lock_key,
            })))
        } else {
            Ok(None)
        }
    }

    async fn apply(&self, script: &MigrationScript, actor: &str) -> Result<HistoryRecord> {
        let statements = script.statements()?;
        let mut tx = self.pool.begin().await?;

        let started = std::time::Instant::now();
        for statement in &statements {
            // `Executor::execute` on a `&str` takes the same unprepared
            // simple-query path as `sqlx::raw_sql`; spelled this way because
            // `raw_sql(..).execute(&mut *tx)` trips a rustc higher-ranked
            // lifetime inference bug (rust-lang/rust#102211).
            sqlx::Executor::execute(&mut *tx, statement.as_str())
                .await
                .map_err(|source| MigrateError::Execution {
                    version: script.version,
                    source,
                })?;
        }
        let duration_ms = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);

        let insert = format!(
            "INSERT INTO {} (version, description, checksum, applied_by, duration_ms, success) \
             VALUES ($1, $2, $3, $4, $5, TRUE) RETURNING applied_at",
            self.qualified_table()
        );
        let applied_at: DateTime<Utc> = sqlx::query_scalar(&insert)
            .bind(script.version.0)
            .bind(&script.description)
            .bind(&script.checksum)
            .bind(actor)
            .bind(duration_ms)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(HistoryRecord {
            version: script.version,
            description: script.description.clone(),
            checksum: script.checksum.clone(),
            applied_by: actor.to_string(),
            applied_at,
            duration_ms,
            success: true,
        })
    }

    async fn record_failure(
        &self,
        script: &MigrationScript,
        actor: &str,
        duration_ms: i64,
    ) -> Result<()> {
        let insert = format!(
            "INSERT INTO {} (version, description, checksum, applied_by, duration_ms, success) \
             VALUES ($1, $2, $3, $4, $5, FALSE)",
            self.qualified_table()
        );
        sqlx::query(&insert)
            .bind(script.version.0)
            .bind(&script.description)
            .bind(&script.checksum)
            .bind(actor)
            .bind(duration_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clean(&self) -> Result<()> {
        // Schema and ledger go together: a wiped schema with a surviving
        // ledger would claim migrations that no longer exist.
        let schema = quote_ident(&self.schema);
        let ddl = format!("DROP SCHEMA IF EXISTS {schema} CASCADE; CREATE SCHEMA {schema};");
        sqlx::raw_sql(&ddl).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_is_stable_and_scoped() {
        assert_eq!(
            advisory_lock_key("public", "schema_history"),
            advisory_lock_key("public", "schema_history"),
        );
        assert_ne!(
            advisory_lock_key("public", "schema_history"),
            advisory_lock_key("vidra", "schema_history"),
        );
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("schema_history"), "\"schema_history\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }
}
