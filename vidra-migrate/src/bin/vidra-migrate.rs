//! Operator entry point for the migration engine.
//!
//! `vidra-migrate` runs the same engine the server invokes at startup:
//! `migrate` applies pending scripts, `status` reports the reconciliation
//! without writing, and `clean` drops schema and ledger - refused unless
//! destructive operations are enabled for the environment.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vidra_migrate::{
    DirectorySource, MigrateSettings, Migrator, PostgresStore,
};

#[derive(Parser, Debug)]
#[command(name = "vidra-migrate", about = "Vidra schema migration engine")]
struct Cli {
    /// Path to vidra.toml (defaults to ./vidra.toml, ./config/vidra.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply all pending migrations (the default)
    Migrate,
    /// Show applied and pending versions without writing anything
    Status,
    /// Drop the schema and migration history. Requires
    /// VIDRA_ALLOW_DESTRUCTIVE=true (or the equivalent file setting)
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = MigrateSettings::load(cli.config.as_deref())
        .context("failed to load migration settings")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&settings.database_url)
        .await
        .context("failed to connect to database")?;

    let source = DirectorySource::new(&settings.migrations_dir);
    let store = Arc::new(PostgresStore::new(
        pool,
        settings.schema.as_str(),
        settings.history_table.as_str(),
    ));
    let migrator = Migrator::new(Box::new(source), store)
        .with_guard(settings.guard_policy())
        .with_actor(settings.actor.as_str())
        .with_strict_history(settings.strict_history)
        .with_lock_wait(settings.lock_wait);

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => {
            let report = migrator.run().await?;
            println!(
                "applied {} of {} pending migration(s)",
                report.applied.len(),
                report.pending
            );
        }
        Command::Status => {
            let status = migrator.status().await?;
            for version in &status.applied {
                println!("applied  V{version}");
            }
            for version in &status.pending {
                println!("pending  V{version}");
            }
            if status.pending.is_empty() {
                println!("schema is up to date");
            }
        }
        Command::Clean => {
            migrator.clean().await?;
            println!("schema and migration history dropped");
        }
    }

    Ok(())
}
