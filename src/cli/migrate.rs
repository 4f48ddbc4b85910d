//! Database schema migration commands.

use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_orchestrator;
use crate::upgrade::MigrationReport;

/// Run a schema migration between two explicit versions.
///
/// Scripts are read from `{sql_dir}/{core}/initial_db_scripts.sql`, where
/// `core` is the target version up to its first `-`. On failure
/// `rollback_scripts.sql` runs and the recorded snapshot is restored.
///
/// # Examples
///
/// ```bash
/// refit migrate 1.2.0-rc1 1.1.0
/// ```
#[derive(Args, Debug)]
pub struct MigrateCommand {
    /// Version to migrate to.
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Version the database is currently at.
    #[arg(value_name = "PREVIOUS")]
    pub previous: String,
}

impl MigrateCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let mut orchestrator = load_orchestrator(config).await?;
        println!(
            "{}",
            format!("Migrating database {} -> {}...", self.previous, self.target).cyan()
        );

        let report = orchestrator.migrate(&self.target, &self.previous).await?;
        finish(&report)
    }
}

/// Migrate the database when its recorded version differs from the installed one.
#[derive(Args, Debug)]
pub struct SyncDbCommand {}

impl SyncDbCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let mut orchestrator = load_orchestrator(config).await?;

        match orchestrator.update_database().await {
            Some(report) => finish(&report),
            None => {
                println!("{}", "Database is up to date".green());
                Ok(())
            }
        }
    }
}

fn finish(report: &MigrationReport) -> Result<()> {
    if report.is_success() {
        println!("{}", report.to_string().green());
        Ok(())
    } else {
        eprintln!("{}", report.to_string().red());
        bail!("Migration failed ({})", report.code())
    }
}
