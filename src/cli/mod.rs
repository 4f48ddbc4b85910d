//! Command-line interface for refit.
//!
//! Each subcommand lives in its own module with its own argument structure and
//! an `execute` function. All of them load the [`UpdaterConfig`], build an
//! [`UpdateOrchestrator`](crate::upgrade::UpdateOrchestrator) from it and print
//! the outcome.
//!
//! # Available Commands
//!
//! - `check` - Check whether a newer release is published
//! - `upgrade` - Back up, sync artifacts, finalize and migrate
//! - `migrate` - Run a schema migration between two explicit versions
//! - `sync-db` - Migrate the database when its recorded version is behind
//! - `rollback` - Restore the installation from a snapshot
//! - `checksums` - Print recorded checksums of the installed components
//! - `status` - Show installed and latest versions and persisted state
//!
//! # Example
//!
//! ```bash
//! refit check
//! refit --config /opt/registration/refit.toml upgrade
//! refit rollback --snapshot /opt/registration/backup/1.0.0_2024-03-15T09-30-07.000Z
//! ```

mod check;
mod checksums;
pub mod common;
mod migrate;
mod rollback;
mod status;
mod upgrade;


use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Top-level command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "refit",
    about = "Upgrade an installed application in place from a release server",
    version,
    long_about = "refit reconciles an installation with the manifest of the latest published \
                  release, downloading only the artifacts that changed, snapshotting the \
                  installation first and restoring it if anything fails."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    ///
    /// Equivalent to `RUST_LOG=debug`. Mutually exclusive with `--quiet`.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to the configuration file.
    ///
    /// Defaults to `~/.refit/config.toml`, or built-in defaults when that
    /// file does not exist.
    #[arg(short, long, global = true, env = "REFIT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether a newer release is published.
    ///
    /// Records the answer in the `update.available` setting.
    Check(check::CheckCommand),

    /// Upgrade the installation to the latest release.
    Upgrade(upgrade::UpgradeCommand),

    /// Run a schema migration between two explicit versions.
    Migrate(migrate::MigrateCommand),

    /// Migrate the database if its recorded version differs from the installed one.
    SyncDb(migrate::SyncDbCommand),

    /// Restore the installation from a snapshot.
    Rollback(rollback::RollbackCommand),

    /// Print recorded checksums of the installed components.
    Checksums(checksums::ChecksumsCommand),

    /// Show installed and latest versions and persisted update state.
    Status(status::StatusCommand),
}

impl Cli {
    /// Log filter implied by `--verbose` / `--quiet`.
    ///
    /// Without either flag `RUST_LOG` is honored, falling back to `info`.
    #[must_use]
    pub fn log_filter(&self) -> EnvFilter {
        if self.verbose {
            EnvFilter::new("debug")
        } else if self.quiet {
            EnvFilter::new("error")
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
    }

    /// Run the selected subcommand.
    pub async fn execute(self) -> Result<()> {
        let config = self.config;
        match self.command {
            Commands::Check(cmd) => cmd.execute(config).await,
            Commands::Upgrade(cmd) => cmd.execute(config).await,
            Commands::Migrate(cmd) => cmd.execute(config).await,
            Commands::SyncDb(cmd) => cmd.execute(config).await,
            Commands::Rollback(cmd) => cmd.execute(config).await,
            Commands::Checksums(cmd) => cmd.execute(config).await,
            Commands::Status(cmd) => cmd.execute(config).await,
        }
    }
}
