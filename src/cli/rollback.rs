use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::{confirm, load_orchestrator};
use crate::upgrade::RollbackOutcome;

/// Restore the installation from a snapshot.
///
/// Without `--snapshot` the snapshot recorded by the last backup is used,
/// falling back to the newest directory under the backup root. `bin/` and
/// `lib/` are mirrored from the snapshot, so files added since are removed.
///
/// # Examples
///
/// ```bash
/// refit rollback
/// refit rollback --snapshot /opt/app/backup/1.0.0_2024-03-15T09-30-07.000Z --yes
/// ```
#[derive(Args, Debug)]
pub struct RollbackCommand {
    /// Snapshot directory to restore.
    #[arg(long, value_name = "PATH")]
    pub snapshot: Option<PathBuf>,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub yes: bool,
}

impl RollbackCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let orchestrator = load_orchestrator(config).await?;

        if !self.yes
            && !confirm("This replaces the installed bin/ and lib/ directories. Continue?", true)
                .await?
        {
            println!("{}", "Rollback cancelled.".yellow());
            return Ok(());
        }

        println!("{}", "Rolling back installation...".yellow());
        let outcome = orchestrator
            .rollback(self.snapshot)
            .await
            .context("Failed to restore from snapshot")?;

        match outcome {
            RollbackOutcome::Restored => {
                println!("{}", "Installation restored from snapshot".green());
                Ok(())
            }
            RollbackOutcome::SnapshotMissing => bail!("Snapshot does not exist. Cannot rollback."),
        }
    }
}
