use anyhow::{Result, bail};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_orchestrator;
use crate::upgrade::{UpgradeOptions, UpgradeOutcome, UpgradeReport};

/// Upgrade the installation to the latest release.
///
/// The installation is snapshotted before anything is modified. If syncing,
/// finalizing or migrating fails the snapshot is restored and the command
/// exits with an error carrying the result code.
///
/// # Examples
///
/// ```bash
/// refit upgrade
///
/// # Re-verify every artifact even when already on the latest release
/// refit upgrade --force
/// ```
#[derive(Args, Debug)]
pub struct UpgradeCommand {
    /// Reconcile artifacts even if the installed version is the latest.
    #[arg(short, long)]
    pub force: bool,
}

impl UpgradeCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let mut orchestrator = load_orchestrator(config).await?;
        println!("{}", "Upgrading to the latest release...".cyan());

        let report = orchestrator
            .upgrade(UpgradeOptions {
                force: self.force,
            })
            .await;
        print_report(&report);

        match &report.outcome {
            UpgradeOutcome::AlreadyCurrent { .. } | UpgradeOutcome::Completed { .. } => Ok(()),
            UpgradeOutcome::Aborted { reason }
            | UpgradeOutcome::RolledBack { reason }
            | UpgradeOutcome::FailedIrrecoverable { reason } => {
                bail!("Upgrade failed ({}): {}", report.code(), reason)
            }
        }
    }
}

fn print_report(report: &UpgradeReport) {
    let path = report.transitions.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ");
    println!("{} {}", "States:".dimmed(), path.dimmed());

    if let Some(sync) = &report.sync {
        println!(
            "Artifacts: {} downloaded, {} unchanged, {} deleted",
            sync.downloaded.len(),
            sync.skipped.len(),
            sync.deleted.len()
        );
        for (name, reason) in &sync.failed {
            println!("{}", format!("  failed {name}: {reason}").yellow());
        }
        if !sync.failed.is_empty() {
            println!(
                "{}",
                "Failed artifacts keep their previous content; run `refit upgrade --force` to retry"
                    .yellow()
            );
        }
    }

    if let Some(migration) = &report.migration {
        println!("Database: {}", migration);
    }

    match &report.outcome {
        UpgradeOutcome::AlreadyCurrent { version } => {
            println!("{}", format!("Already on the latest version ({version})").green());
        }
        UpgradeOutcome::Completed { from, to } => {
            println!(
                "{}",
                format!("Upgraded {} -> {}", from.as_deref().unwrap_or("unknown"), to).green()
            );
        }
        UpgradeOutcome::Aborted { .. } => {
            println!("{}", "Upgrade aborted, nothing was changed".yellow());
        }
        UpgradeOutcome::RolledBack { .. } => {
            println!("{}", "Upgrade failed, the previous installation was restored".red());
        }
        UpgradeOutcome::FailedIrrecoverable { .. } => {
            eprintln!("{}", "Upgrade failed and the installation could not be restored".red().bold());
            if let Some(snapshot) = &report.snapshot {
                eprintln!("Snapshot is located at: {}", snapshot.display());
            }
        }
    }
}
