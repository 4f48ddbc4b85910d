use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::load_orchestrator;

/// Check whether a newer release is published.
///
/// Always exits successfully when the check itself ran; an unreachable
/// server is reported as "no update" just like the update engine does.
#[derive(Args, Debug)]
pub struct CheckCommand {}

impl CheckCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let orchestrator = load_orchestrator(config).await?;
        println!("{}", "Checking for updates...".cyan());

        let check = orchestrator.check_for_update().await;

        match (check.current.as_deref(), &check.latest) {
            (_, None) => {
                println!("{}", "Could not determine the latest release".yellow());
            }
            (None, Some(latest)) => {
                println!(
                    "{}",
                    format!("Installed version unknown, latest release is {}", latest.version)
                        .yellow()
                );
            }
            (Some(current), Some(latest)) if check.available => {
                println!(
                    "{}",
                    format!("Update available: {} -> {}", current, latest.version).green()
                );
                println!("Run `refit upgrade` to install it");
            }
            (Some(current), Some(_)) => {
                println!("{}", format!("You are on the latest version ({current})").green());
            }
        }
        Ok(())
    }
}
