use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;

use super::common::{OutputFormat, load_orchestrator};
use crate::upgrade::StatusReport;

/// Show installed and latest versions and persisted update state.
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl StatusCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let orchestrator = load_orchestrator(config).await?;
        let status = orchestrator.status().await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&to_json(&status))?),
            OutputFormat::Text => print_text(&status),
        }
        Ok(())
    }
}

fn to_json(status: &StatusReport) -> serde_json::Value {
    json!({
        "current": status.current,
        "latest": status.latest.as_ref().map(|l| &l.version),
        "last_updated": status.latest.as_ref().map(|l| &l.last_updated),
        "release_time": status.release_timestamp.map(|t| t.as_datetime().to_string()),
        "recorded_snapshot": status.recorded_snapshot.as_ref().map(|p| p.display().to_string()),
        "services_version": status.services_version,
        "update_available": status.update_available,
    })
}

fn print_text(status: &StatusReport) {
    let unknown = || "unknown".dimmed().to_string();

    println!(
        "Installed version:  {}",
        status.current.clone().unwrap_or_else(unknown).bold()
    );
    match (&status.latest, status.release_timestamp) {
        (Some(latest), Some(at)) => {
            println!("Latest release:     {} (published {})", latest.version.bold(), at.as_datetime());
        }
        (Some(latest), None) => println!("Latest release:     {}", latest.version.bold()),
        (None, _) => println!("Latest release:     {}", unknown()),
    }
    println!(
        "Database version:   {}",
        status.services_version.clone().unwrap_or_else(unknown)
    );
    println!(
        "Update available:   {}",
        status.update_available.clone().unwrap_or_else(unknown)
    );
    match &status.recorded_snapshot {
        Some(path) => println!("Recorded snapshot:  {}", path.display()),
        None => println!("Recorded snapshot:  {}", "none".dimmed()),
    }
}
