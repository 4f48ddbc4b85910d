use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::common::{OutputFormat, load_orchestrator};

/// Print recorded checksums of the installed components.
///
/// Only manifest entries whose name contains one of `query.component_names`
/// are listed. Prints nothing (or `{}`) when there is no local manifest.
#[derive(Args, Debug)]
pub struct ChecksumsCommand {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

impl ChecksumsCommand {
    pub async fn execute(self, config: Option<PathBuf>) -> Result<()> {
        let orchestrator = load_orchestrator(config).await?;
        let checksums = orchestrator.artifact_checksums().await;

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&checksums)?),
            OutputFormat::Text if checksums.is_empty() => {
                println!("{}", "No matching components recorded".yellow());
            }
            OutputFormat::Text => {
                let width = checksums.keys().map(String::len).max().unwrap_or(0);
                for (name, checksum) in &checksums {
                    println!("{}  {}", format!("{name:width$}").bold(), checksum);
                }
            }
        }
        Ok(())
    }
}
