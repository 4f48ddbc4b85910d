//! Common utilities for CLI commands

use anyhow::{Context, Result};
use colored::Colorize;
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::UpdaterConfig;
use crate::transport::HttpTransport;
use crate::upgrade::UpdateOrchestrator;

/// Output format for commands that print structured data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON on stdout
    Json,
}

/// Load the configuration from `config_path`, or the default location.
pub async fn load_config(config_path: Option<PathBuf>) -> Result<UpdaterConfig> {
    UpdaterConfig::load_with_optional(config_path).await.context("Failed to load refit configuration")
}

/// Build the HTTP-backed orchestrator described by the configuration.
pub async fn load_orchestrator(
    config_path: Option<PathBuf>,
) -> Result<UpdateOrchestrator<HttpTransport>> {
    let config = load_config(config_path).await?;
    UpdateOrchestrator::from_config(&config).context("Failed to set up the updater")
}

/// Ask a yes/no question on the terminal.
///
/// Returns `default` without prompting when stdin is not a terminal.
pub async fn confirm(question: &str, default: bool) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(default);
    }

    let hint = if default { "[Y/n]" } else { "[y/N]" };
    print!("{} ", format!("{question} {hint}:").yellow());
    io::stdout().flush()?;

    let mut reader = BufReader::new(tokio::io::stdin());
    let mut response = String::new();
    reader.read_line(&mut response).await?;

    Ok(parse_answer(&response, default))
}

fn parse_answer(response: &str, default: bool) -> bool {
    match response.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        _ => false,
    }
}
