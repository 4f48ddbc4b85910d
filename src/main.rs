//! refit CLI entry point
//!
//! Parses arguments, sets up logging, runs the selected command and turns
//! errors into colored messages with suggestions.
//!
//! - `check` - Check for a newer release
//! - `upgrade` - Upgrade the installation in place
//! - `migrate` / `sync-db` - Migrate the database schema
//! - `rollback` - Restore from a snapshot
//! - `checksums` / `status` - Inspect the installation

use anyhow::Result;
use clap::Parser;
use refit_cli::cli;
use refit_cli::core::error::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    // Logs go to stderr so command output stays scriptable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
