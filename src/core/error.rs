//! Error handling for refit
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`RefitError`]) for the failure modes the
//!    update engine needs to tell apart
//! 2. **User-friendly messages** ([`ErrorContext`]) with actionable
//!    suggestions for CLI users
//!
//! Operational code propagates [`anyhow::Result`] and attaches context with
//! `.context(...)`. Where a caller must branch on the failure kind, a
//! [`RefitError`] is returned inside the `anyhow::Error` and recovered with
//! `downcast_ref`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use refit_cli::core::{RefitError, user_friendly_error};
//!
//! let error = anyhow::Error::from(RefitError::UpdateInProgress {
//!     lock_path: "/opt/app/.refit.lock".to_string(),
//! });
//! user_friendly_error(error).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for refit operations.
///
/// # Error Categories
///
/// - **Manifest**: [`ManifestNotFound`](Self::ManifestNotFound), [`ManifestParseError`](Self::ManifestParseError)
/// - **Release metadata**: [`MetadataUnavailable`](Self::MetadataUnavailable), [`MetadataParseError`](Self::MetadataParseError), [`InvalidReleaseTimestamp`](Self::InvalidReleaseTimestamp)
/// - **Transport**: [`DownloadFailed`](Self::DownloadFailed)
/// - **Snapshots**: [`BackupFailed`](Self::BackupFailed), [`SnapshotMissing`](Self::SnapshotMissing), [`RollbackFailed`](Self::RollbackFailed)
/// - **Schema**: [`MigrationFailed`](Self::MigrationFailed)
/// - **Environment**: [`UpdateInProgress`](Self::UpdateInProgress), [`ConfigError`](Self::ConfigError), [`IoError`](Self::IoError)
#[derive(Error, Debug)]
pub enum RefitError {
    /// The local manifest file does not exist.
    #[error("Local manifest not found: {path}")]
    ManifestNotFound {
        /// Path where the manifest was expected
        path: String,
    },

    /// A manifest could not be parsed.
    #[error("Invalid manifest {source_name}: {reason}")]
    ManifestParseError {
        /// File path or URL the manifest came from
        source_name: String,
        /// Parser message
        reason: String,
    },

    /// The remote release metadata document could not be fetched.
    #[error("Release metadata unavailable from {url}: {reason}")]
    MetadataUnavailable {
        /// Metadata URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// The release metadata document is malformed or incomplete.
    #[error("Invalid release metadata: {reason}")]
    MetadataParseError {
        /// What was wrong with the document
        reason: String,
    },

    /// A release timestamp is not a 14-digit `YYYYMMDDHHMMSS` value.
    #[error("Invalid release timestamp '{value}': {reason}")]
    InvalidReleaseTimestamp {
        /// Raw value from the metadata document
        value: String,
        /// Why the value was rejected
        reason: String,
    },

    /// A download returned an error status or failed in transit.
    #[error("Download failed for {url}: {reason}")]
    DownloadFailed {
        /// Requested URL
        url: String,
        /// HTTP status or transport error
        reason: String,
    },

    /// The pre-upgrade snapshot could not be created.
    #[error("Backup failed at {path}: {reason}")]
    BackupFailed {
        /// Snapshot directory
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// A snapshot directory needed for restoration is absent.
    #[error("Snapshot not found: {path}")]
    SnapshotMissing {
        /// Snapshot directory
        path: String,
    },

    /// Restoring a snapshot over the live installation failed.
    #[error("Rollback from {snapshot} failed: {reason}")]
    RollbackFailed {
        /// Snapshot directory
        snapshot: String,
        /// Underlying failure
        reason: String,
    },

    /// A migration statement failed.
    #[error("Migration to {version} failed: {reason}")]
    MigrationFailed {
        /// Version core whose script was running
        version: String,
        /// Database error
        reason: String,
    },

    /// Another process holds the installation lock.
    #[error("Another update is in progress (lock held on {lock_path})")]
    UpdateInProgress {
        /// Lock file path
        lock_path: String,
    },

    /// Configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the problem
        message: String,
    },

    /// I/O error from the standard library.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Anything else.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
    },
}

/// Error wrapper carrying a suggestion and details for display.
#[derive(Debug)]
pub struct ErrorContext {
    /// Human readable error message
    pub message: String,
    /// Optional suggestion for resolving the error
    pub suggestion: Option<String>,
    /// Optional additional details about the error
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Attach a suggestion for resolving the error.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach additional details about the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with contextual suggestions.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(refit_error) = error.downcast_ref::<RefitError>() {
        return create_error_context(refit_error, &error);
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(format!("{error:#}"))
                    .with_suggestion("Check ownership of the installation and backup directories, or run with elevated permissions");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(format!("{error:#}"))
                    .with_suggestion("Check that the configured install root and paths exist");
            }
            _ => {}
        }
    }

    if error.downcast_ref::<toml::de::Error>().is_some() {
        return ErrorContext::new(format!("{error:#}"))
            .with_suggestion("Check the TOML syntax of your refit configuration file");
    }

    ErrorContext::new(format!("{error:#}"))
}

fn create_error_context(error: &RefitError, full: &anyhow::Error) -> ErrorContext {
    let context = ErrorContext::new(format!("{full:#}"));
    match error {
        RefitError::ManifestNotFound { .. } => context
            .with_suggestion("Check `install.root` and `install.manifest_file` in the configuration")
            .with_details("The installed version is read from the local manifest"),
        RefitError::MetadataUnavailable { .. } | RefitError::DownloadFailed { .. } => context
            .with_suggestion("Check network connectivity and the `server` section of the configuration"),
        RefitError::MetadataParseError { .. } | RefitError::InvalidReleaseTimestamp { .. } => context
            .with_details("The metadata document must contain <version> and a 14-digit <lastUpdated> element"),
        RefitError::BackupFailed { .. } => context
            .with_suggestion("Check free space and permissions on `backup.root`")
            .with_details("No installed file was modified"),
        RefitError::RollbackFailed { snapshot, .. } => context
            .with_suggestion(format!("Restore bin/, lib/ and the manifest manually from {snapshot}"))
            .with_details("The installation may be partially upgraded"),
        RefitError::UpdateInProgress { .. } => context
            .with_suggestion("Wait for the running update to finish and try again"),
        _ => context,
    }
}
