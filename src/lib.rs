//! refit - in-place upgrades for installed applications
//!
//! refit keeps an installed application (a `bin/` directory, a `lib/`
//! directory of artifacts and a manifest listing each artifact's checksum) in
//! step with the latest release published on a distribution server.
//!
//! # Architecture Overview
//!
//! An upgrade reconciles rather than reinstalls:
//! - The installed version is read from the local manifest's `Manifest-Version`
//! - The latest version comes from a metadata document on the server
//! - The release manifest is diffed against the files on disk; only missing
//!   or changed artifacts are downloaded, and unknown ones are deleted
//! - A snapshot of `bin/`, `lib/` and the manifest is taken first and
//!   restored if anything fails afterwards
//! - The database schema is migrated with per-release SQL scripts, with a
//!   rollback script for failures
//!
//! # Core Modules
//!
//! - [`upgrade`] - The update engine: version resolution, diff, sync, backup,
//!   rollback, migration and the [`UpdateOrchestrator`](upgrade::UpdateOrchestrator)
//! - [`manifest`] - Manifest parsing, rendering and the on-disk store
//! - [`transport`] - Fetching remote documents and artifacts
//! - [`config`] - The configuration file and persisted settings
//! - [`core`] - Error types and user-facing error formatting
//! - [`cli`] - Command-line interface
//! - [`utils`] - Atomic writes, directory copies and path validation
//!
//! # Installation Layout
//!
//! ```text
//! {root}/
//! ├── bin/              launcher scripts, restored from snapshots but never synced
//! ├── lib/              artifacts named by manifest entries
//! ├── MANIFEST.MF       installed manifest
//! └── .refit.lock       held while an upgrade, migration or rollback runs
//! ```
//!
//! # Command-Line Usage
//!
//! ```bash
//! # Is a newer release published?
//! refit check
//!
//! # Upgrade in place
//! refit upgrade
//!
//! # Undo the last upgrade
//! refit rollback
//!
//! # Checksums of selected components, for diagnostics
//! refit checksums --format json
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod manifest;
pub mod transport;
pub mod upgrade;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
