//! The reconciliation and rollback engine.
//!
//! This module upgrades an installed application in place: it finds out
//! whether a newer release exists, reconciles the installed artifacts with the
//! release manifest, replaces only what changed, and migrates the database
//! schema, keeping a snapshot to fall back on if any step fails.
//!
//! # Architecture Overview
//!
//! - **[`VersionResolver`]**: installed version from the local manifest, latest
//!   release from the metadata document
//! - **[`ManifestDiffer`]**: which artifacts are missing, changed or unknown
//! - **[`ArtifactSynchronizer`]**: deletes unknown artifacts, downloads changed ones
//! - **[`BackupManager`]**: snapshots `bin/`, `lib/` and the manifest
//! - **[`RollbackManager`]**: restores a snapshot
//! - **[`SchemaMigrator`]**: runs the forward script, or the rollback script on failure
//! - **[`UpdateOrchestrator`]**: sequences all of the above
//!
//! ## Upgrade Flow
//!
//! ```text
//! 1. Check version
//!    ├── Read Manifest-Version from the local manifest
//!    ├── Download metadata document, read <version> and <lastUpdated>
//!    └── Download the release manifest
//!
//! 2. Back up (abort on failure, nothing modified yet)
//!    ├── Copy bin/, lib/, MANIFEST.MF into backup/{version}_{timestamp}Z
//!    ├── Delete every other snapshot
//!    └── Record the snapshot path
//!
//! 3. Sync (roll back on failure)
//!    ├── Delete lib/ files the release manifest does not name
//!    └── Download entries that are missing or fail their checksum
//!
//! 4. Finalize (roll back on failure)
//!    └── Atomically replace the local manifest
//!
//! 5. Migrate (when a database is attached)
//!    ├── Run sql/{versionCore}/initial_db_scripts.sql
//!    └── On failure: rollback_scripts.sql, then restore the snapshot
//!
//! 6. Record update-available = N and the update time
//! ```
//!
//! # Concurrency
//!
//! A session is a value ([`UpdateSession`]) created per operation; nothing is
//! shared between operations except the files on disk. Upgrades, migrations
//! and rollbacks take the installation lock ([`lock::InstallLock`]), so
//! concurrent invocations run one after another.
//!
//! # Example
//!
//! ```rust,no_run
//! use refit_cli::config::UpdaterConfig;
//! use refit_cli::upgrade::{UpdateOrchestrator, UpgradeOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpdaterConfig::load().await?;
//! let mut orchestrator = UpdateOrchestrator::from_config(&config)?;
//!
//! if orchestrator.check_for_update().await.available {
//!     let report = orchestrator.upgrade(UpgradeOptions::default()).await;
//!     println!("{}", report.code());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod diff;
pub mod lock;
pub mod migration;
pub mod orchestrator;
pub mod rollback;
pub mod session;
pub mod sync;
pub mod verification;
pub mod version_check;

#[cfg(test)]
mod tests;

pub use backup::{BackupManager, Snapshot};
pub use diff::{ArtifactDiff, EntryStatus, ManifestDiffer};
pub use migration::{MigrationReport, MigrationScriptPair, SchemaMigrator, SqlExecutor, SqliteExecutor};
pub use orchestrator::{
    StatusReport, UpdateCheck, UpdateOrchestrator, UpgradeOptions, UpgradeOutcome, UpgradeReport,
    UpgradeState,
};
pub use rollback::{RollbackManager, RollbackOutcome};
pub use session::UpdateSession;
pub use sync::{ArtifactSynchronizer, SyncReport};
pub use verification::ChecksumVerifier;
pub use version_check::{ReleaseInfo, ReleaseTimestamp, VersionResolver};
