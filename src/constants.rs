//! Names and defaults shared across the update engine.
//!
//! Defining them centrally keeps the on-disk layout, the remote URL shapes and
//! the migration resource paths in one place.

use std::time::Duration;

/// Manifest file name, both in the install root and in snapshots.
pub const MANIFEST_FILE: &str = "MANIFEST.MF";

/// Binaries directory, relative to the install root.
pub const BIN_DIR: &str = "bin";

/// Libraries directory, relative to the install root. Manifest entry names are
/// paths relative to this directory.
pub const LIB_DIR: &str = "lib";

/// Directory holding per-version migration scripts.
pub const SQL_DIR: &str = "sql";

/// Forward migration script name inside `sql/{versionCore}/`.
pub const FORWARD_SCRIPT: &str = "initial_db_scripts.sql";

/// Rollback migration script name inside `sql/{versionCore}/`.
pub const ROLLBACK_SCRIPT: &str = "rollback_scripts.sql";

/// Metadata document element holding the release version.
pub const VERSION_TAG: &str = "version";

/// Metadata document element holding the release timestamp.
pub const LAST_UPDATED_TAG: &str = "lastUpdated";

/// Lock file taken in the install root while an update or migration runs.
pub const LOCK_FILE: &str = ".refit.lock";

/// Placeholder in `server.metadata_url` replaced by `server.upgrade_server`.
pub const SERVER_PLACEHOLDER: &str = "{server}";

/// Component names whose checksums are reported by the diagnostic query.
pub const DEFAULT_COMPONENT_NAMES: [&str; 2] = ["registration-client", "registration-services"];

/// Default timeout for metadata, manifest and artifact downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
