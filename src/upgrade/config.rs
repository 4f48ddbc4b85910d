use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    BIN_DIR, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_COMPONENT_NAMES, DEFAULT_DOWNLOAD_TIMEOUT, LIB_DIR,
    LOCK_FILE, MANIFEST_FILE, SERVER_PLACEHOLDER, SQL_DIR,
};

/// On-disk layout of an installation.
///
/// The install root holds `bin/`, `lib/` and the manifest file. Directory and
/// file names are configurable but default to the conventional layout.
///
/// # TOML Example
/// ```toml
/// [install]
/// root = "/opt/registration"
/// bin_dir = "bin"
/// lib_dir = "lib"
/// manifest_file = "MANIFEST.MF"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLayout {
    /// Installation root directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Binaries directory name, relative to `root`.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: String,

    /// Libraries directory name, relative to `root`.
    #[serde(default = "default_lib_dir")]
    pub lib_dir: String,

    /// Manifest file name, relative to `root`.
    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,
}

impl Default for InstallLayout {
    fn default() -> Self {
        Self::new(default_root())
    }
}

impl InstallLayout {
    /// Create a layout with conventional names under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bin_dir: default_bin_dir(),
            lib_dir: default_lib_dir(),
            manifest_file: default_manifest_file(),
        }
    }

    /// Installation root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Live binaries directory.
    pub fn bin_path(&self) -> PathBuf {
        self.root.join(&self.bin_dir)
    }

    /// Live libraries directory.
    pub fn lib_path(&self) -> PathBuf {
        self.root.join(&self.lib_dir)
    }

    /// Live manifest file.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_file)
    }

    /// Lock file serializing update sessions for this installation.
    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// The same layout rooted at `other`. Snapshots mirror the live layout.
    pub fn rebased(&self, other: &Path) -> Self {
        Self {
            root: other.to_path_buf(),
            ..self.clone()
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_bin_dir() -> String {
    BIN_DIR.to_string()
}

fn default_lib_dir() -> String {
    LIB_DIR.to_string()
}

fn default_manifest_file() -> String {
    MANIFEST_FILE.to_string()
}

/// Remote distribution server settings.
///
/// # URL Shapes
///
/// - Metadata document: `metadata_url`, with `{server}` replaced by `upgrade_server`
/// - Remote manifest: `{client_url}{version}/MANIFEST.MF`
/// - Artifact: `{client_url}{version}/lib/{entry}`
///
/// # TOML Example
/// ```toml
/// [server]
/// upgrade_server = "https://updates.example.org"
/// metadata_url = "{server}/registration-client/maven-metadata.xml"
/// client_url = "https://updates.example.org/registration-client/"
/// timeout_secs = 60
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base address of the upgrade server, substituted into `metadata_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_server: Option<String>,

    /// URL (or template) of the release metadata document.
    #[serde(default)]
    pub metadata_url: String,

    /// Base client URL; the release version and artifact path are appended.
    #[serde(default)]
    pub client_url: String,

    /// Timeout for any single download, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            upgrade_server: None,
            metadata_url: String::new(),
            client_url: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Metadata URL with the `{server}` placeholder resolved.
    pub fn resolved_metadata_url(&self) -> String {
        match &self.upgrade_server {
            Some(server) => {
                self.metadata_url.replace(SERVER_PLACEHOLDER, server.trim_end_matches('/'))
            }
            None => self.metadata_url.clone(),
        }
    }

    /// URL of the remote manifest for `version`.
    pub fn manifest_url(&self, version: &str, manifest_file: &str) -> String {
        format!("{}{}/{}", self.client_url, version, manifest_file)
    }

    /// URL of an artifact, given its path relative to the install root
    /// (for example `lib/registration-client.jar`).
    pub fn artifact_url(&self, version: &str, relative_path: &str) -> String {
        format!("{}{}/{}", self.client_url, version, relative_path)
    }

    /// Download timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT.as_secs()
}

/// Snapshot storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding snapshots. Defaults to `{install.root}/backup`.
    ///
    /// Everything under this directory other than the newest snapshot is
    /// deleted after each backup, so it must be dedicated to refit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Schema migration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Directory holding `{versionCore}/initial_db_scripts.sql` and
    /// `{versionCore}/rollback_scripts.sql`. Defaults to `{install.root}/sql`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_dir: Option<PathBuf>,

    /// SQLite database file. When unset, upgrades skip the migration step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            sql_dir: None,
            database: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl MigrationConfig {
    /// Migration script directory for the given installation.
    pub fn sql_dir_for(&self, layout: &InstallLayout) -> PathBuf {
        self.sql_dir.clone().unwrap_or_else(|| layout.root().join(SQL_DIR))
    }
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Settings for the read-only artifact checksum query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Substrings selecting the manifest entries whose checksums are reported.
    #[serde(default = "default_component_names")]
    pub component_names: Vec<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            component_names: default_component_names(),
        }
    }
}

fn default_component_names() -> Vec<String> {
    DEFAULT_COMPONENT_NAMES.iter().map(|s| (*s).to_string()).collect()
}
