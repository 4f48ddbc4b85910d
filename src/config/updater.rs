//! The refit configuration file.
//!
//! `~/.refit/config.toml` (or the file passed with `--config`) describes the
//! installation being managed, where releases come from, and where snapshots
//! and persisted settings live.
//!
//! ```toml
//! settings_file = "/opt/registration/.refit/settings.toml"
//!
//! [install]
//! root = "/opt/registration"
//!
//! [server]
//! upgrade_server = "https://updates.example.org"
//! metadata_url = "{server}/registration-client/maven-metadata.xml"
//! client_url = "https://updates.example.org/registration-client/"
//!
//! [backup]
//! root = "/opt/registration-backup"
//!
//! [migration]
//! database = "/opt/registration/db/reg.sqlite"
//! ```

use crate::core::RefitError;
use crate::upgrade::config::{BackupConfig, InstallLayout, MigrationConfig, QueryConfig, ServerConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Top-level refit configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Persisted key-value settings file. Defaults to
    /// `{install.root}/.refit/settings.toml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,

    /// Installation layout.
    #[serde(default)]
    pub install: InstallLayout,

    /// Remote distribution server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Snapshot storage.
    #[serde(default)]
    pub backup: BackupConfig,

    /// Schema migration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Diagnostic checksum query.
    #[serde(default)]
    pub query: QueryConfig,
}

impl UpdaterConfig {
    /// Load configuration from the default location, or defaults if absent.
    ///
    /// # Errors
    ///
    /// Fails if the home directory cannot be determined or the file exists but
    /// cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from(&path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load from `path` if given, otherwise from the default location.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(&path).await,
            None => Self::load().await,
        }
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid TOML for this schema.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Save configuration to a specific file, creating parent directories.
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Platform default configuration path.
    ///
    /// - **Windows**: `%LOCALAPPDATA%\refit\config.toml`
    /// - **Unix/macOS**: `~/.refit/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("refit")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".refit")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Snapshot root directory.
    pub fn backup_root(&self) -> PathBuf {
        self.backup.root.clone().unwrap_or_else(|| self.install.root().join("backup"))
    }

    /// Persisted settings file.
    pub fn settings_path(&self) -> PathBuf {
        self.settings_file
            .clone()
            .unwrap_or_else(|| self.install.root().join(".refit").join("settings.toml"))
    }

    /// Check that the server section is usable for remote operations.
    ///
    /// # Errors
    ///
    /// Returns [`RefitError::ConfigError`] naming the first missing field.
    pub fn validate_server(&self) -> Result<(), RefitError> {
        if self.server.metadata_url.trim().is_empty() {
            return Err(RefitError::ConfigError {
                message: "server.metadata_url is not set".to_string(),
            });
        }
        if self.server.client_url.trim().is_empty() {
            return Err(RefitError::ConfigError {
                message: "server.client_url is not set".to_string(),
            });
        }
        if self.server.metadata_url.contains(crate::constants::SERVER_PLACEHOLDER)
            && self.server.upgrade_server.is_none()
        {
            return Err(RefitError::ConfigError {
                message: "server.metadata_url uses {server} but server.upgrade_server is not set"
                    .to_string(),
            });
        }
        Ok(())
    }
}
