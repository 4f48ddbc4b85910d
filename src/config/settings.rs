//! Persisted key-value settings produced and consumed by the update engine.
//!
//! The engine records a handful of facts between runs: whether an update is
//! pending, when the last one was applied, which snapshot a later rollback
//! should restore, and which schema version the database is at. These live
//! behind [`SettingsStore`] so that embedding applications can route them to
//! their own configuration storage; [`FileSettingsStore`] keeps them in a flat
//! TOML table.

use crate::utils::fs::atomic_write;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Keys persisted by the update engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    /// `Y` when the last successful check found a newer release, `N` otherwise.
    UpdateAvailable,
    /// RFC 3339 UTC time of the last completed upgrade.
    LastUpdate,
    /// Absolute path of the snapshot a rollback should restore.
    BackupFolder,
    /// Version the database schema was last migrated to.
    ServicesVersion,
}

impl SettingKey {
    /// Stable key name used in the settings file.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UpdateAvailable => "update.available",
            Self::LastUpdate => "update.last_applied",
            Self::BackupFolder => "update.backup_folder",
            Self::ServicesVersion => "services.version",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value written for a boolean "enabled" setting.
pub const ENABLED: &str = "Y";
/// Value written for a boolean "disabled" setting.
pub const DISABLED: &str = "N";

/// Persistent key-value configuration storage.
pub trait SettingsStore: Send + Sync {
    /// Read a setting, `None` when it was never set or has been removed.
    fn get(&self, key: SettingKey) -> Result<Option<String>>;

    /// Write a setting, replacing any previous value.
    fn set(&self, key: SettingKey, value: &str) -> Result<()>;

    /// Remove a setting. Removing an absent key is not an error.
    fn remove(&self, key: SettingKey) -> Result<()>;
}

/// [`SettingsStore`] backed by a TOML file of string values.
///
/// Every write rewrites the file atomically, so a crash never leaves a
/// half-written settings file behind.
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    /// Create a store persisting to `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Settings file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read settings from {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings from {}", self.path.display()))
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let content = toml::to_string(values).context("Failed to serialize settings")?;
        atomic_write(&self.path, content.as_bytes())
    }

    fn update(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|_| anyhow::anyhow!("Settings lock poisoned"))?;
        let mut values = self.read_all()?;
        f(&mut values);
        self.write_all(&values)
    }
}

impl SettingsStore for FileSettingsStore {
    fn get(&self, key: SettingKey) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key.as_str()))
    }

    fn set(&self, key: SettingKey, value: &str) -> Result<()> {
        debug!("Setting {} = {}", key, value);
        self.update(|values| {
            values.insert(key.as_str().to_string(), value.to_string());
        })
    }

    fn remove(&self, key: SettingKey) -> Result<()> {
        debug!("Clearing {}", key);
        self.update(|values| {
            values.remove(key.as_str());
        })
    }
}
