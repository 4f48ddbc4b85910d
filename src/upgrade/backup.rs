use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{SettingKey, SettingsStore};
use crate::core::RefitError;
use crate::upgrade::config::InstallLayout;
use crate::utils::fs::{copy_dir, ensure_dir, remove_dir_all};

/// A copy of `bin/`, `lib/` and the manifest taken before an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Absolute snapshot directory.
    pub path: PathBuf,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Installed version at the time, if known.
    pub source_version: Option<String>,
}

/// Creates snapshots of an installation before destructive steps.
///
/// Snapshots live under a dedicated backup root, one directory each, named
/// `{version}_{timestamp}Z` and laid out like the installation itself:
///
/// ```text
/// backup/
/// └── 1.2.0_2024-03-15T09-30-07.123Z/
///     ├── bin/
///     ├── lib/
///     └── MANIFEST.MF
/// ```
///
/// Only the newest snapshot is kept: once a new one is complete, every other
/// entry under the backup root is deleted. The snapshot path is then recorded
/// in the settings store so a later migration failure can find it.
pub struct BackupManager {
    layout: InstallLayout,
    backup_root: PathBuf,
    settings: Arc<dyn SettingsStore>,
}

impl BackupManager {
    /// Manager snapshotting `layout` into `backup_root`.
    pub fn new(
        layout: InstallLayout,
        backup_root: impl Into<PathBuf>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            layout,
            backup_root: backup_root.into(),
            settings,
        }
    }

    /// Backup root directory.
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Directory name for a snapshot of `version` taken at `at`.
    pub fn snapshot_dir_name(version: Option<&str>, at: DateTime<Utc>) -> String {
        format!("{}_{}Z", version.unwrap_or("unknown"), at.format("%Y-%m-%dT%H-%M-%S%.3f"))
    }

    /// Snapshot the installation.
    ///
    /// Nothing in the installation is modified. If copying fails the partial
    /// snapshot is removed and older snapshots are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`RefitError::BackupFailed`] if the snapshot cannot be written
    /// or recorded.
    pub fn backup(&self, source_version: Option<&str>) -> Result<Snapshot> {
        let created_at = Utc::now();
        let dir = self.backup_root.join(Self::snapshot_dir_name(source_version, created_at));
        let dir = std::path::absolute(&dir).unwrap_or(dir);
        info!("Creating snapshot {}", dir.display());

        if let Err(e) = self.populate(&dir) {
            if let Err(cleanup) = remove_dir_all(&dir) {
                warn!("Failed to remove partial snapshot {}: {:#}", dir.display(), cleanup);
            }
            return Err(self.failed(&dir, &e));
        }

        if !dir.is_dir() {
            return Err(RefitError::BackupFailed {
                path: dir.display().to_string(),
                reason: "snapshot directory missing after copy".to_string(),
            }
            .into());
        }

        let pruned = self.prune(&dir).map_err(|e| self.failed(&dir, &e))?;
        if pruned > 0 {
            debug!("Pruned {} old snapshot(s)", pruned);
        }

        self.settings
            .set(SettingKey::BackupFolder, &dir.display().to_string())
            .map_err(|e| self.failed(&dir, &e))?;

        info!("Snapshot complete at {}", dir.display());
        Ok(Snapshot {
            path: dir,
            created_at,
            source_version: source_version.map(str::to_string),
        })
    }

    fn populate(&self, dir: &Path) -> Result<()> {
        let snapshot = self.layout.rebased(dir);
        ensure_dir(&snapshot.bin_path())?;
        ensure_dir(&snapshot.lib_path())?;

        for (live, copy) in [
            (self.layout.bin_path(), snapshot.bin_path()),
            (self.layout.lib_path(), snapshot.lib_path()),
        ] {
            if live.exists() {
                copy_dir(&live, &copy)?;
            } else {
                debug!("{} does not exist, snapshot keeps it empty", live.display());
            }
        }

        let manifest = self.layout.manifest_path();
        if manifest.exists() {
            std::fs::copy(&manifest, snapshot.manifest_path()).with_context(|| {
                format!("Failed to copy manifest {}", manifest.display())
            })?;
        }
        Ok(())
    }

    /// Remove every entry under the backup root except `keep`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&self, keep: &Path) -> Result<usize> {
        let mut removed = 0;
        let entries = std::fs::read_dir(&self.backup_root).with_context(|| {
            format!("Failed to read backup root {}", self.backup_root.display())
        })?;

        for entry in entries {
            let path = std::path::absolute(entry?.path())?;
            if path == keep {
                continue;
            }
            if path.is_dir() {
                remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            removed += 1;
        }
        Ok(removed)
    }

    /// Snapshot path recorded by the last successful backup.
    pub fn recorded_snapshot(&self) -> Result<Option<PathBuf>> {
        Ok(self.settings.get(SettingKey::BackupFolder)?.map(PathBuf::from))
    }

    /// Forget the recorded snapshot path.
    pub fn clear_recorded(&self) -> Result<()> {
        self.settings.remove(SettingKey::BackupFolder)
    }

    /// Most recently modified snapshot directory under the backup root.
    pub fn latest_snapshot(&self) -> Result<Option<PathBuf>> {
        if !self.backup_root.is_dir() {
            return Ok(None);
        }

        let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
        for entry in std::fs::read_dir(&self.backup_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    fn failed(&self, dir: &Path, error: &anyhow::Error) -> anyhow::Error {
        RefitError::BackupFailed {
            path: dir.display().to_string(),
            reason: format!("{error:#}"),
        }
        .into()
    }
}
