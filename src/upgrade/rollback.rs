use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::core::RefitError;
use crate::upgrade::config::InstallLayout;
use crate::utils::fs::{atomic_write, mirror_dir, remove_dir_all};

/// What a restore attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The installation now matches the snapshot.
    Restored,
    /// The snapshot directory does not exist; nothing was touched.
    SnapshotMissing,
}

/// Restores an installation from a snapshot.
///
/// `bin/` and `lib/` are mirrored from the snapshot, so files added by the
/// failed upgrade are removed as well as changed ones being put back. The
/// manifest is replaced atomically, or removed when the snapshot has none.
#[derive(Debug, Clone)]
pub struct RollbackManager {
    layout: InstallLayout,
}

impl RollbackManager {
    /// Manager restoring into `layout`.
    pub fn new(layout: InstallLayout) -> Self {
        Self { layout }
    }

    /// Restore the installation from `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns [`RefitError::RollbackFailed`] if the snapshot exists but
    /// cannot be copied back. The installation may then be partially restored.
    pub fn restore(&self, snapshot: &Path) -> Result<RollbackOutcome> {
        if !snapshot.is_dir() {
            warn!("Snapshot {} does not exist, nothing restored", snapshot.display());
            return Ok(RollbackOutcome::SnapshotMissing);
        }

        info!("Restoring installation from {}", snapshot.display());
        self.restore_from(snapshot).map_err(|e| RefitError::RollbackFailed {
            snapshot: snapshot.display().to_string(),
            reason: format!("{e:#}"),
        })?;

        info!("Restore from {} complete", snapshot.display());
        Ok(RollbackOutcome::Restored)
    }

    fn restore_from(&self, snapshot: &Path) -> Result<()> {
        let source = self.layout.rebased(snapshot);

        for (saved, live) in [
            (source.bin_path(), self.layout.bin_path()),
            (source.lib_path(), self.layout.lib_path()),
        ] {
            if live.exists() && !live.is_dir() {
                remove_path(&live)?;
            }
            mirror_dir(&saved, &live)?;
        }

        // No manifest in the snapshot means none was installed
        let saved = source.manifest_path();
        let live = self.layout.manifest_path();
        if saved.is_file() {
            if live.is_dir() {
                remove_path(&live)?;
            }
            atomic_write(&live, &std::fs::read(&saved)?)?;
        } else if live.exists() {
            info!("Snapshot has no manifest, removing {}", live.display());
            remove_path(&live)?;
        }
        Ok(())
    }
}

fn remove_path(path: &Path) -> Result<()> {
    if path.is_dir() {
        remove_dir_all(path)
    } else {
        std::fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
    }
}
