//! Installation lock.
//!
//! Upgrades and migrations mutate `bin/`, `lib/`, the manifest, the backup
//! root and the database. Two of them interleaving would corrupt the snapshot,
//! so each takes an exclusive OS file lock on `{install.root}/.refit.lock` for
//! its whole duration. The lock is released when the guard is dropped, or by
//! the OS if the process dies.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::RefitError;

/// Exclusive lock on an installation, held until dropped.
#[derive(Debug)]
pub struct InstallLock {
    file: File,
    path: PathBuf,
}

impl InstallLock {
    /// Acquire the lock at `lock_path`, waiting for any other holder.
    ///
    /// Locking blocks, so it runs on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Fails with [`RefitError::UpdateInProgress`] if the lock file cannot be
    /// opened or locked.
    pub async fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let path = lock_path.to_path_buf();
        let open_path = path.clone();
        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&open_path)
                .with_context(|| format!("Failed to open lock file: {}", open_path.display()))?;

            FileExt::lock_exclusive(&file).map_err(|e| {
                anyhow::Error::from(RefitError::UpdateInProgress {
                    lock_path: open_path.display().to_string(),
                })
                .context(e)
            })?;
            Ok(file)
        })
        .await
        .context("Failed to spawn blocking task for lock acquisition")??;

        debug!("Acquired installation lock {}", path.display());
        Ok(Self { file, path })
    }

    /// Lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_creates_lock_file() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join("install").join(".refit.lock");

        let lock = InstallLock::acquire(&lock_path).await.unwrap();
        assert!(lock_path.exists());
        assert_eq!(lock.path(), lock_path);
    }

    #[tokio::test]
    async fn test_second_holder_waits_for_release() {
        let temp = TempDir::new().unwrap();
        let lock_path = temp.path().join(".refit.lock");

        let first = InstallLock::acquire(&lock_path).await.unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let lock_path = lock_path.clone();
            let acquired = acquired.clone();
            tokio::spawn(async move {
                let _second = InstallLock::acquire(&lock_path).await.unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!acquired.load(Ordering::SeqCst));

        drop(first);
        waiter.await.unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
