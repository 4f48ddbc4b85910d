use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::manifest::Manifest;
use crate::transport::Transport;
use crate::upgrade::config::{InstallLayout, ServerConfig};
use crate::upgrade::diff::ManifestDiffer;
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::fs::{atomic_write, ensure_dir, ensure_parent_dir};
use crate::utils::paths::safe_join;

/// Result of one sync pass.
///
/// A pass succeeds as a whole even when individual artifacts failed; those
/// are listed in [`failed`](Self::failed) and picked up again by the next
/// reconciliation, since their files are still missing or mismatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries downloaded and written.
    pub downloaded: Vec<String>,
    /// Entries whose file already matched.
    pub skipped: Vec<String>,
    /// Entries that could not be synced, with the reason.
    pub failed: BTreeMap<String, String>,
    /// Unknown files deleted before syncing.
    pub deleted: Vec<String>,
}

impl SyncReport {
    /// True if every artifact is now in place.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Brings the libraries directory in line with a manifest.
#[derive(Debug, Clone)]
pub struct ArtifactSynchronizer {
    differ: ManifestDiffer,
    lib_dir_name: String,
    server: ServerConfig,
}

impl ArtifactSynchronizer {
    /// Synchronizer for `layout`, downloading from `server`.
    pub fn new(layout: &InstallLayout, server: ServerConfig) -> Self {
        Self {
            differ: ManifestDiffer::new(layout.lib_path()),
            lib_dir_name: layout.lib_dir.clone(),
            server,
        }
    }

    /// Delete files under the libraries directory that `manifest` does not name.
    ///
    /// # Errors
    ///
    /// Fails on the first file that cannot be deleted.
    pub fn delete_unknown(&self, manifest: &Manifest) -> Result<Vec<String>> {
        let unknown = self.differ.unknown_files(manifest)?;
        let mut deleted = Vec::with_capacity(unknown.len());

        for name in unknown {
            let path = safe_join(self.differ.lib_dir(), &name)?;
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete unknown artifact {}", path.display()))?;
            info!("Deleted unknown artifact {}", name);
            deleted.push(name);
        }
        Ok(deleted)
    }

    /// Download every entry of `manifest` that is missing or mismatched.
    ///
    /// Artifacts are fetched from `{client_url}{version}/lib/{entry}`. Each
    /// body is checksummed before it replaces the local file; a failed
    /// download or checksum leaves the existing file untouched.
    ///
    /// # Errors
    ///
    /// Fails only if the libraries directory cannot be created or walked.
    pub async fn sync<T: Transport>(
        &self,
        transport: &T,
        manifest: &Manifest,
        version: &str,
    ) -> Result<SyncReport> {
        ensure_dir(self.differ.lib_dir())?;
        let diff = self.differ.diff(manifest).await?;

        let mut report = SyncReport {
            skipped: diff.unchanged.iter().cloned().collect(),
            ..SyncReport::default()
        };

        for name in diff.needs_sync() {
            let Some(entry) = manifest.entry(name) else {
                continue;
            };
            match self.fetch_artifact(transport, version, name, &entry.checksum).await {
                Ok(()) => {
                    info!("Downloaded {}", name);
                    report.downloaded.push(name.clone());
                }
                Err(e) => {
                    warn!("Failed to sync {}: {:#}", name, e);
                    report.failed.insert(name.clone(), format!("{e:#}"));
                }
            }
        }

        debug!(
            "Sync finished: {} downloaded, {} skipped, {} failed",
            report.downloaded.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn fetch_artifact<T: Transport>(
        &self,
        transport: &T,
        version: &str,
        name: &str,
        expected: &str,
    ) -> Result<()> {
        let target: PathBuf = safe_join(self.differ.lib_dir(), name)?;
        let url = self.server.artifact_url(version, &format!("{}/{}", self.lib_dir_name, name));

        let body = transport.fetch(&url).await?;
        let actual = ChecksumVerifier::sha256_hex(&body);
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            anyhow::bail!("checksum mismatch from {url}: expected {expected}, got {actual}");
        }

        if target.exists() {
            std::fs::remove_file(&target)
                .with_context(|| format!("Failed to delete stale {}", target.display()))?;
        }
        ensure_parent_dir(&target)?;
        atomic_write(&target, &body)
    }
}
