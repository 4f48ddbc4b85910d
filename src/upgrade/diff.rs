//! Reconciliation of the libraries directory against a manifest.
//!
//! The differ looks at what is actually on disk rather than at the previous
//! manifest: an entry needs syncing when its file is missing or its checksum
//! does not match, and any file not named by the manifest is a deletion.
//! Installations that were tampered with or half-synced by an earlier failed
//! run therefore converge on the next reconciliation.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::manifest::{ArtifactEntry, Manifest};
use crate::upgrade::verification::ChecksumVerifier;
use crate::utils::fs::list_relative_files;
use crate::utils::paths::{normalize_path_for_storage, safe_join};

/// On-disk state of one manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// File present with the recorded checksum.
    Current,
    /// File absent.
    Missing,
    /// File present with a different checksum.
    ChecksumMismatch,
    /// File present but could not be read for hashing.
    Unreadable,
}

impl EntryStatus {
    /// Whether the entry has to be (re)downloaded.
    pub fn needs_sync(self) -> bool {
        !matches!(self, Self::Current)
    }
}

/// Artifact-level difference between a manifest and the libraries directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactDiff {
    /// Entries whose file does not exist.
    pub to_add: BTreeSet<String>,
    /// Entries whose file exists with the wrong content.
    pub to_update: BTreeSet<String>,
    /// Files on disk that no entry names.
    pub to_delete: BTreeSet<String>,
    /// Entries already up to date.
    pub unchanged: BTreeSet<String>,
}

impl ArtifactDiff {
    /// Entries to download, added ones first.
    pub fn needs_sync(&self) -> impl Iterator<Item = &String> {
        self.to_add.iter().chain(self.to_update.iter())
    }

    /// True if nothing has to be downloaded or deleted.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes [`ArtifactDiff`]s for one libraries directory.
#[derive(Debug, Clone)]
pub struct ManifestDiffer {
    lib_dir: PathBuf,
}

impl ManifestDiffer {
    /// Differ for the libraries directory at `lib_dir`.
    pub fn new(lib_dir: impl Into<PathBuf>) -> Self {
        Self {
            lib_dir: lib_dir.into(),
        }
    }

    /// Libraries directory.
    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// Check one entry against its file.
    pub async fn entry_status(&self, name: &str, entry: &ArtifactEntry) -> EntryStatus {
        let path = match safe_join(&self.lib_dir, name) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping invalid manifest entry: {:#}", e);
                return EntryStatus::Current;
            }
        };

        if !path.is_file() {
            return EntryStatus::Missing;
        }
        match ChecksumVerifier::matches(&path, &entry.checksum).await {
            Ok(true) => EntryStatus::Current,
            Ok(false) => EntryStatus::ChecksumMismatch,
            Err(e) => {
                warn!("Failed to checksum {}: {:#}", path.display(), e);
                EntryStatus::Unreadable
            }
        }
    }

    /// Files under the libraries directory that `manifest` does not name.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be walked.
    pub fn unknown_files(&self, manifest: &Manifest) -> Result<BTreeSet<String>> {
        Ok(list_relative_files(&self.lib_dir)?
            .into_iter()
            .map(normalize_path_for_storage)
            .filter(|name| manifest.entry(name).is_none())
            .collect())
    }

    /// Diff `manifest` against the libraries directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be walked. Unreadable files are reported
    /// as updates rather than errors.
    pub async fn diff(&self, manifest: &Manifest) -> Result<ArtifactDiff> {
        let mut diff = ArtifactDiff {
            to_delete: self.unknown_files(manifest)?,
            ..ArtifactDiff::default()
        };

        for (name, entry) in manifest.entries() {
            let bucket = match self.entry_status(name, entry).await {
                EntryStatus::Current => &mut diff.unchanged,
                EntryStatus::Missing => &mut diff.to_add,
                EntryStatus::ChecksumMismatch | EntryStatus::Unreadable => &mut diff.to_update,
            };
            bucket.insert(name.clone());
        }

        debug!(
            "Artifact diff: {} to add, {} to update, {} to delete, {} unchanged",
            diff.to_add.len(),
            diff.to_update.len(),
            diff.to_delete.len(),
            diff.unchanged.len()
        );
        Ok(diff)
    }

    /// Entries of `remote` whose checksum differs from, or is absent in, `local`.
    ///
    /// This compares manifests only, without touching the disk, and is used to
    /// report what a release changes before anything is downloaded.
    pub fn compare(local: &Manifest, remote: &Manifest) -> BTreeMap<String, ChangeKind> {
        let mut changes = BTreeMap::new();
        for (name, entry) in remote.entries() {
            match local.entry(name) {
                None => {
                    changes.insert(name.clone(), ChangeKind::Added);
                }
                Some(old) if !old.checksum_matches(&entry.checksum) => {
                    changes.insert(name.clone(), ChangeKind::Changed);
                }
                Some(_) => {}
            }
        }
        for name in local.entries().keys() {
            if remote.entry(name).is_none() {
                changes.insert(name.clone(), ChangeKind::Removed);
            }
        }
        changes
    }
}

/// How an entry differs between two manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Only in the newer manifest.
    Added,
    /// In both, with different checksums.
    Changed,
    /// Only in the older manifest.
    Removed,
}
