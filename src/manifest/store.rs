use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::Manifest;
use crate::core::RefitError;
use crate::transport::Transport;
use crate::upgrade::config::InstallLayout;
use crate::utils::fs::atomic_write;

/// Reads, writes and fetches manifests.
///
/// The store owns the location of the local manifest. Remote manifests are
/// fetched through a [`Transport`] and never touch the disk until
/// [`save`](Self::save) is called with a fully parsed value.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Store for the manifest at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store for the live manifest of an installation.
    pub fn for_layout(layout: &InstallLayout) -> Self {
        Self::new(layout.manifest_path())
    }

    /// Local manifest location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the local manifest, `None` if the file does not exist.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<Option<Manifest>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No local manifest at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read manifest {}", self.path.display())
                });
            }
        };

        let manifest = Manifest::parse(&content).map_err(|e| RefitError::ManifestParseError {
            source_name: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(manifest))
    }

    /// Load the local manifest, failing with [`RefitError::ManifestNotFound`]
    /// when it is absent.
    pub async fn load_required(&self) -> Result<Manifest> {
        match self.load().await? {
            Some(manifest) => Ok(manifest),
            None => Err(RefitError::ManifestNotFound {
                path: self.path.display().to_string(),
            }
            .into()),
        }
    }

    /// Atomically replace the local manifest.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        debug!(
            "Writing manifest {} ({} entries)",
            self.path.display(),
            manifest.entries().len()
        );
        atomic_write(&self.path, manifest.render().as_bytes())
            .with_context(|| format!("Failed to write manifest {}", self.path.display()))
    }

    /// Download and parse a remote manifest.
    ///
    /// # Errors
    ///
    /// Fails if the download fails, the body is not UTF-8, or it does not parse.
    pub async fn fetch_remote<T: Transport>(transport: &T, url: &str) -> Result<Manifest> {
        debug!("Fetching remote manifest {}", url);
        let bytes = transport.fetch(url).await?;
        let text = String::from_utf8(bytes).map_err(|e| {
            warn!("Remote manifest {} is not UTF-8", url);
            RefitError::ManifestParseError {
                source_name: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        Manifest::parse(&text).map_err(|e| {
            RefitError::ManifestParseError {
                source_name: url.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
