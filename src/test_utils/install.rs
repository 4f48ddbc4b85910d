//! Installation and release fixtures.
//!
//! [`InstallFixture`] lays out an installed application in a temporary
//! directory; [`ReleaseFixture`] describes a published release and serves it
//! through a [`MemoryTransport`] or a `file://` mirror.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::config::{FileSettingsStore, UpdaterConfig};
use crate::constants::{FORWARD_SCRIPT, ROLLBACK_SCRIPT};
use crate::manifest::{ArtifactEntry, Manifest, ManifestStore};
use crate::transport::{MemoryTransport, Transport};
use crate::upgrade::config::InstallLayout;
use crate::upgrade::{ChecksumVerifier, UpdateOrchestrator};
use crate::utils::paths::normalize_path_for_storage;

/// Metadata URL used by in-memory fixtures.
pub const FIXTURE_METADATA_URL: &str = "mem://server/client/maven-metadata.xml";

/// Client URL used by in-memory fixtures.
pub const FIXTURE_CLIENT_URL: &str = "mem://server/client/";

/// Timestamp published by fixtures unless overridden.
pub const FIXTURE_LAST_UPDATED: &str = "20240315093007";

/// An installed application in a temporary directory.
///
/// The layout is `{temp}/app/{bin,lib,MANIFEST.MF}`, with snapshots under
/// `{temp}/backup`, settings at `{temp}/settings.toml` and migration scripts
/// under `{temp}/sql`.
pub struct InstallFixture {
    temp: TempDir,
    /// Configuration pointing at the fixture, with in-memory server URLs.
    pub config: UpdaterConfig,
}

impl InstallFixture {
    /// Install `artifacts` under `lib/` with a manifest at `version`.
    pub fn new(version: &str, artifacts: &[(&str, &[u8])]) -> Result<Self> {
        let temp = TempDir::new()?;

        let mut config = UpdaterConfig::default();
        config.install = InstallLayout::new(temp.path().join("app"));
        config.server.metadata_url = FIXTURE_METADATA_URL.to_string();
        config.server.client_url = FIXTURE_CLIENT_URL.to_string();
        config.backup.root = Some(temp.path().join("backup"));
        config.settings_file = Some(temp.path().join("settings.toml"));
        config.migration.sql_dir = Some(temp.path().join("sql"));

        let fixture = Self { temp, config };
        let layout = fixture.layout();
        std::fs::create_dir_all(layout.bin_path())?;
        std::fs::create_dir_all(layout.lib_path())?;
        std::fs::write(layout.bin_path().join("run.sh"), b"#!/bin/sh\nexec java -jar lib/app.jar\n")?;

        let mut manifest = Manifest::new(version);
        for (name, body) in artifacts {
            fixture.write_lib(name, body)?;
            manifest.insert_entry(*name, ArtifactEntry::new(ChecksumVerifier::sha256_hex(body)));
        }
        ManifestStore::for_layout(layout).save(&manifest)?;

        Ok(fixture)
    }

    /// Temporary directory holding the installation and its side files.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Installation layout.
    pub fn layout(&self) -> &InstallLayout {
        &self.config.install
    }

    /// Settings store at the configured settings path.
    pub fn settings(&self) -> Arc<FileSettingsStore> {
        Arc::new(FileSettingsStore::new(self.config.settings_path()))
    }

    /// Orchestrator over this installation using `transport`.
    pub fn orchestrator<T: Transport>(&self, transport: T) -> UpdateOrchestrator<T> {
        UpdateOrchestrator::new(&self.config, transport, self.settings())
    }

    /// Write an artifact under `lib/`, creating parent directories.
    pub fn write_lib(&self, name: &str, body: &[u8]) -> Result<()> {
        let path = self.layout().lib_path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Read an artifact under `lib/`.
    pub fn read_lib(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.layout().lib_path().join(name);
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))
    }

    /// Modification time of an artifact under `lib/`.
    pub fn lib_modified(&self, name: &str) -> Result<std::time::SystemTime> {
        Ok(std::fs::metadata(self.layout().lib_path().join(name))?.modified()?)
    }

    /// Write the forward and optional rollback scripts for `version_core`.
    pub fn write_sql(&self, version_core: &str, forward: &str, rollback: Option<&str>) -> Result<PathBuf> {
        let dir = self.config.migration.sql_dir_for(self.layout()).join(version_core);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(FORWARD_SCRIPT), forward)?;
        if let Some(rollback) = rollback {
            std::fs::write(dir.join(ROLLBACK_SCRIPT), rollback)?;
        }
        Ok(dir)
    }

    /// Every file of `bin/`, `lib/` and the manifest, keyed by path relative
    /// to the install root. Equal trees mean byte-identical installations.
    pub fn tree(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let layout = self.layout();
        let mut files = BTreeMap::new();

        for dir in [layout.bin_path(), layout.lib_path()] {
            if !dir.exists() {
                continue;
            }
            for entry in WalkDir::new(&dir) {
                let entry = entry?;
                if entry.file_type().is_file() {
                    let relative = entry.path().strip_prefix(layout.root())?;
                    files.insert(normalize_path_for_storage(relative), std::fs::read(entry.path())?);
                }
            }
        }

        let manifest = layout.manifest_path();
        if manifest.exists() {
            files.insert(layout.manifest_file.clone(), std::fs::read(&manifest)?);
        }
        Ok(files)
    }

    /// Write the configuration to `{temp}/refit.toml` and return its path.
    pub fn write_config(&self) -> Result<PathBuf> {
        let path = self.temp.path().join("refit.toml");
        let content = toml::to_string_pretty(&self.config)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }
}

/// A published release.
#[derive(Debug, Clone)]
pub struct ReleaseFixture {
    /// Release version.
    pub version: String,
    /// `<lastUpdated>` value.
    pub last_updated: String,
    artifacts: Vec<(String, Vec<u8>)>,
    corrupt: BTreeSet<String>,
    unavailable: BTreeSet<String>,
}

impl ReleaseFixture {
    /// Release `version` with no artifacts.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            last_updated: FIXTURE_LAST_UPDATED.to_string(),
            artifacts: Vec::new(),
            corrupt: BTreeSet::new(),
            unavailable: BTreeSet::new(),
        }
    }

    /// Add an artifact, listed in the manifest and served as-is.
    #[must_use]
    pub fn with_artifact(mut self, name: &str, body: &[u8]) -> Self {
        self.artifacts.push((name.to_string(), body.to_vec()));
        self
    }

    /// Serve different bytes than the manifest's checksum for `name`.
    #[must_use]
    pub fn corrupt(mut self, name: &str) -> Self {
        self.corrupt.insert(name.to_string());
        self
    }

    /// List `name` in the manifest but do not serve it.
    #[must_use]
    pub fn unavailable(mut self, name: &str) -> Self {
        self.unavailable.insert(name.to_string());
        self
    }

    /// The release manifest.
    pub fn manifest(&self) -> Manifest {
        self.artifacts.iter().fold(Manifest::new(&self.version), |manifest, (name, body)| {
            manifest.with_entry(name, ArtifactEntry::new(ChecksumVerifier::sha256_hex(body)))
        })
    }

    /// The metadata document naming this release.
    pub fn metadata_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata>\n  <groupId>io.refit</groupId>\n  \
             <artifactId>client</artifactId>\n  <versioning>\n    <latest>{v}</latest>\n    \
             <release>{v}</release>\n    <versions>\n      <version>{v}</version>\n    </versions>\n    \
             <lastUpdated>{t}</lastUpdated>\n  </versioning>\n</metadata>\n",
            v = self.version,
            t = self.last_updated
        )
    }

    /// Remote files keyed by their path under the client URL.
    fn files(&self, config: &UpdaterConfig) -> Vec<(String, Vec<u8>)> {
        let lib_dir = &config.install.lib_dir;
        let mut files = vec![(
            format!("{}/{}", self.version, config.install.manifest_file),
            self.manifest().render().into_bytes(),
        )];
        for (name, body) in &self.artifacts {
            if self.unavailable.contains(name) {
                continue;
            }
            let mut body = body.clone();
            if self.corrupt.contains(name) {
                body.extend_from_slice(b"-corrupted");
            }
            files.push((format!("{}/{}/{}", self.version, lib_dir, name), body));
        }
        files
    }

    /// Serve the release at the URLs `config` points to.
    pub fn transport(&self, config: &UpdaterConfig) -> MemoryTransport {
        let server = &config.server;
        self.files(config).into_iter().fold(
            MemoryTransport::new().with_file(server.resolved_metadata_url(), self.metadata_xml()),
            |transport, (path, body)| transport.with_file(format!("{}{}", server.client_url, path), body),
        )
    }

    /// Write the release as a static mirror under `dir` and point `config`
    /// at it with `file://` URLs.
    pub fn publish_to_dir(&self, dir: &Path, config: &mut UpdaterConfig) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("maven-metadata.xml"), self.metadata_xml())?;
        for (path, body) in self.files(config) {
            let target = dir.join(&path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, body)?;
        }

        config.server.upgrade_server = None;
        config.server.metadata_url = format!("file://{}/maven-metadata.xml", dir.display());
        config.server.client_url = format!("file://{}/", dir.display());
        Ok(())
    }
}
