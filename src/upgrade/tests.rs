#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
    use super::super::*;
    use crate::config::{FileSettingsStore, SettingKey, SettingsStore, UpdaterConfig};
    use crate::manifest::{ArtifactEntry, Manifest, ManifestStore};
    use crate::transport::{MemoryTransport, Transport};
    use crate::upgrade::config::InstallLayout;
    use crate::utils::fs::dirs::list_relative_files;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tempfile::TempDir;

    const METADATA_URL: &str = "mem://releases/maven-metadata.xml";
    const CLIENT_URL: &str = "mem://releases/client/";

    struct Fixture {
        _temp: TempDir,
        config: UpdaterConfig,
        settings: Arc<FileSettingsStore>,
    }

    impl Fixture {
        fn layout(&self) -> &InstallLayout {
            &self.config.install
        }

        fn orchestrator(&self, transport: MemoryTransport) -> UpdateOrchestrator<MemoryTransport> {
            UpdateOrchestrator::new(&self.config, transport, self.settings.clone())
        }
    }

    fn sha(bytes: &[u8]) -> String {
        ChecksumVerifier::sha256_hex(bytes)
    }

    fn manifest(version: &str, files: &[(&str, &[u8])]) -> Manifest {
        files.iter().fold(Manifest::new(version), |m, (name, body)| {
            m.with_entry(*name, ArtifactEntry::new(sha(body)))
        })
    }

    /// Installation at 1.0.0 with `a.jar` and `b.jar`.
    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = UpdaterConfig::default();
        config.install = InstallLayout::new(temp.path().join("app"));
        config.server.metadata_url = METADATA_URL.to_string();
        config.server.client_url = CLIENT_URL.to_string();
        config.settings_file = Some(temp.path().join("settings.toml"));
        config.migration.sql_dir = Some(temp.path().join("sql"));

        let layout = &config.install;
        std::fs::create_dir_all(layout.bin_path()).unwrap();
        std::fs::create_dir_all(layout.lib_path()).unwrap();
        std::fs::write(layout.bin_path().join("run.sh"), b"run").unwrap();
        std::fs::write(layout.lib_path().join("a.jar"), b"a1").unwrap();
        std::fs::write(layout.lib_path().join("b.jar"), b"b1").unwrap();
        ManifestStore::for_layout(layout)
            .save(&manifest("1.0.0", &[("a.jar", b"a1"), ("b.jar", b"b1")]))
            .unwrap();

        let settings = Arc::new(FileSettingsStore::new(config.settings_path()));
        Fixture {
            _temp: temp,
            config,
            settings,
        }
    }

    /// Every file of `bin/`, `lib/` and the manifest with its contents.
    fn tree(layout: &InstallLayout) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        for dir in [layout.bin_path(), layout.lib_path()] {
            for relative in list_relative_files(&dir).unwrap() {
                let path = dir.join(relative);
                let body = std::fs::read(&path).unwrap();
                files.insert(path, body);
            }
        }
        let manifest = layout.manifest_path();
        files.insert(manifest.clone(), std::fs::read(&manifest).unwrap());
        files
    }

    /// Replace the directory at `path` with a regular file.
    fn clobber_dir(path: &Path) {
        if path.is_dir() {
            std::fs::remove_dir_all(path).unwrap();
            std::fs::write(path, b"not a directory").unwrap();
        }
    }

    type Hook = Box<dyn Fn(&str) + Send + Sync>;

    /// Settings store that runs a hook right after the snapshot path is
    /// recorded, the last step of a backup.
    struct HookedSettings {
        inner: FileSettingsStore,
        on_backup: Hook,
    }

    impl HookedSettings {
        fn new(f: &Fixture, on_backup: impl Fn(&str) + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                inner: FileSettingsStore::new(f.config.settings_path()),
                on_backup: Box::new(on_backup),
            })
        }
    }

    impl SettingsStore for HookedSettings {
        fn get(&self, key: SettingKey) -> anyhow::Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: SettingKey, value: &str) -> anyhow::Result<()> {
            self.inner.set(key, value)?;
            if key == SettingKey::BackupFolder {
                (self.on_backup)(value);
            }
            Ok(())
        }

        fn remove(&self, key: SettingKey) -> anyhow::Result<()> {
            self.inner.remove(key)
        }
    }

    /// Transport that runs a hook before every artifact download.
    struct HookedTransport {
        inner: MemoryTransport,
        on_artifact: Hook,
    }

    impl Transport for HookedTransport {
        async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
            if url.contains("/lib/") {
                (self.on_artifact)(url);
            }
            self.inner.fetch(url).await
        }
    }

    fn release(version: &str, files: &[(&str, &[u8])]) -> MemoryTransport {
        let metadata = format!(
            "<metadata><versioning><version>{version}</version>\
             <lastUpdated>20240315093007</lastUpdated></versioning></metadata>"
        );
        let mut transport = MemoryTransport::new()
            .with_file(METADATA_URL, metadata)
            .with_file(
                format!("{CLIENT_URL}{version}/MANIFEST.MF"),
                manifest(version, files).render(),
            );
        for (name, body) in files {
            transport = transport.with_file(format!("{CLIENT_URL}{version}/lib/{name}"), *body);
        }
        transport
    }

    #[tokio::test]
    async fn test_upgrade_already_current() {
        let f = fixture();
        let mut orchestrator = f.orchestrator(release("1.0.0", &[("a.jar", b"a1")]));

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert_eq!(report.code(), "UPGRADE_NOT_REQUIRED");
        assert_eq!(
            report.transitions,
            vec![UpgradeState::Idle, UpgradeState::CheckingVersion, UpgradeState::Completed]
        );
        assert!(report.snapshot.is_none());
    }

    #[tokio::test]
    async fn test_upgrade_aborts_when_metadata_unavailable() {
        let f = fixture();
        let mut orchestrator = f.orchestrator(MemoryTransport::new());

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert_eq!(report.code(), "UPGRADE_ABORTED");
        assert_eq!(report.final_state(), UpgradeState::CheckingVersion);
        assert!(!f.config.backup_root().exists());
    }

    #[tokio::test]
    async fn test_upgrade_completes() {
        let f = fixture();
        let transport = release("1.1.0", &[("a.jar", b"a1"), ("c.jar", b"c2")]);
        let mut orchestrator = f.orchestrator(transport);

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert!(report.is_success(), "{:?}", report.outcome);
        assert_eq!(
            report.transitions,
            vec![
                UpgradeState::Idle,
                UpgradeState::CheckingVersion,
                UpgradeState::BackingUp,
                UpgradeState::Syncing,
                UpgradeState::Finalizing,
                UpgradeState::Completed,
            ]
        );

        let sync = report.sync.unwrap();
        assert_eq!(sync.downloaded, vec!["c.jar"]);
        assert_eq!(sync.skipped, vec!["a.jar"]);
        assert_eq!(sync.deleted, vec!["b.jar"]);

        let lib = f.layout().lib_path();
        assert_eq!(std::fs::read(lib.join("c.jar")).unwrap(), b"c2");
        assert!(!lib.join("b.jar").exists());

        let installed = ManifestStore::for_layout(f.layout()).load().await.unwrap().unwrap();
        assert_eq!(installed.version(), Some("1.1.0"));
        assert_eq!(f.settings.get(SettingKey::UpdateAvailable).unwrap().as_deref(), Some("N"));
        assert!(f.settings.get(SettingKey::LastUpdate).unwrap().is_some());
        assert_eq!(f.settings.get(SettingKey::BackupFolder).unwrap(), report.snapshot.map(|p| p.display().to_string()));
    }

    #[tokio::test]
    async fn test_force_reconciles_same_version() {
        let f = fixture();
        std::fs::write(f.layout().lib_path().join("a.jar"), b"tampered").unwrap();
        let mut orchestrator = f.orchestrator(release("1.0.0", &[("a.jar", b"a1"), ("b.jar", b"b1")]));

        let report = orchestrator.upgrade(UpgradeOptions { force: true }).await;

        assert_eq!(report.code(), "UPGRADE_SUCCESS");
        assert_eq!(report.sync.unwrap().downloaded, vec!["a.jar"]);
        assert_eq!(std::fs::read(f.layout().lib_path().join("a.jar")).unwrap(), b"a1");
    }

    #[tokio::test]
    async fn test_failed_migration_restores_snapshot() {
        let f = fixture();
        let sql = f.config.migration.sql_dir.clone().unwrap().join("1.1.0");
        std::fs::create_dir_all(&sql).unwrap();
        std::fs::write(sql.join("initial_db_scripts.sql"), "CREATE TABLE t (a); INSERT INTO nope VALUES (1);").unwrap();
        std::fs::write(sql.join("rollback_scripts.sql"), "DROP TABLE t;").unwrap();
        f.settings.set(SettingKey::ServicesVersion, "1.0.0").unwrap();

        let transport = release("1.1.0-rc2", &[("a.jar", b"a2")]);
        let mut orchestrator = f
            .orchestrator(transport)
            .with_executor(Box::new(SqliteExecutor::in_memory().unwrap()));

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert_eq!(report.code(), "UPGRADE_ROLLED_BACK");
        assert_eq!(
            &report.transitions[4..],
            &[
                UpgradeState::Finalizing,
                UpgradeState::Migrating,
                UpgradeState::RollingBack,
                UpgradeState::RolledBack
            ]
        );
        assert_eq!(report.migration.unwrap().code(), "SQL_EXECUTION_FAILURE");

        let lib = f.layout().lib_path();
        assert_eq!(std::fs::read(lib.join("a.jar")).unwrap(), b"a1");
        assert_eq!(std::fs::read(lib.join("b.jar")).unwrap(), b"b1");
        let installed = ManifestStore::for_layout(f.layout()).load().await.unwrap().unwrap();
        assert_eq!(installed.version(), Some("1.0.0"));
        assert_eq!(f.settings.get(SettingKey::BackupFolder).unwrap(), None);
        assert_eq!(f.settings.get(SettingKey::ServicesVersion).unwrap().as_deref(), Some("1.0.0"));
        assert_eq!(f.settings.get(SettingKey::UpdateAvailable).unwrap(), None);
        assert_eq!(f.settings.get(SettingKey::LastUpdate).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_failure_restores_identical_tree() {
        let f = fixture();
        let before = tree(f.layout());
        let lib = f.layout().lib_path();
        let settings = HookedSettings::new(&f, move |_| clobber_dir(&lib));
        let transport = release("1.1.0", &[("a.jar", b"a2"), ("c.jar", b"c2")]);
        let mut orchestrator = UpdateOrchestrator::new(&f.config, transport, settings);

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert_eq!(report.code(), "UPGRADE_ROLLED_BACK");
        assert_eq!(
            &report.transitions[3..],
            &[UpgradeState::Syncing, UpgradeState::RollingBack, UpgradeState::RolledBack]
        );
        assert!(report.sync.is_none());
        assert_eq!(tree(f.layout()), before);
        assert_eq!(f.settings.get(SettingKey::UpdateAvailable).unwrap(), None);
        assert_eq!(f.settings.get(SettingKey::LastUpdate).unwrap(), None);
    }

    #[tokio::test]
    async fn test_manifest_save_failure_restores_identical_tree() {
        let f = fixture();
        let before = tree(f.layout());
        let manifest = f.layout().manifest_path();
        let transport = HookedTransport {
            inner: release("1.1.0", &[("a.jar", b"a2"), ("b.jar", b"b1")]),
            on_artifact: Box::new(move |_| {
                if manifest.is_file() {
                    std::fs::remove_file(&manifest).unwrap();
                    std::fs::create_dir(&manifest).unwrap();
                }
            }),
        };
        let mut orchestrator = UpdateOrchestrator::new(&f.config, transport, f.settings.clone());

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert_eq!(report.code(), "UPGRADE_ROLLED_BACK");
        assert_eq!(
            &report.transitions[4..],
            &[UpgradeState::Finalizing, UpgradeState::RollingBack, UpgradeState::RolledBack]
        );
        assert_eq!(report.sync.unwrap().downloaded, vec!["a.jar"]);
        assert_eq!(tree(f.layout()), before);
        let installed = ManifestStore::for_layout(f.layout()).load().await.unwrap().unwrap();
        assert_eq!(installed.version(), Some("1.0.0"));
        assert_eq!(f.settings.get(SettingKey::LastUpdate).unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_snapshot_fails_irrecoverably() {
        let f = fixture();
        let lib = f.layout().lib_path();
        let settings = HookedSettings::new(&f, move |snapshot| {
            std::fs::remove_dir_all(snapshot).unwrap();
            clobber_dir(&lib);
        });
        let transport = release("1.1.0", &[("a.jar", b"a2")]);
        let mut orchestrator = UpdateOrchestrator::new(&f.config, transport, settings);

        let report = orchestrator.upgrade(UpgradeOptions::default()).await;

        assert_eq!(report.code(), "UPGRADE_FAILED_IRRECOVERABLE");
        assert_eq!(report.final_state(), UpgradeState::FailedIrrecoverable);
        assert_eq!(
            &report.transitions[3..],
            &[UpgradeState::Syncing, UpgradeState::RollingBack, UpgradeState::FailedIrrecoverable]
        );
        let UpgradeOutcome::FailedIrrecoverable { reason } = &report.outcome else {
            panic!("unexpected outcome {:?}", report.outcome);
        };
        assert!(reason.contains("is missing"), "{reason}");
        assert!(f.layout().lib_path().is_file());
        assert_eq!(f.settings.get(SettingKey::LastUpdate).unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_for_update_persists_flag() {
        let f = fixture();

        let check = f.orchestrator(release("1.1.0", &[])).check_for_update().await;
        assert!(check.available);
        assert_eq!(check.current.as_deref(), Some("1.0.0"));
        assert_eq!(f.settings.get(SettingKey::UpdateAvailable).unwrap().as_deref(), Some("Y"));

        let check = f.orchestrator(release("1.0.0", &[])).check_for_update().await;
        assert!(!check.available);
        assert_eq!(f.settings.get(SettingKey::UpdateAvailable).unwrap().as_deref(), Some("N"));
    }

    #[tokio::test]
    async fn test_check_failure_leaves_flag_untouched() {
        let f = fixture();
        f.settings.set(SettingKey::UpdateAvailable, "Y").unwrap();

        let check = f.orchestrator(MemoryTransport::new()).check_for_update().await;

        assert!(!check.available);
        assert!(check.latest.is_none());
        assert_eq!(f.settings.get(SettingKey::UpdateAvailable).unwrap().as_deref(), Some("Y"));
    }

    #[tokio::test]
    async fn test_update_database() {
        let f = fixture();
        let sql = f.config.migration.sql_dir.clone().unwrap().join("1.0.0");
        std::fs::create_dir_all(&sql).unwrap();
        std::fs::write(sql.join("initial_db_scripts.sql"), "CREATE TABLE t (a);").unwrap();

        let mut orchestrator = f
            .orchestrator(MemoryTransport::new())
            .with_executor(Box::new(SqliteExecutor::in_memory().unwrap()));

        // Nothing recorded yet
        assert!(orchestrator.update_database().await.is_none());

        // Same version, ignoring case
        f.settings.set(SettingKey::ServicesVersion, "1.0.0").unwrap();
        assert!(orchestrator.update_database().await.is_none());

        f.settings.set(SettingKey::ServicesVersion, "0.9.0").unwrap();
        let report = orchestrator.update_database().await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.previous_version, "0.9.0");
        assert_eq!(f.settings.get(SettingKey::ServicesVersion).unwrap().as_deref(), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_migrate_requires_database() {
        let f = fixture();
        let mut orchestrator = f.orchestrator(MemoryTransport::new());
        let err = orchestrator.migrate("2.0.0", "1.0.0").await.unwrap_err();
        assert!(err.to_string().contains("migration.database"));
    }

    #[tokio::test]
    async fn test_status() {
        let f = fixture();
        f.settings.set(SettingKey::ServicesVersion, "1.0.0").unwrap();

        let status = f.orchestrator(release("1.1.0", &[])).status().await;

        assert_eq!(status.current.as_deref(), Some("1.0.0"));
        assert_eq!(status.latest.unwrap().version, "1.1.0");
        assert_eq!(status.release_timestamp.unwrap().to_string(), "20240315093007");
        assert_eq!(status.services_version.as_deref(), Some("1.0.0"));
        assert!(status.recorded_snapshot.is_none());
    }
}
