use refit_cli::config::{SettingKey, SettingsStore};
use refit_cli::manifest::ManifestStore;
use refit_cli::upgrade::{RollbackOutcome, UpgradeOptions, UpgradeOutcome, UpgradeState};
use serial_test::serial;

use crate::common::{ReleaseFixture, installed_1_0_0};

fn snapshot_dirs(root: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_equal_versions_need_no_update() {
    let install = installed_1_0_0();
    let before = install.tree().unwrap();
    let release = ReleaseFixture::new("1.0.0")
        .with_artifact("registration-client.jar", b"client-1.0.0")
        .with_artifact("registration-services.jar", b"services-1.0.0");

    let check = install.orchestrator(release.transport(&install.config)).check_for_update().await;
    assert!(!check.available);

    let mut orchestrator = install.orchestrator(release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert!(matches!(report.outcome, UpgradeOutcome::AlreadyCurrent { ref version } if version == "1.0.0"));
    assert!(!install.config.backup_root().exists());
    assert_eq!(install.tree().unwrap(), before);
}

#[tokio::test]
async fn test_single_changed_artifact_is_the_only_download() {
    let install = installed_1_0_0();
    let untouched_mtime = install.lib_modified("registration-services.jar").unwrap();
    let release = ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("registration-services.jar", b"services-1.0.0");

    let mut orchestrator = install.orchestrator(release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert_eq!(report.code(), "UPGRADE_SUCCESS");
    let sync = report.sync.as_ref().unwrap();
    assert_eq!(sync.downloaded, vec!["registration-client.jar"]);
    assert_eq!(sync.skipped, vec!["registration-services.jar"]);
    assert!(sync.deleted.is_empty());

    assert_eq!(install.read_lib("registration-client.jar").unwrap(), b"client-1.1.0");
    assert_eq!(install.lib_modified("registration-services.jar").unwrap(), untouched_mtime);

    let manifest = ManifestStore::for_layout(install.layout()).load().await.unwrap().unwrap();
    assert_eq!(manifest, release.manifest());
}

#[tokio::test]
async fn test_backup_failure_leaves_installation_untouched() {
    let mut install = installed_1_0_0();
    let before = install.tree().unwrap();

    // A regular file where the backup root should be
    let blocker = install.temp_path().join("not-a-directory");
    std::fs::write(&blocker, b"x").unwrap();
    install.config.backup.root = Some(blocker);

    let release = ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("extra.jar", b"extra");
    let mut orchestrator = install.orchestrator(release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert_eq!(report.code(), "UPGRADE_ABORTED");
    assert_eq!(report.final_state(), UpgradeState::BackingUp);
    assert!(report.sync.is_none());
    assert_eq!(install.tree().unwrap(), before);
    assert_eq!(install.settings().get(SettingKey::BackupFolder).unwrap(), None);
}

#[tokio::test]
async fn test_failed_download_then_rollback_restores_identical_tree() {
    let install = installed_1_0_0();
    let before = install.tree().unwrap();

    let release = ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("registration-services.jar", b"services-1.1.0")
        .with_artifact("ext/new.jar", b"new")
        .unavailable("registration-services.jar");
    let mut orchestrator = install.orchestrator(release.transport(&install.config));

    let report = orchestrator.upgrade(UpgradeOptions::default()).await;
    let sync = report.sync.clone().unwrap();
    assert!(sync.failed.contains_key("registration-services.jar"));
    assert_eq!(sync.downloaded, vec!["ext/new.jar", "registration-client.jar"]);
    // The old bytes stay in place until a later sync succeeds
    assert_eq!(install.read_lib("registration-services.jar").unwrap(), b"services-1.0.0");
    assert_ne!(install.tree().unwrap(), before);

    let outcome = orchestrator.rollback(None).await.unwrap();

    assert_eq!(outcome, RollbackOutcome::Restored);
    assert_eq!(install.tree().unwrap(), before);
}

#[tokio::test]
async fn test_corrupt_download_keeps_previous_file() {
    let install = installed_1_0_0();
    let release = ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("registration-services.jar", b"services-1.0.0")
        .corrupt("registration-client.jar");

    let mut orchestrator = install.orchestrator(release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    let sync = report.sync.unwrap();
    assert!(sync.failed.contains_key("registration-client.jar"));
    assert!(sync.downloaded.is_empty());
    assert_eq!(install.read_lib("registration-client.jar").unwrap(), b"client-1.0.0");
}

#[tokio::test]
async fn test_unknown_artifacts_are_deleted() {
    let install = installed_1_0_0();
    install.write_lib("stray/leftover.jar", b"stray").unwrap();
    let release = ReleaseFixture::new("1.1.0").with_artifact("registration-client.jar", b"client-1.1.0");

    let mut orchestrator = install.orchestrator(release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert!(report.is_success());
    let mut deleted = report.sync.unwrap().deleted;
    deleted.sort();
    assert_eq!(deleted, vec!["registration-services.jar", "stray/leftover.jar"]);
    assert!(install.read_lib("registration-services.jar").is_err());
    assert!(install.read_lib("stray/leftover.jar").is_err());
}

#[tokio::test]
async fn test_two_backups_leave_one_snapshot() {
    let install = installed_1_0_0();

    let first = ReleaseFixture::new("1.1.0").with_artifact("registration-client.jar", b"client-1.1.0");
    let report = install.orchestrator(first.transport(&install.config)).upgrade(UpgradeOptions::default()).await;
    assert!(report.is_success());

    let second = ReleaseFixture::new("1.2.0").with_artifact("registration-client.jar", b"client-1.2.0");
    let report = install.orchestrator(second.transport(&install.config)).upgrade(UpgradeOptions::default()).await;
    assert!(report.is_success());

    let snapshots = snapshot_dirs(&install.config.backup_root());
    assert_eq!(snapshots.len(), 1, "{snapshots:?}");
    assert!(snapshots[0].starts_with("1.1.0_"));
    assert!(snapshots[0].ends_with('Z'));

    let recorded = install.settings().get(SettingKey::BackupFolder).unwrap().unwrap();
    assert_eq!(recorded, report.snapshot.unwrap().display().to_string());
}

#[tokio::test]
async fn test_upgrade_records_bookkeeping() {
    let install = installed_1_0_0();
    let release = ReleaseFixture::new("1.1.0").with_artifact("registration-client.jar", b"client-1.1.0");

    let check = install.orchestrator(release.transport(&install.config)).check_for_update().await;
    assert!(check.available);
    assert_eq!(install.settings().get(SettingKey::UpdateAvailable).unwrap().as_deref(), Some("Y"));

    let report = install
        .orchestrator(release.transport(&install.config))
        .upgrade(UpgradeOptions::default())
        .await;
    assert!(report.is_success());

    let settings = install.settings();
    assert_eq!(settings.get(SettingKey::UpdateAvailable).unwrap().as_deref(), Some("N"));
    let applied = settings.get(SettingKey::LastUpdate).unwrap().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(&applied).is_ok(), "{applied}");
}

/// Both sessions contend for the installation lock; the loser must see the
/// winner's result rather than upgrade a second time.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_concurrent_upgrades_run_one_after_another() {
    let install = installed_1_0_0();
    let release = ReleaseFixture::new("1.1.0").with_artifact("registration-client.jar", b"client-1.1.0");

    let mut a = install.orchestrator(release.transport(&install.config));
    let mut b = install.orchestrator(release.transport(&install.config));
    let (first, second) = tokio::join!(
        a.upgrade(UpgradeOptions::default()),
        b.upgrade(UpgradeOptions::default())
    );

    let mut codes = vec![first.code(), second.code()];
    codes.sort_unstable();
    assert_eq!(codes, vec!["UPGRADE_NOT_REQUIRED", "UPGRADE_SUCCESS"]);
    assert_eq!(install.read_lib("registration-client.jar").unwrap(), b"client-1.1.0");
}
