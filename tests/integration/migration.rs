use refit_cli::config::{SettingKey, SettingsStore};
use refit_cli::test_utils::InstallFixture;
use refit_cli::transport::MemoryTransport;
use refit_cli::upgrade::migration::MigrationOutcome;
use refit_cli::upgrade::{SqliteExecutor, UpdateOrchestrator, UpgradeOptions};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::{ReleaseFixture, installed_1_0_0};

fn database(install: &InstallFixture) -> PathBuf {
    install.temp_path().join("services.sqlite")
}

fn with_database<T: refit_cli::transport::Transport>(
    install: &InstallFixture,
    transport: T,
) -> UpdateOrchestrator<T> {
    let executor = SqliteExecutor::open(&database(install), Duration::from_secs(1)).unwrap();
    install.orchestrator(transport).with_executor(Box::new(executor))
}

fn tables(install: &InstallFixture) -> Vec<String> {
    let conn = Connection::open(database(install)).unwrap();
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    let names: Vec<String> =
        stmt.query_map([], |row| row.get(0)).unwrap().map(Result::unwrap).collect();
    names
}

#[tokio::test]
async fn test_migrate_uses_version_core_and_runs_every_statement() {
    let install = installed_1_0_0();
    install
        .write_sql("1.1.0", "CREATE TABLE a (x INTEGER);\nCREATE TABLE b (y TEXT);\n", None)
        .unwrap();

    let mut orchestrator = with_database(&install, MemoryTransport::new());
    let report = orchestrator.migrate("1.1.0-rc1", "1.0.0").await.unwrap();

    assert!(report.scripts.forward.ends_with("1.1.0/initial_db_scripts.sql"));
    assert_eq!(
        report.outcome,
        MigrationOutcome::Applied {
            statements: 2,
            script_found: true
        }
    );
    assert_eq!(report.code(), "SQL_EXECUTION_SUCCESS");
    assert_eq!(tables(&install), vec!["a", "b"]);
    assert_eq!(
        install.settings().get(SettingKey::ServicesVersion).unwrap().as_deref(),
        Some("1.1.0-rc1")
    );
}

#[tokio::test]
async fn test_failed_statement_runs_rollback_script() {
    let install = installed_1_0_0();
    install.settings().set(SettingKey::ServicesVersion, "1.0.0").unwrap();
    install
        .write_sql(
            "1.1.0",
            "CREATE TABLE a (x INTEGER); INSERT INTO missing VALUES (1);",
            Some("DROP TABLE IF EXISTS a;"),
        )
        .unwrap();

    let mut orchestrator = with_database(&install, MemoryTransport::new());
    let report = orchestrator.migrate("1.1.0", "1.0.0").await.unwrap();

    assert_eq!(report.code(), "SQL_EXECUTION_FAILURE");
    assert!(tables(&install).is_empty());
    assert_eq!(
        install.settings().get(SettingKey::ServicesVersion).unwrap().as_deref(),
        Some("1.0.0")
    );
}

#[tokio::test]
async fn test_failed_rollback_is_reported() {
    let install = installed_1_0_0();
    install
        .write_sql("2.0.0", "SELECT * FROM missing;", Some("DROP TABLE also_missing;"))
        .unwrap();

    let mut orchestrator = with_database(&install, MemoryTransport::new());
    let report = orchestrator.migrate("2.0.0", "1.0.0").await.unwrap();

    assert_eq!(report.code(), "SQL_ROLLBACK_FAILURE");
    assert!(matches!(report.outcome, MigrationOutcome::RollbackFailed { .. }));
}

#[tokio::test]
async fn test_missing_script_is_a_no_op() {
    let install = installed_1_0_0();
    let mut orchestrator = with_database(&install, MemoryTransport::new());

    let report = orchestrator.migrate("3.0.0", "1.0.0").await.unwrap();

    assert_eq!(
        report.outcome,
        MigrationOutcome::Applied {
            statements: 0,
            script_found: false
        }
    );
    assert!(tables(&install).is_empty());
}

#[tokio::test]
async fn test_upgrade_migrates_database() {
    let install = installed_1_0_0();
    install.settings().set(SettingKey::ServicesVersion, "1.0.0").unwrap();
    install.write_sql("1.1.0", "CREATE TABLE audit (id INTEGER);", None).unwrap();
    let release = ReleaseFixture::new("1.1.0").with_artifact("registration-client.jar", b"client-1.1.0");

    let mut orchestrator = with_database(&install, release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert_eq!(report.code(), "UPGRADE_SUCCESS");
    assert!(report.migration.unwrap().is_success());
    assert_eq!(tables(&install), vec!["audit"]);
}

#[tokio::test]
async fn test_failed_migration_during_upgrade_restores_identical_tree() {
    let install = installed_1_0_0();
    let before = install.tree().unwrap();
    install.settings().set(SettingKey::ServicesVersion, "1.0.0").unwrap();
    install
        .write_sql("1.1.0", "CREATE TABLE audit (id INTEGER); BROKEN SQL;", Some("DROP TABLE audit;"))
        .unwrap();
    let release = ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("added.jar", b"added");

    let mut orchestrator = with_database(&install, release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert_eq!(report.code(), "UPGRADE_ROLLED_BACK");
    assert_eq!(install.tree().unwrap(), before);
    assert!(tables(&install).is_empty());
}

#[tokio::test]
async fn test_rollback_without_prior_manifest_leaves_no_manifest() {
    let install = installed_1_0_0();
    std::fs::remove_file(install.layout().manifest_path()).unwrap();
    let before = install.tree().unwrap();
    install.settings().set(SettingKey::ServicesVersion, "1.0.0").unwrap();
    install.write_sql("1.1.0", "BROKEN SQL;", None).unwrap();
    let release = ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("added.jar", b"added");

    let mut orchestrator = with_database(&install, release.transport(&install.config));
    let report = orchestrator.upgrade(UpgradeOptions::default()).await;

    assert_eq!(report.code(), "UPGRADE_ROLLED_BACK");
    assert!(!install.layout().manifest_path().exists());
    assert_eq!(install.tree().unwrap(), before);
    assert_eq!(install.read_lib("registration-client.jar").unwrap(), b"client-1.0.0");
    assert_eq!(install.settings().get(SettingKey::LastUpdate).unwrap(), None);
}

#[tokio::test]
async fn test_sync_db_only_when_versions_differ() {
    let install = installed_1_0_0();
    install.write_sql("1.0.0", "CREATE TABLE t (x);", None).unwrap();
    let mut orchestrator = with_database(&install, MemoryTransport::new());

    install.settings().set(SettingKey::ServicesVersion, "1.0.0").unwrap();
    assert!(orchestrator.update_database().await.is_none());

    install.settings().set(SettingKey::ServicesVersion, "0.9.0").unwrap();
    let report = orchestrator.update_database().await.unwrap();
    assert!(report.is_success());
    assert_eq!(tables(&install), vec!["t"]);
}
