use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::BTreeMap;

use crate::common::{ReleaseFixture, installed_1_0_0, refit};

fn release_1_1_0() -> ReleaseFixture {
    ReleaseFixture::new("1.1.0")
        .with_artifact("registration-client.jar", b"client-1.1.0")
        .with_artifact("registration-services.jar", b"services-1.0.0")
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("refit")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("upgrade"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("sync-db"));
}

#[test]
fn test_check_reports_available_update() {
    let mut install = installed_1_0_0();
    let mirror = install.temp_path().join("mirror");
    release_1_1_0().publish_to_dir(&mirror, &mut install.config).unwrap();
    let config = install.write_config().unwrap();

    refit(&config)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("Update available: 1.0.0 -> 1.1.0"));
}

#[test]
fn test_upgrade_then_rollback() {
    let mut install = installed_1_0_0();
    let before = install.tree().unwrap();
    let mirror = install.temp_path().join("mirror");
    release_1_1_0().publish_to_dir(&mirror, &mut install.config).unwrap();
    let config = install.write_config().unwrap();

    refit(&config)
        .arg("upgrade")
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgraded 1.0.0 -> 1.1.0"))
        .stdout(predicate::str::contains("1 downloaded, 1 unchanged, 0 deleted"));
    assert_eq!(install.read_lib("registration-client.jar").unwrap(), b"client-1.1.0");

    refit(&config)
        .arg("upgrade")
        .assert()
        .success()
        .stdout(predicate::str::contains("Already on the latest version (1.1.0)"));

    refit(&config)
        .args(["rollback", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Installation restored"));
    assert_eq!(install.tree().unwrap(), before);
}

#[test]
fn test_upgrade_with_unreachable_server_fails() {
    let mut install = installed_1_0_0();
    let before = install.tree().unwrap();
    let missing = install.temp_path().join("no-mirror");
    install.config.server.metadata_url = format!("file://{}/maven-metadata.xml", missing.display());
    install.config.server.client_url = format!("file://{}/", missing.display());
    let config = install.write_config().unwrap();

    refit(&config)
        .arg("upgrade")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("UPGRADE_ABORTED"));
    assert_eq!(install.tree().unwrap(), before);
}

#[test]
fn test_checksums_json() {
    let install = installed_1_0_0();
    let config = install.write_config().unwrap();

    let output = refit(&config).args(["checksums", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let checksums: BTreeMap<String, String> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(checksums.len(), 2);
    assert!(checksums.contains_key("registration-client.jar"));
}

#[test]
fn test_migrate_without_database_is_an_error() {
    let install = installed_1_0_0();
    let config = install.write_config().unwrap();

    refit(&config)
        .args(["migrate", "1.1.0", "1.0.0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("migration.database is not set"));
}

#[test]
fn test_missing_config_file() {
    let install = installed_1_0_0();

    refit(&install.temp_path().join("absent.toml"))
        .arg("status")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load refit configuration"));
}
