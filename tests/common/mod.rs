//! Shared helpers for integration tests.
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::Path;

pub use refit_cli::test_utils::{InstallFixture, ReleaseFixture, init_test_logging};

/// `refit` binary with `--config` pointing at `config` and logging quieted.
pub fn refit(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("refit").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG").arg("--config").arg(config);
    cmd
}

/// The two-artifact installation most tests start from.
pub fn installed_1_0_0() -> InstallFixture {
    init_test_logging(None);
    InstallFixture::new(
        "1.0.0",
        &[("registration-client.jar", b"client-1.0.0"), ("registration-services.jar", b"services-1.0.0")],
    )
    .unwrap()
}
