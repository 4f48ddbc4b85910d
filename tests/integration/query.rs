use refit_cli::test_utils::InstallFixture;
use refit_cli::transport::MemoryTransport;
use refit_cli::upgrade::ChecksumVerifier;

#[tokio::test]
async fn test_checksums_are_filtered_by_component_name() {
    let install = InstallFixture::new(
        "1.0.0",
        &[
            ("registration-client-1.0.0.jar", b"client"),
            ("registration-services-1.0.0.jar", b"services"),
            ("commons-lang3-3.12.jar", b"commons"),
        ],
    )
    .unwrap();

    let checksums = install.orchestrator(MemoryTransport::new()).artifact_checksums().await;

    assert_eq!(checksums.len(), 2);
    assert_eq!(
        checksums["registration-client-1.0.0.jar"],
        ChecksumVerifier::sha256_hex(b"client")
    );
    assert!(checksums.contains_key("registration-services-1.0.0.jar"));
    assert!(!checksums.contains_key("commons-lang3-3.12.jar"));
}

#[tokio::test]
async fn test_configured_component_names() {
    let mut install =
        InstallFixture::new("1.0.0", &[("a.jar", b"a"), ("b.jar", b"b")]).unwrap();
    install.config.query.component_names = vec!["b.".to_string()];

    let checksums = install.orchestrator(MemoryTransport::new()).artifact_checksums().await;

    assert_eq!(checksums.keys().collect::<Vec<_>>(), vec!["b.jar"]);
}

#[tokio::test]
async fn test_no_manifest_means_no_checksums() {
    let install = InstallFixture::new("1.0.0", &[("registration-client.jar", b"c")]).unwrap();
    std::fs::remove_file(install.layout().manifest_path()).unwrap();

    let checksums = install.orchestrator(MemoryTransport::new()).artifact_checksums().await;

    assert!(checksums.is_empty());
}
