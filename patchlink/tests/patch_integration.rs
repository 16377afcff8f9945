//! End-to-end patch runs: manifest and payloads over the network, files
//! on disk.
//!
//! Run with: `cargo test --test patch_integration`

mod common;

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tempfile::TempDir;

use patchlink::checksum::ChecksumVerifier;
use patchlink::manifest::{Manifest, ManifestClient, ManifestEntry, RemoteManifest};
use patchlink::patch::{
    staging_dir, JobState, LocalFs, PatchConfig, PatchEngine, PatchError, RemovalPolicy, RunError,
    TransportPayloadSource,
};

use common::{compress, noise, ServerOptions, TestServer, PRODUCT};

fn engine(server: &TestServer, config: PatchConfig) -> (PatchEngine, RemoteManifest) {
    let transport = server.transport();
    let manifests = ManifestClient::new(Arc::clone(&transport)).source(PRODUCT);
    let payloads = Arc::new(TransportPayloadSource::new(transport));
    (
        PatchEngine::new(config, payloads, Arc::new(LocalFs)),
        manifests,
    )
}

fn fast_retries() -> PatchConfig {
    PatchConfig::default()
        .with_concurrency(2)
        .with_retry_base_delay(Duration::from_millis(10))
}

fn staged_files(root: &Path) -> usize {
    fs::read_dir(staging_dir(root))
        .map(|dir| dir.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_fresh_install_then_up_to_date() {
    let big = noise(20_000, 1);
    let files: &[(&str, &[u8])] = &[
        ("Client.exe", b"client binary"),
        ("dat/city.prp", &big),
        ("sfx/wind.ogg", &[7u8; 5000]),
    ];
    let server = TestServer::start(files, ServerOptions::default()).await;
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("install");

    let (patcher, manifests) = engine(&server, fast_retries());
    let report = patcher.run(&manifests, &root).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.downloaded_count(), 3);

    for (path, content) in files {
        assert_eq!(&fs::read(root.join(path)).unwrap(), content, "{path}");
    }
    assert_eq!(staged_files(&root), 0);
    assert_eq!(server.stats().download_count(), 3);

    // Nothing changed, so nothing is fetched
    let report = patcher.run(&manifests, &root).await.unwrap();
    assert!(report.jobs.is_empty());
    assert_eq!(report.up_to_date, 3);
    assert_eq!(server.stats().download_count(), 3);
}

#[tokio::test]
async fn test_outdated_and_extraneous_files() {
    let files: &[(&str, &[u8])] = &[("a.dat", b"new contents"), ("b.dat", b"unchanged")];
    let server = TestServer::start(files, ServerOptions::default()).await;
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    fs::write(root.join("a.dat"), b"old contents").unwrap();
    fs::write(root.join("b.dat"), b"unchanged").unwrap();
    fs::create_dir_all(root.join("old")).unwrap();
    fs::write(root.join("old/leftover.dat"), b"stale").unwrap();

    let config = fast_retries().with_removal(RemovalPolicy::Remove);
    let (patcher, manifests) = engine(&server, config);
    let report = patcher.run(&manifests, root).await.unwrap();

    assert_eq!(report.jobs.len(), 1);
    assert_eq!(report.jobs[0].path(), "a.dat");
    assert_eq!(report.up_to_date, 1);
    assert_eq!(report.removed, ["old/leftover.dat"]);
    assert_eq!(fs::read(root.join("a.dat")).unwrap(), b"new contents");
    assert!(!root.join("old/leftover.dat").exists());
    assert_eq!(server.stats().offsets("b.dat"), Vec::<u32>::new());
}

#[tokio::test]
async fn test_dropped_connection_resumes_from_staged_bytes() {
    let content = noise(8192, 7);
    let options = ServerOptions {
        chunk_size: 1024,
        drop_after: Some(3000),
        drops: 1,
        ..Default::default()
    };
    let server = TestServer::start(&[("big.dat", &content)], options).await;
    let temp = TempDir::new().unwrap();

    let (patcher, manifests) = engine(&server, fast_retries());
    let report = patcher.run(&manifests, temp.path()).await.unwrap();

    assert!(report.is_success());
    assert_eq!(fs::read(temp.path().join("big.dat")).unwrap(), content);
    assert_eq!(server.stats().offsets("big.dat"), [0, 3072]);
    // Manifest session, first content session, replacement content session
    assert_eq!(server.stats().connections(), 3);
    assert_eq!(report.jobs[0].retry_count(), 1);
}

#[tokio::test]
async fn test_missing_payload_fails_only_that_file() {
    let good = b"present".to_vec();
    let manifest = Manifest::new(vec![
        ManifestEntry::new(
            "good.dat",
            ChecksumVerifier::compute(&good),
            compress(&good).len() as u32,
            good.len() as u32,
        ),
        ManifestEntry::new("gone.dat", ChecksumVerifier::compute(b"gone"), 12, 4),
    ])
    .unwrap();
    let payloads = HashMap::from([("good.dat".to_string(), Bytes::from(compress(&good)))]);
    let server = TestServer::with_manifest(manifest, payloads, ServerOptions::default()).await;
    let temp = TempDir::new().unwrap();

    let (patcher, manifests) = engine(&server, fast_retries());
    let err = patcher.run(&manifests, temp.path()).await.unwrap_err();
    let report = match err {
        RunError::Incomplete(report) => report,
        other => panic!("expected Incomplete, got {other:?}"),
    };

    assert_eq!(report.job("good.dat").unwrap().state(), JobState::Done);
    let gone = report.job("gone.dat").unwrap();
    assert_eq!(gone.state(), JobState::Failed);
    assert!(matches!(gone.last_error(), Some(PatchError::Rejected { .. })));
    // Rejections are final
    assert_eq!(server.stats().offsets("gone.dat"), [0]);
    assert!(!temp.path().join("gone.dat").exists());
}

#[tokio::test]
async fn test_unreachable_server_fails_before_touching_disk() {
    let server = TestServer::start(&[("a.dat", b"a")], ServerOptions::default()).await;
    let (patcher, manifests) = engine(&server, fast_retries());
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let temp = TempDir::new().unwrap();
    let root = temp.path().join("install");
    let err = patcher.run(&manifests, &root).await.unwrap_err();
    assert!(matches!(err, RunError::Manifest(_)));
    assert!(err.report().is_none());
}
