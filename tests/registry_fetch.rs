//! Registry pulls, mirror fallback and resume against mock registries

use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use vm_image_fetcher::config::AuthConfig;
use vm_image_fetcher::error::FetchError;
use vm_image_fetcher::fetch::{FetchOptions, FetchSession};
use vm_image_fetcher::logging::Logger;
use vm_image_fetcher::mirror::MirrorResolver;
use vm_image_fetcher::registry::RegistryFetcher;
use vm_image_fetcher::status::{DownloadStatus, StatusStore};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPOSITORY: &str = "kspeeder/win11x64";
const TAG: &str = "cn_simplified";
const TITLE: &str = "Win11_24H2_Chinese_Simplified_x64.iso";

fn payload() -> Vec<u8> {
    (0..=255u8).cycle().take(1000).collect()
}

fn digest_of(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

fn host_of(server: &MockServer) -> String {
    server.uri().trim_start_matches("http://").to_string()
}

fn reference_on(server: &MockServer) -> String {
    format!("{}/{}:{}", host_of(server), REPOSITORY, TAG)
}

fn fetcher() -> RegistryFetcher {
    RegistryFetcher::new(AuthConfig::anonymous(), Logger::new_quiet()).with_plain_http(true)
}

fn manifest_for(data: &[u8]) -> serde_json::Value {
    json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.empty.v1+json",
            "digest": "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a",
            "size": 2
        },
        "layers": [{
            "mediaType": "application/octet-stream",
            "digest": digest_of(data),
            "size": data.len(),
            "annotations": { "org.opencontainers.image.title": TITLE }
        }]
    })
}

/// Anonymous registry serving `data` as the single file of the artifact
async fn mount_registry(server: &MockServer, data: &[u8]) {
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", REPOSITORY, TAG)))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/vnd.oci.image.manifest.v1+json")
                .set_body_json(manifest_for(data)),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPOSITORY, digest_of(data))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.to_vec()))
        .mount(server)
        .await;
}

async fn mount_unavailable(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(server)
        .await;
}

fn cancel_soon() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });
    token
}

fn quiet_session() -> FetchSession {
    FetchSession::new(Logger::new_quiet())
}

#[tokio::test]
async fn test_anonymous_pull_names_file_after_title() {
    let server = MockServer::start().await;
    let data = payload();
    mount_registry(&server, &data).await;

    let tmp = TempDir::new().unwrap();
    let session = quiet_session().with_options(FetchOptions {
        verify_digest: true,
        ..FetchOptions::default()
    });

    let dest = fetcher()
        .fetch(&reference_on(&server), tmp.path(), &session)
        .await
        .unwrap();

    assert_eq!(dest, tmp.path().join(TITLE));
    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
}

#[tokio::test]
async fn test_bearer_token_flow() {
    let server = MockServer::start().await;
    let data = payload();
    let challenge = format!(r#"Bearer realm="{}/token",service="mock-registry""#, server.uri());

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(401).insert_header("WWW-Authenticate", challenge.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/token"))
        .and(query_param("scope", format!("repository:{}:pull", REPOSITORY).as_str()))
        .and(query_param("service", "mock-registry"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "pull-token" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", REPOSITORY, TAG)))
        .and(header("Authorization", "Bearer pull-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(manifest_for(&data)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPOSITORY, digest_of(&data))))
        .and(header("Authorization", "Bearer pull-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let dest = fetcher()
        .fetch(&reference_on(&server), tmp.path(), &quiet_session())
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
}

#[tokio::test]
async fn test_blob_resumes_with_range() {
    let server = MockServer::start().await;
    let data = payload();
    mount_registry(&server, &data).await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPOSITORY, digest_of(&data))))
        .and(header("Range", "bytes=400-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(data[400..].to_vec()))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join(TITLE);
    tokio::fs::write(tmp.path().join(format!("{}.syn", TITLE)), &data[..400])
        .await
        .unwrap();
    let store = StatusStore::new(tmp.path().join("download.ops"));
    let mut status = DownloadStatus::new(&dest, data.len() as u64, reference_on(&server));
    status.curr = 400;
    store.save(&status).await.unwrap();

    let session = quiet_session().with_checkpoint(store.clone(), store.load().await);
    fetcher()
        .fetch(&reference_on(&server), tmp.path(), &session)
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert!(store.load().await.is_none());
}

#[tokio::test]
async fn test_mirror_failure_falls_back_to_canonical() {
    let mirror = MockServer::start().await;
    mount_unavailable(&mirror).await;
    let canonical = MockServer::start().await;
    let data = payload();
    mount_registry(&canonical, &data).await;

    let tmp = TempDir::new().unwrap();
    let session = quiet_session();
    let fetcher = fetcher();
    let resolver = MirrorResolver::new(vec![host_of(&mirror)], Logger::new_quiet());

    let dest = resolver
        .resolve_with_fallback(&reference_on(&canonical), |candidate| {
            let (fetcher, session, dir) = (&fetcher, &session, tmp.path());
            async move { fetcher.fetch(&candidate, dir, session).await }
        })
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    assert!(!mirror.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mirror_is_preferred_when_healthy() {
    let mirror = MockServer::start().await;
    let data = payload();
    mount_registry(&mirror, &data).await;
    let canonical = MockServer::start().await;

    let tmp = TempDir::new().unwrap();
    let session = quiet_session();
    let fetcher = fetcher();
    let resolver = MirrorResolver::new(vec![host_of(&mirror)], Logger::new_quiet());

    resolver
        .resolve_with_fallback(&reference_on(&canonical), |candidate| {
            let (fetcher, session, dir) = (&fetcher, &session, tmp.path());
            async move { fetcher.fetch(&candidate, dir, session).await }
        })
        .await
        .unwrap();

    assert!(canonical.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_all_sources_failing_reports_last() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    let canonical = MockServer::start().await;
    for server in [&first, &second, &canonical] {
        mount_unavailable(server).await;
    }

    let tmp = TempDir::new().unwrap();
    let session = quiet_session();
    let fetcher = fetcher();
    let resolver = MirrorResolver::new(vec![host_of(&first), host_of(&second)], Logger::new_quiet());

    let canonical_ref = reference_on(&canonical);
    let err = resolver
        .resolve_with_fallback(&canonical_ref, |candidate| {
            let (fetcher, session, dir) = (&fetcher, &session, tmp.path());
            async move { fetcher.fetch(&candidate, dir, session).await }
        })
        .await
        .unwrap_err();

    match err {
        FetchError::MirrorsExhausted { last_source, error } => {
            assert_eq!(last_source, canonical_ref);
            assert!(matches!(*error, FetchError::Registry(_)));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_artifact_stops_fallback() {
    let mirror = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mirror)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", REPOSITORY, TAG)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "schemaVersion": 2, "layers": [] })))
        .mount(&mirror)
        .await;
    let canonical = MockServer::start().await;

    let tmp = TempDir::new().unwrap();
    let session = quiet_session();
    let fetcher = fetcher();
    let resolver = MirrorResolver::new(vec![host_of(&mirror)], Logger::new_quiet());

    let err = resolver
        .resolve_with_fallback(&reference_on(&canonical), |candidate| {
            let (fetcher, session, dir) = (&fetcher, &session, tmp.path());
            async move { fetcher.fetch(&candidate, dir, session).await }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::EmptyArtifact(_)));
    assert!(canonical.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_digest_mismatch_discards_partial() {
    let server = MockServer::start().await;
    let data = payload();
    let mut corrupted = data.clone();
    corrupted[10] ^= 0xFF;

    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", REPOSITORY, TAG)))
        .respond_with(ResponseTemplate::new(200).set_body_json(manifest_for(&data)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPOSITORY, digest_of(&data))))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(corrupted))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let session = quiet_session().with_options(FetchOptions {
        verify_digest: true,
        ..FetchOptions::default()
    });

    let err = fetcher()
        .fetch(&reference_on(&server), tmp.path(), &session)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::DigestMismatch { .. }));
    assert!(!tmp.path().join(TITLE).exists());
    assert!(!tmp.path().join(format!("{}.syn", TITLE)).exists());
}

#[tokio::test]
async fn test_cancel_during_manifest_stops_fallback() {
    let mirror = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mirror)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/manifests/{}", REPOSITORY, TAG)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(manifest_for(&payload()))
                .set_delay(Duration::from_secs(20)),
        )
        .mount(&mirror)
        .await;
    let canonical = MockServer::start().await;
    mount_registry(&canonical, &payload()).await;

    let tmp = TempDir::new().unwrap();
    let cancel = cancel_soon();
    let session = quiet_session().with_cancel(cancel.clone());
    let fetcher = fetcher();
    let resolver = MirrorResolver::new(vec![host_of(&mirror)], Logger::new_quiet()).with_cancel(cancel);

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        resolver.resolve_with_fallback(&reference_on(&canonical), |candidate| {
            let (fetcher, session, dir) = (&fetcher, &session, tmp.path());
            async move { fetcher.fetch(&candidate, dir, session).await }
        }),
    )
    .await
    .expect("fetch kept waiting after cancellation");

    assert!(matches!(result, Err(FetchError::Cancelled)));
    assert!(canonical.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_during_registry_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(20)))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let session = quiet_session().with_cancel(cancel_soon());

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        fetcher().fetch(&reference_on(&server), tmp.path(), &session),
    )
    .await
    .expect("fetch kept waiting after cancellation");

    assert!(matches!(result, Err(FetchError::Cancelled)));
}

#[tokio::test]
async fn test_cancel_while_opening_blob_keeps_checkpoint() {
    let server = MockServer::start().await;
    let data = payload();
    mount_registry(&server, &data).await;
    Mock::given(method("GET"))
        .and(path(format!("/v2/{}/blobs/{}", REPOSITORY, digest_of(&data))))
        .and(header("Range", "bytes=400-"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(data[400..].to_vec())
                .set_delay(Duration::from_secs(20)),
        )
        .with_priority(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join(TITLE);
    tokio::fs::write(tmp.path().join(format!("{}.syn", TITLE)), &data[..400])
        .await
        .unwrap();
    let store = StatusStore::new(tmp.path().join("download.ops"));
    let mut status = DownloadStatus::new(&dest, data.len() as u64, reference_on(&server));
    status.curr = 400;
    store.save(&status).await.unwrap();

    let session = quiet_session()
        .with_checkpoint(store.clone(), store.load().await)
        .with_cancel(cancel_soon());
    let result = tokio::time::timeout(
        Duration::from_secs(3),
        fetcher().fetch(&reference_on(&server), tmp.path(), &session),
    )
    .await
    .expect("fetch kept waiting after cancellation");

    assert!(matches!(result, Err(FetchError::Cancelled)));
    assert!(!dest.exists());
    assert_eq!(store.load_valid().await.unwrap().curr, 400);
}

#[tokio::test]
async fn test_cancelled_resolver_tries_no_candidate() {
    let server = MockServer::start().await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let resolver = MirrorResolver::new(vec![host_of(&server)], Logger::new_quiet()).with_cancel(cancel);

    let result: vm_image_fetcher::Result<()> = resolver
        .resolve_with_fallback(&reference_on(&server), |_candidate| async { Ok(()) })
        .await;

    assert!(matches!(result, Err(FetchError::Cancelled)));
}
