use std::time::Duration;
use tempfile::TempDir;
use upkeep_cli::config::UpdaterConfig;
use upkeep_cli::core::UpkeepError;
use upkeep_cli::release::ReleaseClient;

use crate::common::{StubResponse, StubServer, native_asset_name, release_json};

fn client(server: &StubServer, max_retries: usize, timeout_secs: u64) -> ReleaseClient {
    let config = UpdaterConfig {
        api_base: server.base_url().to_string(),
        max_retries,
        download_timeout_secs: timeout_secs,
        ..UpdaterConfig::default()
    };
    ReleaseClient::new(&config, false).unwrap()
}

fn download_attempts(err: &anyhow::Error) -> Option<usize> {
    match err.downcast_ref::<UpkeepError>() {
        Some(UpkeepError::DownloadFailed {
            attempts,
            ..
        }) => Some(*attempts),
        _ => None,
    }
}

#[tokio::test]
async fn test_fetch_latest_and_select_native_asset() {
    let asset = native_asset_name();
    let body = release_json(
        "v2.1.0",
        &[
            ("app-plan9-sparc.tar.gz", "http://unused/plan9"),
            (asset.as_str(), "http://unused/native"),
            ("checksums.txt", "http://unused/sums"),
        ],
    );
    let server = StubServer::start(move |path, _| {
        if path == "/repos/acme/widget/releases/latest" {
            StubResponse::ok(body.clone())
        } else {
            StubResponse::status(404)
        }
    });

    let release = client(&server, 0, 5).fetch_latest("acme", "widget").await.unwrap();

    assert_eq!(release.tag_name, "v2.1.0");
    let selected = release.select_asset().unwrap();
    assert_eq!(selected.name, asset);
    assert_eq!(selected.browser_download_url, "http://unused/native");
}

#[tokio::test]
async fn test_fetch_latest_retries_server_errors() {
    let body = release_json("v1.0.1", &[]);
    let server = StubServer::start(move |_, index| {
        if index == 0 {
            StubResponse::status(503)
        } else {
            StubResponse::ok(body.clone())
        }
    });

    let release = client(&server, 2, 5).fetch_latest("acme", "widget").await.unwrap();
    assert_eq!(release.tag_name, "v1.0.1");
    assert!(release.assets.is_empty());
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_missing_release_is_not_retried() {
    let server = StubServer::start(|_, _| StubResponse::status(404));

    let err = client(&server, 3, 5).fetch_latest("acme", "widget").await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::ReleaseUnavailable { .. })
    ));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_malformed_descriptor_is_release_unavailable() {
    let server = StubServer::start(|_, _| StubResponse::ok("<html>rate limited</html>"));

    let err = client(&server, 3, 5).fetch_latest("acme", "widget").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<UpkeepError>(),
        Some(UpkeepError::ReleaseUnavailable { .. })
    ));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_download_writes_asset() {
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let expected = payload.clone();
    let server = StubServer::start(move |_, _| StubResponse::ok(payload.clone()));
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("update.tar.gz");

    client(&server, 0, 5).download(&server.url("/asset"), &dest).await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), expected);
}

#[tokio::test]
async fn test_truncated_download_is_retried_and_replaced() {
    let server = StubServer::start(|_, index| {
        if index == 0 {
            StubResponse::truncated(b"partial".to_vec(), 1024)
        } else {
            StubResponse::ok(b"complete payload".to_vec())
        }
    });
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("update.zip");

    client(&server, 2, 10).download(&server.url("/asset"), &dest).await.unwrap();

    assert_eq!(std::fs::read(&dest).unwrap(), b"complete payload");
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_download_gives_up_after_retries() {
    let server = StubServer::start(|_, _| StubResponse::status(502));
    let temp = TempDir::new().unwrap();

    let err = client(&server, 2, 30)
        .download(&server.url("/asset"), &temp.path().join("update.zip"))
        .await
        .unwrap_err();

    assert_eq!(download_attempts(&err), Some(3));
    assert_eq!(server.hits(), 3);
}

#[tokio::test]
async fn test_download_client_error_fails_fast() {
    let server = StubServer::start(|_, _| StubResponse::status(403));
    let temp = TempDir::new().unwrap();

    let err = client(&server, 5, 30)
        .download(&server.url("/asset"), &temp.path().join("update.zip"))
        .await
        .unwrap_err();

    assert_eq!(download_attempts(&err), Some(1));
    assert_eq!(server.hits(), 1);
}

#[tokio::test]
async fn test_download_deadline_covers_all_attempts() {
    let server = StubServer::start(|_, _| {
        std::thread::sleep(Duration::from_secs(3));
        StubResponse::ok(b"too late".to_vec())
    });
    let temp = TempDir::new().unwrap();

    let started = std::time::Instant::now();
    let err = client(&server, 5, 1)
        .download(&server.url("/asset"), &temp.path().join("update.zip"))
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(download_attempts(&err).is_some(), "{err:#}");
    assert!(format!("{err:#}").contains("deadline"));
}
