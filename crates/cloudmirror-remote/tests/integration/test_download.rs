//! Integration tests for `POST /sync/download`

use cloudmirror_core::ports::IRemoteService;
use cloudmirror_remote::client::RemoteClient;
use cloudmirror_remote::provider::RemoteSyncService;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_download_returns_content() {
    let (server, client) = common::setup_remote_mock().await;

    let file_content = b"Hello from the sync service";
    common::mount_download(&server, file_content).await;

    let data = client.download("sk-1").await.expect("Download failed");
    assert_eq!(data, file_content);
}

#[tokio::test]
async fn test_download_sends_storage_key() {
    let (server, client) = common::setup_remote_mock().await;

    Mock::given(method("POST"))
        .and(path("/sync/download"))
        .and(body_json(json!({ "storage_key": "blob/42" })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
        .expect(1)
        .mount(&server)
        .await;

    let data = client.download("blob/42").await.expect("Download failed");
    assert_eq!(data, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_download_large_file() {
    let (server, client) = common::setup_remote_mock().await;

    let file_content: Vec<u8> = (0..1_048_576).map(|i| (i % 256) as u8).collect();
    common::mount_download(&server, &file_content).await;

    let data = client.download("big").await.expect("Large download failed");
    assert_eq!(data.len(), 1_048_576);
    assert_eq!(data, file_content);
}

#[tokio::test]
async fn test_download_empty_file() {
    let (server, client) = common::setup_remote_mock().await;
    common::mount_download(&server, &[]).await;

    let data = client.download("empty").await.expect("Empty download failed");
    assert!(data.is_empty());
}

#[tokio::test]
async fn test_download_not_found_carries_body() {
    let (server, client) = common::setup_remote_mock().await;
    common::mount_error(&server, "/sync/download", 404, "no such key").await;

    let service = RemoteSyncService::new(client);
    let err = service.download("missing").await.unwrap_err();
    let rendered = format!("{err:#}");
    assert!(rendered.contains("missing"));
    assert!(rendered.contains("no such key"));
}

#[tokio::test]
async fn test_download_unreachable_server() {
    // Nothing listens on port 9 of localhost.
    let client = RemoteClient::with_base_url("http://127.0.0.1:9").unwrap();
    let err = client.download("any").await.unwrap_err();
    assert!(err.status().is_none());
}
