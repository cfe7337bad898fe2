//! Integration tests for `POST /sync/from`

use cloudmirror_core::ports::{IRemoteService, SyncFromRequest};
use cloudmirror_remote::provider::RemoteSyncService;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_sync_from_events_have_no_status() {
    let (server, client) = common::setup_remote_mock().await;

    common::mount_sync_response(
        &server,
        "/sync/from",
        "sync-9",
        json!([
            common::server_event(40, "add_folder", None, "photos"),
            common::server_event(41, "add_file", None, "photos/cat.jpg"),
        ]),
    )
    .await;

    let response = client
        .sync_from(&SyncFromRequest {
            last_sync_id: Some("sync-8".to_string()),
        })
        .await
        .expect("SyncFrom failed");

    assert_eq!(response.sync_id, "sync-9");
    assert_eq!(response.events.len(), 2);
    assert!(response.events.iter().all(|e| e.header.status.is_none()));
    assert!(response.events[0].metadata.is_folder);
    assert!(!response.events[1].metadata.is_folder);
}

#[tokio::test]
async fn test_sync_from_sends_last_sync_id() {
    let (server, client) = common::setup_remote_mock().await;

    Mock::given(method("POST"))
        .and(path("/sync/from"))
        .and(body_json(json!({ "last_sync_id": "sync-8" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sync_id": "sync-8" })))
        .expect(1)
        .mount(&server)
        .await;

    let service = RemoteSyncService::new(client);
    let response = service
        .sync_from(&SyncFromRequest {
            last_sync_id: Some("sync-8".to_string()),
        })
        .await
        .expect("SyncFrom failed");

    assert!(response.events.is_empty());
}

#[tokio::test]
async fn test_sync_from_unauthorized() {
    let (server, client) = common::setup_remote_mock().await;
    common::mount_error(&server, "/sync/from", 401, "token expired").await;

    let err = client
        .sync_from(&SyncFromRequest { last_sync_id: None })
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(err.to_string().contains("token expired"));
}
