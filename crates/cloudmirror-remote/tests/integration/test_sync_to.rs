//! Integration tests for `POST /sync/to`

use cloudmirror_core::ports::{
    EventHeader, EventMetadata, IRemoteService, RemoteEvent, SyncToRequest, WIRE_VERSION,
};
use cloudmirror_remote::provider::RemoteSyncService;
use cloudmirror_remote::RemoteError;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

fn request_event(event_id: i64, action: &str, relative_path: &str) -> RemoteEvent {
    RemoteEvent {
        header: EventHeader {
            status: None,
            event_id,
            action: action.to_string(),
        },
        metadata: EventMetadata {
            relative_path: relative_path.to_string(),
            last_event_id: event_id,
            hash: Some("5d41402abc4b2a76b9719d911017c592".to_string()),
            size: 5,
            version: WIRE_VERSION.to_string(),
            ..EventMetadata::default()
        },
    }
}

#[tokio::test]
async fn test_sync_to_parses_statuses() {
    let (server, client) = common::setup_remote_mock().await;

    common::mount_sync_response(
        &server,
        "/sync/to",
        "sync-2",
        json!([
            common::server_event(5, "add_file", Some("accepted"), "docs/a.txt"),
            common::server_event(6, "add_file", Some("upload"), "docs/b.txt"),
        ]),
    )
    .await;

    let request = SyncToRequest {
        sync_id: Some("sync-1".to_string()),
        events: vec![
            request_event(5, "add_file", "docs/a.txt"),
            request_event(6, "add_file", "docs/b.txt"),
        ],
    };

    let response = client.sync_to(&request).await.expect("SyncTo failed");
    assert_eq!(response.sync_id, "sync-2");
    assert_eq!(response.events.len(), 2);
    assert_eq!(response.events[0].header.status.as_deref(), Some("accepted"));
    assert_eq!(response.events[1].header.status.as_deref(), Some("upload"));
    assert_eq!(response.events[0].metadata.server_id.as_deref(), Some("srv-1"));
}

#[tokio::test]
async fn test_sync_to_sends_events_in_snake_case() {
    let (server, client) = common::setup_remote_mock().await;

    Mock::given(method("POST"))
        .and(path("/sync/to"))
        .and(body_partial_json(json!({
            "sync_id": "sync-1",
            "events": [{
                "header": {"event_id": 5, "action": "add_file"},
                "metadata": {"relative_path": "a.txt", "last_event_id": 5, "version": "1.0"}
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sync_id": "sync-2",
            "events": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = SyncToRequest {
        sync_id: Some("sync-1".to_string()),
        events: vec![request_event(5, "add_file", "a.txt")],
    };

    let response = client.sync_to(&request).await.expect("SyncTo failed");
    assert!(response.events.is_empty());
}

#[tokio::test]
async fn test_sync_to_non_200_carries_body() {
    let (server, client) = common::setup_remote_mock().await;
    common::mount_error(&server, "/sync/to", 500, "database unavailable").await;

    let request = SyncToRequest {
        sync_id: None,
        events: vec![request_event(1, "add_folder", "docs")],
    };

    let err = client.sync_to(&request).await.unwrap_err();
    match err {
        RemoteError::Status { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "database unavailable");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_sync_to_created_status_is_still_an_error() {
    let (server, client) = common::setup_remote_mock().await;
    common::mount_error(&server, "/sync/to", 201, "{}").await;

    let request = SyncToRequest {
        sync_id: None,
        events: vec![],
    };

    let err = client.sync_to(&request).await.unwrap_err();
    assert_eq!(err.status(), Some(201));
}

#[tokio::test]
async fn test_sync_to_malformed_body() {
    let (server, client) = common::setup_remote_mock().await;

    Mock::given(method("POST"))
        .and(path("/sync/to"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let request = SyncToRequest {
        sync_id: None,
        events: vec![],
    };

    let err = client.sync_to(&request).await.unwrap_err();
    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_adapter_wraps_errors_with_context() {
    let (server, client) = common::setup_remote_mock().await;
    common::mount_error(&server, "/sync/to", 503, "maintenance").await;

    let service = RemoteSyncService::new(client);
    let request = SyncToRequest {
        sync_id: None,
        events: vec![request_event(3, "delete_file", "old.txt")],
    };

    let err = service.sync_to(&request).await.unwrap_err();
    let rendered = format!("{err:#}");
    assert!(rendered.contains("SyncTo failed"));
    assert!(rendered.contains("maintenance"));
}
