//! Shared test helpers for remote service integration tests
//!
//! Provides wiremock-based mock server setup for the sync service endpoints.
//! Each helper mounts the necessary mock endpoints; `setup_remote_mock`
//! returns a configured RemoteClient pointing at the mock server.

use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cloudmirror_remote::client::RemoteClient;

pub const TEST_TOKEN: &str = "test-access-token";

/// Starts a mock server and returns a (MockServer, RemoteClient) tuple.
pub async fn setup_remote_mock() -> (MockServer, RemoteClient) {
    let server = MockServer::start().await;
    let client = RemoteClient::with_base_url(server.uri())
        .expect("build client")
        .with_access_token(TEST_TOKEN);
    (server, client)
}

/// A server event as JSON.
pub fn server_event(event_id: i64, action: &str, status: Option<&str>, relative_path: &str) -> Value {
    let mut header = json!({ "event_id": event_id, "action": action });
    if let Some(status) = status {
        header["status"] = json!(status);
    }
    json!({
        "header": header,
        "metadata": {
            "relative_path": relative_path,
            "is_folder": action.ends_with("_folder"),
            "size": 0,
            "revision": "r1",
            "storage_key": "sk-1",
            "server_id": "srv-1",
            "version": "1.0"
        }
    })
}

/// Mounts `POST {path}` answering 200 with `{sync_id, events}`.
pub async fn mount_sync_response(server: &MockServer, route: &str, sync_id: &str, events: Value) {
    Mock::given(method("POST"))
        .and(path(route))
        .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sync_id": sync_id,
            "events": events
        })))
        .mount(server)
        .await;
}

/// Mounts `POST {path}` answering `status` with a plain-text body.
pub async fn mount_error(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts the download endpoint returning `content` as raw bytes.
pub async fn mount_download(server: &MockServer, content: &[u8]) {
    Mock::given(method("POST"))
        .and(path("/sync/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(content.to_vec())
                .append_header("Content-Type", "application/octet-stream"),
        )
        .mount(server)
        .await;
}
