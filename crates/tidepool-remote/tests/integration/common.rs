//! Shared test helpers for REST backend integration tests
//!
//! Each helper mounts the endpoints a test needs and returns a client
//! pointing at the mock server.

use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tidepool_remote::{RestBackend, RestClient};

pub const API_KEY: &str = "test-anon-key";

/// Starts a mock server and returns it with a backend pointing at it
pub async fn setup_backend() -> (MockServer, RestBackend) {
    let server = MockServer::start().await;
    let client = RestClient::with_base_url(API_KEY, server.uri())
        .with_probe_table("profiles")
        .with_timeouts(Duration::from_secs(5), Duration::from_millis(300));
    (server, RestBackend::new(client))
}

/// Mounts `GET /rest/v1/{table}` returning the given rows
pub async fn mount_table(server: &MockServer, table: &str, rows: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/rest/v1/{table}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}
