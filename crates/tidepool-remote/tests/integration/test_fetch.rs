//! fetch_all and count_rows against the mock backend

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use tidepool_core::domain::SyncError;
use tidepool_core::ports::IRemoteBackend;

use crate::common::{self, API_KEY};

#[tokio::test]
async fn test_fetch_all_returns_rows_with_auth_headers() {
    let (server, backend) = common::setup_backend().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/notes"))
        .and(query_param("select", "*"))
        .and(header("apikey", API_KEY))
        .and(header("authorization", format!("Bearer {API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "n-1", "title": "First", "created_at": "2023-11-14T22:13:20.000Z"},
            {"id": "n-2", "title": "Second", "tags_json": ["a", "b"]}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = backend.fetch_all("notes").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id(), "n-1");
    assert_eq!(rows[0].get("title"), Some(&json!("First")));
    assert_eq!(rows[1].get("tags_json"), Some(&json!(["a", "b"])));
}

#[tokio::test]
async fn test_fetch_all_empty_table() {
    let (server, backend) = common::setup_backend().await;
    common::mount_table(&server, "goals", json!([])).await;

    assert!(backend.fetch_all("goals").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_all_server_error_is_backend_error() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/notes"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "message": "internal failure",
            "code": "XX000"
        })))
        .mount(&server)
        .await;

    let err = backend.fetch_all("notes").await.unwrap_err();
    match err {
        SyncError::Backend { status, ref message } => {
            assert_eq!(status, 500);
            assert!(message.contains("internal failure"));
            assert!(message.contains("XX000"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_fetch_all_rows_without_id_are_invalid() {
    let (server, backend) = common::setup_backend().await;
    common::mount_table(&server, "notes", json!([{"title": "no id"}])).await;

    let err = backend.fetch_all("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Backend { status: 0, .. }));
}

#[tokio::test]
async fn test_fetch_all_unreachable_is_network_error() {
    let (server, backend) = common::setup_backend().await;
    drop(server);

    let err = backend.fetch_all("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Network(_)));
}

#[tokio::test]
async fn test_fetch_all_retries_after_429() {
    let (server, backend) = common::setup_backend().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/notes"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    common::mount_table(&server, "notes", json!([{"id": "n-1"}])).await;

    let rows = backend.fetch_all("notes").await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_persistent_429_surfaces_as_retryable_backend_error() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/notes"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .mount(&server)
        .await;

    let err = backend.fetch_all("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Backend { status: 429, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_count_rows_reads_content_range() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/notes"))
        .and(header("Prefer", "count=exact"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "0-0/42")
                .set_body_json(json!([{"id": "n-1"}])),
        )
        .mount(&server)
        .await;

    assert_eq!(backend.count_rows("notes").await.unwrap(), 42);
}
