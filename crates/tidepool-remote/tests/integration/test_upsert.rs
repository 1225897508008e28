//! upsert_batch against the mock backend

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use tidepool_core::domain::{SyncError, SyncableRecord};
use tidepool_core::ports::IRemoteBackend;

use crate::common;

fn records() -> Vec<SyncableRecord> {
    vec![
        SyncableRecord::new("a").with_field("title", "A"),
        SyncableRecord::new("b").with_field("title", "B"),
    ]
}

#[tokio::test]
async fn test_upsert_posts_batch_with_merge_preference() {
    let (server, backend) = common::setup_backend().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/notes"))
        .and(query_param("on_conflict", "id"))
        .and(header("Prefer", "resolution=merge-duplicates,return=minimal"))
        .and(body_json(json!([
            {"id": "a", "title": "A"},
            {"id": "b", "title": "B"}
        ])))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    backend.upsert_batch("notes", &records(), "id").await.unwrap();
}

#[tokio::test]
async fn test_upsert_same_batch_twice_sends_identical_requests() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notes"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    backend.upsert_batch("notes", &records(), "id").await.unwrap();
    backend.upsert_batch("notes", &records(), "id").await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].body, received[1].body);
    assert_eq!(received[0].url, received[1].url);
}

#[tokio::test]
async fn test_upsert_empty_batch_makes_no_request() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    backend.upsert_batch("notes", &[], "id").await.unwrap();
}

#[tokio::test]
async fn test_upsert_constraint_violations_are_conflicts() {
    for status in [400u16, 409, 422] {
        let (server, backend) = common::setup_backend().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/notes"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "message": "violates foreign key constraint",
                "code": "23503"
            })))
            .mount(&server)
            .await;

        let err = backend
            .upsert_batch("notes", &records(), "id")
            .await
            .unwrap_err();
        match err {
            SyncError::Conflict(ref msg) => assert!(msg.contains("foreign key")),
            other => panic!("status {status}: unexpected error {other:?}"),
        }
        assert!(!err.is_retryable());
    }
}

#[tokio::test]
async fn test_upsert_server_error_is_backend_error() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/notes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = backend
        .upsert_batch("notes", &records(), "id")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SyncError::Backend {
            status: 503,
            message: "Service Unavailable".into()
        }
    );
}
