//! list_tables against the mock backend

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use tidepool_core::domain::SyncError;
use tidepool_core::ports::IRemoteBackend;

use crate::common;

#[tokio::test]
async fn test_list_tables_reads_openapi_definitions() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "swagger": "2.0",
            "definitions": {
                "profiles": {"type": "object"},
                "notes": {"type": "object"},
                "journal_entries": {"type": "object"}
            }
        })))
        .mount(&server)
        .await;

    let tables = backend.list_tables().await.unwrap();
    assert_eq!(tables, vec!["journal_entries", "notes", "profiles"]);
}

#[tokio::test]
async fn test_list_tables_without_definitions_is_unavailable() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"swagger": "2.0"})))
        .mount(&server)
        .await;

    let err = backend.list_tables().await.unwrap_err();
    assert!(matches!(err, SyncError::DiscoveryUnavailable(_)));
}

#[tokio::test]
async fn test_list_tables_http_error_is_unavailable() {
    let (server, backend) = common::setup_backend().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = backend.list_tables().await.unwrap_err();
    assert!(matches!(err, SyncError::DiscoveryUnavailable(_)));
}
