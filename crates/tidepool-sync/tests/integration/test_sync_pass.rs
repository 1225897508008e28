//! Push passes: batching, failure isolation, concurrency guard, retries

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use tidepool_core::domain::{SyncError, SyncableRecord};
use tidepool_core::ports::ILocalStore;
use tidepool_sync::{SyncOptions, SyncOutcome};

use crate::common::{fast_options, setup, user};

#[tokio::test]
async fn test_two_tables_with_pending_users_and_empty_notes() {
    let h = setup(&["users", "notes"], fast_options()).await;
    for i in 1..=3 {
        h.local
            .create("users", user(&format!("u-{i}"), "Ada"))
            .await
            .unwrap();
    }

    let outcome = h.orchestrator.sync_all().await.unwrap();
    let SyncOutcome::Completed(report) = outcome else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.tables.len(), 2);
    assert_eq!(report.records_pushed(), 3);

    let status = h.orchestrator.get_sync_status();
    assert_eq!(status.records_total, 3);
    assert_eq!(status.records_synced, 3);
    assert_eq!(status.error_count, 0);
    assert!(status.last_sync.is_some());
    assert!(!status.is_syncing);

    assert_eq!(h.local.count("users", true).await.unwrap(), 0);
    let synced = h.local.find("users", "u-1").await.unwrap().unwrap();
    assert!(synced.synced);
    assert!(synced.synced_at.is_some());

    // Timestamps travel as ISO strings
    let remote_users = h.remote.rows("users");
    assert_eq!(remote_users.len(), 3);
    assert_eq!(
        remote_users[0].get("created_at"),
        Some(&json!("2023-11-14T22:13:20.000Z"))
    );
    assert!(h.remote.rows("notes").is_empty());
}

#[tokio::test]
async fn test_failing_table_does_not_stop_the_pass() {
    let h = setup(&["alpha", "beta", "gamma"], fast_options()).await;
    for table in ["alpha", "beta", "gamma"] {
        h.local.create(table, user("r-1", "x")).await.unwrap();
    }
    h.remote
        .fail_table("beta", SyncError::Conflict("bad row".to_string()));

    let err = h.orchestrator.sync_all().await.unwrap_err();
    assert_eq!(
        err,
        SyncError::PartialFailure {
            failed_tables: vec!["beta".to_string()]
        }
    );

    let status = h.orchestrator.get_sync_status();
    assert_eq!(status.error_count, 1);
    assert!(status.last_error.as_deref().unwrap().starts_with("beta"));
    assert_eq!(status.table_errors.len(), 1);

    assert_eq!(h.local.count("alpha", true).await.unwrap(), 0);
    assert_eq!(h.local.count("beta", true).await.unwrap(), 1);
    assert_eq!(h.local.count("gamma", true).await.unwrap(), 0);

    let report = h.orchestrator.last_report().unwrap();
    assert_eq!(report.failed_tables(), vec!["beta".to_string()]);
    assert!(report.tables[2].is_success());
}

#[tokio::test]
async fn test_concurrent_pass_reports_already_running() {
    let h = setup(&["users"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.remote.set_delay(Duration::from_millis(200));

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move { orchestrator.sync_all().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.orchestrator.get_sync_status().is_syncing);
    let calls_before = h.remote.upsert_calls.load(Ordering::SeqCst);

    let second = h.orchestrator.sync_all().await.unwrap();
    assert_eq!(second, SyncOutcome::AlreadyRunning);
    assert_eq!(h.remote.upsert_calls.load(Ordering::SeqCst), calls_before);

    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, SyncOutcome::Completed(_)));
    assert!(!h.orchestrator.get_sync_status().is_syncing);

    // The flag is free again
    assert!(matches!(
        h.orchestrator.sync_all().await.unwrap(),
        SyncOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn test_records_are_pushed_in_batches() {
    let options = SyncOptions {
        batch_size: 2,
        ..fast_options()
    };
    let h = setup(&["notes"], options).await;
    for i in 1..=5 {
        h.local
            .create("notes", SyncableRecord::new(format!("n-{i}")))
            .await
            .unwrap();
    }

    let pushed = h.orchestrator.sync_table("notes").await.unwrap();
    assert_eq!(pushed, 5);

    let upserts = h.remote.upserts.lock().unwrap().clone();
    let batches: Vec<Vec<String>> = upserts.into_iter().map(|(_, ids)| ids).collect();
    assert_eq!(
        batches,
        vec![
            vec!["n-1".to_string(), "n-2".to_string()],
            vec!["n-3".to_string(), "n-4".to_string()],
            vec!["n-5".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_failed_batch_keeps_earlier_batches_committed() {
    let options = SyncOptions {
        batch_size: 2,
        ..fast_options()
    };
    let h = setup(&["notes"], options).await;
    for i in 1..=5 {
        h.local
            .create("notes", SyncableRecord::new(format!("n-{i}")))
            .await
            .unwrap();
    }
    h.remote.fail_on_upsert_call(2);

    let err = h.orchestrator.sync_table("notes").await.unwrap_err();
    assert!(matches!(err, SyncError::Conflict(_)));

    let pending: Vec<String> = h
        .local
        .query_unsynced("notes")
        .await
        .unwrap()
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(pending, vec!["n-3", "n-4", "n-5"]);
    assert_eq!(h.orchestrator.get_sync_status().records_synced, 2);
}

#[tokio::test]
async fn test_retryable_errors_are_retried() {
    let h = setup(&["users"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.remote.fail_transiently(2);

    assert_eq!(h.orchestrator.sync_table("users").await.unwrap(), 1);
    assert_eq!(h.remote.upsert_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let options = SyncOptions {
        retry_attempts: 1,
        ..fast_options()
    };
    let h = setup(&["users"], options).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.remote.fail_transiently(5);

    let err = h.orchestrator.sync_table("users").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.remote.upsert_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_conflicts_are_not_retried() {
    let h = setup(&["users"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.remote
        .fail_table("users", SyncError::Conflict("duplicate key".to_string()));

    assert!(h.orchestrator.sync_table("users").await.is_err());
    assert_eq!(h.remote.upsert_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_pass_pushes_nothing_and_keeps_remote_state() {
    let h = setup(&["users"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.local.create("users", user("u-2", "Grace")).await.unwrap();

    h.orchestrator.sync_all().await.unwrap();
    let after_first = h.remote.rows("users");

    let SyncOutcome::Completed(report) = h.orchestrator.sync_all().await.unwrap() else {
        panic!("expected a completed pass");
    };
    assert_eq!(report.records_pushed(), 0);
    assert_eq!(h.remote.rows("users"), after_first);
    assert_eq!(h.remote.upsert_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tables_sync_in_registry_order_without_foreign_key_ordering() {
    // comments reference posts but come first in the registry
    let h = setup(&["comments", "posts"], fast_options()).await;
    h.local
        .create(
            "comments",
            SyncableRecord::new("c-1").with_field("post_id", "p-1"),
        )
        .await
        .unwrap();
    h.local
        .create("posts", SyncableRecord::new("p-1"))
        .await
        .unwrap();

    h.orchestrator.sync_all().await.unwrap();
    assert_eq!(h.remote.upserted_tables(), vec!["comments", "posts"]);
}

#[tokio::test]
async fn test_sync_selected_only_touches_given_tables() {
    let h = setup(&["users", "notes"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.local
        .create("notes", SyncableRecord::new("n-1"))
        .await
        .unwrap();

    h.orchestrator
        .sync_selected(&["notes".to_string()])
        .await
        .unwrap();
    assert_eq!(h.remote.upserted_tables(), vec!["notes"]);
    assert_eq!(h.local.count("users", true).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unregistered_table_is_registered_by_the_pass() {
    let h = setup(&[], fast_options()).await;
    h.orchestrator
        .sync_selected(&["fresh".to_string()])
        .await
        .unwrap();
    assert_eq!(h.local.table_names().await.unwrap(), vec!["fresh"]);
}

#[tokio::test]
async fn test_reset_clears_status() {
    let h = setup(&["users"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.remote
        .fail_table("users", SyncError::Conflict("nope".to_string()));
    let _ = h.orchestrator.sync_all().await;
    assert_eq!(h.orchestrator.get_sync_status().error_count, 1);

    h.orchestrator.reset();
    let status = h.orchestrator.get_sync_status();
    assert_eq!(status.error_count, 0);
    assert!(status.last_error.is_none());
    assert!(status.last_sync.is_none());
    assert!(h.orchestrator.last_report().is_none());
}

#[tokio::test]
async fn test_edit_during_upload_is_pushed_on_next_pass() {
    let h = setup(&["users"], fast_options()).await;
    h.local.create("users", user("u-1", "Ada")).await.unwrap();
    h.remote
        .edit_locally_during_upsert(h.local.clone(), "users", user("u-1", "Grace"));

    h.orchestrator.sync_all().await.unwrap();

    // The upload carried the old value; the edit must stay pending
    assert_eq!(h.remote.rows("users")[0].get("name"), Some(&json!("Ada")));
    let local = h.local.find("users", "u-1").await.unwrap().unwrap();
    assert!(!local.synced);
    assert_eq!(local.record.get("name"), Some(&json!("Grace")));
    assert_eq!(h.local.count("users", true).await.unwrap(), 1);

    h.orchestrator.sync_all().await.unwrap();

    assert_eq!(h.remote.rows("users")[0].get("name"), Some(&json!("Grace")));
    let local = h.local.find("users", "u-1").await.unwrap().unwrap();
    assert!(local.synced);
    assert_eq!(local.record.get("name"), Some(&json!("Grace")));
    assert_eq!(h.local.count("users", true).await.unwrap(), 0);
}
