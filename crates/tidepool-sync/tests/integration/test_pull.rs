//! Pull: remote rows applied locally, pending local edits protected

use std::sync::atomic::Ordering;

use serde_json::json;

use tidepool_core::domain::SyncableRecord;
use tidepool_core::ports::{ILocalStore, WriteBatch};
use tidepool_sync::SyncOptions;

use crate::common::{fast_options, setup};

fn remote_note(id: &str, title: &str) -> SyncableRecord {
    SyncableRecord::new(id)
        .with_field("title", title)
        .with_field("updated_at", "2023-11-14T22:13:20.000Z")
        .with_field("tags_json", json!(["a", "b"]))
}

#[tokio::test]
async fn test_pull_inserts_remote_rows_as_synced() {
    let h = setup(&["notes"], fast_options()).await;
    h.remote
        .seed("notes", vec![remote_note("n-1", "one"), remote_note("n-2", "two")]);

    assert_eq!(h.orchestrator.pull_table("notes").await.unwrap(), 2);

    let local = h.local.find("notes", "n-1").await.unwrap().unwrap();
    assert!(local.synced);
    assert_eq!(local.record.get("title"), Some(&json!("one")));
    assert_eq!(
        local.record.get("updated_at"),
        Some(&json!(1_700_000_000_000i64))
    );
    assert_eq!(local.record.get("tags_json"), Some(&json!("[\"a\",\"b\"]")));
    assert_eq!(h.local.count("notes", true).await.unwrap(), 0);
    assert_eq!(h.orchestrator.get_sync_status().records_pulled, 2);
}

#[tokio::test]
async fn test_pull_never_overwrites_pending_local_rows() {
    let h = setup(&["notes"], fast_options()).await;
    h.local
        .create("notes", SyncableRecord::new("n-1").with_field("title", "local edit"))
        .await
        .unwrap();
    h.remote.seed(
        "notes",
        vec![remote_note("n-1", "remote"), remote_note("n-2", "new")],
    );

    assert_eq!(h.orchestrator.pull_table("notes").await.unwrap(), 1);

    let kept = h.local.find("notes", "n-1").await.unwrap().unwrap();
    assert!(!kept.synced);
    assert_eq!(kept.record.get("title"), Some(&json!("local edit")));
    assert!(h.local.find("notes", "n-2").await.unwrap().unwrap().synced);
}

#[tokio::test]
async fn test_pull_replaces_synced_rows() {
    let h = setup(&["notes"], fast_options()).await;
    h.local
        .write(WriteBatch::new().apply_remote(
            "notes",
            SyncableRecord::new("n-1").with_field("title", "old"),
            chrono::Utc::now(),
        ))
        .await
        .unwrap();
    h.remote.seed("notes", vec![remote_note("n-1", "newer")]);

    h.orchestrator.pull_table("notes").await.unwrap();

    let row = h.local.find("notes", "n-1").await.unwrap().unwrap();
    assert_eq!(row.record.get("title"), Some(&json!("newer")));
    assert!(row.synced);
}

#[tokio::test]
async fn test_pass_pushes_before_pulling() {
    let h = setup(&["notes"], fast_options()).await;
    h.local
        .create("notes", SyncableRecord::new("n-1").with_field("title", "mine"))
        .await
        .unwrap();

    h.orchestrator.sync_all().await.unwrap();

    // The pushed version came back with the pull and is now synced
    let row = h.local.find("notes", "n-1").await.unwrap().unwrap();
    assert!(row.synced);
    assert_eq!(row.record.get("title"), Some(&json!("mine")));
    assert_eq!(h.remote.fetch_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pull_can_be_disabled() {
    let options = SyncOptions {
        pull_remote: false,
        ..fast_options()
    };
    let h = setup(&["notes"], options).await;
    h.remote.seed("notes", vec![remote_note("n-1", "remote")]);

    h.orchestrator.sync_all().await.unwrap();

    assert_eq!(h.remote.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(h.local.find("notes", "n-1").await.unwrap().is_none());
}
