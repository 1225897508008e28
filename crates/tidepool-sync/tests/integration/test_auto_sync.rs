//! Interval-driven sync passes

use std::sync::atomic::Ordering;
use std::time::Duration;

use tidepool_core::domain::{SyncError, SyncableRecord};
use tidepool_core::ports::ILocalStore;

use crate::common::{fast_options, setup};

#[tokio::test]
async fn test_auto_sync_runs_until_stopped() {
    let h = setup(&["notes"], fast_options()).await;

    h.orchestrator.start_auto_sync(Duration::from_millis(50)).unwrap();
    assert!(h.orchestrator.is_auto_sync_running());
    assert_eq!(
        h.orchestrator.auto_sync_interval(),
        Some(Duration::from_millis(50))
    );

    tokio::time::sleep(Duration::from_millis(180)).await;
    assert!(h.remote.fetch_calls.load(Ordering::SeqCst) >= 2);
    assert!(h.orchestrator.get_sync_status().next_sync.is_some());

    assert!(h.orchestrator.stop_auto_sync());
    assert!(!h.orchestrator.is_auto_sync_running());
    assert!(h.orchestrator.get_sync_status().next_sync.is_none());

    // Let a pass that was already running finish
    tokio::time::sleep(Duration::from_millis(30)).await;
    let calls = h.remote.fetch_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(h.remote.fetch_calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn test_stop_without_start() {
    let h = setup(&["notes"], fast_options()).await;
    assert!(!h.orchestrator.stop_auto_sync());
}

#[tokio::test]
async fn test_restart_replaces_the_timer() {
    let h = setup(&["notes"], fast_options()).await;
    h.orchestrator.start_auto_sync(Duration::from_secs(60)).unwrap();
    h.orchestrator.start_auto_sync(Duration::from_secs(120)).unwrap();
    assert_eq!(
        h.orchestrator.auto_sync_interval(),
        Some(Duration::from_secs(120))
    );
    assert!(h.orchestrator.stop_auto_sync());
}

#[tokio::test]
async fn test_zero_interval_is_rejected() {
    let h = setup(&["notes"], fast_options()).await;
    let err = h.orchestrator.start_auto_sync(Duration::ZERO).unwrap_err();
    assert!(matches!(err, SyncError::Domain(_)));
    assert!(!h.orchestrator.is_auto_sync_running());

    // A running timer survives a rejected restart
    h.orchestrator.start_auto_sync(Duration::from_secs(60)).unwrap();
    assert!(h.orchestrator.start_auto_sync(Duration::ZERO).is_err());
    assert_eq!(
        h.orchestrator.auto_sync_interval(),
        Some(Duration::from_secs(60))
    );
    assert!(h.orchestrator.stop_auto_sync());
}

#[tokio::test]
async fn test_stop_and_wait_lets_the_running_pass_finish() {
    let h = setup(&["notes"], fast_options()).await;
    h.local
        .create("notes", SyncableRecord::new("n-1"))
        .await
        .unwrap();
    h.remote.set_delay(Duration::from_millis(100));

    h.orchestrator.start_auto_sync(Duration::from_secs(60)).unwrap();
    // The first tick fires at once; stop while its upload is delayed
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.orchestrator.stop_auto_sync_and_wait().await);

    assert_eq!(h.remote.upsert_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.local.count("notes", true).await.unwrap(), 0);
    assert!(!h.orchestrator.stop_auto_sync_and_wait().await);
}
