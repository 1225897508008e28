//! Backoff, eviction, reentrancy and bookkeeping with a scripted transport

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use tidepool_core::domain::QueuedRequest;
use tidepool_core::ports::IRequestStore;
use tidepool_queue::{OfflineQueue, ReplayOutcome, ReplaySummary};

use crate::common::{policy, setup_store, FakeTransport};

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn summary(outcome: ReplayOutcome) -> ReplaySummary {
    match outcome {
        ReplayOutcome::Completed(summary) => summary,
        other => panic!("expected a completed replay, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_attempts_back_off_exponentially() {
    let store = setup_store().await;
    let transport = Arc::new(FakeTransport::answering(503));
    let queue = OfflineQueue::new(store.clone(), transport.clone(), policy(1_000, 60_000, 5));
    queue
        .enqueue(QueuedRequest::new_at("POST", "https://api.test/events", t0()).unwrap())
        .await
        .unwrap();

    let first = summary(queue.process_queue_at(t0()).await.unwrap());
    assert_eq!(first.retried, 1);
    let pending = store.list_pending().await.unwrap();
    assert_eq!(pending[0].attempts, 1);
    assert_eq!(
        pending[0].next_retry_at,
        t0() + chrono::Duration::milliseconds(2_000)
    );

    // Not due yet
    let early = summary(
        queue
            .process_queue_at(t0() + chrono::Duration::seconds(1))
            .await
            .unwrap(),
    );
    assert_eq!(early.attempted, 0);
    assert_eq!(early.deferred, 1);
    assert_eq!(transport.call_count(), 1);

    let later = t0() + chrono::Duration::seconds(2);
    summary(queue.process_queue_at(later).await.unwrap());
    let pending = store.list_pending().await.unwrap();
    assert_eq!(pending[0].attempts, 2);
    assert_eq!(
        pending[0].next_retry_at,
        later + chrono::Duration::milliseconds(4_000)
    );
}

#[tokio::test]
async fn test_backoff_is_capped() {
    let store = setup_store().await;
    let transport = Arc::new(FakeTransport::answering(500));
    let queue = OfflineQueue::new(store.clone(), transport, policy(1_000, 3_000, 10));
    queue
        .enqueue(QueuedRequest::new_at("PUT", "https://api.test/profile", t0()).unwrap())
        .await
        .unwrap();

    let mut now = t0();
    for _ in 0..4 {
        queue.process_queue_at(now).await.unwrap();
        now = store.list_pending().await.unwrap()[0].next_retry_at;
    }

    let request = &store.list_pending().await.unwrap()[0];
    assert_eq!(request.attempts, 4);
    let last_delay = request.next_retry_at - request.timestamp;
    // 2s, then capped at 3s for every later attempt: 2 + 3 + 3 + 3
    assert_eq!(last_delay, chrono::Duration::milliseconds(11_000));
}

#[tokio::test]
async fn test_request_is_dropped_after_max_attempts() {
    let store = setup_store().await;
    let transport = Arc::new(FakeTransport::answering(500).then(Err("refused".to_string())));
    let queue = OfflineQueue::new(store.clone(), transport.clone(), policy(10, 100, 3));
    queue
        .enqueue(QueuedRequest::new_at("POST", "https://api.test/a", t0()).unwrap())
        .await
        .unwrap();

    let mut now = t0();
    let mut dropped = 0;
    for _ in 0..3 {
        dropped += summary(queue.process_queue_at(now).await.unwrap()).dropped;
        now += chrono::Duration::seconds(1);
    }

    assert_eq!(dropped, 1);
    assert_eq!(transport.call_count(), 3);
    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.queued_requests, 0);
    assert!(status.oldest.is_none());
}

#[tokio::test]
async fn test_success_deletes_the_request() {
    let store = setup_store().await;
    let transport = Arc::new(FakeTransport::answering(500).then(Ok(204)));
    let queue = OfflineQueue::new(store.clone(), transport, policy(1_000, 60_000, 5));
    queue
        .enqueue(QueuedRequest::new_at("DELETE", "https://api.test/x", t0()).unwrap())
        .await
        .unwrap();

    let result = summary(queue.process_queue_at(t0()).await.unwrap());
    assert_eq!(result.sent, 1);
    assert_eq!(store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_replay_is_a_no_op() {
    let store = setup_store().await;
    let transport =
        Arc::new(FakeTransport::answering(200).with_delay(Duration::from_millis(200)));
    let queue = Arc::new(OfflineQueue::new(
        store.clone(),
        transport.clone(),
        policy(1_000, 60_000, 5),
    ));
    queue
        .enqueue(QueuedRequest::new("POST", "https://api.test/a").unwrap())
        .await
        .unwrap();

    let background = Arc::clone(&queue);
    let first = tokio::spawn(async move { background.process_queue().await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        queue.process_queue().await.unwrap(),
        ReplayOutcome::AlreadyRunning
    );

    let first = summary(first.await.unwrap().unwrap());
    assert_eq!(first.sent, 1);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_offline_queue_does_not_replay() {
    let store = setup_store().await;
    let transport = Arc::new(FakeTransport::answering(200));
    let queue = OfflineQueue::new(store, transport.clone(), policy(1_000, 60_000, 5));
    queue.connectivity().set_online(false);
    queue
        .enqueue(QueuedRequest::new("POST", "https://api.test/a").unwrap())
        .await
        .unwrap();

    assert_eq!(queue.process_queue().await.unwrap(), ReplayOutcome::Offline);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_status_and_clear() {
    let store = setup_store().await;
    let transport = Arc::new(FakeTransport::answering(200));
    let queue = OfflineQueue::new(store, transport.clone(), policy(1_000, 60_000, 5));

    let later = t0() + chrono::Duration::minutes(5);
    queue
        .enqueue(QueuedRequest::new_at("POST", "https://api.test/b", later).unwrap())
        .await
        .unwrap();
    queue
        .enqueue(QueuedRequest::new_at("POST", "https://api.test/a", t0()).unwrap())
        .await
        .unwrap();

    // Enqueueing never touches the network
    assert_eq!(transport.call_count(), 0);

    let status = queue.get_queue_status().await.unwrap();
    assert_eq!(status.queued_requests, 2);
    assert_eq!(status.oldest, Some(t0()));

    assert_eq!(queue.clear_queue().await.unwrap(), 2);
    assert_eq!(queue.get_queue_status().await.unwrap().queued_requests, 0);
}
