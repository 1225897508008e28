//! Replay over real HTTP against a mock server

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tidepool_core::domain::QueuedRequest;
use tidepool_core::ports::IRequestStore;
use tidepool_queue::{
    ConnectivityMonitor, HttpTransport, OfflineQueue, ReplayOutcome, SendOutcome,
};

use crate::common::{policy, setup_store};

fn http_queue(store: Arc<tidepool_store::SqliteRequestStore>) -> OfflineQueue {
    OfflineQueue::new(
        store,
        Arc::new(HttpTransport::new(Duration::from_secs(2))),
        policy(1_000, 60_000, 5),
    )
}

#[tokio::test]
async fn test_replay_is_oldest_first() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(201))
        .expect(3)
        .mount(&server)
        .await;

    let store = setup_store().await;
    let queue = http_queue(store.clone());
    let base = Utc::now() - chrono::Duration::minutes(10);
    let url = format!("{}/events", server.uri());

    // Inserted out of order on purpose
    for (offset, body) in [(2, "third"), (0, "first"), (1, "second")] {
        let request = QueuedRequest::new_at(
            "POST",
            url.clone(),
            base + chrono::Duration::seconds(offset),
        )
        .unwrap()
        .with_body(body);
        queue.enqueue(request).await.unwrap();
    }

    let outcome = queue.process_queue().await.unwrap();
    let ReplayOutcome::Completed(summary) = outcome else {
        panic!("expected a completed replay");
    };
    assert_eq!(summary.sent, 3);

    let received = server.received_requests().await.unwrap();
    let bodies: Vec<String> = received
        .iter()
        .map(|r| String::from_utf8_lossy(&r.body).to_string())
        .collect();
    assert_eq!(bodies, vec!["first", "second", "third"]);
    assert_eq!(store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_headers_and_method_are_replayed() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/profile"))
        .and(header("x-trace", "abc"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup_store().await;
    let queue = http_queue(store.clone());
    let request = QueuedRequest::new("patch", format!("{}/profile", server.uri()))
        .unwrap()
        .with_header("x-trace", "abc")
        .with_header("content-type", "application/json")
        .with_body(r#"{"name":"Ada"}"#);
    queue.enqueue(request).await.unwrap();

    queue.process_queue().await.unwrap();
    assert_eq!(store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_non_success_status_is_a_failed_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = setup_store().await;
    let queue = http_queue(store.clone());
    queue
        .enqueue(QueuedRequest::new("POST", format!("{}/events", server.uri())).unwrap())
        .await
        .unwrap();

    queue.process_queue().await.unwrap();
    let pending = store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
}

#[tokio::test]
async fn test_send_or_enqueue_sends_directly_when_online() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup_store().await;
    let queue = http_queue(store.clone());
    let outcome = queue
        .send_or_enqueue(QueuedRequest::new("POST", format!("{}/events", server.uri())).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome, SendOutcome::Sent(201));
    assert_eq!(store.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_send_or_enqueue_queues_on_transport_failure() {
    let store = setup_store().await;
    let queue = http_queue(store.clone());

    // Nothing listens on port 1
    let outcome = queue
        .send_or_enqueue(QueuedRequest::new("POST", "http://127.0.0.1:1/events").unwrap())
        .await
        .unwrap();

    assert!(matches!(outcome, SendOutcome::Queued(_)));
    assert_eq!(store.count_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn test_offline_enqueue_then_reconnect_replays() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/journal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup_store().await;
    let monitor = ConnectivityMonitor::new(false);
    let queue = Arc::new(http_queue(store.clone()).with_connectivity(monitor.clone()));
    let cancel = CancellationToken::new();
    let worker = queue.spawn_auto_processing(None, cancel.clone());

    let outcome = queue
        .send_or_enqueue(
            QueuedRequest::new("POST", format!("{}/journal", server.uri()))
                .unwrap()
                .with_body("entry"),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Queued(_)));
    assert!(server.received_requests().await.unwrap().is_empty());

    monitor.set_online(true);

    let mut remaining = 1;
    for _ in 0..100 {
        remaining = store.count_pending().await.unwrap();
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    cancel.cancel();
    worker.await.unwrap();
}

#[tokio::test]
async fn test_auto_processing_replays_leftovers_at_start() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/journal"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let store = setup_store().await;
    let monitor = ConnectivityMonitor::new(true);
    let queue = Arc::new(http_queue(store.clone()).with_connectivity(monitor));
    queue
        .enqueue(
            QueuedRequest::new("POST", format!("{}/journal", server.uri()))
                .unwrap()
                .with_body("left over"),
        )
        .await
        .unwrap();

    // Already online and no timer: only the start-up replay can send it
    let cancel = CancellationToken::new();
    let worker = queue.spawn_auto_processing(None, cancel.clone());

    let mut remaining = 1;
    for _ in 0..100 {
        remaining = store.count_pending().await.unwrap();
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    cancel.cancel();
    worker.await.unwrap();
}
