mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeNetwork, activated};
use offline_cache::cache::MemoryCacheStore;
use offline_cache::controller::{Controller, ControllerError};
use offline_cache::event::SyncEvent;
use offline_cache::http::{Method, StatusCode};
use offline_cache::sync::{MemoryTelemetryQueue, SyncError, SyncOutcome, TelemetryRecord};

async fn with_queue(network: &Arc<FakeNetwork>) -> (Controller, Arc<MemoryTelemetryQueue>) {
    let store = MemoryCacheStore::new();
    let queue = Arc::new(MemoryTelemetryQueue::new());
    let controller = activated(&store, network).await.with_telemetry(queue.clone());
    (controller, queue)
}

async fn enqueue(queue: &MemoryTelemetryQueue) {
    queue
        .push(TelemetryRecord::new("page_view", 1_700_000_000_000).property("path", "/"))
        .await;
    queue
        .push(TelemetryRecord::new("cta_click", 1_700_000_000_500))
        .await;
}

#[tokio::test]
async fn sync_delivers_and_clears_the_queue() {
    let network = FakeNetwork::site();
    network.route("/api/analytics", 204, "text/plain", "");
    let (controller, queue) = with_queue(&network).await;
    enqueue(&queue).await;

    let outcome = controller
        .handle_sync(&SyncEvent::new("sync-analytics"))
        .await
        .unwrap();
    assert_eq!(outcome, Some(SyncOutcome::Sent(2)));
    assert!(queue.is_empty().await);

    let posts: Vec<_> = network
        .requests()
        .into_iter()
        .filter(|(method, _, _)| *method == Method::Post)
        .collect();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].1, "http://localhost:8080/api/analytics");
    let sent: Vec<TelemetryRecord> = serde_json::from_slice(&posts[0].2).unwrap();
    assert_eq!(sent[0].event, "page_view");
    assert_eq!(sent[1].event, "cta_click");
}

#[tokio::test]
async fn rejected_batch_stays_queued() {
    let network = FakeNetwork::site();
    network.route("/api/analytics", 503, "text/plain", "busy");
    let (controller, queue) = with_queue(&network).await;
    enqueue(&queue).await;

    let err = controller
        .handle_sync(&SyncEvent::new("sync-analytics").last_chance(true))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Sync(SyncError::Rejected(StatusCode::SERVICE_UNAVAILABLE))
    ));
    assert_eq!(queue.len().await, 2);
}

#[tokio::test]
async fn offline_sync_keeps_records_for_the_next_attempt() {
    let network = FakeNetwork::site();
    network.route("/api/analytics", 200, "application/json", "{}");
    let (controller, queue) = with_queue(&network).await;
    enqueue(&queue).await;

    network.set_offline(true);
    assert!(
        controller
            .handle_sync(&SyncEvent::new("sync-analytics"))
            .await
            .is_err()
    );
    assert_eq!(queue.len().await, 2);

    network.set_offline(false);
    let outcome = controller
        .handle_sync(&SyncEvent::new("sync-analytics"))
        .await
        .unwrap();
    assert_eq!(outcome, Some(SyncOutcome::Sent(2)));
    assert!(queue.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn abandoned_sync_still_finishes_under_the_event_lifetime() {
    let network = FakeNetwork::site();
    network.route("/api/analytics", 204, "text/plain", "");
    let (controller, queue) = with_queue(&network).await;
    enqueue(&queue).await;
    network.set_delay(Duration::from_secs(5));

    let event = SyncEvent::new("sync-analytics");
    let gave_up = tokio::time::timeout(Duration::from_secs(1), controller.handle_sync(&event)).await;
    assert!(gave_up.is_err());
    assert_eq!(event.lifetime().pending(), 1);
    assert_eq!(queue.len().await, 2);

    event.lifetime().settle().await;
    assert_eq!(event.lifetime().pending(), 0);
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn empty_queue_sends_nothing() {
    let network = FakeNetwork::site();
    let (controller, _queue) = with_queue(&network).await;
    let before = network.calls();

    let outcome = controller
        .handle_sync(&SyncEvent::new("sync-analytics"))
        .await
        .unwrap();
    assert_eq!(outcome, Some(SyncOutcome::Empty));
    assert_eq!(network.calls(), before);
}

#[tokio::test]
async fn other_tags_and_missing_queue_are_ignored() {
    let network = FakeNetwork::site();
    let (controller, queue) = with_queue(&network).await;
    enqueue(&queue).await;

    let outcome = controller
        .handle_sync(&SyncEvent::new("sync-newsletter"))
        .await
        .unwrap();
    assert_eq!(outcome, None);
    assert_eq!(queue.len().await, 2);

    let bare = activated(&MemoryCacheStore::new(), &network).await;
    let outcome = bare
        .handle_sync(&SyncEvent::new("sync-analytics"))
        .await
        .unwrap();
    assert_eq!(outcome, None);
}
