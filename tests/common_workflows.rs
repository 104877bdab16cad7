//! Integration tests for common Courier workflows.
//!
//! These exercise the facade crate end to end: a producer, a worker and an
//! operator working against one queue.

use courier::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

// =============================================================================
// Delivery Workflows
// =============================================================================

#[tokio::test]
async fn test_worker_retries_until_success() {
    let clock = Arc::new(ManualClock::new(0));
    let queue = Queue::new(Arc::new(MemoryStore::new())).with_clock(clock.clone());
    let id = queue
        .push(PushRequest::new(json!({"url": "https://hooks.example.org/donations"})))
        .await
        .unwrap()
        .id;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let mut worker = Worker::with_config(
        queue.clone(),
        move |_message| {
            let counter = counter.clone();
            async move {
                // Endpoint recovers on the third try.
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(QueueError::handler("HTTP 503"))
                } else {
                    Ok(())
                }
            }
        },
        WorkerConfig {
            concurrency: 1,
            poll_interval: Duration::from_millis(5),
            handler_timeout: Duration::from_secs(1),
        },
    );
    worker.start().await.unwrap();

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(60)).await;
        clock.advance(300);
    }
    tokio::time::sleep(Duration::from_millis(60)).await;
    worker.stop().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.main.size, stats.delayed.size, stats.dlq.size), (0, 0, 0));
    assert_eq!(queue.fail(id, None).await.unwrap(), FailOutcome::Unknown);
}

#[tokio::test]
async fn test_operator_recovers_dead_letters() {
    let queue = Queue::new(Arc::new(MemoryStore::new())).with_clock(Arc::new(ManualClock::new(0)));

    for n in 0..3 {
        let id = queue
            .push(PushRequest::new(json!({"n": n})).max_attempts(1))
            .await
            .unwrap()
            .id;
        queue.pop().await.unwrap();
        queue.fail(id, Some("HTTP 404")).await.unwrap();
    }

    let page = queue.dead_letters(10, 0).await.unwrap();
    assert_eq!(page.total, 3);
    assert!(page.items.iter().all(|m| m.last_error.as_deref() == Some("HTTP 404")));

    queue.requeue(page.items[0].id, None).await.unwrap();
    assert_eq!(queue.purge(None).await.unwrap(), 2);

    let message = queue.pop().await.unwrap().unwrap();
    assert_eq!(message.payload, json!({"n": 0}));
    queue.ack(message.id).await.unwrap();
    assert!(queue.pop().await.unwrap().is_none());
}

// =============================================================================
// HTTP Surface
// =============================================================================

#[cfg(feature = "server")]
#[tokio::test]
async fn test_server_over_memory_store() {
    use courier::courier_core::HttpRequest;
    use courier::courier_server::{AppState, StaticTokenVerifier, build_application};

    let queue = Queue::new(Arc::new(MemoryStore::new()));
    let state = AppState::new(Some(queue), Arc::new(StaticTokenVerifier::new(["ops"])));
    let app = build_application(Arc::new(state));

    let push = HttpRequest::new("POST", "/queue/push")
        .with_header("Authorization", "Bearer ops")
        .with_json(&json!({"payload": {"event": "gift_aid.claimed"}}))
        .unwrap();
    let resp = app.dispatch(push).await;
    assert_eq!(resp.status, 200);

    let stats = HttpRequest::new("GET", "/queue/stats").with_header("Authorization", "Bearer ops");
    let body: serde_json::Value = app.dispatch(stats).await.json().unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["main"]["size"], 1);
}
