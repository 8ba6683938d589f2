use docwatch::dispatch::{Batch, Deliverer, DeliveryError, DeliveryOutcome, HttpTrigger, RetryPolicy, TriggerSink};
use docwatch::signal::ShutdownHandler;
use docwatch::store::{Observation, StateStore};
use docwatch::watcher::WatchStats;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn trigger(server: &MockServer) -> HttpTrigger {
    HttpTrigger::new(format!("{}/reindex", server.uri()), Duration::from_secs(5), false).unwrap()
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
    }
}

fn batch(paths: &[&str]) -> Batch {
    let now = tokio::time::Instant::now();
    Batch {
        paths: paths.iter().map(|p| (*p).to_string()).collect::<BTreeSet<_>>(),
        events: paths.len(),
        first_event: now,
        last_event: now,
        unstable: false,
    }
}

fn store_with(paths: &[&str]) -> Arc<StateStore> {
    let store = StateStore::in_memory().unwrap();
    for p in paths {
        store
            .observe(
                &Observation {
                    path: (*p).to_string(),
                    size: 64,
                    modified: SystemTime::now(),
                    checksum: format!("digest-{p}"),
                },
                chrono::Utc::now() - chrono::Duration::seconds(5),
            )
            .unwrap();
    }
    Arc::new(store)
}

#[tokio::test]
async fn test_fire_posts_empty_json_object() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reindex"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({})))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let status = trigger(&server).fire().await.unwrap();
    assert_eq!(status, 202);
}

#[tokio::test]
async fn test_fire_reports_status_and_truncated_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reindex"))
        .respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(500)))
        .mount(&server)
        .await;

    match trigger(&server).fire().await {
        Err(DeliveryError::Status { status, body }) => {
            assert_eq!(status, 503);
            assert_eq!(body.len(), 200);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transport_error() {
    let sink = HttpTrigger::new("http://127.0.0.1:9/reindex", Duration::from_secs(2), false).unwrap();
    assert!(matches!(sink.fire().await, Err(DeliveryError::Transport(_))));
}

#[tokio::test]
async fn test_retries_until_endpoint_recovers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reindex"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/reindex"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with(&["guide.md"]);
    let deliverer = Deliverer::new(trigger(&server), Arc::clone(&store), fast_policy(5), Arc::new(WatchStats::new()));

    let outcome = deliverer.deliver(&batch(&["guide.md"]), &ShutdownHandler::new()).await;

    assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
    let record = store.get("guide.md").unwrap().unwrap();
    assert!(!record.pending);
    assert!(record.last_triggered_at.is_some());
}

#[tokio::test]
async fn test_persistent_failure_keeps_changes_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("indexer down"))
        .expect(3)
        .mount(&server)
        .await;

    let store = store_with(&["guide.md"]);
    let stats = Arc::new(WatchStats::new());
    let deliverer = Deliverer::new(trigger(&server), Arc::clone(&store), fast_policy(3), Arc::clone(&stats));

    let outcome = deliverer.deliver(&batch(&["guide.md"]), &ShutdownHandler::new()).await;

    assert_eq!(outcome, DeliveryOutcome::Exhausted { attempts: 3 });
    let record = store.get("guide.md").unwrap().unwrap();
    assert!(record.pending);
    assert_eq!(record.attempt_count, 3);
    assert!(record.last_triggered_at.is_none());
    assert_eq!(stats.snapshot(1).failed_triggers, 1);
}

#[tokio::test]
async fn test_health_wait_succeeds_once_service_answers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let healthy = trigger(&server)
        .wait_for_health(&format!("{}/health", server.uri()), Duration::from_secs(5))
        .await;
    assert!(healthy);
}

#[tokio::test]
async fn test_health_wait_gives_up_after_timeout() {
    let sink = HttpTrigger::new("http://127.0.0.1:9/reindex", Duration::from_secs(1), false).unwrap();
    let started = std::time::Instant::now();

    let healthy = sink
        .wait_for_health("http://127.0.0.1:9/health", Duration::from_millis(500))
        .await;

    assert!(!healthy);
    assert!(started.elapsed() < Duration::from_secs(5));
}
