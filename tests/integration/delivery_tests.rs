use docwatch::dispatch::{
    run_delivery_worker, run_dispatcher, Debouncer, Deliverer, DeliveryError, RetryPolicy, TriggerSink,
};
use docwatch::signal::ShutdownHandler;
use docwatch::store::{Observation, StateStore};
use docwatch::watcher::{ChangeEvent, ChangeKind, EventSource, WatchStats};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Fails the first `failures` calls, then succeeds.
struct RecordingSink {
    failures: usize,
    calls: Mutex<Vec<Instant>>,
}

impl RecordingSink {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }
}

impl TriggerSink for RecordingSink {
    async fn fire(&self) -> Result<u16, DeliveryError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(Instant::now());
        if calls.len() <= self.failures {
            Err(DeliveryError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            })
        } else {
            Ok(204)
        }
    }
}

fn store_with(paths: &[&str]) -> Arc<StateStore> {
    let store = StateStore::in_memory().unwrap();
    for path in paths {
        store
            .observe(
                &Observation {
                    path: (*path).to_string(),
                    size: 12,
                    modified: SystemTime::now(),
                    checksum: format!("digest-{path}"),
                },
                chrono::Utc::now() - chrono::Duration::seconds(30),
            )
            .unwrap();
    }
    Arc::new(store)
}

fn modified(path: &str) -> ChangeEvent {
    ChangeEvent::new(path, ChangeKind::Modified, EventSource::Poll)
}

struct Pipeline {
    intake: mpsc::Sender<ChangeEvent>,
    shutdown: ShutdownHandler,
    stats: Arc<WatchStats>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

fn pipeline(sink: Arc<RecordingSink>, store: Arc<StateStore>, quiet: Duration, policy: RetryPolicy) -> Pipeline {
    let shutdown = ShutdownHandler::new();
    let stats = Arc::new(WatchStats::new());
    let (intake, intake_rx) = mpsc::channel(64);
    let (batch_tx, batch_rx) = mpsc::channel(4);

    let dispatcher = tokio::spawn(run_dispatcher(Debouncer::new(quiet), intake_rx, batch_tx, shutdown.clone()));
    let worker = tokio::spawn(run_delivery_worker(
        Deliverer::new(sink, store, policy, Arc::clone(&stats)),
        batch_rx,
        shutdown.clone(),
    ));
    let tasks = vec![
        tokio::spawn(async move {
            dispatcher.await.unwrap();
        }),
        worker,
    ];
    Pipeline {
        intake,
        shutdown,
        stats,
        tasks,
    }
}

#[tokio::test(start_paused = true)]
async fn test_burst_collapses_into_one_trigger() {
    let sink = RecordingSink::new(0);
    let store = store_with(&["a.md", "b.md", "c.md"]);
    let p = pipeline(Arc::clone(&sink), Arc::clone(&store), Duration::from_secs(10), RetryPolicy::default());

    let start = Instant::now();
    for (i, path) in ["a.md", "b.md", "c.md", "a.md", "b.md"].iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        p.intake.send(modified(path)).await.unwrap();
    }
    let last_event = start + Duration::from_secs(8);

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(sink.calls().is_empty(), "fired before the quiet period ended");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let calls = sink.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0] >= last_event + Duration::from_secs(10));
    assert!(store.pending_paths().unwrap().is_empty());
    assert_eq!(p.stats.successful_triggers.load(Ordering::Relaxed), 1);

    p.shutdown.request_shutdown();
    for task in p.tasks {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_separate_bursts_fire_separately() {
    let sink = RecordingSink::new(0);
    let store = store_with(&["a.md", "b.md"]);
    let p = pipeline(Arc::clone(&sink), store, Duration::from_secs(5), RetryPolicy::default());

    p.intake.send(modified("a.md")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    p.intake.send(modified("b.md")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(sink.calls().len(), 2);

    p.shutdown.request_shutdown();
    for task in p.tasks {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retry_then_succeed() {
    let sink = RecordingSink::new(2);
    let store = store_with(&["a.md"]);
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };
    let p = pipeline(Arc::clone(&sink), Arc::clone(&store), Duration::from_secs(1), policy);

    p.intake.send(modified("a.md")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let calls = sink.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1] - calls[0] >= Duration::from_secs(1));
    assert!(calls[2] - calls[1] >= Duration::from_secs(2));

    let record = store.get("a.md").unwrap().unwrap();
    assert!(!record.pending);
    assert_eq!(record.attempt_count, 0);
    assert_eq!(p.stats.delivery_attempts.load(Ordering::Relaxed), 3);

    p.shutdown.request_shutdown();
    for task in p.tasks {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_batch_is_carried_by_next_success() {
    let sink = RecordingSink::new(2);
    let store = store_with(&["a.md", "b.md"]);
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(1),
    };
    let p = pipeline(Arc::clone(&sink), Arc::clone(&store), Duration::from_secs(1), policy);

    p.intake.send(modified("a.md")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    let failed = store.get("a.md").unwrap().unwrap();
    assert!(failed.pending);
    assert_eq!(failed.attempt_count, 2);
    assert_eq!(p.stats.failed_triggers.load(Ordering::Relaxed), 1);

    p.intake.send(modified("b.md")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(sink.calls().len(), 3);
    assert!(store.pending_paths().unwrap().is_empty());
    assert_eq!(store.get("a.md").unwrap().unwrap().attempt_count, 0);

    p.shutdown.request_shutdown();
    for task in p.tasks {
        task.await.unwrap();
    }
}
