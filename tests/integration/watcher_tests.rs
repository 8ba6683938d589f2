use docwatch::dispatch::{DeliveryError, RetryPolicy, TriggerSink};
use docwatch::scanner::{Walker, WalkerConfig};
use docwatch::signal::ShutdownHandler;
use docwatch::store::StateStore;
use docwatch::watcher::{ChecksumScanner, GateConfig, Reconciler, Watcher, WatcherSettings};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tempfile::tempdir;
use tokio::sync::mpsc;

#[derive(Default)]
struct CountingSink {
    fired: AtomicUsize,
}

impl CountingSink {
    fn count(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

impl TriggerSink for CountingSink {
    async fn fire(&self) -> Result<u16, DeliveryError> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(200)
    }
}

fn walker(root: &Path) -> Walker {
    Walker::new(root, WalkerConfig::default().with_allowed_extensions(["md"]))
}

fn fast_settings() -> WatcherSettings {
    WatcherSettings {
        poll_interval: Duration::from_millis(100),
        scan_interval: Duration::from_secs(60),
        debounce: Duration::from_millis(300),
        gate: GateConfig {
            wait_stable: Duration::from_millis(200),
            max_retries: 10,
        },
        io_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
        },
        stats_interval: Duration::from_secs(60),
    }
}

async fn wait_for(sink: &CountingSink, at_least: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while sink.count() < at_least {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {at_least} triggers, saw {}",
            sink.count()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_triggers_on_initial_scan_and_edit() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("a.md");
    fs::write(&file, "# Draft\n").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());
    let sink = Arc::new(CountingSink::default());
    let shutdown = ShutdownHandler::new();

    let watcher = Watcher::new(walker(dir.path()), Arc::clone(&store), Arc::clone(&sink), fast_settings());
    let running = tokio::spawn(watcher.run(shutdown.clone()));

    wait_for(&sink, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(store.get("a.md").unwrap().is_some_and(|r| !r.pending));

    fs::write(&file, "# Draft\n\nA second paragraph.\n").unwrap();
    wait_for(&sink, 2).await;

    shutdown.request_shutdown();
    let snapshot = running.await.unwrap().unwrap();

    assert!(snapshot.successful_triggers >= 2);
    assert!(snapshot.scan_events >= 1);
    assert!(snapshot.poll_events >= 1);
    assert_eq!(snapshot.tracked_files, 1);
    assert!(store.pending_paths().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pending_changes_are_delivered_after_restart() {
    let dir = tempdir().unwrap();
    let state = tempdir().unwrap();
    let db_path = state.path().join("state.db");
    fs::write(dir.path().join("a.md"), "undelivered before the restart").unwrap();

    {
        let store = Arc::new(StateStore::open(&db_path).unwrap());
        let reconciler = Reconciler::new(Arc::new(walker(dir.path())), store, Duration::from_secs(5));
        let (tx, _rx) = mpsc::channel(16);
        ChecksumScanner::new(Arc::new(reconciler))
            .run_pass(&tx, &ShutdownHandler::new())
            .await
            .unwrap();
    }

    let store = Arc::new(StateStore::open(&db_path).unwrap());
    assert_eq!(store.pending_paths().unwrap(), vec!["a.md".to_string()]);

    let sink = Arc::new(CountingSink::default());
    let shutdown = ShutdownHandler::new();
    let watcher = Watcher::new(walker(dir.path()), Arc::clone(&store), Arc::clone(&sink), fast_settings());
    let running = tokio::spawn(watcher.run(shutdown.clone()));

    wait_for(&sink, 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown.request_shutdown();
    let snapshot = running.await.unwrap().unwrap();

    assert_eq!(sink.count(), 1);
    assert_eq!(snapshot.scan_events, 0);
    assert!(store.pending_paths().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quiet_tree_never_triggers() {
    let dir = tempdir().unwrap();
    let sink = Arc::new(CountingSink::default());
    let shutdown = ShutdownHandler::new();
    let store = Arc::new(StateStore::in_memory().unwrap());

    let watcher = Watcher::new(walker(dir.path()), store, Arc::clone(&sink), fast_settings());
    let running = tokio::spawn(watcher.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(800)).await;
    shutdown.request_shutdown();
    let snapshot = running.await.unwrap().unwrap();

    assert_eq!(sink.count(), 0);
    assert_eq!(snapshot.successful_triggers, 0);
    assert_eq!(snapshot.tracked_files, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_appends_to_delivered_file_fire_one_trigger() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("a.md");
    fs::write(&file, "0123456789").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());

    // a.md was reported by an earlier run
    {
        let reconciler = Reconciler::new(Arc::new(walker(dir.path())), Arc::clone(&store), Duration::from_secs(5));
        let (tx, _rx) = mpsc::channel(16);
        ChecksumScanner::new(Arc::new(reconciler))
            .run_pass(&tx, &ShutdownHandler::new())
            .await
            .unwrap();
        store.record_delivery(&["a.md".to_string()], Utc::now()).unwrap();
    }
    let before = store.get("a.md").unwrap().unwrap();
    assert!(!before.pending);

    let settings = WatcherSettings {
        debounce: Duration::from_millis(600),
        gate: GateConfig {
            wait_stable: Duration::from_millis(300),
            max_retries: 10,
        },
        ..fast_settings()
    };
    let sink = Arc::new(CountingSink::default());
    let shutdown = ShutdownHandler::new();
    let watcher = Watcher::new(walker(dir.path()), Arc::clone(&store), Arc::clone(&sink), settings);
    let running = tokio::spawn(watcher.run(shutdown.clone()));

    // Let the first poll prime its snapshot and the startup scan finish
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(sink.count(), 0);

    for chunk in ["a".repeat(17), "b".repeat(17), "c".repeat(16)] {
        let mut out = OpenOptions::new().append(true).open(&file).unwrap();
        out.write_all(chunk.as_bytes()).unwrap();
        drop(out);
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    wait_for(&sink, 1).await;
    // Longer than a full debounce window: nothing else may fire
    tokio::time::sleep(Duration::from_millis(1500)).await;
    shutdown.request_shutdown();
    let snapshot = running.await.unwrap().unwrap();

    assert_eq!(sink.count(), 1);
    assert_eq!(snapshot.successful_triggers, 1);
    assert_eq!(snapshot.scan_events, 0);
    assert!(snapshot.poll_events >= 1);

    let record = store.get("a.md").unwrap().unwrap();
    assert_eq!(record.size, 60);
    assert_ne!(record.checksum, before.checksum);
    assert_eq!(record.attempt_count, 0);
    assert!(!record.pending);
    assert!(record.last_triggered_at > before.last_triggered_at);
}
