use docwatch::scanner::{Walker, WalkerConfig};
use docwatch::signal::ShutdownHandler;
use docwatch::store::StateStore;
use docwatch::watcher::{ChangeEvent, ChangeKind, ChecksumScanner, EventSource, PassSummary, Reconciler};
use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::mpsc;

fn scanner(root: &Path, store: Arc<StateStore>) -> ChecksumScanner {
    let walker = Walker::new(root, WalkerConfig::default().with_allowed_extensions(["md", "pdf"]));
    let reconciler = Reconciler::new(Arc::new(walker), store, Duration::from_secs(5));
    ChecksumScanner::new(Arc::new(reconciler))
}

async fn pass(scanner: &ChecksumScanner) -> (PassSummary, Vec<ChangeEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let summary = scanner.run_pass(&tx, &ShutdownHandler::new()).await.unwrap();
    drop(tx);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events.sort_by(|a, b| a.path.cmp(&b.path));
    (summary, events)
}

#[tokio::test]
async fn test_new_file_is_created_once() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.md"), "# Title\n\nfirst draft").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());
    let scanner = scanner(dir.path(), Arc::clone(&store));

    let (summary, events) = pass(&scanner).await;
    assert_eq!(summary.created, 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "a.md");
    assert_eq!(events[0].kind, ChangeKind::Created);
    assert_eq!(events[0].source, EventSource::Scan);

    let record = store.get("a.md").unwrap().unwrap();
    assert!(record.pending);
    assert_eq!(record.checksum.as_deref().map(str::len), Some(64));

    let (summary, events) = pass(&scanner).await;
    assert_eq!(summary.unchanged, 1);
    assert!(!summary.has_changes());
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_same_size_same_mtime_rewrite_is_detected() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("report.md");
    fs::write(&file, "version 1").unwrap();
    let pinned = FileTime::from_unix_time(1_700_000_000, 0);
    filetime::set_file_mtime(&file, pinned).unwrap();

    let store = Arc::new(StateStore::in_memory().unwrap());
    let scanner = scanner(dir.path(), Arc::clone(&store));
    pass(&scanner).await;

    fs::write(&file, "version 2").unwrap();
    filetime::set_file_mtime(&file, pinned).unwrap();

    let (summary, events) = pass(&scanner).await;
    assert_eq!(summary.modified, 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ChangeKind::Modified);
}

#[tokio::test]
async fn test_touch_without_content_change_is_quiet() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("a.md");
    fs::write(&file, "stable content").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());
    let scanner = scanner(dir.path(), Arc::clone(&store));
    pass(&scanner).await;

    filetime::set_file_mtime(&file, FileTime::from_unix_time(1_800_000_000, 0)).unwrap();

    let (summary, events) = pass(&scanner).await;
    assert_eq!(summary.unchanged, 1);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_deleted_file_is_reported_and_forgotten() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("keep.md"), "keep me").unwrap();
    fs::write(dir.path().join("gone.pdf"), "remove me").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());
    let scanner = scanner(dir.path(), Arc::clone(&store));
    pass(&scanner).await;
    assert_eq!(store.count().unwrap(), 2);

    fs::remove_file(dir.path().join("gone.pdf")).unwrap();

    let (summary, events) = pass(&scanner).await;
    assert_eq!(summary.deleted, 1);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path, "gone.pdf");
    assert_eq!(events[0].kind, ChangeKind::Deleted);
    assert!(store.get("gone.pdf").unwrap().is_none());
    assert!(store.get("keep.md").unwrap().is_some());
}

#[tokio::test]
async fn test_restart_with_persisted_state_is_quiet() {
    let dir = tempdir().unwrap();
    let state = tempdir().unwrap();
    let db_path = state.path().join("state.db");
    fs::create_dir(dir.path().join("guides")).unwrap();
    fs::write(dir.path().join("guides/install.md"), "install steps").unwrap();
    fs::write(dir.path().join("faq.md"), "questions").unwrap();

    {
        let store = Arc::new(StateStore::open(&db_path).unwrap());
        let (summary, events) = pass(&scanner(dir.path(), store)).await;
        assert_eq!(summary.created, 2);
        assert_eq!(events[1].path, "guides/install.md");
    }

    let store = Arc::new(StateStore::open(&db_path).unwrap());
    let (summary, events) = pass(&scanner(dir.path(), store)).await;
    assert_eq!(summary.files_seen, 2);
    assert_eq!(summary.unchanged, 2);
    assert!(events.is_empty());
}

#[tokio::test]
async fn test_filtered_files_are_ignored() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("notes.md"), "tracked").unwrap();
    fs::write(dir.path().join("script.sh"), "not a document").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());

    let (summary, events) = pass(&scanner(dir.path(), Arc::clone(&store))).await;
    assert_eq!(summary.files_seen, 1);
    assert_eq!(events.len(), 1);
    assert!(store.get("script.sh").unwrap().is_none());
}

#[tokio::test]
async fn test_interrupted_pass_keeps_records() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.md"), "content a").unwrap();
    let store = Arc::new(StateStore::in_memory().unwrap());
    let scanner = scanner(dir.path(), Arc::clone(&store));
    pass(&scanner).await;
    fs::remove_file(dir.path().join("a.md")).unwrap();

    let shutdown = ShutdownHandler::new();
    shutdown.request_shutdown();
    let (tx, _rx) = mpsc::channel(16);
    let summary = scanner.run_pass(&tx, &shutdown).await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.deleted, 0);
    assert!(store.get("a.md").unwrap().is_some());
}
