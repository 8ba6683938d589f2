use chrono::{Duration, Utc};
use docwatch::store::{ObserveOutcome, Observation, StateStore};
use std::time::SystemTime;
use tempfile::tempdir;

fn observation(path: &str, checksum: &str) -> Observation {
    Observation {
        path: path.to_string(),
        size: 42,
        modified: SystemTime::now(),
        checksum: checksum.to_string(),
    }
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("nested").join("state.db");

    {
        let store = StateStore::open(&db_path).unwrap();
        store.observe(&observation("a.md", "aaa"), Utc::now()).unwrap();
        store.record_failed_attempt(&["a.md".to_string()]).unwrap();
    }

    let store = StateStore::open(&db_path).unwrap();
    let record = store.get("a.md").unwrap().unwrap();
    assert_eq!(record.checksum.as_deref(), Some("aaa"));
    assert_eq!(record.attempt_count, 1);
    assert!(record.pending);
    assert_eq!(store.pending_paths().unwrap(), vec!["a.md".to_string()]);
    assert_eq!(
        store.observe(&observation("a.md", "aaa"), Utc::now()).unwrap(),
        ObserveOutcome::Unchanged
    );
}

#[test]
fn test_delivery_clears_pending_and_attempts() {
    let store = StateStore::in_memory().unwrap();
    let observed_at = Utc::now() - Duration::seconds(10);
    store.observe(&observation("a.md", "aaa"), observed_at).unwrap();
    store.record_failed_attempt(&["a.md".to_string()]).unwrap();

    let delivered_at = Utc::now();
    store.record_delivery(&["a.md".to_string()], delivered_at).unwrap();

    let record = store.get("a.md").unwrap().unwrap();
    assert!(!record.pending);
    assert_eq!(record.attempt_count, 0);
    assert_eq!(
        record.last_triggered_at.map(|t| t.timestamp_micros()),
        Some(delivered_at.timestamp_micros())
    );
    assert!(store.pending_paths().unwrap().is_empty());
}

#[test]
fn test_change_during_delivery_stays_pending() {
    let store = StateStore::in_memory().unwrap();
    let started = Utc::now() - Duration::seconds(5);
    store.observe(&observation("a.md", "aaa"), started - Duration::seconds(5)).unwrap();
    store.observe(&observation("a.md", "bbb"), started + Duration::seconds(1)).unwrap();

    store.record_delivery(&["a.md".to_string()], started).unwrap();

    let record = store.get("a.md").unwrap().unwrap();
    assert!(record.pending);
    assert_eq!(record.attempt_count, 0);
}

#[test]
fn test_stale_delete_spares_fresh_records() {
    let store = StateStore::in_memory().unwrap();
    let pass_started = Utc::now();
    store.observe(&observation("old.md", "o"), pass_started - Duration::seconds(60)).unwrap();
    store.observe(&observation("new.md", "n"), pass_started + Duration::seconds(1)).unwrap();

    assert!(store.delete_if_stale("old.md", pass_started).unwrap());
    assert!(!store.delete_if_stale("new.md", pass_started).unwrap());
    assert_eq!(store.count().unwrap(), 1);
}
