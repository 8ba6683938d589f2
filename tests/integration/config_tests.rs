use docwatch::config::{Config, ConfigError, ConfigOverrides};
use std::fs;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("DOCWATCH_") {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_layers_merge_in_order() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempdir().unwrap();
    let file = dir.path().join("docwatch.toml");
    fs::write(
        &file,
        r#"
endpoint = "http://file.example/reindex"
debounce = 30.0
poll_interval = 2.5
exclude_dirs = ["drafts"]
"#,
    )
    .unwrap();

    std::env::set_var("DOCWATCH_DEBOUNCE", "15.5");
    std::env::set_var("DOCWATCH_SCAN_INTERVAL", "120.0");

    let overrides = ConfigOverrides {
        scan_interval: Some(60.0),
        watch_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let config = Config::load(Some(&file), &overrides);
    clear_env();
    let config = config.unwrap();

    assert_eq!(config.endpoint.as_deref(), Some("http://file.example/reindex"));
    assert_eq!(config.poll_interval, 2.5);
    assert_eq!(config.debounce, 15.5);
    assert_eq!(config.scan_interval, 60.0);
    assert_eq!(config.exclude_dirs, vec!["drafts".to_string()]);
    assert_eq!(config.wait_stable, 2.0);
    assert_eq!(config.watch_dir.as_deref(), Some(dir.path()));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = Config::load(Some(&missing), &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound(_)));
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let file = dir.path().join("bad.toml");
    fs::write(&file, "debounce = \"soon\"").unwrap();

    let err = Config::load(Some(&file), &ConfigOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn test_validate_requires_watch_dir_and_endpoint() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    assert!(matches!(config.validate(true), Err(ConfigError::MissingField("watch_dir"))));

    config.watch_dir = Some(dir.path().to_path_buf());
    assert!(matches!(config.validate(true), Err(ConfigError::MissingField("endpoint"))));
    assert!(config.validate(false).is_ok());

    config.endpoint = Some("not a url".to_string());
    assert!(matches!(config.validate(true), Err(ConfigError::Invalid { field: "endpoint", .. })));

    config.endpoint = Some("https://search.internal/reindex".to_string());
    assert!(config.validate(true).is_ok());
}

#[test]
fn test_validate_rejects_missing_watch_dir() {
    let dir = tempdir().unwrap();
    let config = Config {
        watch_dir: Some(dir.path().join("absent")),
        ..Default::default()
    };
    assert!(matches!(
        config.validate(false),
        Err(ConfigError::WatchDir { reason: "does not exist", .. })
    ));
}

#[test]
fn test_settings_follow_config() {
    let dir = tempdir().unwrap();
    let config = Config {
        watch_dir: Some(dir.path().to_path_buf()),
        debounce: 0.5,
        max_attempts: 5,
        retry_base_delay: 0.25,
        ..Default::default()
    };

    let settings = config.watcher_settings();
    assert_eq!(settings.debounce, Duration::from_millis(500));
    assert_eq!(settings.retry.max_attempts, 5);
    assert_eq!(settings.retry.base_delay, Duration::from_millis(250));

    let walker = config.walker_config().unwrap();
    let db = config.db_path().unwrap();
    assert!(db.starts_with(dir.path()));
    assert!(!walker.accepts_name(&db));
    assert!(walker.accepts_name(&dir.path().join("guide.md")));
}
