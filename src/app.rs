//! Subcommand entry points.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::cli::{Cli, Commands};
use crate::config::Config;
use crate::dispatch::{Batch, Deliverer, DeliveryOutcome, HttpTrigger};
use crate::error::ExitCode;
use crate::logging::init_logging;
use crate::output::{StatusReport, TableOutput};
use crate::scanner::Walker;
use crate::signal::{install_handler, ShutdownHandler};
use crate::store::{StateStore, StoreError};
use crate::watcher::{with_store, ChecksumScanner, Reconciler, WatchStats, Watcher};

/// Run the application for parsed CLI arguments.
///
/// # Errors
///
/// Returns the first fatal error; [`ExitCode::classify`] maps it to an
/// exit code.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);
    let shutdown = install_handler()?;

    let overrides = cli.command.overrides();
    let config = Config::load(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Run(_) => run_watcher(&config, &shutdown),
        Commands::Scan(args) => run_scan(&config, !args.no_trigger, &shutdown),
        Commands::Status(args) => show_status(&config, args.json),
        Commands::Config(_) => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::Success)
        }
    }
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("docwatch")
        .build()
        .context("Failed to start async runtime")
}

fn open_store(path: &Path) -> Result<Arc<StateStore>> {
    let store = StateStore::open(path)
        .with_context(|| format!("Failed to open state database {}", path.display()))?;
    Ok(Arc::new(store))
}

fn build_walker(config: &Config, shutdown: &ShutdownHandler) -> Result<Walker> {
    let root = config.watch_dir()?;
    Ok(Walker::new(root, config.walker_config()?).with_shutdown_flag(shutdown.get_flag()))
}

fn build_sink(config: &Config) -> Result<HttpTrigger> {
    HttpTrigger::new(config.endpoint()?, config.http_timeout(), config.insecure)
        .context("Failed to build HTTP client")
}

fn run_watcher(config: &Config, shutdown: &ShutdownHandler) -> Result<ExitCode> {
    config.validate(true)?;
    let store = open_store(&config.db_path()?)?;
    let walker = build_walker(config, shutdown)?;
    let sink = build_sink(config)?;

    runtime()?.block_on(watch(config, store, walker, sink, shutdown))
}

async fn watch(
    config: &Config,
    store: Arc<StateStore>,
    walker: Walker,
    sink: HttpTrigger,
    shutdown: &ShutdownHandler,
) -> Result<ExitCode> {
    if let Some(url) = &config.health_url {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = sink.wait_for_health(url, config.health_timeout()) => {}
        }
    }
    if shutdown.is_shutdown_requested() {
        return Ok(ExitCode::Interrupted);
    }

    Watcher::new(walker, store, sink, config.watcher_settings())
        .run(shutdown.clone())
        .await
        .context("Watcher failed")?;
    Ok(ExitCode::Success)
}

fn run_scan(config: &Config, trigger: bool, shutdown: &ShutdownHandler) -> Result<ExitCode> {
    config.validate(trigger)?;
    let store = open_store(&config.db_path()?)?;
    let walker = Arc::new(build_walker(config, shutdown)?);
    let sink = if trigger { Some(build_sink(config)?) } else { None };

    runtime()?.block_on(scan_once(config, store, walker, sink, shutdown))
}

async fn scan_once(
    config: &Config,
    store: Arc<StateStore>,
    walker: Arc<Walker>,
    sink: Option<HttpTrigger>,
    shutdown: &ShutdownHandler,
) -> Result<ExitCode> {
    let settings = config.watcher_settings();
    let reconciler = Reconciler::new(walker, Arc::clone(&store), settings.io_timeout);
    let scanner = ChecksumScanner::new(Arc::new(reconciler));

    let (tx, mut rx) = mpsc::channel(1024);
    let drain = tokio::spawn(async move {
        let mut events = 0usize;
        while rx.recv().await.is_some() {
            events += 1;
        }
        events
    });
    let summary = scanner.run_pass(&tx, shutdown).await.context("Scan failed")?;
    drop(tx);
    let events = drain.await.unwrap_or_default();

    println!("Scan complete: {summary}");
    if summary.interrupted {
        return Ok(ExitCode::Interrupted);
    }

    let Some(sink) = sink else {
        return Ok(ExitCode::Success);
    };
    let pending: BTreeSet<String> = with_store(&store, StateStore::pending_paths)
        .await?
        .into_iter()
        .collect();
    if events == 0 && pending.is_empty() {
        println!("Nothing changed; no trigger sent");
        return Ok(ExitCode::Success);
    }

    let now = tokio::time::Instant::now();
    let batch = Batch {
        paths: pending,
        events,
        first_event: now,
        last_event: now,
        unstable: false,
    };
    let deliverer = Deliverer::new(sink, store, settings.retry, Arc::new(WatchStats::new()));
    match deliverer.deliver(&batch, shutdown).await {
        DeliveryOutcome::Delivered { attempts } => {
            println!("Trigger delivered after {attempts} attempt(s)");
            Ok(ExitCode::Success)
        }
        DeliveryOutcome::Abandoned { .. } => Ok(ExitCode::Interrupted),
        DeliveryOutcome::Exhausted { attempts } => {
            anyhow::bail!("Trigger failed after {attempts} attempts; changes stay pending")
        }
    }
}

fn show_status(config: &Config, json: bool) -> Result<ExitCode> {
    let db_path = config.db_path()?;
    if !db_path.exists() {
        return Err(StoreError::Io {
            path: db_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "state database does not exist"),
        })
        .context("Nothing to report; has the watcher run yet?");
    }

    let store = open_store(&db_path)?;
    let records = store.list_all().context("Failed to read records")?;
    let report = StatusReport::new(&db_path, &records);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        report.write_to(&mut out)?;
    } else {
        TableOutput::new(&report).write_to(&mut out)?;
    }
    out.flush()?;
    Ok(ExitCode::Success)
}
