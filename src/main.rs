//! indexstore-rs - Main entry point

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use indexstore_rs::cli;
use indexstore_rs::config::Config;
use indexstore_rs::ingest::{
    FsEventWatcher, IngestDelegate, ManifestSource, OutOfDateTrigger, StoreUnitInfo, UnitEventSource,
};
use indexstore_rs::metrics::{spawn_metrics_server, MetricsRegistry};
use indexstore_rs::server::{self, AppState};
use indexstore_rs::store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    let args = std::env::args().collect::<Vec<_>>();
    if cli::wants_help(&args) {
        cli::print_help();
        return Ok(());
    }
    if cli::wants_version(&args) {
        cli::print_version();
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting indexstore-rs");

    if let Err(err) = run().await {
        error!(error = %err, "Server exited with error");
        return Err(err);
    }
    Ok(())
}

/// Bootstrap port for the artifact source driving this process's store (spec
/// §4.7): a JSON-manifest directory under `STORE_ROOT/artifacts`, distinct
/// from the KV store's own on-disk layout under `STORE_ROOT/v<N>`. Swap this
/// for a real compiler-indexstore reader without touching the rest of the
/// bootstrap.
fn artifact_root(config: &Config) -> std::path::PathBuf {
    config.store_root.join("artifacts")
}

async fn run() -> Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let artifacts = artifact_root(&config);
    std::fs::create_dir_all(&artifacts)
        .with_context(|| format!("creating artifact root {}", artifacts.display()))?;
    let source = Arc::new(ManifestSource::open(&artifacts));

    let store = Store::open(&config, source.clone()).context("opening store")?;

    let metrics = Arc::new(MetricsRegistry::new().context("creating metrics registry")?);
    let _metrics_handle = if config.metrics_enabled {
        Some(
            spawn_metrics_server(Arc::clone(&metrics), config.metrics_port)
                .await
                .context("spawning metrics server")?,
        )
    } else {
        None
    };

    let ingest_generation = Arc::new(AtomicU64::new(0));
    let ingest_notify = Arc::new(Notify::new());

    let state = AppState {
        store: store.clone(),
        reader: source.clone(),
        ingest_generation: ingest_generation.clone(),
        ingest_notify: ingest_notify.clone(),
    };

    run_initial_scan(&store, &source, &config, &metrics);
    bump_ingest_generation(&ingest_generation, &ingest_notify);

    if config.watch_mode {
        spawn_watch_loop(
            store.clone(),
            config.clone(),
            metrics.clone(),
            ingest_generation.clone(),
            ingest_notify.clone(),
        );
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.api_port))
        .await
        .context("binding client API listener")?;
    info!(addr = %listener.local_addr().unwrap(), "Client API listening");

    axum::serve(listener, server::router(state))
        .await
        .context("serving client API")?;
    Ok(())
}

/// Registers every unit the artifact source currently knows about, in
/// batches of `config.ingest_batch_size` so a large initial scan yields
/// cooperatively rather than holding the ingest path for one long call.
fn run_initial_scan(
    store: &Arc<Store>,
    source: &Arc<ManifestSource>,
    config: &Config,
    metrics: &Arc<MetricsRegistry>,
) {
    let unit_names = source.unit_names();
    info!(count = unit_names.len(), "Starting initial unit scan");
    for batch in unit_names.chunks(config.ingest_batch_size.max(1)) {
        for unit_name in batch {
            register_one(store, unit_name, metrics);
        }
    }
}

fn register_one(store: &Arc<Store>, unit_name: &str, metrics: &Arc<MetricsRegistry>) {
    let timer = metrics.ingest_duration.start_timer();
    match store.repository().register_unit(unit_name) {
        Ok(()) => metrics.units_imported_total.inc(),
        Err(err) => warn!(unit = unit_name, error = %err, "failed to register unit"),
    }
    timer.observe_duration();
}

fn bump_ingest_generation(generation: &Arc<AtomicU64>, notify: &Arc<Notify>) {
    generation.fetch_add(1, Ordering::SeqCst);
    notify.notify_waiters();
}

/// Bridges the repository's delegate notifications (spec §6,
/// `unitIsOutOfDate`) back to the watch loop over a plain channel rather than
/// holding an `Arc<Store>` directly: the repository (owned by `Store`) owns
/// whatever delegate it's given, so a delegate that captured the `Store`
/// back would create a reference cycle and the store would never restore its
/// working directory to `saved/` on close.
struct WatchReimportDelegate {
    sender: std::sync::mpsc::Sender<String>,
}

impl IngestDelegate for WatchReimportDelegate {
    fn unit_is_out_of_date(&self, unit: StoreUnitInfo, _trigger: OutOfDateTrigger) {
        let _ = self.sender.send(unit.unit_name);
    }
}

/// Runs the file watcher on a blocking thread (`FsEventWatcher::next_batch`
/// blocks on a channel recv) and feeds each batch of changed parent
/// directories to the repository, re-registering exactly the units the
/// delegate reports out of date (spec §4.6) instead of rescanning every
/// known unit.
fn spawn_watch_loop(
    store: Arc<Store>,
    config: Config,
    metrics: Arc<MetricsRegistry>,
    ingest_generation: Arc<AtomicU64>,
    ingest_notify: Arc<Notify>,
) {
    let (reimport_tx, reimport_rx) = std::sync::mpsc::channel::<String>();
    store.repository().set_delegate(Arc::new(WatchReimportDelegate { sender: reimport_tx }));

    tokio::task::spawn_blocking(move || {
        let mut watcher = match FsEventWatcher::watch(&config.watch_roots) {
            Ok(w) => w,
            Err(err) => {
                error!(error = %err, "failed to start file watcher, watch mode disabled");
                return;
            }
        };

        while let Some(changed_dirs) = watcher.next_batch() {
            if let Err(err) = store.repository().on_fs_event(&changed_dirs) {
                warn!(error = %err, "on_fs_event failed");
                continue;
            }

            let mut to_reimport = std::collections::HashSet::new();
            while let Ok(unit_name) = reimport_rx.try_recv() {
                to_reimport.insert(unit_name);
            }

            let mut reimported = false;
            for unit_name in &to_reimport {
                register_one(&store, unit_name, &metrics);
                reimported = true;
            }
            if reimported {
                bump_ingest_generation(&ingest_generation, &ingest_notify);
            }
        }
    });
}
