//! rstest fixtures and manifest-writing helpers for integration tests.
//!
//! Tests build their own unit/record manifests under a fixture-provided
//! artifact root and open a [`Store`] against it through [`ManifestSource`],
//! the same pair of types `main.rs` wires together at process start.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use indexstore_rs::config::Config;
use indexstore_rs::ingest::ManifestSource;
use indexstore_rs::server::AppState;
use indexstore_rs::store::Store;
use rstest::*;
use tokio::sync::Notify;

static FIXTURE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[fixture]
pub fn tmp_dir() -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let c = FIXTURE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("indexstore-rs-fixture-{nanos}-{c}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[fixture]
pub fn store_root(tmp_dir: PathBuf) -> PathBuf {
    let root = tmp_dir.join("store");
    std::fs::create_dir_all(&root).unwrap();
    root
}

#[fixture]
pub fn artifact_root(store_root: PathBuf) -> PathBuf {
    let root = store_root.join("artifacts");
    std::fs::create_dir_all(&root).unwrap();
    root
}

#[fixture]
pub fn config(store_root: PathBuf) -> Config {
    Config {
        store_root,
        readonly: false,
        initial_map_size: 4 * 1024 * 1024,
        max_map_growths: 2,
        explicit_output_mode: false,
        watch_mode: false,
        watch_debounce_ms: 0,
        watch_roots: vec![],
        ingest_batch_size: 10,
        metrics_enabled: false,
        metrics_port: 0,
        api_port: 0,
    }
}

/// Opens a fresh `Store` plus `AppState` over `artifact_root`, mirroring the
/// wiring `main.rs::run` does at startup (minus the watcher and metrics
/// server, which integration tests don't need).
pub fn open_test_store(config: &Config, artifact_root: &Path) -> (Arc<Store>, AppState) {
    let source = Arc::new(ManifestSource::open(artifact_root));
    let store = Store::open(config, source.clone()).expect("open store");
    let state = AppState {
        store: store.clone(),
        reader: source,
        ingest_generation: Arc::new(AtomicU64::new(0)),
        ingest_notify: Arc::new(Notify::new()),
    };
    (store, state)
}

/// Accumulates unit and provider-record JSON files under an artifact root,
/// in the layout [`ManifestSource`] reads: `units.json` indexing unit names
/// to their file, `units/<name>.json` per unit, `records/<provider>.json`
/// per provider.
pub struct ManifestWriter {
    root: PathBuf,
    units: HashMap<String, String>,
}

impl ManifestWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), units: HashMap::new() }
    }

    pub fn unit(&mut self, unit_name: &str, body: serde_json::Value) -> &mut Self {
        let rel = format!("units/{}.json", sanitize(unit_name));
        self.write(&rel, &body);
        self.units.insert(unit_name.to_string(), rel);
        self.write("units.json", &serde_json::to_value(&self.units).unwrap());
        self
    }

    pub fn record(&mut self, provider_name: &str, occurrences: serde_json::Value) -> &mut Self {
        let rel = format!("records/{provider_name}.json");
        self.write(&rel, &serde_json::json!({ "occurrences": occurrences }));
        self
    }

    fn write(&self, relative: &str, value: &serde_json::Value) {
        let path = self.root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
    }
}

fn sanitize(unit_name: &str) -> String {
    unit_name.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}
