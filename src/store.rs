//! Store: the process-facing "open/close a database" entry point (spec §6,
//! "Open/close database with (storePath, dbPath, readonly, options,
//! initialMapSize)"). Ties together the on-disk layout dance
//! ([`crate::ingest::workdir`]), the memory-mapped environment
//! ([`crate::kv::env::Environment`]), the schema ([`crate::schema::Tables`])
//! and the orchestrator ([`crate::ingest::repository::ArtifactRepository`])
//! behind one open call, and keeps a process-wide registry of what's open so
//! two callers asking for the same store root share one underlying
//! environment rather than racing to claim the same pid-scoped directory
//! (spec §5, "The process-wide open-database map requires a mutex").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::ingest::repository::{ArtifactRepository, UnitRecordSource};
use crate::ingest::workdir::{self, WorkDir};
use crate::kv::env::{versioned_dir, Environment};
use crate::kv::error::{KvError, KvResult};
use crate::query::visibility::VisibilityMode;
use crate::schema::Tables;

static OPEN_STORES: Lazy<Mutex<HashMap<PathBuf, Weak<Store>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// An open store: the live environment plus the pid-scoped working directory
/// that must be restored to `saved/` when the last handle to it drops.
pub struct Store {
    root: PathBuf,
    repository: ArtifactRepository,
    workdir: Mutex<WorkDir>,
}

impl Store {
    /// Opens (or creates) the store rooted at `config.store_root`, claiming
    /// the process-private working directory, opening the environment and
    /// schema, and recovering from a corrupted database by quarantining it
    /// and starting fresh (spec §7, "StoreCorruption"). Returns the existing
    /// handle if this process already has the same root open.
    pub fn open(config: &Config, source: Arc<dyn UnitRecordSource>) -> KvResult<Arc<Self>> {
        if let Some(existing) = OPEN_STORES.lock().get(&config.store_root).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let versioned = versioned_dir(&config.store_root);
        if !config.readonly {
            workdir::cleanup_discarded(&versioned);
        }

        let (mut dir, _reclaimed) = WorkDir::claim(&versioned, config.readonly).map_err(|source| KvError::Io {
            path: versioned.clone(),
            source,
        })?;

        let env = match Environment::open(dir.path(), config.readonly, Some(config.initial_map_size)) {
            Ok(env) => env,
            Err(KvError::Corruption { path, source }) if !config.readonly => {
                warn!(?path, error = %source, "store corrupted at open, quarantining and starting fresh");
                dir.quarantine_and_recreate().map_err(|source| KvError::Io {
                    path: versioned.clone(),
                    source,
                })?;
                Environment::open(dir.path(), config.readonly, Some(config.initial_map_size))?
            }
            Err(other) => return Err(other),
        };

        let mut wtxn = env.raw().write_txn().map_err(KvError::Lmdb)?;
        let tables = Tables::open(env.raw(), &mut wtxn)?;
        wtxn.commit().map_err(KvError::Lmdb)?;

        let env = Arc::new(env);
        let mode = if config.explicit_output_mode {
            VisibilityMode::ExplicitOutput
        } else {
            VisibilityMode::MainFile
        };
        let repository = ArtifactRepository::with_visibility_mode(env, tables, source, mode);

        let store = Arc::new(Store {
            root: config.store_root.clone(),
            repository,
            workdir: Mutex::new(dir),
        });

        OPEN_STORES.lock().insert(config.store_root.clone(), Arc::downgrade(&store));
        info!(root = %store.root.display(), readonly = config.readonly, "store opened");
        Ok(store)
    }

    pub fn repository(&self) -> &ArtifactRepository {
        &self.repository
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        OPEN_STORES.lock().remove(&self.root);
        self.workdir.lock().restore();
        info!(root = %self.root.display(), "store closed");
    }
}

/// Number of store roots this process currently holds open. Test-support
/// (spec §6, mirrors the original's ability to assert on open-database
/// bookkeeping).
pub fn open_store_count() -> usize {
    let mut stores = OPEN_STORES.lock();
    stores.retain(|_, weak| weak.strong_count() > 0);
    stores.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::repository::{ProviderSymbol, UnitRecord};
    use std::sync::Mutex as StdMutex;

    struct EmptySource;

    impl UnitRecordSource for EmptySource {
        fn mod_time_nanos(&self, _unit_name: &str) -> Option<i64> {
            None
        }
        fn read_unit(&self, _unit_name: &str) -> Option<UnitRecord> {
            None
        }
        fn read_provider_symbols(&self, _provider_name: &str) -> Vec<ProviderSymbol> {
            Vec::new()
        }
    }

    static TEST_LOCK: StdMutex<()> = StdMutex::new(());

    fn config_for(root: &Path) -> Config {
        Config {
            store_root: root.to_path_buf(),
            readonly: false,
            initial_map_size: 1024 * 1024,
            max_map_growths: 2,
            explicit_output_mode: false,
            watch_mode: false,
            watch_debounce_ms: 0,
            watch_roots: vec![root.to_path_buf()],
            ingest_batch_size: 10,
            metrics_enabled: false,
            metrics_port: 0,
            api_port: 0,
        }
    }

    #[test]
    fn opening_the_same_root_twice_shares_one_store() {
        let _g = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path());

        let a = Store::open(&config, Arc::new(EmptySource)).unwrap();
        let b = Store::open(&config, Arc::new(EmptySource)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn closing_the_last_handle_restores_saved_and_drops_registry_entry() {
        let _g = TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = tempfile::tempdir().unwrap();
        let config = config_for(tmp.path());

        let store = Store::open(&config, Arc::new(EmptySource)).unwrap();
        let root = store.root().to_path_buf();
        drop(store);

        let versioned = versioned_dir(&root);
        assert!(versioned.join("saved").exists());
    }
}
