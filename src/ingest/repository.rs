//! Artifact Repository (spec §4.6): the orchestrator that owns the KV store
//! and turns unit-added/removed/modified events into imports, propagating
//! staleness to dependent units and file-watcher events into out-of-date
//! checks.
//!
//! Grounded on `StoreUnitRepo`/`IndexDatastoreImpl` in
//! `examples/original_source/lib/Index/IndexDatastore.cpp`: each event is
//! processed inside a `guardForMapFullError` retry loop (here,
//! [`Environment::with_map_full_retry`]), a per-unit [`UnitMonitor`] is kept
//! alive for as long as the unit is registered, and a unit whose mod-time
//! advances marks every unit that depends on it out of date in turn.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::ingest::delegate::{DelegateQueue, IngestDelegate, StoreUnitInfo};
use crate::ingest::importer::UnitImporter;
use crate::ingest::monitor::{OutOfDateTrigger, UnitMonitor};
use crate::kv::codes::IdCode;
use crate::kv::env::Environment;
use crate::kv::error::KvResult;
use crate::query::visibility::{VisibilityFilter, VisibilityMode};
use crate::schema::roles::{SymbolKind, SymbolRole};
use crate::schema::unit_info::ProviderKind;
use crate::schema::Tables;
use crate::txns::import::ImportTransaction;
use crate::txns::read::ReadTransaction;

/// One record (provider) dependency of a unit, as read from the underlying
/// compiler index (spec §3, "Unit").
pub struct UnitProviderDependency {
    pub provider_name: String,
    pub file_path: String,
    pub module_name: String,
    pub is_system: bool,
}

/// The fields of one compiler-produced unit record that the repository
/// needs in order to diff and store it (spec §3, "Unit").
pub struct UnitRecord {
    pub mod_time_nanos: i64,
    pub main_file: Option<String>,
    pub out_file: Option<String>,
    pub sysroot: Option<String>,
    pub target: Option<String>,
    pub is_system: bool,
    pub provider_kind: ProviderKind,
    pub file_depends: Vec<String>,
    pub unit_depends: Vec<String>,
    pub provider_depends: Vec<UnitProviderDependency>,
}

/// One symbol a provider (record) declares for a USR, as decoded from the
/// compiler index (spec §4.4, "symbol info import").
pub struct ProviderSymbol {
    pub usr: String,
    pub symbol_name: String,
    pub kind: SymbolKind,
    pub is_unit_test: bool,
    pub roles: SymbolRole,
    pub related_roles: SymbolRole,
}

/// The external decoder boundary for unit records: the repository only
/// knows how to diff and store whatever this hands it, the same seam
/// [`crate::reader::ArtifactReader`] draws for occurrence decoding.
pub trait UnitRecordSource: Send + Sync {
    /// The unit's current modification time, if it still exists. Checked
    /// first so an up-to-date unit never pays for a full record read.
    fn mod_time_nanos(&self, unit_name: &str) -> Option<i64>;
    fn read_unit(&self, unit_name: &str) -> Option<UnitRecord>;

    /// Every symbol a provider's own record declares. Called the first time
    /// a unit claims a given provider name (spec §4.5, "record dependency");
    /// a provider already known to the store is assumed immutable under its
    /// name, matching how the compiler names record files uniquely per
    /// content (the original emits a fresh record path whenever a
    /// translation unit's index output changes).
    fn read_provider_symbols(&self, provider_name: &str) -> Vec<ProviderSymbol>;
}

pub struct ArtifactRepository {
    env: Arc<Environment>,
    tables: Tables,
    source: Arc<dyn UnitRecordSource>,
    monitors: DashMap<IdCode, Arc<UnitMonitor>>,
    delegate: Mutex<Option<DelegateQueue>>,
    pub visibility: VisibilityFilter,
}

impl ArtifactRepository {
    pub fn new(env: Arc<Environment>, tables: Tables, source: Arc<dyn UnitRecordSource>) -> Self {
        Self::with_visibility_mode(env, tables, source, VisibilityMode::MainFile)
    }

    pub fn with_visibility_mode(
        env: Arc<Environment>,
        tables: Tables,
        source: Arc<dyn UnitRecordSource>,
        mode: VisibilityMode,
    ) -> Self {
        Self {
            env,
            tables,
            source,
            monitors: DashMap::new(),
            delegate: Mutex::new(None),
            visibility: VisibilityFilter::new(mode),
        }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn read_transaction(&self) -> KvResult<ReadTransaction<'_>> {
        ReadTransaction::begin(&self.env, &self.tables)
    }

    /// Installs the delegate notified of ingestion progress and unit
    /// staleness (spec §6, "delegate events"), dispatched on its own serial
    /// queue (spec §9). Replaces any delegate previously installed.
    pub fn set_delegate(&self, delegate: Arc<dyn IngestDelegate>) {
        *self.delegate.lock() = Some(DelegateQueue::new(delegate));
    }

    /// Same as [`Self::set_delegate`], but `unitIsOutOfDate` bypasses the
    /// queue and calls straight through on the caller's thread (spec §9),
    /// for tests that need to observe a notification in line with the call
    /// that produced it.
    pub fn set_delegate_synchronous(&self, delegate: Arc<dyn IngestDelegate>) {
        *self.delegate.lock() = Some(DelegateQueue::with_synchronous(delegate, true));
    }

    fn notify_processing_added_pending(&self, n: usize) {
        if let Some(queue) = self.delegate.lock().as_ref() {
            queue.processing_added_pending(n);
        }
    }

    fn notify_processing_completed(&self, n: usize) {
        if let Some(queue) = self.delegate.lock().as_ref() {
            queue.processing_completed(n);
        }
    }

    fn notify_processed_store_unit(&self, unit_code: IdCode, unit_name: &str) {
        if let Some(queue) = self.delegate.lock().as_ref() {
            queue.processed_store_unit(StoreUnitInfo { unit_code, unit_name: unit_name.to_string() });
        }
    }

    fn notify_unit_is_out_of_date(&self, unit_code: IdCode, unit_name: &str, trigger: OutOfDateTrigger) {
        if let Some(queue) = self.delegate.lock().as_ref() {
            queue.unit_is_out_of_date(StoreUnitInfo { unit_code, unit_name: unit_name.to_string() }, trigger);
        }
    }

    /// Registers (adds, or reimports if modified) one unit, retrying on a
    /// full memory map by growing it.
    pub fn register_unit(&self, unit_name: &str) -> KvResult<()> {
        self.env.with_map_full_retry(|| self.register_unit_once(unit_name))
    }

    fn register_unit_once(&self, unit_name: &str) -> KvResult<()> {
        let Some(mod_time_nanos) = self.source.mod_time_nanos(unit_name) else {
            warn!(unit_name, "unit disappeared before it could be registered");
            return Ok(());
        };

        let unit_code = IdCode::from_str(unit_name);
        {
            if let Some(monitor) = self.monitors.get(&unit_code) {
                if monitor.mod_time_nanos() == mod_time_nanos && !monitor.is_out_of_date() {
                    return Ok(());
                }
            }
        }

        self.notify_processing_added_pending(1);

        let Some(record) = self.source.read_unit(unit_name) else {
            warn!(unit_name, "unit disappeared before it could be read");
            self.notify_processing_completed(1);
            return Ok(());
        };

        let mut import = ImportTransaction::begin(&self.env, &self.tables)?;
        let mut importer = UnitImporter::begin(&mut import, unit_name, mod_time_nanos)?;

        if !importer.is_up_to_date() {
            if let Some(main_file) = &record.main_file {
                importer.set_main_file(main_file);
            }
            if let Some(out_file) = &record.out_file {
                importer.set_out_file(out_file);
            }
            if let Some(sysroot) = &record.sysroot {
                importer.set_sysroot(sysroot);
            }
            if let Some(target) = &record.target {
                importer.set_target(target);
            }
            importer.set_is_system_unit(record.is_system);
            importer.set_provider_kind(record.provider_kind);

            for file in &record.file_depends {
                importer.add_file_dependency(file)?;
            }
            for unit_dep in &record.unit_depends {
                importer.add_unit_dependency(unit_dep)?;
            }
            let mut new_providers = Vec::new();
            for dep in &record.provider_depends {
                let (provider_code, is_new) = importer.add_provider_dependency(
                    &dep.provider_name,
                    &dep.file_path,
                    &dep.module_name,
                    dep.is_system,
                )?;
                if is_new {
                    new_providers.push((provider_code, dep.provider_name.clone()));
                }
            }

            importer.commit()?;

            for (provider_code, provider_name) in new_providers {
                let mut has_test_symbols = false;
                for symbol in self.source.read_provider_symbols(&provider_name) {
                    if symbol.is_unit_test {
                        has_test_symbols = true;
                    }
                    import.add_symbol_info(
                        provider_code,
                        &symbol.usr,
                        &symbol.symbol_name,
                        symbol.kind,
                        symbol.is_unit_test,
                        symbol.roles,
                        symbol.related_roles,
                    )?;
                }
                if has_test_symbols {
                    import.set_provider_contains_test_symbols(provider_code)?;
                }
            }
        } else {
            drop(importer);
        }
        import.commit()?;

        self.monitors
            .insert(unit_code, Arc::new(UnitMonitor::new(unit_code, unit_name, mod_time_nanos)));
        self.notify_processed_store_unit(unit_code, unit_name);
        self.notify_processing_completed(1);

        // The unit itself just changed mod-time; treat its own name as the
        // original cause for the purposes of propagation, the same way a
        // changed file would be (spec §3, "dependent units become out of
        // date transitively").
        let mut visited = HashSet::new();
        self.propagate_staleness_to_dependents(unit_code, unit_name, unit_name, unit_name, mod_time_nanos, &mut visited)?;
        Ok(())
    }

    /// Marks every unit depending on `of_unit` out of date, wrapping
    /// `cause_description` as `"unit(of_unit_name) -> cause_description"`
    /// (spec §4.6, "dependency propagation") so the recorded trigger still
    /// names the original file (or unit) even after several hops, then
    /// pushes each newly-marked dependent onto the worklist so its own
    /// dependents are visited in turn. Iterative with a worklist and a
    /// visited set (spec §9, "Cyclic unit graph") rather than recursive, so a
    /// cyclic or pathologically deep unit-dependency graph can't overflow the
    /// stack; `visited` still bounds the walk to one pass per unit no matter
    /// how many paths reach it. Every unit newly marked out of date is
    /// reported through [`Self::notify_unit_is_out_of_date`] (spec §6,
    /// `unitIsOutOfDate`).
    fn propagate_staleness_to_dependents(
        &self,
        of_unit: IdCode,
        of_unit_name: &str,
        original_file: &str,
        cause_description: &str,
        mod_time_nanos: i64,
        visited: &mut HashSet<IdCode>,
    ) -> KvResult<()> {
        let mut worklist = vec![(of_unit, of_unit_name.to_string(), cause_description.to_string())];
        while let Some((unit, unit_name, description)) = worklist.pop() {
            if !visited.insert(unit) {
                continue;
            }

            let txn = self.read_transaction()?;
            let mut dependents = Vec::new();
            txn.foreach_unit_containing_unit(unit, |codes| {
                dependents.extend_from_slice(codes);
                true
            })?;
            drop(txn);

            let wrapped = format!("unit({unit_name}) -> {description}");
            for dependent in dependents {
                let Some(monitor) = self.monitors.get(&dependent).map(|r| r.value().clone()) else {
                    continue;
                };
                if monitor.check_for_out_of_date(original_file, &wrapped, mod_time_nanos) {
                    let dependent_name = monitor.unit_name().to_string();
                    let trigger = OutOfDateTrigger {
                        original_file: original_file.to_string(),
                        description: wrapped.clone(),
                        out_of_date_mod_time_nanos: mod_time_nanos,
                    };
                    self.notify_unit_is_out_of_date(dependent, &dependent_name, trigger);
                    worklist.push((dependent, dependent_name, wrapped.clone()));
                }
            }
        }
        Ok(())
    }

    pub fn remove_unit(&self, unit_name: &str) -> KvResult<()> {
        self.env.with_map_full_retry(|| {
            let mut import = ImportTransaction::begin(&self.env, &self.tables)?;
            import.remove_unit_data_by_name(unit_name)?;
            import.commit()
        })?;
        self.monitors.remove(&IdCode::from_str(unit_name));
        Ok(())
    }

    /// Handles a batch of changed parent directories from the file watcher
    /// (spec §4.6): finds every interned file under those directories, then
    /// marks out of date any unit depending on one of those files, using the
    /// file's current on-disk mtime as the trigger time.
    pub fn on_fs_event(&self, changed_parent_dirs: &[PathBuf]) -> KvResult<()> {
        let txn = self.read_transaction()?;
        let dir_codes: Vec<IdCode> = changed_parent_dirs
            .iter()
            .filter_map(|p| p.to_str())
            .map(IdCode::from_str)
            .collect();

        let mut affected = Vec::new();
        txn.find_file_paths_with_parent_paths(&dir_codes, |file_code, full_path| {
            let trigger_mod_time_nanos = file_mod_time_nanos(full_path);
            let trigger_path = full_path.to_string_lossy().into_owned();
            let _ = txn.foreach_unit_containing_file(file_code, |codes| {
                for &code in codes {
                    affected.push((code, trigger_path.clone(), trigger_mod_time_nanos));
                }
                true
            });
            true
        })?;
        drop(txn);

        for (unit_code, trigger_path, trigger_mod_time_nanos) in affected {
            let Some(monitor) = self.monitors.get(&unit_code).map(|r| r.value().clone()) else {
                continue;
            };
            if monitor.check_for_out_of_date(&trigger_path, &trigger_path, trigger_mod_time_nanos) {
                let unit_name = monitor.unit_name().to_string();
                let trigger = OutOfDateTrigger {
                    original_file: trigger_path.clone(),
                    description: trigger_path.clone(),
                    out_of_date_mod_time_nanos: trigger_mod_time_nanos,
                };
                self.notify_unit_is_out_of_date(unit_code, &unit_name, trigger);
                let mut visited = HashSet::new();
                self.propagate_staleness_to_dependents(
                    unit_code,
                    &unit_name,
                    &trigger_path,
                    &trigger_path,
                    trigger_mod_time_nanos,
                    &mut visited,
                )?;
            }
        }
        Ok(())
    }

    pub fn unit_monitor(&self, unit_code: IdCode) -> Option<Arc<UnitMonitor>> {
        self.monitors.get(&unit_code).map(|r| r.value().clone())
    }

    pub fn is_unit_out_of_date(&self, unit_name: &str) -> bool {
        self.monitors
            .get(&IdCode::from_str(unit_name))
            .map(|m| m.is_out_of_date())
            .unwrap_or(false)
    }

    pub fn monitored_unit_count(&self) -> usize {
        self.monitors.len()
    }
}

fn file_mod_time_nanos(path: &std::path::Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::schema::Tables;

    struct FakeSource {
        units: Mutex<HashMap<String, UnitRecord>>,
    }

    impl UnitRecordSource for FakeSource {
        fn mod_time_nanos(&self, unit_name: &str) -> Option<i64> {
            self.units.lock().unwrap().get(unit_name).map(|r| r.mod_time_nanos)
        }

        fn read_unit(&self, unit_name: &str) -> Option<UnitRecord> {
            let units = self.units.lock().unwrap();
            let r = units.get(unit_name)?;
            Some(UnitRecord {
                mod_time_nanos: r.mod_time_nanos,
                main_file: r.main_file.clone(),
                out_file: r.out_file.clone(),
                sysroot: r.sysroot.clone(),
                target: r.target.clone(),
                is_system: r.is_system,
                provider_kind: r.provider_kind,
                file_depends: r.file_depends.clone(),
                unit_depends: r.unit_depends.clone(),
                provider_depends: r
                    .provider_depends
                    .iter()
                    .map(|d| UnitProviderDependency {
                        provider_name: d.provider_name.clone(),
                        file_path: d.file_path.clone(),
                        module_name: d.module_name.clone(),
                        is_system: d.is_system,
                    })
                    .collect(),
            })
        }

        fn read_provider_symbols(&self, _provider_name: &str) -> Vec<ProviderSymbol> {
            Vec::new()
        }
    }

    fn open_repository(dir: &std::path::Path, units: HashMap<String, UnitRecord>) -> ArtifactRepository {
        let env = Arc::new(Environment::open(dir, false, None).unwrap());
        let mut wtxn = env.raw().write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        wtxn.commit().unwrap();
        ArtifactRepository::new(env, tables, Arc::new(FakeSource { units: Mutex::new(units) }))
    }

    fn sample_record(mod_time_nanos: i64) -> UnitRecord {
        UnitRecord {
            mod_time_nanos,
            main_file: Some("/proj/a.c".to_string()),
            out_file: Some("/proj/a.o".to_string()),
            sysroot: None,
            target: Some("x86_64-apple-macosx".to_string()),
            is_system: false,
            provider_kind: ProviderKind::Clang,
            file_depends: vec!["/proj/a.h".to_string()],
            unit_depends: vec![],
            provider_depends: vec![],
        }
    }

    #[test]
    fn registering_a_unit_twice_with_same_mod_time_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let mut units = HashMap::new();
        units.insert("u1".to_string(), sample_record(1_000));
        let repo = open_repository(tmp.path(), units);

        repo.register_unit("u1").unwrap();
        assert!(!repo.is_unit_out_of_date("u1"));
        repo.register_unit("u1").unwrap();
        assert_eq!(repo.monitored_unit_count(), 1);
    }

    #[test]
    fn removing_a_unit_drops_its_monitor() {
        let tmp = tempfile::tempdir().unwrap();
        let mut units = HashMap::new();
        units.insert("u1".to_string(), sample_record(1_000));
        let repo = open_repository(tmp.path(), units);

        repo.register_unit("u1").unwrap();
        repo.remove_unit("u1").unwrap();
        assert_eq!(repo.monitored_unit_count(), 0);
    }

    #[test]
    fn fs_event_cascades_staleness_through_unit_dependency_chain() {
        let tmp = tempfile::tempdir().unwrap();
        let store_dir = tmp.path().join("store");
        let proj_dir = tmp.path().join("proj");
        std::fs::create_dir_all(&proj_dir).unwrap();
        let header_path = proj_dir.join("a.h");
        std::fs::write(&header_path, b"// header").unwrap();
        let header_path_str = header_path.to_str().unwrap().to_string();

        let mut units = HashMap::new();

        let mut unit_a = sample_record(1_000);
        unit_a.main_file = Some("/proj/a.c".to_string());
        unit_a.file_depends = vec![header_path_str];
        units.insert("unit_a".to_string(), unit_a);

        let mut unit_b = sample_record(1_000);
        unit_b.main_file = Some("/proj/b.c".to_string());
        unit_b.file_depends = vec![];
        unit_b.unit_depends = vec!["unit_a".to_string()];
        units.insert("unit_b".to_string(), unit_b);

        let repo = open_repository(&store_dir, units);
        repo.register_unit("unit_a").unwrap();
        repo.register_unit("unit_b").unwrap();

        assert!(!repo.is_unit_out_of_date("unit_a"));
        assert!(!repo.is_unit_out_of_date("unit_b"));

        // The real file's mtime (current wall-clock time) is far newer than
        // the unit's synthetic mod_time_nanos of 1_000.
        repo.on_fs_event(&[proj_dir.clone()]).unwrap();

        assert!(repo.is_unit_out_of_date("unit_a"));
        assert!(
            repo.is_unit_out_of_date("unit_b"),
            "unit_b depends on unit_a and should inherit its staleness"
        );

        let b_code = IdCode::from_str("unit_b");
        let b_monitor = repo.unit_monitor(b_code).unwrap();
        let triggers = b_monitor.out_of_date_triggers();
        assert_eq!(triggers.len(), 1);
        assert!(triggers[0].description.starts_with("unit(unit_a) -> "));
    }

    #[derive(Default)]
    struct RecordingDelegate {
        out_of_date: Mutex<Vec<(String, String)>>,
    }

    impl IngestDelegate for RecordingDelegate {
        fn unit_is_out_of_date(&self, unit: StoreUnitInfo, trigger: OutOfDateTrigger) {
            self.out_of_date.lock().unwrap().push((unit.unit_name, trigger.description));
        }
    }

    #[test]
    fn fs_event_cascade_notifies_the_delegate_once_per_affected_unit() {
        let tmp = tempfile::tempdir().unwrap();
        let store_dir = tmp.path().join("store");
        let proj_dir = tmp.path().join("proj");
        std::fs::create_dir_all(&proj_dir).unwrap();
        let header_path = proj_dir.join("a.h");
        std::fs::write(&header_path, b"// header").unwrap();
        let header_path_str = header_path.to_str().unwrap().to_string();

        let mut units = HashMap::new();
        let mut unit_a = sample_record(1_000);
        unit_a.main_file = Some("/proj/a.c".to_string());
        unit_a.file_depends = vec![header_path_str];
        units.insert("unit_a".to_string(), unit_a);

        let mut unit_b = sample_record(1_000);
        unit_b.main_file = Some("/proj/b.c".to_string());
        unit_b.unit_depends = vec!["unit_a".to_string()];
        units.insert("unit_b".to_string(), unit_b);

        let repo = open_repository(&store_dir, units);
        repo.register_unit("unit_a").unwrap();
        repo.register_unit("unit_b").unwrap();

        let delegate = Arc::new(RecordingDelegate::default());
        repo.set_delegate_synchronous(delegate.clone());

        repo.on_fs_event(&[proj_dir.clone()]).unwrap();

        let notified = delegate.out_of_date.lock().unwrap();
        assert_eq!(notified.len(), 2, "both unit_a and its dependent unit_b should be notified");
        assert!(notified.iter().any(|(name, _)| name == "unit_a"));
        assert!(notified
            .iter()
            .any(|(name, description)| name == "unit_b" && description.starts_with("unit(unit_a) -> ")));

        drop(notified);

        // A second fs event at the same modtime is a no-op: no further
        // notifications for the already-stale units.
        repo.on_fs_event(&[proj_dir]).unwrap();
        assert_eq!(delegate.out_of_date.lock().unwrap().len(), 2);
    }
}
