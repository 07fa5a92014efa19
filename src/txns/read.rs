//! Read Transaction (spec §4.3): a consistent, many-concurrent-readers view
//! over a store. Every method takes the lmdb read side once at
//! [`ReadTransaction::begin`] and then answers queries against it without
//! ever observing a partially-applied import.
//!
//! Mirrors `examples/original_source/lib/Database/ReadTransactionImpl.h`'s
//! method surface; `receiver` callbacks return `true` to keep iterating and
//! `false` to stop early, same as the original's `function_ref<bool(...)>`
//! contract.

use std::collections::HashSet;
use std::path::PathBuf;

use heed::RoTxn;

use crate::kv::codes::IdCode;
use crate::kv::env::Environment;
use crate::kv::error::KvResult;
use crate::kv::txn::ResultExt;
use crate::query::pattern::matches_pattern;
use crate::schema::roles::GlobalSymbolKind;
use crate::schema::unit_info::UnitInfo;
use crate::schema::{ProviderForUsr, Tables, TimestampedFileForProvider};

pub struct ReadTransaction<'env> {
    tables: &'env Tables,
    rtxn: RoTxn<'env>,
    _guard: crate::kv::env::ReadGuard<'env>,
}

impl<'env> ReadTransaction<'env> {
    pub fn begin(env: &'env Environment, tables: &'env Tables) -> KvResult<Self> {
        let guard = env.enter_read();
        let rtxn = env.raw().read_txn().classify()?;
        Ok(Self {
            tables,
            rtxn,
            _guard: guard,
        })
    }

    /// A USR's code is simply the hash of the USR string; no intern table is
    /// needed since the string is always available to the caller.
    pub fn usr_code(usr: &str) -> IdCode {
        IdCode::from_str(usr)
    }

    pub fn provider_code(provider_name: &str) -> IdCode {
        IdCode::from_str(provider_name)
    }

    pub fn provider_name(&self, provider: IdCode) -> KvResult<Option<String>> {
        Ok(self
            .tables
            .provider_name_by_code
            .get(&self.rtxn, &provider.value())
            .classify()?
            .map(str::to_string))
    }

    pub fn target_name(&self, target: IdCode) -> KvResult<Option<String>> {
        Ok(self
            .tables
            .target_name_by_code
            .get(&self.rtxn, &target.value())
            .classify()?
            .map(str::to_string))
    }

    pub fn module_name(&self, module: IdCode) -> KvResult<Option<String>> {
        Ok(self
            .tables
            .module_name_by_code
            .get(&self.rtxn, &module.value())
            .classify()?
            .map(str::to_string))
    }

    /// Invokes `receiver(provider, roles, related_roles)` for every provider
    /// recorded against `usr`, filtered to those whose roles intersect
    /// `roles`/`related_roles` (a zero mask matches anything). Stops early if
    /// `receiver` returns `false`.
    pub fn lookup_providers_for_usr(
        &self,
        usr: &str,
        roles: u64,
        related_roles: u64,
        receiver: impl FnMut(IdCode, u64, u64) -> bool,
    ) -> KvResult<()> {
        self.lookup_providers_for_usr_code(Self::usr_code(usr), roles, related_roles, receiver)
    }

    /// Same as [`Self::lookup_providers_for_usr`] but keyed directly on an
    /// already-hashed USR code -- the path used when the code came from a
    /// name/kind bucket rather than a caller-supplied string (spec §4.7;
    /// mirrors the `IDCode usrCode` overload in the original read
    /// transaction).
    pub fn lookup_providers_for_usr_code(
        &self,
        usr_code: IdCode,
        roles: u64,
        related_roles: u64,
        mut receiver: impl FnMut(IdCode, u64, u64) -> bool,
    ) -> KvResult<()> {
        let Some(iter) = self
            .tables
            .providers_by_usr
            .get_duplicates(&self.rtxn, &usr_code.value())
            .classify()?
        else {
            return Ok(());
        };
        for item in iter {
            let (_, bytes) = item.classify()?;
            let row = ProviderForUsr::decode(bytes)?;
            if roles != 0 && row.roles & roles == 0 {
                continue;
            }
            if related_roles != 0 && row.related_roles & related_roles == 0 {
                continue;
            }
            if !receiver(row.provider, row.roles, row.related_roles) {
                break;
            }
        }
        Ok(())
    }

    /// Invokes `receiver` once per `(file, unit, module, mod_time, is_system)`
    /// row timestamped for `provider`.
    pub fn foreach_provider_file_reference(
        &self,
        provider: IdCode,
        mut receiver: impl FnMut(TimestampedFileForProvider) -> bool,
    ) -> KvResult<()> {
        let Some(iter) = self
            .tables
            .provider_files
            .get_duplicates(&self.rtxn, &provider.value())
            .classify()?
        else {
            return Ok(());
        };
        for item in iter {
            let (_, bytes) = item.classify()?;
            let row = TimestampedFileForProvider::decode(bytes)?;
            if !receiver(row) {
                break;
            }
        }
        Ok(())
    }

    /// Invokes `receiver` with the full set of USR codes recorded under the
    /// exact symbol name `name`.
    pub fn foreach_usr_by_name(
        &self,
        name: &str,
        mut receiver: impl FnMut(&[IdCode]) -> bool,
    ) -> KvResult<()> {
        let mut codes = Vec::new();
        if let Some(iter) = self
            .tables
            .usrs_by_symbol_name
            .get_duplicates(&self.rtxn, name)
            .classify()?
        {
            for item in iter {
                let (_, code) = item.classify()?;
                codes.push(IdCode::from_value(code));
            }
        }
        if !codes.is_empty() {
            receiver(&codes);
        }
        Ok(())
    }

    /// Scans every recorded symbol name against `pattern`, invoking
    /// `receiver` with the USR codes of each matching name.
    pub fn find_usrs_with_name_containing(
        &self,
        pattern: &str,
        anchor_start: bool,
        anchor_end: bool,
        subsequence: bool,
        ignore_case: bool,
        mut receiver: impl FnMut(&[IdCode]) -> bool,
    ) -> KvResult<()> {
        let mut iter = self.tables.usrs_by_symbol_name.iter(&self.rtxn).classify()?;
        let mut current_name: Option<String> = None;
        let mut current_codes: Vec<IdCode> = Vec::new();

        let mut flush = |name: &str, codes: &mut Vec<IdCode>, receiver: &mut dyn FnMut(&[IdCode]) -> bool| -> bool {
            let keep_going = if matches_pattern(name, pattern, anchor_start, anchor_end, subsequence, ignore_case) {
                receiver(codes)
            } else {
                true
            };
            codes.clear();
            keep_going
        };

        while let Some(item) = iter.next() {
            let (name, code) = item.classify()?;
            if current_name.as_deref() != Some(name) {
                if let Some(prev) = current_name.take() {
                    if !flush(&prev, &mut current_codes, &mut receiver) {
                        return Ok(());
                    }
                }
                current_name = Some(name.to_string());
            }
            current_codes.push(IdCode::from_value(code));
        }
        if let Some(prev) = current_name {
            flush(&prev, &mut current_codes, &mut receiver);
        }
        Ok(())
    }

    pub fn foreach_usr_of_global_kind(
        &self,
        kind: GlobalSymbolKind,
        mut receiver: impl FnMut(&[IdCode]) -> bool,
    ) -> KvResult<()> {
        let mut codes = Vec::new();
        if let Some(iter) = self
            .tables
            .usrs_by_global_kind
            .get_duplicates(&self.rtxn, &(kind as u32 as u64))
            .classify()?
        {
            for item in iter {
                let (_, code) = item.classify()?;
                codes.push(IdCode::from_value(code));
            }
        }
        if !codes.is_empty() {
            receiver(&codes);
        }
        Ok(())
    }

    /// Union of `TestClassOrExtension` and `TestMethod` buckets.
    pub fn foreach_usr_of_global_unit_test_symbol(
        &self,
        mut receiver: impl FnMut(&[IdCode]) -> bool,
    ) -> KvResult<()> {
        let mut codes = Vec::new();
        for kind in [
            GlobalSymbolKind::TestClassOrExtension,
            GlobalSymbolKind::TestMethod,
        ] {
            if let Some(iter) = self
                .tables
                .usrs_by_global_kind
                .get_duplicates(&self.rtxn, &(kind as u32 as u64))
                .classify()?
            {
                for item in iter {
                    let (_, code) = item.classify()?;
                    codes.push(IdCode::from_value(code));
                }
            }
        }
        if !codes.is_empty() {
            receiver(&codes);
        }
        Ok(())
    }

    pub fn directory(&self, dir: IdCode) -> KvResult<Option<String>> {
        Ok(self
            .tables
            .dir_name_by_code
            .get(&self.rtxn, &dir.value())
            .classify()?
            .map(str::to_string))
    }

    fn filename_row(&self, file: IdCode) -> KvResult<Option<crate::schema::FileNameRow>> {
        let Some(bytes) = self
            .tables
            .filename_by_code
            .get(&self.rtxn, &file.value())
            .classify()?
        else {
            return Ok(None);
        };
        Ok(Some(crate::schema::FileNameRow::decode(bytes)?))
    }

    /// Resolves a file code back to a full path by joining its directory
    /// string with its basename. Returns `None` if the file was never
    /// interned.
    pub fn full_file_path(&self, file: IdCode) -> KvResult<Option<PathBuf>> {
        let Some(row) = self.filename_row(file)? else {
            return Ok(None);
        };
        let dir = self.directory(row.dir)?.unwrap_or_default();
        Ok(Some(PathBuf::from(dir).join(row.basename)))
    }

    /// Invokes `receiver` with every file path whose basename matches
    /// `pattern`.
    pub fn find_filenames_containing(
        &self,
        pattern: &str,
        anchor_start: bool,
        anchor_end: bool,
        subsequence: bool,
        ignore_case: bool,
        mut receiver: impl FnMut(&std::path::Path) -> bool,
    ) -> KvResult<()> {
        let mut iter = self.tables.filename_by_code.iter(&self.rtxn).classify()?;
        while let Some(item) = iter.next() {
            let (_, bytes) = item.classify()?;
            let row = crate::schema::FileNameRow::decode(bytes)?;
            if matches_pattern(&row.basename, pattern, anchor_start, anchor_end, subsequence, ignore_case) {
                let dir = self.directory(row.dir)?.unwrap_or_default();
                let full = PathBuf::from(dir).join(&row.basename);
                if !receiver(&full) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Invokes `receiver(path_code, full_path)` for every interned file path
    /// whose directory is one of `parent_dirs`.
    pub fn find_file_paths_with_parent_paths(
        &self,
        parent_dirs: &[IdCode],
        mut receiver: impl FnMut(IdCode, &std::path::Path) -> bool,
    ) -> KvResult<()> {
        'dirs: for &dir in parent_dirs {
            let dir_path = self.directory(dir)?.unwrap_or_default();
            if let Some(iter) = self
                .tables
                .filepaths_by_dir
                .get_duplicates(&self.rtxn, &dir.value())
                .classify()?
            {
                for item in iter {
                    let (_, path_code) = item.classify()?;
                    let path_code = IdCode::from_value(path_code);
                    let Some(row) = self.filename_row(path_code)? else {
                        continue;
                    };
                    let full = PathBuf::from(&dir_path).join(&row.basename);
                    if !receiver(path_code, &full) {
                        break 'dirs;
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get_unit_info(&self, unit_code: IdCode) -> KvResult<Option<UnitInfo>> {
        let Some(bytes) = self
            .tables
            .unit_info_by_code
            .get(&self.rtxn, &unit_code.value())
            .classify()?
        else {
            return Ok(None);
        };
        Ok(UnitInfo::deserialize(unit_code, bytes))
    }

    pub fn get_unit_info_by_name(&self, unit_name: &str) -> KvResult<Option<UnitInfo>> {
        self.get_unit_info(IdCode::from_str(unit_name))
    }

    pub fn foreach_unit_containing_file(
        &self,
        file: IdCode,
        mut receiver: impl FnMut(&[IdCode]) -> bool,
    ) -> KvResult<()> {
        let mut codes = Vec::new();
        if let Some(iter) = self
            .tables
            .unit_by_file_dep
            .get_duplicates(&self.rtxn, &file.value())
            .classify()?
        {
            for item in iter {
                let (_, code) = item.classify()?;
                codes.push(IdCode::from_value(code));
            }
        }
        if !codes.is_empty() {
            receiver(&codes);
        }
        Ok(())
    }

    pub fn foreach_unit_containing_unit(
        &self,
        unit: IdCode,
        mut receiver: impl FnMut(&[IdCode]) -> bool,
    ) -> KvResult<()> {
        let mut codes = Vec::new();
        if let Some(iter) = self
            .tables
            .unit_by_unit_dep
            .get_duplicates(&self.rtxn, &unit.value())
            .classify()?
        {
            for item in iter {
                let (_, code) = item.classify()?;
                codes.push(IdCode::from_value(code));
            }
        }
        if !codes.is_empty() {
            receiver(&codes);
        }
        Ok(())
    }

    /// A unit is a root iff it has a main file (spec §4.3). Walks up the
    /// containment graph from `unit` with an explicit worklist, recording
    /// every visited unit that qualifies as a root and continuing past it in
    /// case the same unit is also reachable through another root further up
    /// the graph. Iterative with a visited set so a cyclic unit graph (bad
    /// compiler output) can't blow the stack.
    fn collect_root_units(
        &self,
        unit: IdCode,
        containing: &impl Fn(&Self, IdCode) -> KvResult<Vec<IdCode>>,
        visited: &mut HashSet<IdCode>,
        out: &mut Vec<UnitInfo>,
    ) -> KvResult<()> {
        let mut worklist = vec![unit];
        while let Some(current) = worklist.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(info) = self.get_unit_info(current)? {
                if info.has_main_file() {
                    out.push(info);
                }
            }
            worklist.extend(containing(self, current)?);
        }
        Ok(())
    }

    /// Walks the containment graph up from every unit that depends on `file`,
    /// invoking `receiver` once per distinct unit with `HasMainFile` set (a
    /// root, spec §4.3).
    pub fn foreach_root_unit_of_file(
        &self,
        file: IdCode,
        mut receiver: impl FnMut(&UnitInfo) -> bool,
    ) -> KvResult<()> {
        let mut units = Vec::new();
        self.foreach_unit_containing_file(file, |codes| {
            units.extend_from_slice(codes);
            true
        })?;
        let mut visited = HashSet::new();
        let mut roots = Vec::new();
        for unit in units {
            self.collect_root_units(
                unit,
                &|txn, u| {
                    let mut parents = Vec::new();
                    txn.foreach_unit_containing_unit(u, |codes| {
                        parents.extend_from_slice(codes);
                        true
                    })?;
                    Ok(parents)
                },
                &mut visited,
                &mut roots,
            )?;
        }
        for root in roots {
            if !receiver(&root) {
                break;
            }
        }
        Ok(())
    }

    pub fn foreach_root_unit_of_unit(
        &self,
        unit: IdCode,
        mut receiver: impl FnMut(&UnitInfo) -> bool,
    ) -> KvResult<()> {
        let mut visited = HashSet::new();
        let mut roots = Vec::new();
        self.collect_root_units(
            unit,
            &|txn, u| {
                let mut parents = Vec::new();
                txn.foreach_unit_containing_unit(u, |codes| {
                    parents.extend_from_slice(codes);
                    true
                })?;
                Ok(parents)
            },
            &mut visited,
            &mut roots,
        )?;
        for root in roots {
            if !receiver(&root) {
                break;
            }
        }
        Ok(())
    }

    /// Per-sub-database entry counts (spec §6, `printStats`).
    pub fn print_stats(&self) -> KvResult<Vec<crate::schema::stats::TableStats>> {
        crate::schema::stats::print_stats(self.tables, &self.rtxn)
    }

    /// Every raw file association a provider recorded (spec §6,
    /// `dumpProviderFileAssociations`).
    pub fn dump_provider_file_associations(
        &self,
        provider: IdCode,
    ) -> KvResult<Vec<TimestampedFileForProvider>> {
        crate::schema::stats::dump_provider_file_associations(self.tables, &self.rtxn, provider)
    }
}
