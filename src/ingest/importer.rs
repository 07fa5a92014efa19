//! Unit Importer (spec §4.5): the diff-based upsert state machine that turns
//! one compiler-produced unit record into the set of KV mutations needed to
//! bring the store up to date, touching only what changed since the
//! previously-stored `UnitInfo`.
//!
//! Grounded on `UnitDataImport` in
//! `examples/original_source/lib/Database/ImportTransaction.cpp`: a unit
//! whose mod-time matches the stored one is declared up to date without
//! reading anything else; otherwise the previous dependency sets are loaded
//! once, new dependencies are added immediately, and whatever remains
//! unclaimed in the previous sets at `commit` time is removed.

use std::collections::HashSet;

use crate::kv::codes::IdCode;
use crate::kv::error::KvResult;
use crate::schema::unit_info::{ProviderDep, ProviderKind, UnitFlags, UnitInfo};
use crate::txns::import::ImportTransaction;

/// Drives one unit's import against an open [`ImportTransaction`].
pub struct UnitImporter<'a, 'env> {
    import: &'a mut ImportTransaction<'env>,
    unit_name: String,
    unit_code: IdCode,
    mod_time_nanos: i64,

    is_missing: bool,
    is_up_to_date: bool,

    prev_main_file: IdCode,
    prev_out_file: IdCode,
    prev_sysroot: IdCode,
    prev_target: IdCode,
    prev_file_depends: HashSet<IdCode>,
    prev_unit_depends: HashSet<IdCode>,
    prev_provider_depends: HashSet<ProviderDep>,

    main_file: Option<String>,
    out_file: Option<String>,
    sysroot: Option<String>,
    target: Option<String>,
    is_system: bool,
    provider_kind: ProviderKind,

    file_depends: Vec<IdCode>,
    unit_depends: Vec<IdCode>,
    provider_depends: Vec<ProviderDep>,
}

impl<'a, 'env> UnitImporter<'a, 'env> {
    pub fn begin(import: &'a mut ImportTransaction<'env>, unit_name: &str, mod_time_nanos: i64) -> KvResult<Self> {
        let unit_code = IdCode::from_str(unit_name);
        let existing = import.get_unit_info(unit_code)?;

        let mut importer = UnitImporter {
            import,
            unit_name: unit_name.to_string(),
            unit_code,
            mod_time_nanos,
            is_missing: existing.is_none(),
            is_up_to_date: false,
            prev_main_file: IdCode::ZERO,
            prev_out_file: IdCode::ZERO,
            prev_sysroot: IdCode::ZERO,
            prev_target: IdCode::ZERO,
            prev_file_depends: HashSet::new(),
            prev_unit_depends: HashSet::new(),
            prev_provider_depends: HashSet::new(),
            main_file: None,
            out_file: None,
            sysroot: None,
            target: None,
            is_system: false,
            provider_kind: ProviderKind::Other,
            file_depends: Vec::new(),
            unit_depends: Vec::new(),
            provider_depends: Vec::new(),
        };

        if let Some(info) = existing {
            importer.is_system = info.flags.contains(UnitFlags::IS_SYSTEM);
            importer.provider_kind = info.provider_kind;
            importer.prev_main_file = info.main_file;
            importer.prev_out_file = info.out_file;
            importer.prev_sysroot = info.sysroot;
            importer.prev_target = info.target;

            if info.modtime_nanos == mod_time_nanos {
                importer.is_up_to_date = true;
                return Ok(importer);
            }

            importer.prev_file_depends = info.all_file_depends().collect();
            importer.prev_unit_depends = info.unit_depends.iter().copied().collect();
            importer.prev_provider_depends = info.provider_depends.iter().copied().collect();
        }

        Ok(importer)
    }

    pub fn unit_code(&self) -> IdCode {
        self.unit_code
    }

    pub fn is_missing(&self) -> bool {
        self.is_missing
    }

    pub fn is_up_to_date(&self) -> bool {
        self.is_up_to_date
    }

    pub fn prev_main_file_code(&self) -> IdCode {
        self.prev_main_file
    }

    pub fn prev_out_file_code(&self) -> IdCode {
        self.prev_out_file
    }

    pub fn set_main_file(&mut self, path: &str) {
        self.main_file = Some(path.to_string());
    }

    pub fn set_out_file(&mut self, path: &str) {
        self.out_file = Some(path.to_string());
    }

    pub fn set_sysroot(&mut self, path: &str) {
        self.sysroot = Some(path.to_string());
    }

    pub fn set_is_system_unit(&mut self, is_system: bool) {
        self.is_system = is_system;
    }

    pub fn set_provider_kind(&mut self, kind: ProviderKind) {
        self.provider_kind = kind;
    }

    pub fn set_target(&mut self, target: &str) {
        self.target = Some(target.to_string());
    }

    /// Adds a non-record file dependency, writing the new edge immediately
    /// if it wasn't already present.
    pub fn add_file_dependency(&mut self, file_path: &str) -> KvResult<IdCode> {
        let code = IdCode::from_str(file_path);
        self.file_depends.push(code);
        if !self.prev_file_depends.remove(&code) {
            self.import.add_unit_file_dependency(self.unit_code, file_path)?;
        }
        Ok(code)
    }

    pub fn add_unit_dependency(&mut self, unit_name_dep: &str) -> KvResult<IdCode> {
        let code = self.import.get_unit_code(unit_name_dep);
        self.unit_depends.push(code);
        if !self.prev_unit_depends.remove(&code) {
            self.import.add_unit_unit_dependency(self.unit_code, unit_name_dep)?;
        }
        Ok(code)
    }

    /// Adds a record (provider) dependency: re-associates the provider's
    /// file timestamp unconditionally (so the mod-time is always current),
    /// but only calls `add_provider_name` when the dependency is new.
    #[allow(clippy::too_many_arguments)]
    pub fn add_provider_dependency(
        &mut self,
        provider_name: &str,
        file_path_dep: &str,
        module_name: &str,
        is_system: bool,
    ) -> KvResult<(IdCode, bool)> {
        let provider_code = IdCode::from_str(provider_name);
        let path_code = IdCode::from_str(file_path_dep);
        let module_code = self.import.add_module_name(module_name)?;
        let dep = ProviderDep {
            provider: provider_code,
            file: path_code,
        };
        self.provider_depends.push(dep);

        let is_new_provider = if !self.prev_provider_depends.remove(&dep) {
            let (code2, inserted) = self.import.add_provider_name(provider_name)?;
            debug_assert_eq!(code2, provider_code);
            inserted
        } else {
            false
        };

        self.import.add_file_association_for_provider(
            provider_code,
            path_code,
            self.unit_code,
            self.mod_time_nanos,
            module_code,
            is_system,
        )?;

        if !self.prev_file_depends.remove(&path_code) {
            self.import.add_unit_file_dependency(self.unit_code, file_path_dep)?;
        }

        Ok((provider_code, is_new_provider))
    }

    /// Writes the accumulated `UnitInfo` and removes every previous
    /// dependency edge that wasn't re-claimed by an `add_*_dependency` call
    /// above (spec §4.5, "only touch what changed").
    pub fn commit(mut self) -> KvResult<()> {
        debug_assert!(!self.is_up_to_date, "commit() is only for units that need updating");

        let main_file = self.main_file.take();
        let has_main_file = main_file.is_some();
        let main_file_code = if let Some(path) = &main_file {
            let code = IdCode::from_str(path);
            if code != self.prev_main_file {
                self.import.add_file_path(path)?;
            }
            code
        } else {
            IdCode::ZERO
        };

        let out_file_code = if let Some(path) = &self.out_file {
            let code = IdCode::from_str(path);
            if code != self.prev_out_file {
                self.import.add_unit_file_identifier(path)?;
            }
            code
        } else {
            IdCode::ZERO
        };

        let has_sysroot = self.sysroot.is_some();
        let sysroot_code = if let Some(path) = &self.sysroot {
            let code = IdCode::from_str(path);
            if code != self.prev_sysroot {
                self.import.add_directory(path)?;
            }
            code
        } else {
            IdCode::ZERO
        };

        let target_code = if let Some(target) = &self.target {
            let code = IdCode::from_str(target);
            if code != self.prev_target {
                self.import.add_target_name(target)?;
            }
            code
        } else {
            IdCode::ZERO
        };

        let mut has_test_symbols = false;
        for dep in &self.provider_depends {
            if self.import.provider_contains_test_symbols(dep.provider)? {
                has_test_symbols = true;
                break;
            }
        }

        let mut flags = UnitFlags::empty();
        if has_main_file {
            flags |= UnitFlags::HAS_MAIN_FILE;
        }
        if has_sysroot {
            flags |= UnitFlags::HAS_SYSROOT;
        }
        if self.is_system {
            flags |= UnitFlags::IS_SYSTEM;
        }
        if has_test_symbols {
            flags |= UnitFlags::HAS_TEST_SYMBOLS;
        }

        let info = UnitInfo {
            unit_code: self.unit_code,
            unit_name: self.unit_name.clone(),
            main_file: main_file_code,
            out_file: out_file_code,
            sysroot: sysroot_code,
            target: target_code,
            modtime_nanos: self.mod_time_nanos,
            flags,
            provider_kind: self.provider_kind,
            file_depends: self.file_depends.clone(),
            unit_depends: self.unit_depends.clone(),
            provider_depends: self.provider_depends.clone(),
        };
        self.import.add_unit_info(&info)?;

        for code in &self.prev_file_depends {
            self.import.remove_unit_file_dependency(self.unit_code, *code)?;
        }
        for code in &self.prev_unit_depends {
            self.import.remove_unit_unit_dependency(self.unit_code, *code)?;
        }
        for dep in &self.prev_provider_depends {
            self.import
                .remove_file_association_from_provider(dep.provider, dep.file, self.unit_code)?;
        }

        Ok(())
    }
}
