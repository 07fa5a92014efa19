//! Import Transaction (spec §4.4): the single-writer mutation surface.
//! Grounded method-for-method on
//! `examples/original_source/lib/Database/ImportTransaction.cpp`; every
//! upsert uses "insert, else compare-and-update the auxiliary fields" rather
//! than a blind overwrite, which is what that original gets from a custom
//! LMDB dup-sort comparator. `heed`'s safe API doesn't expose custom
//! comparators, so the identity fields are encoded as a byte prefix of the
//! dup value and the "does an identity-matching duplicate already exist"
//! check is done by scanning the (usually single-digit) duplicate list
//! in-transaction instead.

use heed::RwTxn;

use crate::kv::codes::IdCode;
use crate::kv::env::{truncate_key, Environment};
use crate::kv::error::KvResult;
use crate::kv::txn::ResultExt;
use crate::schema::roles::{global_symbol_kind, GlobalSymbolKind, SymbolKind, SymbolRole};
use crate::schema::unit_info::UnitInfo;
use crate::schema::{ProviderForUsr, Tables, TimestampedFileForProvider};

pub struct ImportTransaction<'env> {
    tables: &'env Tables,
    wtxn: RwTxn<'env>,
}

impl<'env> ImportTransaction<'env> {
    pub fn begin(env: &'env Environment, tables: &'env Tables) -> KvResult<Self> {
        let wtxn = env.raw().write_txn().classify()?;
        Ok(Self { tables, wtxn })
    }

    pub fn get_unit_code(&self, unit_name: &str) -> IdCode {
        IdCode::from_str(unit_name)
    }

    /// Interns `name` as a provider, returning its code and whether this is
    /// the first time it has been seen.
    pub fn add_provider_name(&mut self, name: &str) -> KvResult<(IdCode, bool)> {
        let code = IdCode::from_str(name);
        if self
            .tables
            .provider_name_by_code
            .get(&self.wtxn, &code.value())
            .classify()?
            .is_some()
        {
            return Ok((code, false));
        }
        self.tables
            .provider_name_by_code
            .put(&mut self.wtxn, &code.value(), name)
            .classify()?;
        Ok((code, true))
    }

    pub fn set_provider_contains_test_symbols(&mut self, provider: IdCode) -> KvResult<()> {
        self.tables
            .providers_with_test_symbols
            .put(&mut self.wtxn, &provider.value(), &[])
            .classify()?;
        Ok(())
    }

    pub fn provider_contains_test_symbols(&self, provider: IdCode) -> KvResult<bool> {
        Ok(self
            .tables
            .providers_with_test_symbols
            .get(&self.wtxn, &provider.value())
            .classify()?
            .is_some())
    }

    /// Records that `provider` declared `usr` with the given role set,
    /// merging into any existing entry rather than duplicating it, and
    /// updates the name/kind search buckets for occurrences that are
    /// declarations or definitions (spec §4.4).
    #[allow(clippy::too_many_arguments)]
    pub fn add_symbol_info(
        &mut self,
        provider: IdCode,
        usr: &str,
        symbol_name: &str,
        symbol_kind: SymbolKind,
        is_unit_test: bool,
        roles: SymbolRole,
        related_roles: SymbolRole,
    ) -> KvResult<IdCode> {
        let usr_code = IdCode::from_str(usr);
        let new_entry = ProviderForUsr {
            provider,
            roles: roles.bits(),
            related_roles: related_roles.bits(),
        };

        let mut existing = None;
        if let Some(iter) = self
            .tables
            .providers_by_usr
            .get_duplicates(&self.wtxn, &usr_code.value())
            .classify()?
        {
            for item in iter {
                let (_, bytes) = item.classify()?;
                let row = ProviderForUsr::decode(bytes)?;
                if row.same_identity(provider) {
                    existing = Some((bytes.to_vec(), row));
                    break;
                }
            }
        }

        match existing {
            None => {
                self.tables
                    .providers_by_usr
                    .put(&mut self.wtxn, &usr_code.value(), &new_entry.encode())
                    .classify()?;
            }
            Some((old_bytes, row)) if row.roles != new_entry.roles || row.related_roles != new_entry.related_roles => {
                crate::kv::txn::replace_duplicate(
                    &mut self.wtxn,
                    self.tables.providers_by_usr,
                    usr_code,
                    &old_bytes,
                    &new_entry.encode(),
                )?;
            }
            Some(_) => {}
        }

        if roles.contains(SymbolRole::DECLARATION) || roles.contains(SymbolRole::DEFINITION) {
            if !symbol_name.is_empty() {
                let key = truncate_key(symbol_name);
                let already = self
                    .tables
                    .usrs_by_symbol_name
                    .get_duplicates(&self.wtxn, key)
                    .classify()?
                    .map(|mut it| it.any(|item| matches!(item, Ok((_, c)) if c == usr_code.value())))
                    .unwrap_or(false);
                if !already {
                    self.tables
                        .usrs_by_symbol_name
                        .put(&mut self.wtxn, key, &usr_code.value())
                        .classify()?;
                }
            }

            if let Some(kind) = global_symbol_kind(symbol_kind) {
                self.put_global_kind_usr(kind, usr_code)?;
            }
            if is_unit_test && roles.contains(SymbolRole::DEFINITION) {
                let test_kind = if symbol_kind.is_class_like() || symbol_kind.is_extension_like() {
                    Some(GlobalSymbolKind::TestClassOrExtension)
                } else if symbol_kind.is_instance_method() {
                    Some(GlobalSymbolKind::TestMethod)
                } else {
                    None
                };
                if let Some(kind) = test_kind {
                    self.put_global_kind_usr(kind, usr_code)?;
                }
            }
        }

        Ok(usr_code)
    }

    fn put_global_kind_usr(&mut self, kind: GlobalSymbolKind, usr_code: IdCode) -> KvResult<()> {
        let key = kind as u32 as u64;
        let already = self
            .tables
            .usrs_by_global_kind
            .get_duplicates(&self.wtxn, &key)
            .classify()?
            .map(|mut it| it.any(|item| matches!(item, Ok((_, c)) if c == usr_code.value())))
            .unwrap_or(false);
        if !already {
            self.tables
                .usrs_by_global_kind
                .put(&mut self.wtxn, &key, &usr_code.value())
                .classify()?;
        }
        Ok(())
    }

    /// Interns a canonicalized file path, splitting it into directory and
    /// basename and recording both (spec §4.2 tables 6-8). Returns the file's
    /// own code.
    pub fn add_file_path(&mut self, canonical_path: &str) -> KvResult<IdCode> {
        let file_code = IdCode::from_str(canonical_path);
        let parent = std::path::Path::new(canonical_path)
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("");

        let dir_code = if !parent.is_empty() {
            let dir_code = IdCode::from_str(parent);
            if self
                .tables
                .dir_name_by_code
                .get(&self.wtxn, &dir_code.value())
                .classify()?
                .is_none()
            {
                self.tables
                    .dir_name_by_code
                    .put(&mut self.wtxn, &dir_code.value(), parent)
                    .classify()?;
            }
            dir_code
        } else {
            IdCode::ZERO
        };

        let basename = std::path::Path::new(canonical_path)
            .file_name()
            .and_then(|p| p.to_str())
            .unwrap_or(canonical_path)
            .to_string();

        if self
            .tables
            .filename_by_code
            .get(&self.wtxn, &file_code.value())
            .classify()?
            .is_none()
        {
            let row = crate::schema::FileNameRow {
                dir: dir_code,
                basename,
            };
            self.tables
                .filename_by_code
                .put(&mut self.wtxn, &file_code.value(), &row.encode())
                .classify()?;
        }

        if !parent.is_empty() {
            let already = self
                .tables
                .filepaths_by_dir
                .get_duplicates(&self.wtxn, &dir_code.value())
                .classify()?
                .map(|mut it| it.any(|item| matches!(item, Ok((_, c)) if c == file_code.value())))
                .unwrap_or(false);
            if !already {
                self.tables
                    .filepaths_by_dir
                    .put(&mut self.wtxn, &dir_code.value(), &file_code.value())
                    .classify()?;
            }
        }

        Ok(file_code)
    }

    pub fn add_unit_file_identifier(&mut self, unit_file: &str) -> KvResult<IdCode> {
        self.add_file_path(unit_file)
    }

    pub fn add_directory(&mut self, directory: &str) -> KvResult<IdCode> {
        let dir_code = IdCode::from_str(directory);
        if self
            .tables
            .dir_name_by_code
            .get(&self.wtxn, &dir_code.value())
            .classify()?
            .is_none()
        {
            self.tables
                .dir_name_by_code
                .put(&mut self.wtxn, &dir_code.value(), directory)
                .classify()?;
        }
        Ok(dir_code)
    }

    pub fn add_target_name(&mut self, target: &str) -> KvResult<IdCode> {
        let code = IdCode::from_str(target);
        if self
            .tables
            .target_name_by_code
            .get(&self.wtxn, &code.value())
            .classify()?
            .is_none()
        {
            self.tables
                .target_name_by_code
                .put(&mut self.wtxn, &code.value(), target)
                .classify()?;
        }
        Ok(code)
    }

    pub fn add_module_name(&mut self, module: &str) -> KvResult<IdCode> {
        let code = IdCode::from_str(module);
        if self
            .tables
            .module_name_by_code
            .get(&self.wtxn, &code.value())
            .classify()?
            .is_none()
        {
            self.tables
                .module_name_by_code
                .put(&mut self.wtxn, &code.value(), module)
                .classify()?;
        }
        Ok(code)
    }

    /// Records (or refreshes the timestamp of) the association between a
    /// provider and the file/unit it was produced from.
    pub fn add_file_association_for_provider(
        &mut self,
        provider: IdCode,
        file: IdCode,
        unit: IdCode,
        mod_time_nanos: i64,
        module: IdCode,
        is_system: bool,
    ) -> KvResult<()> {
        let new_entry = TimestampedFileForProvider {
            file,
            unit,
            module,
            nano_time: mod_time_nanos,
            is_system,
        };

        let mut existing = None;
        if let Some(iter) = self
            .tables
            .provider_files
            .get_duplicates(&self.wtxn, &provider.value())
            .classify()?
        {
            for item in iter {
                let (_, bytes) = item.classify()?;
                let row = TimestampedFileForProvider::decode(bytes)?;
                if row.file == file && row.unit == unit {
                    existing = Some((bytes.to_vec(), row));
                    break;
                }
            }
        }

        match existing {
            None => {
                self.tables
                    .provider_files
                    .put(&mut self.wtxn, &provider.value(), &new_entry.encode())
                    .classify()?;
            }
            Some((old_bytes, row)) if mod_time_nanos > row.nano_time => {
                crate::kv::txn::replace_duplicate(
                    &mut self.wtxn,
                    self.tables.provider_files,
                    provider,
                    &old_bytes,
                    &new_entry.encode(),
                )?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Removes the `(file, unit)` association from `provider`. Returns
    /// `true` if the provider has no remaining file associations afterward
    /// (a caller signal to garbage-collect the provider's USR entries).
    pub fn remove_file_association_from_provider(
        &mut self,
        provider: IdCode,
        file: IdCode,
        unit: IdCode,
    ) -> KvResult<bool> {
        let mut to_delete = None;
        let mut remaining = 0usize;
        if let Some(iter) = self
            .tables
            .provider_files
            .get_duplicates(&self.wtxn, &provider.value())
            .classify()?
        {
            for item in iter {
                let (_, bytes) = item.classify()?;
                let row = TimestampedFileForProvider::decode(bytes)?;
                if row.file == file && row.unit == unit && to_delete.is_none() {
                    to_delete = Some(bytes.to_vec());
                } else {
                    remaining += 1;
                }
            }
        }
        if let Some(bytes) = to_delete {
            self.tables
                .provider_files
                .delete_one_duplicate(&mut self.wtxn, &provider.value(), &bytes)
                .classify()?;
        }
        Ok(remaining == 0)
    }

    pub fn get_unit_info(&self, unit_code: IdCode) -> KvResult<Option<UnitInfo>> {
        let Some(bytes) = self
            .tables
            .unit_info_by_code
            .get(&self.wtxn, &unit_code.value())
            .classify()?
        else {
            return Ok(None);
        };
        Ok(UnitInfo::deserialize(unit_code, bytes))
    }

    pub fn add_unit_info(&mut self, info: &UnitInfo) -> KvResult<()> {
        let bytes = info.serialize();
        self.tables
            .unit_info_by_code
            .put(&mut self.wtxn, &info.unit_code.value(), &bytes)
            .classify()?;
        Ok(())
    }

    /// Interns `file_path_dep` and records it as a file dependency of
    /// `unit_code`, returning the file's code.
    pub fn add_unit_file_dependency(&mut self, unit_code: IdCode, file_path_dep: &str) -> KvResult<IdCode> {
        let file_code = self.add_file_path(file_path_dep)?;
        let already = self
            .tables
            .unit_by_file_dep
            .get_duplicates(&self.wtxn, &file_code.value())
            .classify()?
            .map(|mut it| it.any(|item| matches!(item, Ok((_, c)) if c == unit_code.value())))
            .unwrap_or(false);
        if !already {
            self.tables
                .unit_by_file_dep
                .put(&mut self.wtxn, &file_code.value(), &unit_code.value())
                .classify()?;
        }
        Ok(file_code)
    }

    pub fn add_unit_unit_dependency(&mut self, unit_code: IdCode, unit_name_dep: &str) -> KvResult<IdCode> {
        let dep_code = IdCode::from_str(unit_name_dep);
        let already = self
            .tables
            .unit_by_unit_dep
            .get_duplicates(&self.wtxn, &dep_code.value())
            .classify()?
            .map(|mut it| it.any(|item| matches!(item, Ok((_, c)) if c == unit_code.value())))
            .unwrap_or(false);
        if !already {
            self.tables
                .unit_by_unit_dep
                .put(&mut self.wtxn, &dep_code.value(), &unit_code.value())
                .classify()?;
        }
        Ok(dep_code)
    }

    pub fn remove_unit_file_dependency(&mut self, unit_code: IdCode, path_code: IdCode) -> KvResult<()> {
        self.tables
            .unit_by_file_dep
            .delete_one_duplicate(&mut self.wtxn, &path_code.value(), &unit_code.value())
            .classify()?;
        Ok(())
    }

    pub fn remove_unit_unit_dependency(&mut self, unit_code: IdCode, unit_dep_code: IdCode) -> KvResult<()> {
        self.tables
            .unit_by_unit_dep
            .delete_one_duplicate(&mut self.wtxn, &unit_dep_code.value(), &unit_code.value())
            .classify()?;
        Ok(())
    }

    /// Removes a unit's info row and every reverse-dependency edge it owns,
    /// including unwinding its providers' file associations (spec §4.4,
    /// invariant 4).
    pub fn remove_unit_data(&mut self, unit_code: IdCode) -> KvResult<()> {
        let Some(info) = self.get_unit_info(unit_code)? else {
            return Ok(());
        };

        self.tables
            .unit_info_by_code
            .delete(&mut self.wtxn, &unit_code.value())
            .classify()?;

        for file in &info.file_depends {
            self.remove_unit_file_dependency(unit_code, *file)?;
        }
        for dep in &info.unit_depends {
            self.remove_unit_unit_dependency(unit_code, *dep)?;
        }
        for prov in &info.provider_depends {
            self.remove_unit_file_dependency(unit_code, prov.file)?;
            self.remove_file_association_from_provider(prov.provider, prov.file, unit_code)?;
        }
        Ok(())
    }

    pub fn remove_unit_data_by_name(&mut self, unit_name: &str) -> KvResult<()> {
        self.remove_unit_data(IdCode::from_str(unit_name))
    }

    pub fn commit(self) -> KvResult<()> {
        self.wtxn.commit().classify()?;
        Ok(())
    }
}
