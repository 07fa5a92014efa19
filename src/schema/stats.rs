//! Diagnostics (spec §6, `printStats` / `dumpProviderFileAssociations`):
//! per-sub-database entry counts and a provider's raw file associations,
//! grounded on `DatabaseImpl::printStats` in
//! `examples/original_source/lib/Database/DatabaseImpl.h`. Read-only and
//! cheap: `heed::Database::len` reads the B-tree's own entry count rather
//! than scanning.

use heed::RoTxn;

use crate::kv::codes::IdCode;
use crate::kv::error::KvResult;
use crate::kv::txn::ResultExt;
use crate::schema::{self, Tables, TimestampedFileForProvider};

#[derive(Debug, Clone, Copy)]
pub struct TableStats {
    pub name: &'static str,
    pub entries: u64,
}

/// One row per sub-database, in the same order as spec §4.2's table list.
pub fn print_stats(tables: &Tables, rtxn: &RoTxn) -> KvResult<Vec<TableStats>> {
    macro_rules! stat {
        ($name:expr, $db:expr) => {
            TableStats {
                name: $name,
                entries: $db.len(rtxn).classify()?,
            }
        };
    }
    Ok(vec![
        stat!(schema::PROVIDERS_BY_USR, tables.providers_by_usr),
        stat!(schema::PROVIDER_NAME_BY_CODE, tables.provider_name_by_code),
        stat!(
            schema::PROVIDERS_WITH_TEST_SYMBOLS,
            tables.providers_with_test_symbols
        ),
        stat!(schema::USRS_BY_SYMBOL_NAME, tables.usrs_by_symbol_name),
        stat!(schema::USRS_BY_GLOBAL_KIND, tables.usrs_by_global_kind),
        stat!(schema::DIR_NAME_BY_CODE, tables.dir_name_by_code),
        stat!(schema::FILENAME_BY_CODE, tables.filename_by_code),
        stat!(schema::FILEPATHS_BY_DIR, tables.filepaths_by_dir),
        stat!(schema::PROVIDER_FILES, tables.provider_files),
        stat!(schema::UNIT_INFO_BY_CODE, tables.unit_info_by_code),
        stat!(schema::UNIT_BY_FILE_DEP, tables.unit_by_file_dep),
        stat!(schema::UNIT_BY_UNIT_DEP, tables.unit_by_unit_dep),
        stat!(schema::TARGET_NAME_BY_CODE, tables.target_name_by_code),
        stat!(schema::MODULE_NAME_BY_CODE, tables.module_name_by_code),
    ])
}

/// Every raw `(file, unit, module, modtime, is_system)` row timestamped
/// against `provider`, for manual inspection (spec §6).
pub fn dump_provider_file_associations(
    tables: &Tables,
    rtxn: &RoTxn,
    provider: IdCode,
) -> KvResult<Vec<TimestampedFileForProvider>> {
    let mut out = Vec::new();
    if let Some(iter) = tables
        .provider_files
        .get_duplicates(rtxn, &provider.value())
        .classify()?
    {
        for item in iter {
            let (_, bytes) = item.classify()?;
            out.push(TimestampedFileForProvider::decode(bytes)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::env::Environment;
    use crate::schema::roles::SymbolKind;
    use crate::schema::roles::SymbolRole;
    use crate::txns::import::ImportTransaction;

    #[test]
    fn print_stats_counts_inserted_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::open(tmp.path(), false, None).unwrap();
        let mut wtxn = env.raw().write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        wtxn.commit().unwrap();

        let mut import = ImportTransaction::begin(&env, &tables).unwrap();
        let (provider, _) = import.add_provider_name("p1").unwrap();
        import
            .add_symbol_info(
                provider,
                "c:@F@foo",
                "foo",
                SymbolKind::Function,
                false,
                SymbolRole::DEFINITION,
                SymbolRole::empty(),
            )
            .unwrap();
        import
            .add_file_association_for_provider(provider, IdCode::from_str("/a.c"), IdCode::from_str("u1"), 1000, IdCode::ZERO, false)
            .unwrap();
        import.commit().unwrap();

        let rtxn = env.raw().read_txn().unwrap();
        let stats = print_stats(&tables, &rtxn).unwrap();
        let provider_files = stats
            .iter()
            .find(|s| s.name == schema::PROVIDER_FILES)
            .unwrap();
        assert_eq!(provider_files.entries, 1);
        let by_usr = stats.iter().find(|s| s.name == schema::PROVIDERS_BY_USR).unwrap();
        assert_eq!(by_usr.entries, 1);
    }

    #[test]
    fn dump_provider_file_associations_returns_every_row() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::open(tmp.path(), false, None).unwrap();
        let mut wtxn = env.raw().write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        wtxn.commit().unwrap();

        let mut import = ImportTransaction::begin(&env, &tables).unwrap();
        let (provider, _) = import.add_provider_name("p1").unwrap();
        import
            .add_file_association_for_provider(provider, IdCode::from_str("/a.c"), IdCode::from_str("u1"), 1000, IdCode::ZERO, false)
            .unwrap();
        import
            .add_file_association_for_provider(provider, IdCode::from_str("/b.c"), IdCode::from_str("u1"), 2000, IdCode::ZERO, false)
            .unwrap();
        import.commit().unwrap();

        let rtxn = env.raw().read_txn().unwrap();
        let rows = dump_provider_file_associations(&tables, &rtxn, provider).unwrap();
        assert_eq!(rows.len(), 2);
    }
}
