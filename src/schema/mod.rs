//! Schema & Codes: the 13 sub-databases and their key/value binary layouts
//! (spec §4.2). Each DBI is opened once, at environment-open time, and handed
//! around as a cheap-to-clone `heed::Database` handle.

pub mod roles;
pub mod stats;
pub mod unit_info;

use heed::types::{Bytes, Str, U64};
use heed::{DatabaseFlags, Env};

use crate::kv::codes::IdCode;
use crate::kv::error::{KvError, KvResult};

pub type CodeKey = U64<heed::byteorder::BE>;

pub const PROVIDERS_BY_USR: &str = "providers-by-usr";
pub const PROVIDER_NAME_BY_CODE: &str = "provider-name-by-code";
pub const PROVIDERS_WITH_TEST_SYMBOLS: &str = "providers-with-test-symbols";
pub const USRS_BY_SYMBOL_NAME: &str = "usrs-by-symbol-name";
pub const USRS_BY_GLOBAL_KIND: &str = "usrs-by-global-kind";
pub const DIR_NAME_BY_CODE: &str = "dir-name-by-code";
pub const FILENAME_BY_CODE: &str = "filename-by-code";
pub const FILEPATHS_BY_DIR: &str = "filepaths-by-dir";
pub const PROVIDER_FILES: &str = "provider-files";
pub const UNIT_INFO_BY_CODE: &str = "unit-info-by-code";
pub const UNIT_BY_FILE_DEP: &str = "unit-by-file-dep";
pub const UNIT_BY_UNIT_DEP: &str = "unit-by-unit-dep";
pub const TARGET_NAME_BY_CODE: &str = "target-name-by-code";
pub const MODULE_NAME_BY_CODE: &str = "module-name-by-code";

/// Handles to all 13 sub-databases, opened once per [`crate::kv::env::Environment`].
#[derive(Clone)]
pub struct Tables {
    pub providers_by_usr: heed::Database<CodeKey, Bytes>,
    pub provider_name_by_code: heed::Database<CodeKey, Str>,
    pub providers_with_test_symbols: heed::Database<CodeKey, Bytes>,
    pub usrs_by_symbol_name: heed::Database<Str, CodeKey>,
    pub usrs_by_global_kind: heed::Database<U64<heed::byteorder::BE>, CodeKey>,
    pub dir_name_by_code: heed::Database<CodeKey, Str>,
    pub filename_by_code: heed::Database<CodeKey, Bytes>,
    pub filepaths_by_dir: heed::Database<CodeKey, CodeKey>,
    pub provider_files: heed::Database<CodeKey, Bytes>,
    pub unit_info_by_code: heed::Database<CodeKey, Bytes>,
    pub unit_by_file_dep: heed::Database<CodeKey, CodeKey>,
    pub unit_by_unit_dep: heed::Database<CodeKey, CodeKey>,
    pub target_name_by_code: heed::Database<CodeKey, Str>,
    pub module_name_by_code: heed::Database<CodeKey, Str>,
}

impl Tables {
    /// Opens (creating if absent) every sub-database. Must run inside a write
    /// transaction the first time a store is opened.
    pub fn open(env: &Env, wtxn: &mut heed::RwTxn) -> KvResult<Self> {
        let dup = |name: &str, wtxn: &mut heed::RwTxn| {
            env.database_options()
                .types::<CodeKey, Bytes>()
                .flags(DatabaseFlags::DUP_SORT)
                .name(name)
                .create(wtxn)
        };

        Ok(Self {
            providers_by_usr: dup(PROVIDERS_BY_USR, wtxn)?,
            provider_name_by_code: env.create_database(wtxn, Some(PROVIDER_NAME_BY_CODE))?,
            providers_with_test_symbols: env
                .create_database(wtxn, Some(PROVIDERS_WITH_TEST_SYMBOLS))?,
            usrs_by_symbol_name: env
                .database_options()
                .types::<Str, CodeKey>()
                .flags(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED)
                .name(USRS_BY_SYMBOL_NAME)
                .create(wtxn)?,
            usrs_by_global_kind: env
                .database_options()
                .types::<U64<heed::byteorder::BE>, CodeKey>()
                .flags(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED)
                .name(USRS_BY_GLOBAL_KIND)
                .create(wtxn)?,
            dir_name_by_code: env.create_database(wtxn, Some(DIR_NAME_BY_CODE))?,
            filename_by_code: env.create_database(wtxn, Some(FILENAME_BY_CODE))?,
            filepaths_by_dir: env
                .database_options()
                .types::<CodeKey, CodeKey>()
                .flags(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED)
                .name(FILEPATHS_BY_DIR)
                .create(wtxn)?,
            provider_files: dup(PROVIDER_FILES, wtxn)?,
            unit_info_by_code: env.create_database(wtxn, Some(UNIT_INFO_BY_CODE))?,
            unit_by_file_dep: env
                .database_options()
                .types::<CodeKey, CodeKey>()
                .flags(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED)
                .name(UNIT_BY_FILE_DEP)
                .create(wtxn)?,
            unit_by_unit_dep: env
                .database_options()
                .types::<CodeKey, CodeKey>()
                .flags(DatabaseFlags::DUP_SORT | DatabaseFlags::DUP_FIXED)
                .name(UNIT_BY_UNIT_DEP)
                .create(wtxn)?,
            target_name_by_code: env.create_database(wtxn, Some(TARGET_NAME_BY_CODE))?,
            module_name_by_code: env.create_database(wtxn, Some(MODULE_NAME_BY_CODE))?,
        })
    }
}

/// `providers-by-usr` duplicate value: `{ProviderCode, Roles, RelatedRoles}`.
/// Dup-sort key is the leading 8 bytes (`ProviderCode`), matching invariant 2
/// in spec §3 ("a provider appears at most once ... per USR").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderForUsr {
    pub provider: IdCode,
    pub roles: u64,
    pub related_roles: u64,
}

impl ProviderForUsr {
    pub const LEN: usize = 24;

    pub fn encode(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..8].copy_from_slice(&self.provider.to_be_bytes());
        out[8..16].copy_from_slice(&self.roles.to_le_bytes());
        out[16..24].copy_from_slice(&self.related_roles.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(KvError::Codec {
                table: PROVIDERS_BY_USR,
                reason: format!("expected {} bytes, got {}", Self::LEN, bytes.len()),
            });
        }
        Ok(ProviderForUsr {
            provider: IdCode::from_be_bytes(bytes[0..8].try_into().unwrap()),
            roles: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            related_roles: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
        })
    }

    /// Returns `true` if `other` carries the same identity (provider) but
    /// different auxiliary fields (roles) -- the in-place-update case from
    /// spec §4.4 ("compare-and-update ... iff changed").
    pub fn same_identity(&self, provider: IdCode) -> bool {
        self.provider == provider
    }
}

/// `provider-files` duplicate value: `{FileCode, UnitCode, ModuleNameCode,
/// NanoTime, IsSystem}`. Dup-sort key is the leading 16 bytes
/// `(FileCode, UnitCode)` (spec §4.2 table 9, invariant 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampedFileForProvider {
    pub file: IdCode,
    pub unit: IdCode,
    pub module: IdCode,
    pub nano_time: i64,
    pub is_system: bool,
}

impl TimestampedFileForProvider {
    pub const LEN: usize = 8 + 8 + 8 + 8 + 1;

    pub fn encode(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..8].copy_from_slice(&self.file.to_be_bytes());
        out[8..16].copy_from_slice(&self.unit.to_be_bytes());
        out[16..24].copy_from_slice(&self.module.value().to_le_bytes());
        out[24..32].copy_from_slice(&self.nano_time.to_le_bytes());
        out[32] = self.is_system as u8;
        out
    }

    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        if bytes.len() != Self::LEN {
            return Err(KvError::Codec {
                table: PROVIDER_FILES,
                reason: format!("expected {} bytes, got {}", Self::LEN, bytes.len()),
            });
        }
        Ok(TimestampedFileForProvider {
            file: IdCode::from_be_bytes(bytes[0..8].try_into().unwrap()),
            unit: IdCode::from_be_bytes(bytes[8..16].try_into().unwrap()),
            module: IdCode::from_value(u64::from_le_bytes(bytes[16..24].try_into().unwrap())),
            nano_time: i64::from_le_bytes(bytes[24..32].try_into().unwrap()),
            is_system: bytes[32] != 0,
        })
    }
}

/// `filename-by-code` value: `{dirCode, basename}` (spec §4.2 table 7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameRow {
    pub dir: IdCode,
    pub basename: String,
}

impl FileNameRow {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.basename.len());
        out.extend_from_slice(&self.dir.value().to_le_bytes());
        out.extend_from_slice(self.basename.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> KvResult<Self> {
        if bytes.len() < 8 {
            return Err(KvError::Codec {
                table: FILENAME_BY_CODE,
                reason: "value shorter than dir code".to_string(),
            });
        }
        let dir = IdCode::from_value(u64::from_le_bytes(bytes[0..8].try_into().unwrap()));
        let basename = std::str::from_utf8(&bytes[8..])
            .map_err(|e| KvError::Codec {
                table: FILENAME_BY_CODE,
                reason: e.to_string(),
            })?
            .to_string();
        Ok(FileNameRow { dir, basename })
    }
}
