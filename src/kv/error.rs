//! Error kinds surfaced by the KV store adapter (spec §7).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    /// A write could not proceed because the environment's map is exhausted.
    /// Handled internally by [`crate::kv::env::Environment::grow_map`]; only
    /// escalates past the retry cap configured in `Config::max_map_growths`.
    #[error("lmdb map is full")]
    MapFull,

    /// The on-disk store failed to open due to a checksum or format error.
    #[error("database at {path:?} is corrupted: {source}")]
    Corruption {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },

    /// The store's format version directory does not match the compiled-in
    /// `FORMAT_VERSION`; never opened, a fresh database is created instead.
    #[error("database format version mismatch: found v{found}, expected v{expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("lmdb error: {0}")]
    Lmdb(#[from] heed::Error),

    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("value in {table} is malformed: {reason}")]
    Codec { table: &'static str, reason: String },
}

pub type KvResult<T> = Result<T, KvError>;
