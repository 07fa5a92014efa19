//! Thin cursor helpers shared by the read and import transaction layers.
//!
//! `heed` surfaces LMDB's `MDB_MAP_FULL` as a generic `heed::Error::Mdb`
//! variant; [`classify`] is the single place that turns it into
//! [`KvError::MapFull`] so [`crate::kv::env::Environment::with_map_full_retry`]
//! can catch it.

use heed::types::Bytes;
use heed::{RoTxn, RwTxn};

use super::error::{KvError, KvResult};
use crate::schema::CodeKey;

pub fn classify(err: heed::Error) -> KvError {
    match &err {
        heed::Error::Mdb(heed::MdbError::MapFull) => KvError::MapFull,
        _ => KvError::Lmdb(err),
    }
}

pub trait ResultExt<T> {
    fn classify(self) -> KvResult<T>;
}

impl<T> ResultExt<T> for Result<T, heed::Error> {
    fn classify(self) -> KvResult<T> {
        self.map_err(classify)
    }
}

/// Iterates every duplicate value under `key` in a dup-sort database whose
/// values are opaque byte blobs, stopping at the first error.
pub fn iter_duplicates<'txn>(
    txn: &'txn RoTxn,
    db: heed::Database<CodeKey, Bytes>,
    key: crate::kv::codes::IdCode,
) -> KvResult<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    if let Some(iter) = db.get_duplicates(txn, &key.value()).classify()? {
        for item in iter {
            let (_, v) = item.classify()?;
            out.push(v.to_vec());
        }
    }
    Ok(out)
}

/// Deletes one exact `(key, value)` duplicate pair and reinserts `new_value`
/// in its place, implementing "compare identity fields, update auxiliary
/// fields in place" for dup-sort tables without a custom LMDB comparator
/// (spec §4.4; see `schema::ProviderForUsr`/`TimestampedFileForProvider`).
pub fn replace_duplicate(
    wtxn: &mut RwTxn,
    db: heed::Database<CodeKey, Bytes>,
    key: crate::kv::codes::IdCode,
    old_value: &[u8],
    new_value: &[u8],
) -> KvResult<()> {
    db.delete_one_duplicate(wtxn, &key.value(), old_value)
        .classify()?;
    db.put(wtxn, &key.value(), new_value).classify()?;
    Ok(())
}
