//! Environment: a memory-mapped B-tree store bound to a filesystem directory.
//!
//! Mirrors `IndexStoreDB::db::Database::Implementation` (see
//! `examples/original_source/lib/Database/DatabaseImpl.h`): one `heed::Env`, a
//! map size that only ever grows, and a read/growth barrier so a `MapFull`
//! retry never resizes out from under an in-flight reader.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{info, warn};

use super::codes::IdCode;
use super::error::{KvError, KvResult};

/// Format version of the on-disk schema. Bumping this changes the `v<N>/`
/// directory a store lives under (spec §4.2, invariant 7); mismatched
/// versions are isolated by directory naming, never opened in place.
pub const FORMAT_VERSION: u32 = 1;

/// Default environment map size: 64 MiB, doubled on `MapFull` (spec §6).
pub const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// Number of named sub-databases declared in `schema::mod` (13), rounded up
/// for headroom.
pub const MAX_DBS: u32 = 16;

/// `MapFull` is retried by doubling the map size, capped at this many
/// doublings before the error is allowed to propagate (spec §4.6, §7).
pub const MAX_MAP_GROWTHS: u32 = 6;

/// A memory-mapped B-tree environment plus the read/growth barrier that lets
/// `increase_map_size` drain in-flight readers before resizing.
///
/// The barrier is a plain reader/writer lock: `begin_read` takes the shared
/// side for the lifetime of the read transaction, `grow_map` takes the
/// exclusive side. This is the synchronous analogue of the dispatch-group +
/// barrier-queue pair the original implementation uses (spec §5): parking_lot
/// gives writer-over-reader preference once a grow is requested, so new reads
/// queue behind it rather than starving it indefinitely.
pub struct Environment {
    env: heed::Env,
    path: PathBuf,
    readonly: bool,
    map_size: AtomicU64,
    growth_barrier: RwLock<()>,
    growths: AtomicU64,
}

/// RAII guard returned by [`Environment::enter_read`]; holds the shared side
/// of the growth barrier for as long as a read transaction is outstanding.
pub struct ReadGuard<'env> {
    _held: parking_lot::RwLockReadGuard<'env, ()>,
}

impl Environment {
    /// Opens (or creates) an environment rooted at `path`, which must already
    /// be the process-exclusive directory a [`crate::ingest::workdir`] handed
    /// out (e.g. `root/v1/saved` or `root/v1/p<pid>-<uniq>`).
    pub fn open(path: &Path, readonly: bool, initial_map_size: Option<usize>) -> KvResult<Self> {
        std::fs::create_dir_all(path).map_err(|source| KvError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let map_size = initial_map_size.unwrap_or(DEFAULT_MAP_SIZE);
        let mut options = heed::EnvOpenOptions::new();
        options.map_size(map_size).max_dbs(MAX_DBS);
        if readonly {
            options.read_txn_without_tls();
        }

        // SAFETY: `path` is owned exclusively by this process for its
        // lifetime (enforced by `ingest::workdir`'s pid-scoped rename dance).
        let env = unsafe { options.open(path) }.map_err(|source| {
            if matches!(source, heed::Error::Mdb(heed::MdbError::Corrupted)) {
                KvError::Corruption {
                    path: path.to_path_buf(),
                    source,
                }
            } else {
                KvError::Lmdb(source)
            }
        })?;

        Ok(Self {
            env,
            path: path.to_path_buf(),
            readonly,
            map_size: AtomicU64::new(map_size as u64),
            growth_barrier: RwLock::new(()),
            growths: AtomicU64::new(0),
        })
    }

    pub fn raw(&self) -> &heed::Env {
        &self.env
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn map_size(&self) -> u64 {
        self.map_size.load(Ordering::Acquire)
    }

    pub fn growths(&self) -> u64 {
        self.growths.load(Ordering::Acquire)
    }

    /// Enter the read-transaction group; held until the caller's read
    /// transaction is dropped. A pending [`Environment::grow_map`] call waits
    /// for every outstanding `ReadGuard` to drop before resizing.
    pub fn enter_read(&self) -> ReadGuard<'_> {
        ReadGuard {
            _held: self.growth_barrier.read(),
        }
    }

    /// Doubles the map size, blocking new readers until in-flight ones drain
    /// (spec §4.6 "MapFull guard"). Returns the new size.
    pub fn grow_map(&self) -> KvResult<u64> {
        let _barrier = self.growth_barrier.write();
        let new_size = self.map_size() * 2;
        // SAFETY: no transactions are open across this call; `_barrier`
        // excludes new readers and we hold the only writer by construction
        // (single-writer invariant enforced by `ImportTransaction`).
        unsafe {
            self.env
                .resize(new_size as usize)
                .map_err(KvError::Lmdb)?;
        }
        self.map_size.store(new_size, Ordering::Release);
        let n = self.growths.fetch_add(1, Ordering::AcqRel) + 1;
        info!(new_size, growths = n, "grew lmdb map size");
        Ok(new_size)
    }

    /// Runs `f`, retrying on [`KvError::MapFull`] by doubling the map size up
    /// to [`MAX_MAP_GROWTHS`] times before giving up.
    pub fn with_map_full_retry<T>(
        &self,
        mut f: impl FnMut() -> KvResult<T>,
    ) -> KvResult<T> {
        let mut attempt = 0;
        loop {
            match f() {
                Err(KvError::MapFull) if attempt < MAX_MAP_GROWTHS => {
                    warn!(attempt, "map full, growing and retrying");
                    self.grow_map()?;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Canonicalizes `root/v<FORMAT_VERSION>/<leaf>` and ensures the `v<N>`
/// directory exists, without touching `<leaf>` itself.
pub fn versioned_dir(root: &Path) -> PathBuf {
    root.join(format!("v{FORMAT_VERSION}"))
}

/// Truncation limit applied to symbol names before they are used as keys in
/// `usrs-by-symbol-name` (spec §4.2, table 4; invariant tested in spec §8.3).
/// LMDB's own default max key size is 511 bytes; we reserve room so a key
/// plus its table prefix never exceeds that.
pub const MAX_KEY_SIZE: usize = 480;

pub fn truncate_key(name: &str) -> &str {
    if name.len() <= MAX_KEY_SIZE {
        return name;
    }
    let mut end = MAX_KEY_SIZE;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

pub fn code_key(code: IdCode) -> [u8; 8] {
    code.to_be_bytes()
}
