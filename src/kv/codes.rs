//! `IDCode`: the stable 64-bit hash used as the primary key for every interned
//! string (USR, path, unit name, provider name, target, module).
//!
//! Equality of `IDCode`s is treated as equality of the strings they were derived
//! from; the 64-bit width accepts a birthday-collision risk given the workload
//! (see spec §3, "Entities: IDCode").

use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

/// A 64-bit hash of a string, stable across processes and runs.
///
/// Ordering is the unsigned numeric order of the underlying `u64`, which is also
/// the sort key for every integer-keyed sub-database (see schema::TableKind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdCode(u64);

impl IdCode {
    pub const ZERO: IdCode = IdCode(0);

    pub fn from_str(s: &str) -> Self {
        IdCode(xxh3_64(s.as_bytes()))
    }

    pub fn from_value(code: u64) -> Self {
        IdCode(code)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Big-endian bytes: lexicographic byte order matches numeric order, which
    /// is what every integer-keyed DBI relies on for its cursor ordering.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        IdCode(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for IdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for IdCode {
    fn from(v: u64) -> Self {
        IdCode(v)
    }
}
