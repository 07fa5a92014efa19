//! Read Transaction and Import Transaction (spec §4.3, §4.4): the two ways
//! callers touch a store. Reads are many-concurrent and never block a writer;
//! imports are single-writer and commit atomically.

pub mod import;
pub mod read;

pub use import::ImportTransaction;
pub use read::ReadTransaction;
