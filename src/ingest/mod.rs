//! Ingest: turns compiler-produced unit records and file-system change
//! notifications into KV store mutations (spec §4.5-§4.6).

pub mod delegate;
pub mod importer;
pub mod manifest;
pub mod monitor;
pub mod repository;
pub mod watcher;
pub mod workdir;

pub use delegate::{DelegateQueue, IngestDelegate, StoreUnitInfo};
pub use importer::UnitImporter;
pub use manifest::ManifestSource;
pub use monitor::{OutOfDateTrigger, UnitMonitor};
pub use repository::{ArtifactRepository, UnitProviderDependency, UnitRecord, UnitRecordSource};
pub use watcher::{FsEventWatcher, UnitEventSource};
pub use workdir::WorkDir;
