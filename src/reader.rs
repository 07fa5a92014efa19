//! Artifact Reader: the external decoder contract boundary (spec §4.7,
//! glossary "Provider"/"Record"). The KV store only ever records which USRs a
//! provider *declares*, with what roles, at the granularity of a whole
//! provider; the exact source locations behind each occurrence live in the
//! provider's own on-disk record, decoded by whatever language front end
//! produced it. This trait is that seam: an ingest source hands the
//! repository a reader, and the query engine calls back into it to resolve a
//! provider/USR pair to concrete occurrences.
//!
//! No default implementation ships here -- grounding a decoder requires
//! knowing the artifact format, which is out of scope for the store itself.

use crate::kv::codes::IdCode;
use crate::schema::roles::{SymbolKind, SymbolRole};

/// One source location a provider recorded for a USR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: IdCode,
    pub line: u32,
    pub column: u32,
}

/// A single recorded occurrence of a symbol, as decoded from a provider's
/// record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub usr: String,
    pub symbol_name: String,
    /// The language-entity kind the provider recorded for this occurrence
    /// (spec §4.7, "canonical occurrence"): consulted alongside `roles` so
    /// kinds that prefer their declaration as canonical (ObjC classes,
    /// categories, protocols, properties) aren't passed over in favor of a
    /// definition.
    pub kind: SymbolKind,
    pub roles: SymbolRole,
    pub related_roles: SymbolRole,
    pub location: Location,
    /// The USR at the other end of a relation (spec §4.7, "call-graph" and
    /// "override ancestry"): the callee for a `CALL`-roled occurrence, the
    /// overridden/base method for a `REL_OVERRIDE_OF`/`REL_BASE_OF`-related
    /// one. `None` for occurrences with no recorded relation.
    pub related_usr: Option<String>,
}

/// Decodes a provider's record into symbol occurrences. Implemented by
/// whatever ingest front end produced the provider (e.g. a clang/swift
/// indexstore record reader); the store's query engine is generic over it.
pub trait ArtifactReader: Send + Sync {
    /// Returns every occurrence a provider recorded for the USR hashing to
    /// `usr_code`, or an empty vector if the provider's record no longer
    /// exists / was invalidated. Keyed on the code rather than the string so
    /// callers that only have a code (from a name/kind bucket traversal)
    /// never need to recover the original USR text.
    fn occurrences_for_usr(&self, provider: IdCode, usr_code: IdCode) -> Vec<Occurrence>;
}
