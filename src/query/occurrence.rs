//! USR/name/pattern/kind occurrence traversals (spec §4.7), grounded on
//! `examples/original_source/include/IndexStoreDB/Index/SymbolIndex.h`'s
//! `foreach*SymbolOccurrence*` surface. Each method joins a KV lookup
//! (which providers declared a USR, and with what roles) against the
//! [`ArtifactReader`] boundary that resolves a provider/USR pair to concrete
//! source locations.

use crate::kv::codes::IdCode;
use crate::kv::error::KvResult;
use crate::query::pattern::matches_pattern;
use crate::reader::{ArtifactReader, Occurrence};
use crate::schema::roles::{GlobalSymbolKind, SymbolRole};
use crate::txns::read::ReadTransaction;

pub struct QueryEngine<'a, 'env> {
    pub txn: &'a ReadTransaction<'env>,
    pub reader: &'a dyn ArtifactReader,
}

impl<'a, 'env> QueryEngine<'a, 'env> {
    pub fn new(txn: &'a ReadTransaction<'env>, reader: &'a dyn ArtifactReader) -> Self {
        Self { txn, reader }
    }

    /// All occurrences of `usr` whose roles intersect `role_filter` (a mask
    /// of zero matches everything).
    pub fn foreach_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        role_filter: SymbolRole,
        receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        self.foreach_symbol_occurrence_by_usr_code(ReadTransaction::usr_code(usr), role_filter, receiver)
    }

    pub fn foreach_symbol_occurrence_by_usr_code(
        &self,
        usr_code: IdCode,
        role_filter: SymbolRole,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut stop = false;
        self.txn
            .lookup_providers_for_usr_code(usr_code, role_filter.bits(), 0, |provider, _roles, _related| {
                for occ in self.reader.occurrences_for_usr(provider, usr_code) {
                    if role_filter.is_empty() || occ.roles.intersects(role_filter) {
                        if !receiver(&occ) {
                            stop = true;
                            break;
                        }
                    }
                }
                !stop
            })?;
        Ok(())
    }

    /// Occurrences related to `usr` via a `Relation*` role (override, base,
    /// call, containment, ...), filtered to `related_role_filter`.
    pub fn foreach_related_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        related_role_filter: SymbolRole,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let usr_code = ReadTransaction::usr_code(usr);
        let mut stop = false;
        self.txn
            .lookup_providers_for_usr_code(usr_code, 0, related_role_filter.bits(), |provider, _roles, _related| {
                for occ in self.reader.occurrences_for_usr(provider, usr_code) {
                    if occ.related_roles.intersects(related_role_filter) {
                        if !receiver(&occ) {
                            stop = true;
                            break;
                        }
                    }
                }
                !stop
            })?;
        Ok(())
    }

    /// The single canonical occurrence of `usr`: a definition if one was
    /// recorded, else whichever occurrence carries the `CANONICAL` role, else
    /// -- for kinds that prefer their declaration as canonical (ObjC classes,
    /// categories, protocols, properties) -- the declaration occurrence
    /// (spec glossary, "Canonical occurrence"; spec §4.7). If nothing
    /// qualifies as a canonical candidate — the USR only has, say, reference
    /// occurrences — falls back to the first occurrence found rather than
    /// reporting nothing, so a caller always gets *a* location for a USR that
    /// exists.
    pub fn foreach_canonical_symbol_occurrence_by_usr(
        &self,
        usr: &str,
        receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        self.foreach_canonical_symbol_occurrence_by_usr_code(ReadTransaction::usr_code(usr), receiver)
    }

    fn foreach_canonical_symbol_occurrence_by_usr_code(
        &self,
        usr_code: IdCode,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut best_available: Option<Occurrence> = None;
        let mut emitted_canonical = false;
        self.foreach_symbol_occurrence_by_usr_code(usr_code, SymbolRole::empty(), |occ| {
            let is_canonical = occ.roles.is_canonical_candidate()
                || (occ.kind.prefers_declaration_as_canonical() && occ.roles.contains(SymbolRole::DECLARATION));
            if is_canonical {
                emitted_canonical = true;
                receiver(occ)
            } else {
                if best_available.is_none() {
                    best_available = Some(occ.clone());
                }
                true
            }
        })?;
        if !emitted_canonical {
            if let Some(occ) = best_available {
                receiver(&occ);
            }
        }
        Ok(())
    }

    pub fn foreach_canonical_symbol_occurrence_by_name(
        &self,
        name: &str,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut stop = false;
        self.txn.foreach_usr_by_name(name, |codes| {
            for &code in codes {
                let _ = self.foreach_canonical_symbol_occurrence_by_usr_code(code, |occ| {
                    let keep = receiver(occ);
                    if !keep {
                        stop = true;
                    }
                    keep
                });
                if stop {
                    break;
                }
            }
            !stop
        })?;
        Ok(())
    }

    pub fn foreach_canonical_symbol_occurrence_by_kind(
        &self,
        kind: GlobalSymbolKind,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut stop = false;
        self.txn.foreach_usr_of_global_kind(kind, |codes| {
            for &code in codes {
                let _ = self.foreach_canonical_symbol_occurrence_by_usr_code(code, |occ| {
                    let keep = receiver(occ);
                    if !keep {
                        stop = true;
                    }
                    keep
                });
                if stop {
                    break;
                }
            }
            !stop
        })?;
        Ok(())
    }

    /// Canonical occurrences of every symbol name matching `pattern`.
    pub fn foreach_canonical_symbol_occurrence_containing_pattern(
        &self,
        pattern: &str,
        anchor_start: bool,
        anchor_end: bool,
        subsequence: bool,
        ignore_case: bool,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut stop = false;
        self.txn.find_usrs_with_name_containing(
            pattern,
            anchor_start,
            anchor_end,
            subsequence,
            ignore_case,
            |codes| {
                for &code in codes {
                    let _ = self.foreach_canonical_symbol_occurrence_by_usr_code(code, |occ| {
                        let keep = matches_pattern(
                            &occ.symbol_name,
                            pattern,
                            anchor_start,
                            anchor_end,
                            subsequence,
                            ignore_case,
                        ) && receiver(occ);
                        if !keep {
                            stop = true;
                        }
                        keep
                    });
                    if stop {
                        break;
                    }
                }
                !stop
            },
        )?;
        Ok(())
    }
}
