//! Override ancestry (spec §4.7): walks a method's override chain up to its
//! base declarations, or a class's base-class chain, grounded on
//! `examples/original_source/include/IndexStoreDB/Index/SymbolIndex.h`'s
//! `foreachRelatedSymbolOccurrencesByUSR` used with `SymbolRoleSet` masks of
//! `RelationOverrideOf`/`RelationBaseOf`.
//!
//! The two relations are queried together and the walk recurses on whichever
//! one an occurrence actually carries, so a method's override chain and a
//! class's base-class chain use the same traversal without needing to know
//! the symbol's kind up front -- an instance method only ever records
//! `REL_OVERRIDE_OF` relations and a class only `REL_BASE_OF` ones.

use std::collections::HashSet;

use crate::kv::codes::IdCode;
use crate::kv::error::KvResult;
use crate::query::occurrence::QueryEngine;
use crate::reader::Occurrence;
use crate::schema::roles::SymbolRole;

impl<'a, 'env> QueryEngine<'a, 'env> {
    /// Direct base(s)/overridden declaration(s) of `usr`, one level only.
    pub fn foreach_base_of(&self, usr: &str, receiver: impl FnMut(&Occurrence) -> bool) -> KvResult<()> {
        self.foreach_related_symbol_occurrence_by_usr(usr, SymbolRole::REL_BASE_OF, receiver)
    }

    /// Direct override(s) of `usr`, one level only.
    pub fn foreach_override_of(&self, usr: &str, receiver: impl FnMut(&Occurrence) -> bool) -> KvResult<()> {
        self.foreach_related_symbol_occurrence_by_usr(usr, SymbolRole::REL_OVERRIDE_OF, receiver)
    }

    /// Every ancestor reachable by repeatedly following `REL_OVERRIDE_OF`
    /// relations from `usr` up to the declarations it ultimately overrides,
    /// each USR visited at most once. Stops early if `receiver` returns
    /// `false`.
    pub fn foreach_override_ancestry(
        &self,
        usr: &str,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut visited = HashSet::new();
        let mut stop = false;
        self.collect_override_ancestry(usr, &mut visited, &mut receiver, &mut stop)
    }

    fn collect_override_ancestry(
        &self,
        usr: &str,
        visited: &mut HashSet<IdCode>,
        receiver: &mut impl FnMut(&Occurrence) -> bool,
        stop: &mut bool,
    ) -> KvResult<()> {
        if *stop {
            return Ok(());
        }
        let usr_code = crate::txns::read::ReadTransaction::usr_code(usr);
        if !visited.insert(usr_code) {
            return Ok(());
        }

        let mut next_usrs = Vec::new();
        self.foreach_related_symbol_occurrence_by_usr(
            usr,
            SymbolRole::REL_OVERRIDE_OF | SymbolRole::REL_BASE_OF,
            |occ| {
                if !receiver(occ) {
                    *stop = true;
                    return false;
                }
                if let Some(related) = &occ.related_usr {
                    next_usrs.push(related.clone());
                }
                true
            },
        )?;

        for next in next_usrs {
            if *stop {
                break;
            }
            self.collect_override_ancestry(&next, visited, receiver, stop)?;
        }
        Ok(())
    }
}
