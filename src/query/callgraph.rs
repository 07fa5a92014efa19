//! Call-graph traversal (spec §4.7): direct call sites plus, for a
//! dynamically dispatched method, the call sites of every method that
//! overrides it -- a call through a base-typed receiver may resolve to any
//! override at runtime, so none of them can be excluded from "who calls
//! this" without knowing the receiver's exact dynamic type, which the store
//! does not track. Grounded on
//! `examples/original_source/lib/Index/IndexDatastore.cpp`'s
//! `findRelatedSymbolsInOverriddenMethods`-style expansion, simplified from
//! its full extension-flattening form to the override-hierarchy walk the
//! store's role model can express directly.

use std::collections::HashSet;

use crate::kv::codes::IdCode;
use crate::kv::error::KvResult;
use crate::query::occurrence::QueryEngine;
use crate::reader::Occurrence;
use crate::schema::roles::SymbolRole;

impl<'a, 'env> QueryEngine<'a, 'env> {
    /// Occurrences of `usr` that are themselves calls (`CALL` role): the
    /// call sites reachable *from* `usr`'s body.
    pub fn foreach_call_site_in(&self, usr: &str, receiver: impl FnMut(&Occurrence) -> bool) -> KvResult<()> {
        self.foreach_symbol_occurrence_by_usr(usr, SymbolRole::CALL, receiver)
    }

    /// Direct callers of `usr`: occurrences related to it via
    /// `REL_CALLED_BY`, one level only.
    pub fn foreach_caller_of(&self, usr: &str, receiver: impl FnMut(&Occurrence) -> bool) -> KvResult<()> {
        self.foreach_related_symbol_occurrence_by_usr(usr, SymbolRole::REL_CALLED_BY, receiver)
    }

    /// Every caller of `usr`, plus every caller of any method that (directly
    /// or transitively) overrides it, deduplicated by source location so a
    /// call site visible through more than one override path is reported
    /// once (spec §4.7, "call-graph expansion"). If `usr` is not
    /// dynamically dispatched (it has no overrides), this is equivalent to
    /// [`Self::foreach_caller_of`].
    pub fn foreach_caller_of_with_dynamic_dispatch(
        &self,
        usr: &str,
        mut receiver: impl FnMut(&Occurrence) -> bool,
    ) -> KvResult<()> {
        let mut seen_locations = HashSet::new();
        let mut visited_methods = HashSet::new();
        let mut stop = false;
        self.collect_callers(usr, &mut visited_methods, &mut seen_locations, &mut receiver, &mut stop)
    }

    fn collect_callers(
        &self,
        usr: &str,
        visited_methods: &mut HashSet<IdCode>,
        seen_locations: &mut HashSet<(IdCode, u32, u32)>,
        receiver: &mut impl FnMut(&Occurrence) -> bool,
        stop: &mut bool,
    ) -> KvResult<()> {
        if *stop {
            return Ok(());
        }
        let usr_code = crate::txns::read::ReadTransaction::usr_code(usr);
        if !visited_methods.insert(usr_code) {
            return Ok(());
        }

        self.foreach_caller_of(usr, |occ| {
            let key = (occ.location.file, occ.location.line, occ.location.column);
            if seen_locations.insert(key) && !receiver(occ) {
                *stop = true;
                return false;
            }
            true
        })?;
        if *stop {
            return Ok(());
        }

        let mut overriders = Vec::new();
        self.foreach_base_of(usr, |occ| {
            if let Some(over) = &occ.related_usr {
                overriders.push(over.clone());
            }
            true
        })?;

        for over in overriders {
            if *stop {
                break;
            }
            self.collect_callers(&over, visited_methods, seen_locations, receiver, stop)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::env::Environment;
    use crate::reader::{ArtifactReader, Location};
    use crate::schema::roles::SymbolKind;
    use crate::schema::Tables;
    use crate::txns::import::ImportTransaction;
    use crate::txns::read::ReadTransaction;

    struct FakeReader {
        occurrences: Vec<Occurrence>,
    }

    impl ArtifactReader for FakeReader {
        fn occurrences_for_usr(&self, _provider: IdCode, usr_code: IdCode) -> Vec<Occurrence> {
            self.occurrences
                .iter()
                .filter(|occ| ReadTransaction::usr_code(&occ.usr) == usr_code)
                .cloned()
                .collect()
        }
    }

    fn caller_occ(usr: &str, line: u32) -> Occurrence {
        Occurrence {
            usr: usr.to_string(),
            symbol_name: usr.to_string(),
            kind: SymbolKind::InstanceMethod,
            roles: SymbolRole::REFERENCE,
            related_roles: SymbolRole::REL_CALLED_BY,
            location: Location {
                file: IdCode::from_str("/a.c"),
                line,
                column: 1,
            },
            related_usr: None,
        }
    }

    fn base_of_occ(usr: &str, overrider: &str) -> Occurrence {
        Occurrence {
            usr: usr.to_string(),
            symbol_name: usr.to_string(),
            kind: SymbolKind::InstanceMethod,
            roles: SymbolRole::DECLARATION,
            related_roles: SymbolRole::REL_BASE_OF,
            location: Location {
                file: IdCode::from_str("/a.c"),
                line: 1,
                column: 1,
            },
            related_usr: Some(overrider.to_string()),
        }
    }

    fn setup_provider(env: &Environment, tables: &Tables, usrs: &[&str]) {
        let mut import = ImportTransaction::begin(env, tables).unwrap();
        let (provider, _) = import.add_provider_name("p1").unwrap();
        for usr in usrs {
            import
                .add_symbol_info(
                    provider,
                    usr,
                    usr,
                    SymbolKind::InstanceMethod,
                    false,
                    SymbolRole::DECLARATION,
                    SymbolRole::REL_BASE_OF | SymbolRole::REL_CALLED_BY,
                )
                .unwrap();
        }
        import.commit().unwrap();
    }

    #[test]
    fn dynamic_dispatch_includes_callers_of_every_override() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::open(tmp.path(), false, None).unwrap();
        let mut wtxn = env.raw().write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        wtxn.commit().unwrap();
        setup_provider(&env, &tables, &["c:@Base@m", "c:@Derived@m"]);

        let reader = FakeReader {
            occurrences: vec![
                caller_occ("c:@Base@m", 10),
                base_of_occ("c:@Base@m", "c:@Derived@m"),
                caller_occ("c:@Derived@m", 20),
            ],
        };
        let txn = ReadTransaction::begin(&env, &tables).unwrap();
        let engine = QueryEngine::new(&txn, &reader);

        let mut lines = Vec::new();
        engine
            .foreach_caller_of_with_dynamic_dispatch("c:@Base@m", |occ| {
                lines.push(occ.location.line);
                true
            })
            .unwrap();
        lines.sort();
        assert_eq!(lines, vec![10, 20]);
    }

    #[test]
    fn plain_method_with_no_overrides_behaves_like_direct_caller_lookup() {
        let tmp = tempfile::tempdir().unwrap();
        let env = Environment::open(tmp.path(), false, None).unwrap();
        let mut wtxn = env.raw().write_txn().unwrap();
        let tables = Tables::open(&env, &mut wtxn).unwrap();
        wtxn.commit().unwrap();
        setup_provider(&env, &tables, &["c:@Leaf@m"]);

        let reader = FakeReader {
            occurrences: vec![caller_occ("c:@Leaf@m", 5)],
        };
        let txn = ReadTransaction::begin(&env, &tables).unwrap();
        let engine = QueryEngine::new(&txn, &reader);

        let mut lines = Vec::new();
        engine
            .foreach_caller_of_with_dynamic_dispatch("c:@Leaf@m", |occ| {
                lines.push(occ.location.line);
                true
            })
            .unwrap();
        assert_eq!(lines, vec![5]);
    }
}
