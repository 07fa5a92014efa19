//! End-to-end ingest-then-query scenarios driven through a `ManifestSource`,
//! exercising the same path `main.rs` wires at startup: write unit/provider
//! JSON, open a `Store` over it, register units, query through
//! `QueryEngine`.

mod support;

use indexstore_rs::kv::codes::IdCode;
use indexstore_rs::query::occurrence::QueryEngine;
use indexstore_rs::reader::Occurrence;
use indexstore_rs::schema::roles::SymbolRole;
use rstest::rstest;
use serde_json::json;
use support::{artifact_root, config, open_test_store, store_root, tmp_dir, ManifestWriter};
use std::path::PathBuf;

fn collect(
    mut run: impl FnMut(&mut dyn FnMut(&Occurrence) -> bool) -> indexstore_rs::kv::error::KvResult<()>,
) -> Vec<Occurrence> {
    let mut out = Vec::new();
    run(&mut |occ| {
        out.push(occ.clone());
        true
    })
    .unwrap();
    out
}

#[rstest]
fn importing_a_unit_exposes_its_symbols_by_usr_and_by_name(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);

    ManifestWriter::new(&artifacts)
        .unit(
            "/proj/a.unit",
            json!({
                "mod_time_nanos": 1000,
                "main_file": "/proj/a.cpp",
                "out_file": null,
                "sysroot": null,
                "target": null,
                "is_system": false,
                "provider_kind": "clang",
                "file_depends": ["/proj/a.cpp"],
                "unit_depends": [],
                "provider_depends": [
                    {"provider_name": "p1", "file_path": "/proj/a.cpp", "module_name": ""}
                ]
            }),
        )
        .record(
            "p1",
            json!([
                {
                    "usr": "u/foo", "symbol_name": "foo", "kind": "function",
                    "roles": ["definition"], "file": "/proj/a.cpp", "line": 10, "column": 1
                },
                {
                    "usr": "u/bar", "symbol_name": "bar", "kind": "function",
                    "roles": ["declaration"], "file": "/proj/a.cpp", "line": 20, "column": 1
                }
            ]),
        );

    let (store, state) = open_test_store(&cfg, &artifacts);
    store.repository().register_unit("/proj/a.unit").unwrap();

    let txn = store.repository().read_transaction().unwrap();
    let engine = QueryEngine::new(&txn, state.reader.as_ref());

    let foo = collect(|recv| engine.foreach_symbol_occurrence_by_usr("u/foo", SymbolRole::DEFINITION, recv));
    assert_eq!(foo.len(), 1);
    assert_eq!(foo[0].location.line, 10);

    // bar only declares (never defines), so the canonical-by-name fallback
    // rule reports its declaration as the best available occurrence.
    let bar = collect(|recv| engine.foreach_canonical_symbol_occurrence_by_name("bar", recv));
    assert_eq!(bar.len(), 1);
    assert_eq!(bar[0].location.line, 20);
    assert!(!bar[0].roles.is_canonical_candidate());
}

#[rstest]
fn reimporting_with_an_unchanged_modtime_is_a_no_op(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);

    ManifestWriter::new(&artifacts)
        .unit(
            "/proj/a.unit",
            json!({
                "mod_time_nanos": 1000,
                "main_file": "/proj/a.cpp",
                "out_file": null,
                "sysroot": null,
                "target": null,
                "is_system": false,
                "provider_kind": "clang",
                "file_depends": ["/proj/a.cpp"],
                "unit_depends": [],
                "provider_depends": [
                    {"provider_name": "p1", "file_path": "/proj/a.cpp", "module_name": ""}
                ]
            }),
        )
        .record(
            "p1",
            json!([{
                "usr": "u/foo", "symbol_name": "foo", "kind": "function",
                "roles": ["definition"], "file": "/proj/a.cpp", "line": 10, "column": 1
            }]),
        );

    let (store, _state) = open_test_store(&cfg, &artifacts);
    store.repository().register_unit("/proj/a.unit").unwrap();
    assert!(!store.repository().is_unit_out_of_date("/proj/a.unit"));

    // Re-registering at the same modtime must not error and must leave the
    // unit's dependency edges untouched.
    store.repository().register_unit("/proj/a.unit").unwrap();
    let txn = store.repository().read_transaction().unwrap();
    let info = txn.get_unit_info_by_name("/proj/a.unit").unwrap().unwrap();
    assert_eq!(info.modtime_nanos, 1000);
}

#[rstest]
fn reimporting_with_a_new_provider_drops_the_old_providers_file_association(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);

    let mut writer = ManifestWriter::new(&artifacts);
    writer
        .unit(
            "/proj/a.unit",
            json!({
                "mod_time_nanos": 1000,
                "main_file": "/proj/a.cpp",
                "out_file": null,
                "sysroot": null,
                "target": null,
                "is_system": false,
                "provider_kind": "clang",
                "file_depends": ["/proj/a.cpp"],
                "unit_depends": [],
                "provider_depends": [
                    {"provider_name": "p1", "file_path": "/proj/a.cpp", "module_name": ""}
                ]
            }),
        )
        .record(
            "p1",
            json!([{
                "usr": "u/foo", "symbol_name": "foo", "kind": "function",
                "roles": ["definition"], "file": "/proj/a.cpp", "line": 10, "column": 1
            }]),
        );

    let (store, _state) = open_test_store(&cfg, &artifacts);
    store.repository().register_unit("/proj/a.unit").unwrap();

    let p1 = IdCode::from_str("p1");
    {
        let txn = store.repository().read_transaction().unwrap();
        let assoc = txn.dump_provider_file_associations(p1).unwrap();
        assert_eq!(assoc.len(), 1);
    }

    // The second revision of the unit depends on a differently-named
    // provider instead, simulating the compiler emitting a fresh record.
    writer.unit(
        "/proj/a.unit",
        json!({
            "mod_time_nanos": 2000,
            "main_file": "/proj/a.cpp",
            "out_file": null,
            "sysroot": null,
            "target": null,
            "is_system": false,
            "provider_kind": "clang",
            "file_depends": ["/proj/a.cpp"],
            "unit_depends": [],
            "provider_depends": [
                {"provider_name": "p2", "file_path": "/proj/a.cpp", "module_name": ""}
            ]
        }),
    );
    writer.record(
        "p2",
        json!([{
            "usr": "u/foo", "symbol_name": "foo", "kind": "function",
            "roles": ["definition"], "file": "/proj/a.cpp", "line": 11, "column": 1
        }]),
    );

    store.repository().register_unit("/proj/a.unit").unwrap();

    let txn = store.repository().read_transaction().unwrap();
    let assoc = txn.dump_provider_file_associations(p1).unwrap();
    assert!(assoc.is_empty(), "unclaimed provider's file association should be removed");

    let p2 = IdCode::from_str("p2");
    let assoc = txn.dump_provider_file_associations(p2).unwrap();
    assert_eq!(assoc.len(), 1);
}

#[rstest]
fn removing_a_unit_clears_its_unit_info(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);

    ManifestWriter::new(&artifacts)
        .unit(
            "/proj/a.unit",
            json!({
                "mod_time_nanos": 1000,
                "main_file": "/proj/a.cpp",
                "out_file": null,
                "sysroot": null,
                "target": null,
                "is_system": false,
                "provider_kind": "clang",
                "file_depends": ["/proj/a.cpp"],
                "unit_depends": [],
                "provider_depends": []
            }),
        );

    let (store, _state) = open_test_store(&cfg, &artifacts);
    store.repository().register_unit("/proj/a.unit").unwrap();
    store.repository().remove_unit("/proj/a.unit").unwrap();

    let txn = store.repository().read_transaction().unwrap();
    assert!(txn.get_unit_info_by_name("/proj/a.unit").unwrap().is_none());
}
