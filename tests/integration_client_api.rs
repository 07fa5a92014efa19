//! Exercises the JSON/HTTP client API (spec §6) directly through its axum
//! router, the same way an out-of-process client would, without binding a
//! real TCP listener.

mod support;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use indexstore_rs::server::{router, AppState};
use rstest::rstest;
use serde_json::{json, Value};
use support::{artifact_root, config, open_test_store, store_root, tmp_dir, ManifestWriter};
use std::path::PathBuf;
use tower::ServiceExt;

async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn get(path: &str) -> Request<Body> {
    Request::builder().method("GET").uri(path).body(Body::empty()).unwrap()
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn seeded_state(artifacts: &std::path::Path, cfg: &indexstore_rs::config::Config) -> AppState {
    ManifestWriter::new(artifacts)
        .unit(
            "/proj/a.unit",
            json!({
                "mod_time_nanos": 1000,
                "main_file": "/proj/a.cpp",
                "out_file": "/proj/a.o",
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

    let (store, state) = open_test_store(cfg, artifacts);
    store.repository().register_unit("/proj/a.unit").unwrap();
    state
}

#[rstest]
#[tokio::test]
async fn symbol_occurrence_by_usr_returns_the_imported_occurrence(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);
    let state = seeded_state(&artifacts, &cfg);
    let app = router(state);

    let (status, body) = send(app, get("/v1/symbols/u%2Ffoo/occurrences")).await;
    assert_eq!(status, StatusCode::OK);
    let occs = body["occurrences"].as_array().unwrap();
    assert_eq!(occs.len(), 1);
    assert_eq!(occs[0]["symbol_name"], "foo");
}

#[rstest]
#[tokio::test]
async fn unit_info_reports_a_registered_unit(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);
    let state = seeded_state(&artifacts, &cfg);
    let app = router(state);

    let (status, body) = send(app, get("/v1/units/%2Fproj%2Fa.unit")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modtime_nanos"], 1000);
}

#[rstest]
#[tokio::test]
async fn unit_info_for_an_unknown_unit_is_not_found(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);
    let state = seeded_state(&artifacts, &cfg);
    let app = router(state);

    let (status, _body) = send(app, get("/v1/units/%2Fno%2Fsuch.unit")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[rstest]
#[tokio::test]
async fn registering_main_files_updates_the_visibility_filter(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);
    let state = seeded_state(&artifacts, &cfg);
    let app = router(state);

    let (status, body) = send(
        app,
        post_json("/v1/main-files", json!({ "paths": ["/proj/a.cpp"], "product_name": "demo" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["product_name"], "demo");
}

#[rstest]
#[tokio::test]
async fn stats_reports_nonempty_table_rows(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);
    let state = seeded_state(&artifacts, &cfg);
    let app = router(state);

    let (status, body) = send(app, get("/v1/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["tables"].as_array().unwrap().len() > 0);
}

#[rstest]
#[tokio::test]
async fn poll_for_unit_changes_unblocks_once_a_later_ingest_pass_bumps_the_generation(tmp_dir: PathBuf) {
    let root = store_root(tmp_dir);
    let artifacts = artifact_root(root.clone());
    let cfg = config(root);
    let state = seeded_state(&artifacts, &cfg);
    let generation = state.ingest_generation.clone();
    let notify = state.ingest_notify.clone();
    let app = router(state);

    let bumper = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        generation.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        notify.notify_waiters();
    });

    let (status, body) = send(app, post_json("/v1/poll", json!({ "is_initial_scan": true }))).await;
    bumper.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}
