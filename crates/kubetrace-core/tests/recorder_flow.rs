//! End-to-end: record a controller's calls and reconciles, then run the
//! offline consumers over the stored session.

use tempfile::TempDir;

use kubetrace_core::analysis::AnalysisReport;
use kubetrace_core::causality::{
    CausalityOptions, EdgeType, build_causality_chains, build_causality_graph, render_chains,
};
use kubetrace_core::model::OpType;
use kubetrace_core::recorder::{Recorder, RecorderConfig, RecordedCall, SpanTrigger};
use kubetrace_core::replay::{ReplayConfig, ReplayCursor};
use kubetrace_core::storage::Store;
use kubetrace_core::verify::verify_store;

const SESSION: &str = "checkout-operator-run";

fn write_call(kind: &str, name: &str, uid: &str, rv: &str, duration_ms: i64) -> RecordedCall {
    let mut call = RecordedCall::new(OpType::Update, kind, "prod", name);
    call.resource_data = format!("{{\"metadata\":{{\"uid\":\"{uid}\"}}}}");
    call.uid = uid.to_string();
    call.resource_version = rv.to_string();
    call.verb = "update".to_string();
    call.duration_ms = duration_ms;
    call
}

/// One controller: writes a ConfigMap, reconciles on it, and writes a Secret
/// from inside the reconcile.
fn record_session(store: &Store) {
    let mut rec = Recorder::new(
        RecorderConfig::new(SESSION).with_actor("shop/checkout-controller"),
    )
    .unwrap();

    rec.record(store, write_call("ConfigMap", "checkout-config", "cm-1", "5", 12))
        .unwrap();

    let span_id = rec
        .start_span(
            store,
            "ConfigMap",
            "prod",
            "checkout-config",
            SpanTrigger {
                uid: "cm-1".to_string(),
                resource_version: "5".to_string(),
                reason: "configmap updated".to_string(),
            },
        )
        .unwrap();

    rec.record(store, write_call("Secret", "checkout-token", "sec-1", "2", 1_400))
        .unwrap();

    let mut failing = RecordedCall::new(OpType::Get, "Pod", "prod", "checkout-0");
    failing.error = "pods \"checkout-0\" not found".to_string();
    failing.duration_ms = 3;
    rec.record(store, failing).unwrap();

    rec.end_span(store, &span_id, "").unwrap();
}

#[test]
fn recorded_session_links_writes_and_reconciles() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("flow.db");
    let store = Store::open(&db).unwrap();
    record_session(&store);

    let ops = store.query_operations(SESSION).unwrap();
    let spans = store.query_spans(SESSION).unwrap();
    assert_eq!(ops.len(), 3);
    assert_eq!(spans.len(), 1);
    assert!(!spans[0].is_open());

    let (graph, warnings) =
        build_causality_graph(&ops, &spans, CausalityOptions::default()).unwrap();
    assert!(warnings.is_empty(), "warnings: {warnings:?}");

    let span_node = format!("span:{}", spans[0].id);
    assert!(
        graph
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::OpToSpan && e.from == "op:1" && e.to == span_node),
        "missing trigger edge; edges: {:?}",
        graph.edges
    );
    assert!(
        graph
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::SpanToOp && e.from == span_node && e.to == "op:2"),
        "missing attribution edge; edges: {:?}",
        graph.edges
    );

    let chains = build_causality_chains(&graph, 0, 0);
    assert!(!chains.is_empty());
    assert!(chains[0].length >= 3, "chains: {chains:?}");
    let lines = render_chains(&graph, &chains);
    assert!(
        lines[0].contains("writes ConfigMap/prod/checkout-config@rv5"),
        "got: {}",
        lines[0]
    );
    assert!(lines[0].contains("reconciles ConfigMap/prod/checkout-config"));
}

#[test]
fn recorded_session_analyzes_and_replays() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("flow.db");
    let store = Store::open(&db).unwrap();
    record_session(&store);

    let ops = store.query_operations(SESSION).unwrap();

    let report = AnalysisReport::build(SESSION, &ops, 2, 1_000).unwrap();
    let slow = report.slow_operations.as_ref().expect("slow section");
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].resource, "Secret/prod/checkout-token");
    let errors = report.errors.as_ref().expect("error section");
    assert_eq!(errors.total, 1);
    assert_eq!(errors.by_type.get("GET"), Some(&1));

    let mut cursor = ReplayCursor::new(ops, ReplayConfig::new(SESSION)).unwrap();
    let first = cursor.step_forward().unwrap();
    assert_eq!(first.op_type, OpType::Update);
    assert_eq!(cursor.progress(), (1, 3));
    let cached = cursor
        .cached_resource("ConfigMap", "prod", "checkout-config")
        .unwrap();
    assert_eq!(cached["metadata"]["uid"], "cm-1");

    let stats = cursor.stats();
    assert_eq!(stats.total_ops, 3);
    assert_eq!(stats.update_ops, 2);
    assert_eq!(stats.get_ops, 1);
    assert_eq!(stats.error_count, 1);
    assert_eq!(stats.max_duration_ms, 1_400);
}

#[test]
fn recorded_session_passes_verification() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("flow.db");
    let store = Store::open(&db).unwrap();
    record_session(&store);
    store.close().unwrap();

    let report = verify_store(&db, true).unwrap();
    assert!(!report.has_errors(), "errors: {:?}", report.errors);
    assert!(report.warnings.is_empty(), "warnings: {:?}", report.warnings);
    assert_eq!(report.stats.sessions, 1);
    assert_eq!(report.stats.operations, 3);
    assert_eq!(report.stats.spans, 1);
}
