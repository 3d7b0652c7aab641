mod common;

use common::*;
use pretty_assertions::assert_eq;
use saxsflow::{
    EngineConfig, ErrorKind, InputLocator, OpManager, ValuePlugin, Value, WfManager, WorkflowDoc,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn manager(slots: usize) -> WfManager {
    let mut ops = OpManager::with_builtins();
    ops.register_op::<Gen>();
    ops.register_op::<Double>();
    WfManager::with_ops(
        EngineConfig {
            n_wf_threads: slots,
            ..EngineConfig::default()
        },
        ops,
    )
}

#[tokio::test]
async fn workflows_read_each_other_through_plugins() {
    let mgr = manager(2);
    let calib = mgr.add_wf("calib").unwrap();
    calib.add_op("gen", Gen).unwrap();
    assert!(mgr.run_wf("calib").await.unwrap().is_success());

    let main = mgr.add_wf("main").unwrap();
    main.add_op("double", Double).unwrap();
    main.set_input_locator("double", "x", InputLocator::plugin_ref("calib.content.gen.outputs.x").unwrap())
        .unwrap();

    assert!(mgr.run_wf("main").await.unwrap().is_success());
    assert_eq!(main.resolve("double.outputs.y").unwrap(), Value::Float(14.0));
}

#[tokio::test]
async fn reference_datasets_feed_operations() {
    let mgr = manager(1);
    mgr.plugins()
        .add_plugin("agbeh", ValuePlugin::new("silver behenate", json!({"peaks": [0.1076, 0.2152]})))
        .unwrap();
    let wf = mgr.add_wf("fit").unwrap();
    wf.add_op("double", Double).unwrap();
    wf.set_input_locator("double", "x", InputLocator::plugin_ref("agbeh.content.peaks.0").unwrap())
        .unwrap();

    assert!(wf.run_wf().await.is_success());
    assert_eq!(wf.resolve("double.outputs.y").unwrap(), Value::Float(0.2152));

    wf.set_input_locator("double", "x", InputLocator::plugin_ref("nobody.content").unwrap())
        .unwrap();
    let report = wf.run_wf().await;
    assert_eq!(report.failure_kind(), Some(ErrorKind::UnknownAddress));
}

#[tokio::test]
async fn submit_and_wait_on_slots() {
    let mgr = manager(2);
    let count = Arc::new(AtomicUsize::new(0));
    for name in ["a", "b", "c"] {
        let wf = mgr.add_wf(name).unwrap();
        wf.add_op("tick", Tick::new(&count, 20)).unwrap();
    }

    let mut slots = Vec::new();
    for name in ["a", "b", "c"] {
        slots.push(mgr.submit_wf(name).await.unwrap());
    }
    assert!(slots.iter().all(|s| *s < 2));

    let reports = mgr.wait_all().await;
    assert!(reports.iter().all(|r| r.is_success()));
    // The third submission waited for a slot and reclaimed it.
    assert_eq!(count.load(Ordering::SeqCst), 3);
    assert!(mgr.busy_slots().is_empty());
}

#[tokio::test]
async fn stop_all_cancels_running_workflows() {
    let mgr = manager(2);
    let count = Arc::new(AtomicUsize::new(0));
    let wf = mgr.add_wf("long").unwrap();
    wf.add_op("first", Tick::new(&count, 100)).unwrap();
    wf.add_op("second", Tick::new(&count, 0)).unwrap();
    wf.set_input_locator("second", "after", InputLocator::workflow_ref("first.outputs.done").unwrap())
        .unwrap();

    let slot = mgr.submit_wf("long").await.unwrap();
    while !wf.is_running() {
        tokio::task::yield_now().await;
    }
    mgr.stop_all();
    let report = mgr.wait_for_thread(slot).await.unwrap();
    assert!(report.is_cancelled());
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_right_after_submit_is_not_lost() {
    let mgr = manager(1);
    let count = Arc::new(AtomicUsize::new(0));
    let wf = mgr.add_wf("long").unwrap();
    wf.add_op("tick", Tick::new(&count, 50)).unwrap();

    // A stop raised while idle is stale by the next run.
    wf.stop_wf();
    assert!(wf.run_wf().await.is_success());
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let slot = mgr.submit_wf("long").await.unwrap();
    mgr.stop_all();
    let report = mgr.wait_for_thread(slot).await.unwrap();
    assert!(report.is_cancelled(), "{:?}", report.status);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn load_document_and_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.yml");
    std::fs::write(
        &path,
        r#"
gen:
  type: Gen
double:
  type: Double
  inputs:
    x: { src: workflow_ref, tp: ref, val: gen.outputs.x }
"#,
    )
    .unwrap();

    let mgr = manager(1);
    let (wf, report) = mgr.load_wf("chain", &path).unwrap();
    assert!(report.is_clean());
    assert_eq!(wf.op_tags(), vec!["gen".to_string(), "double".to_string()]);
    assert!(wf.run_wf().await.is_success());
    assert_eq!(wf.resolve("double.outputs.y").unwrap(), Value::Float(14.0));

    let doc = wf.to_doc();
    let yaml = doc.to_yaml().unwrap();
    assert_eq!(WorkflowDoc::from_yaml_str(&yaml).unwrap(), doc);
}

#[tokio::test]
async fn entire_workflow_needs_a_known_name() {
    let mgr = manager(1);
    let wf = mgr.add_wf("main").unwrap();
    wf.add_op("batch", saxsflow::ops::BatchFromList).unwrap();
    wf.set_input_locator("batch", "workflow", InputLocator::entire_workflow("ghost").unwrap())
        .unwrap();
    assert_eq!(wf.execution_stack().unwrap_err().kind(), ErrorKind::UnknownWorkflow);
    let report = wf.run_wf().await;
    assert_eq!(report.failure_kind(), Some(ErrorKind::UnknownWorkflow));
}
