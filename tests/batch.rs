mod common;

use common::*;
use pretty_assertions::assert_eq;
use saxsflow::ops::{BatchFromFiles, BatchFromList, RealtimeFromFiles};
use saxsflow::{
    EngineConfig, ErrorKind, InputLocator, StackEntry, TypeTag, Value, WfManager, Workflow,
    WorkflowEvent,
};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn manager() -> WfManager {
    WfManager::new(EngineConfig {
        n_wf_threads: 2,
        ..EngineConfig::default()
    })
}

/// `read` takes a batch-driven path, `double` doubles what was read.
fn reduce_workflow(mgr: &WfManager) -> Workflow {
    let sub = mgr.add_wf("reduce").unwrap();
    sub.add_op("read", ReadScalar).unwrap();
    sub.add_op("double", Double).unwrap();
    sub.set_input_locator("read", "path", InputLocator::batch_driven()).unwrap();
    sub.set_input_locator("double", "x", InputLocator::workflow_ref("read.outputs.value").unwrap())
        .unwrap();
    sub
}

fn write_frames(dir: &Path) {
    for (name, v) in [("a.dat", "1"), ("b.dat", "2"), ("c.dat", "3"), ("notes.txt", "99")] {
        std::fs::write(dir.join(name), v).unwrap();
    }
}

fn wire_driver(main: &Workflow, tag: &str, dir: &Path) {
    let lit = |tp: TypeTag, v: serde_json::Value| InputLocator::literal(tp, v).unwrap();
    main.set_input_locator(tag, "dir_path", lit(TypeTag::String, json!(dir.to_str().unwrap())))
        .unwrap();
    main.set_input_locator(tag, "regex", lit(TypeTag::String, json!(r"\.dat$"))).unwrap();
    main.set_input_locator(tag, "workflow", InputLocator::entire_workflow("reduce").unwrap())
        .unwrap();
    main.set_input_locator(tag, "input_routes", lit(TypeTag::String, json!("read.inputs.path")))
        .unwrap();
    main.set_input_locator(tag, "harvest", lit(TypeTag::String, json!(["double.outputs.y"])))
        .unwrap();
}

#[tokio::test]
async fn batch_over_matching_files() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path());

    let mgr = manager();
    reduce_workflow(&mgr);
    let main = mgr.add_wf("main").unwrap();
    main.add_op("batch", BatchFromFiles).unwrap();
    wire_driver(&main, "batch", dir.path());

    let published = Arc::new(Mutex::new(Vec::new()));
    let sink = published.clone();
    main.set_data_callback(
        "batch",
        Arc::new(move |suffix: &str, _v: &Value| sink.lock().unwrap().push(suffix.to_string())),
    )
    .unwrap();

    let mut rx = main.subscribe();
    let report = main.run_wf().await;
    assert!(report.is_success(), "{:?}", report.status);

    let outputs = main.resolve("batch.outputs.batch_outputs").unwrap();
    let ys: Vec<Value> = outputs
        .as_list()
        .unwrap()
        .iter()
        .map(|o| o.as_map().unwrap()["double.outputs.y"].clone())
        .collect();
    assert_eq!(ys, vec![Value::Float(2.0), Value::Float(4.0), Value::Float(6.0)]);

    let inputs = main.resolve("batch.outputs.batch_inputs.2").unwrap();
    let path = inputs.as_map().unwrap()["read.inputs.path"].as_str().unwrap().to_string();
    assert!(path.ends_with("c.dat"));

    assert_eq!(
        *published.lock().unwrap(),
        vec!["batch_outputs.0", "batch_outputs.1", "batch_outputs.2"]
    );
    let iterations = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, WorkflowEvent::BatchIteration { .. }))
        .count();
    assert_eq!(iterations, 3);
}

#[tokio::test]
async fn batch_stack_nests_the_driven_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager();
    reduce_workflow(&mgr);
    let main = mgr.add_wf("main").unwrap();
    main.add_op("batch", BatchFromFiles).unwrap();
    wire_driver(&main, "batch", dir.path());

    let stack = main.execution_stack().unwrap();
    match &stack.layers()[0][0] {
        StackEntry::Driver { tag, nested: Some(sub) } => {
            assert_eq!(tag, "batch");
            assert_eq!(
                sub.tags(),
                vec![vec!["read".to_string()], vec!["double".to_string()]]
            );
        }
        other => panic!("unexpected entry {other:?}"),
    }
    assert!(stack.to_string().contains("batch drives:"));
}

#[tokio::test]
async fn batch_from_list_runs_each_tuple() {
    let mgr = manager();
    let sub = mgr.add_wf("scale").unwrap();
    sub.add_op("double", Double).unwrap();
    sub.set_input_locator("double", "x", InputLocator::batch_driven()).unwrap();

    let main = mgr.add_wf("main").unwrap();
    main.add_op("batch", BatchFromList).unwrap();
    main.set_input_locator("batch", "workflow", InputLocator::entire_workflow("scale").unwrap())
        .unwrap();
    main.set_input_locator(
        "batch",
        "input_routes",
        InputLocator::literal(TypeTag::String, json!(["double.inputs.x"])).unwrap(),
    )
    .unwrap();
    main.set_input_locator(
        "batch",
        "input_tuples",
        InputLocator::literal(TypeTag::AutoCoerce, json!([[1], [2.5]])).unwrap(),
    )
    .unwrap();

    assert!(main.run_wf().await.is_success());
    assert_eq!(
        main.resolve("batch.outputs.batch_outputs.1.double.y").unwrap(),
        Value::Float(5.0)
    );
    // Whole-output harvest when no harvest list is given.
    assert_eq!(
        main.resolve("batch.outputs.batch_outputs.0.double.y").unwrap(),
        Value::Float(2.0)
    );
}

#[tokio::test]
async fn sub_workflow_failure_fails_the_batch() {
    let mgr = manager();
    let sub = mgr.add_wf("reduce").unwrap();
    sub.add_op("read", ReadScalar).unwrap();
    sub.set_input_locator("read", "path", InputLocator::batch_driven()).unwrap();

    let main = mgr.add_wf("main").unwrap();
    main.add_op("batch", BatchFromList).unwrap();
    main.set_input_locator("batch", "workflow", InputLocator::entire_workflow("reduce").unwrap())
        .unwrap();
    main.set_input_locator(
        "batch",
        "input_routes",
        InputLocator::literal(TypeTag::String, "read.inputs.path").unwrap(),
    )
    .unwrap();
    main.set_input_locator(
        "batch",
        "input_tuples",
        InputLocator::literal(TypeTag::String, json!(["/definitely/not/here.dat"])).unwrap(),
    )
    .unwrap();

    let report = main.run_wf().await;
    assert_eq!(report.failure_kind(), Some(ErrorKind::OperationFailure));
    assert_eq!(report.failed_tag(), Some("batch"));
}

#[tokio::test]
async fn realtime_processes_files_then_goes_idle() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path());

    let mgr = manager();
    reduce_workflow(&mgr);
    let main = mgr.add_wf("main").unwrap();
    main.add_op("watch", RealtimeFromFiles).unwrap();
    wire_driver(&main, "watch", dir.path());
    main.set_input_locator("watch", "delay_ms", InputLocator::literal(TypeTag::Int, 1).unwrap())
        .unwrap();
    main.set_input_locator("watch", "max_idle_polls", InputLocator::literal(TypeTag::Int, 2).unwrap())
        .unwrap();

    let report = main.run_wf().await;
    assert!(report.is_success(), "{:?}", report.status);
    let outputs = main.resolve("watch.outputs.batch_outputs").unwrap();
    let ys: Vec<f64> = outputs
        .as_list()
        .unwrap()
        .iter()
        .filter_map(|o| o.as_map().unwrap()["double.outputs.y"].as_f64())
        .collect();
    assert_eq!(ys, vec![2.0, 4.0, 6.0]);
}

/// `acc` adds each driven `x` to its own previous total, read back through
/// the `scale` workflow plugin.
async fn running_totals(reset: bool) -> Vec<Value> {
    let mgr = manager();
    let sub = mgr.add_wf("scale").unwrap();
    sub.add_op("acc", Accumulate).unwrap();
    sub.set_input_locator("acc", "x", InputLocator::batch_driven()).unwrap();
    sub.set_input_locator("acc", "previous", InputLocator::plugin_ref("scale.content.acc.outputs.total").unwrap())
        .unwrap();

    let main = mgr.add_wf("main").unwrap();
    main.add_op("batch", BatchFromList).unwrap();
    let lit = |tp: TypeTag, v: serde_json::Value| InputLocator::literal(tp, v).unwrap();
    main.set_input_locator("batch", "workflow", InputLocator::entire_workflow("scale").unwrap())
        .unwrap();
    main.set_input_locator("batch", "input_routes", lit(TypeTag::String, json!("acc.inputs.x"))).unwrap();
    main.set_input_locator("batch", "input_tuples", lit(TypeTag::AutoCoerce, json!([[1], [2], [3]])))
        .unwrap();
    main.set_input_locator("batch", "harvest", lit(TypeTag::String, json!(["acc.outputs.total"]))).unwrap();
    main.set_input_locator("batch", "reset", lit(TypeTag::Bool, json!(reset))).unwrap();

    let report = main.run_wf().await;
    assert!(report.is_success(), "{:?}", report.status);
    main.resolve("batch.outputs.batch_outputs")
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|o| o.as_map().unwrap()["acc.outputs.total"].clone())
        .collect()
}

#[tokio::test]
async fn outputs_carry_between_iterations_unless_reset() {
    assert_eq!(
        running_totals(false).await,
        vec![Value::Float(1.0), Value::Float(3.0), Value::Float(6.0)]
    );
    assert_eq!(
        running_totals(true).await,
        vec![Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]
    );
}

#[tokio::test]
async fn stopping_a_realtime_run_keeps_collected_outputs() {
    let dir = tempfile::tempdir().unwrap();
    for (name, v) in [("a.dat", "1"), ("b.dat", "2")] {
        std::fs::write(dir.path().join(name), v).unwrap();
    }

    let mgr = manager();
    reduce_workflow(&mgr);
    let main = mgr.add_wf("main").unwrap();
    main.add_op("watch", RealtimeFromFiles).unwrap();
    wire_driver(&main, "watch", dir.path());
    main.set_input_locator("watch", "delay_ms", InputLocator::literal(TypeTag::Int, 5).unwrap())
        .unwrap();
    main.set_input_locator("watch", "max_idle_polls", InputLocator::literal(TypeTag::Int, 100_000).unwrap())
        .unwrap();

    let mut rx = main.subscribe();
    let running = main.clone();
    let handle = tokio::spawn(async move { running.run_wf().await });

    let mut seen = 0;
    while seen < 2 {
        if let WorkflowEvent::BatchIteration { .. } = rx.recv().await.unwrap() {
            seen += 1;
        }
    }
    main.stop_wf();

    let report = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("realtime run ignored the stop")
        .unwrap();
    assert!(report.is_cancelled(), "{:?}", report.status);
    let outputs = main.resolve("watch.outputs.batch_outputs").unwrap();
    assert_eq!(outputs.as_list().unwrap().len(), 2);
}

#[tokio::test]
async fn cancelled_sub_workflow_cancels_the_batch() {
    let mgr = manager();
    let count = Arc::new(AtomicUsize::new(0));
    let sub = mgr.add_wf("ticks").unwrap();
    sub.add_op("tick", Tick::new(&count, 0)).unwrap();
    sub.set_input_locator("tick", "after", InputLocator::batch_driven()).unwrap();

    let main = mgr.add_wf("main").unwrap();
    main.add_op("batch", BatchFromList).unwrap();
    main.set_input_locator("batch", "workflow", InputLocator::entire_workflow("ticks").unwrap())
        .unwrap();
    main.set_input_locator(
        "batch",
        "input_routes",
        InputLocator::literal(TypeTag::String, json!("tick.inputs.after")).unwrap(),
    )
    .unwrap();
    main.set_input_locator(
        "batch",
        "input_tuples",
        InputLocator::literal(TypeTag::AutoCoerce, json!([[1], [2], [3]])).unwrap(),
    )
    .unwrap();

    // Stop the sub-workflow as soon as the first iteration is published.
    let target = sub.clone();
    main.set_data_callback(
        "batch",
        Arc::new(move |suffix: &str, _v: &Value| {
            if suffix == "batch_outputs.0" {
                target.stop_wf();
            }
        }),
    )
    .unwrap();

    let report = main.run_wf().await;
    assert!(report.is_cancelled(), "{:?}", report.status);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let outputs = main.resolve("batch.outputs.batch_outputs").unwrap();
    assert_eq!(outputs.as_list().unwrap().len(), 1);

    // The stale stop does not leak into the next batch.
    main.set_data_callback("batch", Arc::new(|_: &str, _: &Value| {})).unwrap();
    assert!(main.run_wf().await.is_success());
    assert_eq!(count.load(Ordering::SeqCst), 4);
}
