#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use saxsflow::{IoSpec, OpIo, Operation, Value, WorkflowEvent};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Produces `x = 7`.
#[derive(Default)]
pub struct Gen;

#[async_trait]
impl Operation for Gen {
    fn type_name(&self) -> &'static str {
        "Gen"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("x", "seven")]
    }
    async fn run(&self, io: &mut OpIo) -> Result<()> {
        io.set_output("x", 7)
    }
}

/// `y = 2 * x`
#[derive(Default)]
pub struct Double;

#[async_trait]
impl Operation for Double {
    fn type_name(&self) -> &'static str {
        "Double"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("x", "number")]
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("y", "twice x")]
    }
    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let x = io.input_f64("x")?;
        io.set_output("y", 2.0 * x)
    }
}

/// Emits a small I(q) curve.
#[derive(Default)]
pub struct Curve;

#[async_trait]
impl Operation for Curve {
    fn type_name(&self) -> &'static str {
        "Curve"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("q_I", "rows of (q, I)")]
    }
    async fn run(&self, io: &mut OpIo) -> Result<()> {
        io.set_output("q_I", Value::from(json!([[0.1, 10.0], [0.2, 8.0]])))
    }
}

/// Reads one number from the text file at `path`.
#[derive(Default)]
pub struct ReadScalar;

#[async_trait]
impl Operation for ReadScalar {
    fn type_name(&self) -> &'static str {
        "ReadScalar"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("path", "file holding one number")]
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("value", "the number")]
    }
    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let path = io.input_str("path")?.to_string();
        let text = std::fs::read_to_string(&path).with_context(|| path.clone())?;
        let value: f64 = text.trim().parse()?;
        io.message(format!("read {} from {}", value, path));
        io.set_output("value", value)
    }
}

/// Counts invocations, optionally sleeping first. `after` lets tests chain
/// ticks into layers.
pub struct Tick {
    pub count: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl Tick {
    pub fn new(count: &Arc<AtomicUsize>, delay_ms: u64) -> Self {
        Self {
            count: count.clone(),
            delay: Duration::from_millis(delay_ms),
        }
    }
}

#[async_trait]
impl Operation for Tick {
    fn type_name(&self) -> &'static str {
        "Tick"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("after", "ordering only")]
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("done", "true once ticked")]
    }
    async fn run(&self, io: &mut OpIo) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.count.fetch_add(1, Ordering::SeqCst);
        io.set_output("done", true)
    }
}

/// `total = x + previous`, where `previous` is typically the op's own last
/// output read back through a plugin. Null counts as zero.
#[derive(Default)]
pub struct Accumulate;

#[async_trait]
impl Operation for Accumulate {
    fn type_name(&self) -> &'static str {
        "Accumulate"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("x", "number"), IoSpec::new("previous", "running total")]
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        vec![IoSpec::new("total", "x plus previous")]
    }
    async fn run(&self, io: &mut OpIo) -> Result<()> {
        let x = io.input_f64("x")?;
        let previous = io.input("previous")?.as_f64().unwrap_or(0.0);
        io.set_output("total", x + previous)
    }
}

/// Always fails.
#[derive(Default)]
pub struct Broken;

#[async_trait]
impl Operation for Broken {
    fn type_name(&self) -> &'static str {
        "Broken"
    }
    fn input_specs(&self) -> Vec<IoSpec> {
        Vec::new()
    }
    fn output_specs(&self) -> Vec<IoSpec> {
        Vec::new()
    }
    async fn run(&self, _io: &mut OpIo) -> Result<()> {
        anyhow::bail!("detector offline")
    }
}

/// Everything currently queued on a subscription.
pub fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

pub fn exec_finished_count(events: &[WorkflowEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::ExecFinished(_)))
        .count()
}
