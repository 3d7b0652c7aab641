// src/workflow/driver.rs
//
// =============================================================================
// SAXSFLOW: BATCH & REALTIME DRIVERS (v 0.1 )
// =============================================================================
//
// Loops that repeatedly execute a sub-workflow on behalf of a Batch or
// Realtime operation.
//
// Per iteration:
//   1. (optional) reset the sub-workflow
//   2. write the input tuple into the routes (`set_wf_input`)
//   3. run the sub-workflow with the routes marked as driven
//   4. harvest its outputs and publish them as `batch_outputs.<i>`
//
// After the loop the operation's `batch_inputs` / `batch_outputs` outputs
// hold one entry per finished iteration.

use super::engine::RunScope;
use super::Workflow;
use crate::events::{RunStatus, WorkflowEvent};
use crate::operation::{InputPoller, OpIo, BATCH_INPUTS, BATCH_OUTPUTS, ROUTES_INPUT, WORKFLOW_INPUT};
use crate::value::Value;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::time::Duration;

/// Optional input naming the sub-workflow addresses to collect.
pub const HARVEST_INPUT: &str = "harvest";
/// Optional input: reset the sub-workflow before each iteration.
pub const RESET_INPUT: &str = "reset";

// ============================================================================
// 1. SHARED ITERATION
// ============================================================================

#[derive(Debug, Clone)]
struct SubRun {
    sub: Workflow,
    routes: Vec<String>,
    driven: HashSet<String>,
    harvest: Vec<String>,
    reset_each_iteration: bool,
}

#[derive(Default)]
struct Collected {
    inputs: Vec<Value>,
    outputs: Vec<Value>,
}

impl SubRun {
    fn new(sub: Workflow, routes: Vec<String>) -> Self {
        Self {
            driven: routes.iter().cloned().collect(),
            sub,
            routes,
            harvest: Vec::new(),
            reset_each_iteration: false,
        }
    }

    fn from_io(io: &OpIo) -> Result<Self> {
        let sub = io.input_workflow(WORKFLOW_INPUT)?;
        let routes = io.input_strings(ROUTES_INPUT)?;
        let mut run = Self::new(sub, routes);
        if io.inputs().contains_key(HARVEST_INPUT) {
            run.harvest = io.input_strings(HARVEST_INPUT)?;
        }
        if let Some(Value::Bool(reset)) = io.inputs().get(RESET_INPUT) {
            run.reset_each_iteration = *reset;
        }
        Ok(run)
    }

    /// Clears a stale stop on the sub-workflow once per drive. Stops raised
    /// between iterations are kept.
    fn admit(&self) {
        self.sub.admit();
    }

    /// Runs one iteration. `Ok(false)` means the sub-workflow was cancelled
    /// and the loop should stop.
    async fn iterate(
        &self,
        io: &OpIo,
        index: usize,
        tuple: Vec<Value>,
        collected: &mut Collected,
    ) -> Result<bool> {
        if tuple.len() != self.routes.len() {
            bail!(
                "input tuple {} has {} values for {} routes",
                index,
                tuple.len(),
                self.routes.len()
            );
        }
        if self.reset_each_iteration {
            self.sub.reset();
        }

        let mut written = IndexMap::with_capacity(tuple.len());
        for (route, value) in self.routes.iter().zip(tuple) {
            self.sub
                .set_wf_input(route, value.clone())
                .with_context(|| format!("writing iteration {} into '{}'", index, route))?;
            written.insert(route.clone(), value);
        }

        let scope = RunScope {
            driven: &self.driven,
            admitted: true,
            outer_stop: Some(io.stop_flag()),
        };
        let report = self.sub.run_scoped(scope).await;
        match &report.status {
            RunStatus::Completed => {}
            RunStatus::Cancelled => {
                log::info!("🛑 [{}] '{}' cancelled at iteration {}", io.workflow_name(), self.sub.name(), index);
                // A cancelled sub-workflow cancels the enclosing run.
                io.stop_flag().request();
                return Ok(false);
            }
            RunStatus::Failed { tag, message, .. } => bail!(
                "sub-workflow '{}' failed at iteration {} ({}): {}",
                self.sub.name(),
                index,
                tag.as_deref().unwrap_or("-"),
                message
            ),
        }

        let harvested = self.harvest()?;
        io.publish(&format!("{}.{}", BATCH_OUTPUTS, index), &harvested);
        io.emit(WorkflowEvent::BatchIteration {
            workflow: io.workflow_name().to_string(),
            tag: io.tag().to_string(),
            index,
        });
        collected.inputs.push(Value::Map(written));
        collected.outputs.push(harvested);
        Ok(true)
    }

    fn harvest(&self) -> Result<Value> {
        if self.harvest.is_empty() {
            return Ok(Value::Map(self.sub.wf_outputs_dict()));
        }
        let mut out = IndexMap::with_capacity(self.harvest.len());
        for address in &self.harvest {
            out.insert(address.clone(), self.sub.resolve(address)?);
        }
        Ok(Value::Map(out))
    }

    fn finish(io: &mut OpIo, collected: Collected) -> Result<()> {
        io.set_output(BATCH_INPUTS, Value::List(collected.inputs))?;
        io.set_output(BATCH_OUTPUTS, Value::List(collected.outputs))
    }
}

// ============================================================================
// 2. BATCH (finite tuple list)
// ============================================================================

#[derive(Debug, Clone)]
pub struct BatchDriver {
    run: SubRun,
}

impl BatchDriver {
    pub fn new(sub: Workflow, routes: Vec<String>) -> Self {
        Self {
            run: SubRun::new(sub, routes),
        }
    }

    /// Reads `workflow`, `input_routes` and the optional `harvest` /
    /// `reset` inputs of a Batch operation.
    pub fn from_io(io: &OpIo) -> Result<Self> {
        Ok(Self {
            run: SubRun::from_io(io)?,
        })
    }

    /// Addresses to collect per iteration; empty collects every output.
    pub fn harvest(mut self, addresses: Vec<String>) -> Self {
        self.run.harvest = addresses;
        self
    }

    pub fn reset_each_iteration(mut self, reset: bool) -> Self {
        self.run.reset_each_iteration = reset;
        self
    }

    pub fn sub(&self) -> &Workflow {
        &self.run.sub
    }

    pub async fn drive(&self, io: &mut OpIo, tuples: Vec<Vec<Value>>) -> Result<()> {
        log::info!(
            "🔁 [{}] {} drives '{}' over {} tuples",
            io.workflow_name(),
            io.tag(),
            self.run.sub.name(),
            tuples.len()
        );
        self.run.admit();
        let mut collected = Collected::default();
        for (index, tuple) in tuples.into_iter().enumerate() {
            if io.stop_requested() {
                log::info!("🛑 [{}] {} stopping after {} iterations", io.workflow_name(), io.tag(), index);
                break;
            }
            if !self.run.iterate(io, index, tuple, &mut collected).await? {
                break;
            }
        }
        SubRun::finish(io, collected)
    }
}

// ============================================================================
// 3. REALTIME (polled tuples)
// ============================================================================

#[derive(Debug, Clone)]
pub struct RealtimeDriver {
    run: SubRun,
    delay: Duration,
    max_idle_polls: u32,
}

impl RealtimeDriver {
    pub fn new(sub: Workflow, routes: Vec<String>, delay: Duration, max_idle_polls: u32) -> Self {
        Self {
            run: SubRun::new(sub, routes),
            delay,
            max_idle_polls,
        }
    }

    pub fn from_io(io: &OpIo, delay: Duration, max_idle_polls: u32) -> Result<Self> {
        Ok(Self {
            run: SubRun::from_io(io)?,
            delay,
            max_idle_polls,
        })
    }

    pub fn harvest(mut self, addresses: Vec<String>) -> Self {
        self.run.harvest = addresses;
        self
    }

    pub fn reset_each_iteration(mut self, reset: bool) -> Self {
        self.run.reset_each_iteration = reset;
        self
    }

    /// Polls until a stop is requested or `max_idle_polls` consecutive
    /// polls came back empty.
    pub async fn drive(&self, io: &mut OpIo, poller: &mut dyn InputPoller) -> Result<()> {
        log::info!(
            "📡 [{}] {} watching for '{}' inputs",
            io.workflow_name(),
            io.tag(),
            self.run.sub.name()
        );
        self.run.admit();
        let mut collected = Collected::default();
        let mut idle = 0u32;
        let mut index = 0usize;
        while !io.stop_requested() {
            match poller.poll().await? {
                Some(tuple) => {
                    idle = 0;
                    if !self.run.iterate(io, index, tuple, &mut collected).await? {
                        break;
                    }
                    index += 1;
                }
                None => {
                    idle += 1;
                    if idle > self.max_idle_polls {
                        log::info!("💤 [{}] {} idle, stopping after {} polls", io.workflow_name(), io.tag(), idle);
                        break;
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
        SubRun::finish(io, collected)
    }
}
