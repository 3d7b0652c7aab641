// src/workflow/engine.rs
//
// =============================================================================
// SAXSFLOW: RUN LOOP (v 0.1 )
// =============================================================================
//
// Executes a workflow layer by layer.
//
// Responsibilities:
// 1. Compute the execution stack and reset completion state.
// 2. Locate inputs, then dispatch each layer concurrently (JoinSet,
//    bounded by a Semaphore).
// 3. Write outputs back and emit per-op events as ops finish.
// 4. Honour stop requests between layers.
// 5. Emit exactly one ExecFinished per invocation.

use super::{StopFlag, Workflow};
use crate::error::{FlowError, FlowResult};
use crate::events::{RunReport, RunStatus, WorkflowEvent};
use crate::locator::{LocateContext, Located};
use crate::operation::{OpHooks, OpIo, Operation};
use crate::value::Value;
use anyhow::anyhow;
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

/// One located, ready-to-run operation.
struct Job {
    tag: String,
    op: Arc<dyn Operation>,
    io: OpIo,
}

/// Clears the running flag even if the run future is dropped.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// How one invocation is embedded.
pub(crate) struct RunScope<'a> {
    /// `tag.inputs.name` addresses written by an enclosing batch driver.
    pub driven: &'a HashSet<String>,
    /// The stop flag was already cleared when the run was admitted
    /// (`submit_wf`, batch driver start); a stop requested since then holds.
    pub admitted: bool,
    /// Stop flag of an enclosing workflow, honoured like our own.
    pub outer_stop: Option<&'a StopFlag>,
}

impl RunScope<'_> {
    fn stop_requested(&self, wf: &Workflow) -> bool {
        wf.stop_requested() || self.outer_stop.is_some_and(StopFlag::is_set)
    }
}

fn failed(tag: Option<&str>, error: &FlowError) -> RunStatus {
    RunStatus::Failed {
        tag: tag.map(str::to_string),
        kind: error.kind(),
        message: error.to_string(),
    }
}

impl Workflow {
    /// Runs every operation once, in stack order. Always completes with a
    /// report; the same report is broadcast as `ExecFinished`.
    /// A stop requested before this call is dropped.
    pub async fn run_wf(&self) -> RunReport {
        let driven = HashSet::new();
        let scope = RunScope {
            driven: &driven,
            admitted: false,
            outer_stop: None,
        };
        self.run_scoped(scope).await
    }

    /// Clears a stale stop request ahead of a queued run. A running
    /// workflow keeps its flag.
    pub(crate) fn admit(&self) {
        if !self.is_running() {
            self.stop_flag().clear();
        }
    }

    pub(crate) async fn run_scoped(&self, scope: RunScope<'_>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        let status = if self.running_flag().swap(true, Ordering::SeqCst) {
            log::warn!("⚠️  [{}] Already running, invocation rejected", self.name());
            failed(None, &FlowError::AlreadyRunning(self.name().to_string()))
        } else {
            let _guard = RunningGuard(self.running_flag());
            if !scope.admitted {
                self.stop_flag().clear();
            }
            self.events().emit(WorkflowEvent::RunStarted {
                workflow: self.name().to_string(),
                run_id,
            });
            log::info!("🚀 [{}] Run {} started", self.name(), run_id);
            self.execute(&scope).await
        };

        let report = RunReport {
            workflow: self.name().to_string(),
            run_id,
            started_at,
            finished_at: Utc::now(),
            status,
        };
        match &report.status {
            RunStatus::Completed => {
                log::info!("🏁 [{}] Completed in {} ms", self.name(), report.elapsed_ms())
            }
            RunStatus::Cancelled => log::info!("🛑 [{}] Cancelled", self.name()),
            RunStatus::Failed { message, .. } => {
                log::error!("💥 [{}] Failed: {}", self.name(), message)
            }
        }
        self.events().emit(WorkflowEvent::ExecFinished(report.clone()));
        report
    }

    async fn execute(&self, scope: &RunScope<'_>) -> RunStatus {
        let stack = match self.stack_with(scope.driven, &mut vec![self.identity()]) {
            Ok(stack) => stack,
            Err(e) => return failed(None, &e),
        };
        log::debug!("📚 [{}] Stack:\n{}", self.name(), stack);

        for node in self.write().values_mut() {
            node.completed = false;
        }

        let ctx = self.locate_context();
        for (depth, layer) in stack.layers().iter().enumerate() {
            if scope.stop_requested(self) {
                log::info!("🛑 [{}] Stopping before layer {}", self.name(), depth);
                return RunStatus::Cancelled;
            }

            let mut jobs = Vec::with_capacity(layer.len());
            for entry in layer {
                match self.prepare(entry.tag(), &ctx) {
                    Ok(job) => jobs.push(job),
                    Err(e) => return failed(Some(entry.tag()), &e),
                }
            }

            if let Err((tag, e)) = self.dispatch(jobs).await {
                return failed(tag.as_deref(), &e);
            }
            tokio::task::yield_now().await;
        }

        // A stop raised during the last layer (e.g. by a driver whose
        // sub-workflow was cancelled) still cancels the run.
        if scope.stop_requested(self) {
            log::info!("🛑 [{}] Stop requested during the last layer", self.name());
            return RunStatus::Cancelled;
        }
        RunStatus::Completed
    }

    /// Locates every input of `tag` against the current state and builds
    /// its invocation. No lock is held while locating.
    fn prepare(&self, tag: &str, ctx: &LocateContext) -> FlowResult<Job> {
        let (op, locators, driven, hooks, output_names) = {
            let nodes = self.read();
            let node = nodes
                .get(tag)
                .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))?;
            let hooks = OpHooks {
                workflow: self.name().to_string(),
                events: Some(self.events().clone()),
                log: Some(self.log_buffer().clone()),
                message_callback: node.message_callback.clone(),
                data_callback: node.data_callback.clone(),
                stop: self.stop_flag().clone(),
                config: self.config().clone(),
            };
            (
                node.op.clone(),
                node.input_locator.clone(),
                node.driven.clone(),
                hooks,
                node.outputs.keys().cloned().collect::<Vec<_>>(),
            )
        };

        let mut inputs = IndexMap::with_capacity(locators.len());
        for (name, locator) in &locators {
            let value = match locator.locate(ctx)? {
                Located::Value(v) => v,
                Located::Driven => driven.get(name).cloned().ok_or_else(|| {
                    FlowError::MissingBatchInput {
                        address: format!("{}.inputs.{}", tag, name),
                    }
                })?,
            };
            inputs.insert(name.clone(), value);
        }

        if let Some(node) = self.write().get_mut(tag) {
            node.inputs = inputs.clone();
        }

        Ok(Job {
            tag: tag.to_string(),
            io: OpIo::new(tag, inputs, output_names, hooks),
            op,
        })
    }

    /// Runs one layer. On failure the remaining in-flight operations are
    /// drained and the first failure is returned.
    async fn dispatch(&self, jobs: Vec<Job>) -> Result<(), (Option<String>, FlowError)> {
        let permits = Arc::new(Semaphore::new(self.config().layer_parallelism.max(1)));
        let mut set = JoinSet::new();

        for job in jobs {
            let permits = permits.clone();
            let bus = self.events().clone();
            let workflow = self.name().to_string();
            set.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let Job { tag, op, mut io } = job;
                bus.emit(WorkflowEvent::OpStarted {
                    workflow,
                    tag: tag.clone(),
                });
                // Inner task so a panicking op surfaces as a JoinError.
                let handle = tokio::spawn(async move {
                    op.run(&mut io).await.map(|()| io.into_outputs())
                });
                let result = match handle.await {
                    Ok(result) => result,
                    Err(e) if e.is_panic() => Err(anyhow!("operation panicked")),
                    Err(e) => Err(anyhow!("operation task aborted: {}", e)),
                };
                (tag, result)
            });
        }

        let mut failure = None;
        while let Some(joined) = set.join_next().await {
            let (tag, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("💥 [{}] Dispatcher task lost: {}", self.name(), e);
                    failure.get_or_insert((
                        None,
                        FlowError::OperationFailure {
                            tag: String::new(),
                            error: anyhow!("dispatcher task lost: {}", e),
                        },
                    ));
                    continue;
                }
            };
            match result {
                Ok(outputs) => self.complete(&tag, outputs),
                Err(error) => {
                    log::error!("❌ [{}] {} failed: {:#}", self.name(), tag, error);
                    self.events().emit(WorkflowEvent::OpFailed {
                        workflow: self.name().to_string(),
                        tag: tag.clone(),
                        error: format!("{:#}", error),
                    });
                    if failure.is_none() {
                        failure = Some((Some(tag.clone()), FlowError::OperationFailure { tag, error }));
                    }
                }
            }
        }

        match failure {
            Some(f) => Err(f),
            None => Ok(()),
        }
    }

    fn complete(&self, tag: &str, outputs: IndexMap<String, Value>) {
        match self.write().get_mut(tag) {
            Some(node) => {
                node.outputs = outputs;
                node.completed = true;
            }
            None => log::warn!("⚠️  [{}] {} was removed while running", self.name(), tag),
        }
        log::debug!("✅ [{}] {} finished", self.name(), tag);
        self.events().emit(WorkflowEvent::OpFinished {
            workflow: self.name().to_string(),
            tag: tag.to_string(),
        });
    }
}
