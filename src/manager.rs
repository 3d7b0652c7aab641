// src/manager.rs
//
// =============================================================================
// SAXSFLOW: WORKFLOW MANAGER (v 0.1 )
// =============================================================================
//
// The Local Scheduler.
//
// Responsibilities:
// 1. Own the named workflows and the shared plugin namespace.
// 2. Register every workflow as a plugin so others can read its outputs.
// 3. Run workflows on a fixed pool of worker slots (admission control).
// 4. Fan out stop requests.

use crate::config::EngineConfig;
use crate::error::{FlowError, FlowResult};
use crate::events::RunReport;
use crate::op_manager::OpManager;
use crate::plugin::{PluginManager, WorkflowPlugin};
use crate::workflow::persist::LoadReport;
use crate::workflow::engine::RunScope;
use crate::workflow::{check_tag_format, Workflow};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

const MAX_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// 1. WORKER SLOTS
// ============================================================================

enum Slot {
    Free,
    /// Handed out by `next_available_thread`, not started yet.
    Reserved,
    Busy(JoinHandle<RunReport>),
}

impl Slot {
    /// A finished task no longer occupies its slot.
    fn is_available(&self) -> bool {
        match self {
            Slot::Free => true,
            Slot::Reserved => false,
            Slot::Busy(handle) => handle.is_finished(),
        }
    }
}

/// Exponential back-off: 1 ms doubling up to `MAX_BACKOFF`, yielding to the
/// runtime before every sleep.
struct Backoff(Duration);

impl Backoff {
    fn new() -> Self {
        Self(Duration::from_millis(1))
    }

    async fn wait(&mut self) {
        tokio::task::yield_now().await;
        tokio::time::sleep(self.0).await;
        self.0 = (self.0 * 2).min(MAX_BACKOFF);
    }
}

// ============================================================================
// 2. THE MANAGER
// ============================================================================

pub(crate) struct ManagerInner {
    workflows: RwLock<IndexMap<String, Workflow>>,
    plugins: PluginManager,
    ops: Arc<OpManager>,
    slots: Mutex<Vec<Slot>>,
    config: EngineConfig,
}

#[derive(Clone)]
pub struct WfManager {
    inner: Arc<ManagerInner>,
}

/// Held by managed workflows; the manager owns them, not the reverse.
#[derive(Clone)]
pub(crate) struct WeakWfManager(Weak<ManagerInner>);

impl WeakWfManager {
    pub fn upgrade(&self) -> Option<WfManager> {
        self.0.upgrade().map(|inner| WfManager { inner })
    }
}

impl Default for WfManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl WfManager {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_ops(config, OpManager::with_builtins())
    }

    pub fn with_ops(config: EngineConfig, ops: OpManager) -> Self {
        let slots = (0..config.n_wf_threads.max(1)).map(|_| Slot::Free).collect();
        log::info!("🧭 WfManager ready. Worker slots: {}", config.n_wf_threads.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                workflows: RwLock::new(IndexMap::new()),
                plugins: PluginManager::new(),
                ops: Arc::new(ops),
                slots: Mutex::new(slots),
                config,
            }),
        }
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    pub fn ops(&self) -> &OpManager {
        &self.inner.ops
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn downgrade(&self) -> WeakWfManager {
        WeakWfManager(Arc::downgrade(&self.inner))
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.inner.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Creates an empty workflow named `name` and registers it as a plugin.
    pub fn add_wf(&self, name: &str) -> FlowResult<Workflow> {
        check_tag_format(name).into_result(name)?;
        let mut workflows = self
            .inner
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if workflows.contains_key(name) || self.inner.plugins.get_plugin(name).is_ok() {
            return Err(FlowError::TagNotUnique(name.to_string()));
        }
        let wf = Workflow::managed(name, self);
        self.inner.plugins.add_plugin(name, WorkflowPlugin::new(&wf))?;
        workflows.insert(name.to_string(), wf.clone());
        log::info!("📋 Workflow '{}' added", name);
        Ok(wf)
    }

    pub fn remove_wf(&self, name: &str) -> FlowResult<()> {
        let removed = self
            .inner
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
            .ok_or_else(|| FlowError::UnknownWorkflow(name.to_string()))?;
        removed.stop_wf();
        // The plugin may have been replaced by hand; nothing to do then.
        let _ = self.inner.plugins.remove_plugin(name);
        log::info!("🗑️  Workflow '{}' removed", name);
        Ok(())
    }

    pub fn get_wf(&self, name: &str) -> FlowResult<Workflow> {
        self.inner
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownWorkflow(name.to_string()))
    }

    pub fn workflow_names(&self) -> Vec<String> {
        self.inner
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Loads a workflow document into `name`, creating the workflow first
    /// if needed.
    pub fn load_wf(&self, name: &str, path: &Path) -> FlowResult<(Workflow, LoadReport)> {
        let wf = match self.get_wf(name) {
            Ok(wf) => wf,
            Err(_) => self.add_wf(name)?,
        };
        let report = wf.load(path, &self.inner.ops)?;
        Ok((wf, report))
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Runs on the caller's task, bypassing the worker slots.
    pub async fn run_wf(&self, name: &str) -> FlowResult<RunReport> {
        Ok(self.get_wf(name)?.run_wf().await)
    }

    /// Runs on a worker slot and returns the slot index. Waits for a slot
    /// when all are busy. A stop requested once this returns cancels the
    /// run, even if its task has not started yet.
    pub async fn submit_wf(&self, name: &str) -> FlowResult<usize> {
        let wf = self.get_wf(name)?;
        let index = self.next_available_thread().await;
        wf.admit();
        let handle = tokio::spawn(async move {
            let driven = HashSet::new();
            let scope = RunScope {
                driven: &driven,
                admitted: true,
                outer_stop: None,
            };
            wf.run_scoped(scope).await
        });
        self.slots()[index] = Slot::Busy(handle);
        log::info!("🧵 Workflow '{}' submitted to slot {}", name, index);
        Ok(index)
    }

    /// Reserves the first available slot, waiting until one frees up.
    /// Callers that do not use the slot must `release_thread` it.
    pub async fn next_available_thread(&self) -> usize {
        let mut backoff = Backoff::new();
        loop {
            {
                let mut slots = self.slots();
                if let Some(index) = slots.iter().position(Slot::is_available) {
                    if let Slot::Busy(_) = &slots[index] {
                        log::debug!("🧵 Slot {} reclaimed, its report was never collected", index);
                    }
                    slots[index] = Slot::Reserved;
                    return index;
                }
            }
            backoff.wait().await;
        }
    }

    /// Frees a slot reserved by `next_available_thread`.
    pub fn release_thread(&self, index: usize) {
        if let Some(slot) = self.slots().get_mut(index) {
            if matches!(slot, Slot::Reserved) {
                *slot = Slot::Free;
            }
        }
    }

    /// Waits for the workflow on slot `index` and frees the slot. None if
    /// the slot holds no run.
    pub async fn wait_for_thread(&self, index: usize) -> Option<RunReport> {
        let mut backoff = Backoff::new();
        let handle = loop {
            {
                let mut slots = self.slots();
                let finished = match slots.get(index) {
                    Some(Slot::Busy(h)) => h.is_finished(),
                    _ => return None,
                };
                if finished {
                    if let Slot::Busy(h) = std::mem::replace(&mut slots[index], Slot::Free) {
                        break h;
                    }
                }
            }
            backoff.wait().await;
        };

        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                log::error!("💥 Slot {} task failed: {}", index, e);
                None
            }
        }
    }

    /// Waits for every busy slot, in slot order.
    pub async fn wait_all(&self) -> Vec<RunReport> {
        let mut reports = Vec::new();
        for index in 0..self.slot_count() {
            if let Some(report) = self.wait_for_thread(index).await {
                reports.push(report);
            }
        }
        reports
    }

    pub fn slot_count(&self) -> usize {
        self.slots().len()
    }

    /// Slots currently running a workflow.
    pub fn busy_slots(&self) -> Vec<usize> {
        self.slots()
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::Busy(h) if !h.is_finished()))
            .map(|(i, _)| i)
            .collect()
    }

    // ------------------------------------------------------------------------
    // Stop
    // ------------------------------------------------------------------------

    pub fn stop_wf(&self, name: &str) -> FlowResult<()> {
        self.get_wf(name)?.stop_wf();
        Ok(())
    }

    pub fn stop_all(&self) {
        let workflows: Vec<Workflow> = self
            .inner
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for wf in workflows {
            wf.stop_wf();
        }
    }
}
