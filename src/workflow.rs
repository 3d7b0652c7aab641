// src/workflow.rs
//
// =============================================================================
// SAXSFLOW: WORKFLOW GRAPH (v 0.1 )
// =============================================================================
//
// The Graph Brain.
//
// A Workflow is an ordered set of uniquely tagged operations whose inputs are
// wired through InputLocators. It is also an address root: `tag.inputs.x`
// and `tag.outputs.y` resolve against live node state.
//
// Responsibilities:
// 1. Own the nodes (operation + locators + last inputs/outputs).
// 2. Validate and generate tags.
// 3. Accept writes from enclosing batch drivers (`set_wf_input`).
// 4. Resolve addresses against its own state.
//
// Scheduling lives in `stack`, the run loop in `engine`.

use crate::address::{self, finish, walk_map, Resolvable, Walk};
use crate::config::EngineConfig;
use crate::error::{FlowError, FlowResult};
use crate::events::{EventBus, WorkflowEvent};
use crate::locator::{InputLocator, LocateContext, Source};
use crate::logs::LogBuffer;
use crate::manager::{WeakWfManager, WfManager};
use crate::operation::{DataCallback, IoSpec, MessageCallback, OpKind, Operation};
use crate::plugin::PluginManager;
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::broadcast;

pub mod driver;
pub mod engine;
pub mod persist;
pub mod stack;

pub use stack::{ExecutionStack, StackEntry};

// ============================================================================
// 1. STOP FLAG & TAGS
// ============================================================================

/// Cooperative cancellation token shared by a workflow and its invocations.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStatus {
    Ok,
    TagEmpty,
    TagMalformed,
    TagNotUnique,
}

impl TagStatus {
    pub fn into_result(self, tag: &str) -> FlowResult<()> {
        match self {
            TagStatus::Ok => Ok(()),
            TagStatus::TagEmpty => Err(FlowError::TagEmpty),
            TagStatus::TagMalformed => Err(FlowError::TagMalformed(tag.to_string())),
            TagStatus::TagNotUnique => Err(FlowError::TagNotUnique(tag.to_string())),
        }
    }
}

/// Letters, digits and `_`; must not start with a digit.
pub fn check_tag_format(tag: &str) -> TagStatus {
    let mut chars = tag.chars();
    match chars.next() {
        None => TagStatus::TagEmpty,
        Some(c) if c.is_ascii_digit() => TagStatus::TagMalformed,
        Some(_) if tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') => TagStatus::Ok,
        Some(_) => TagStatus::TagMalformed,
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    let cleaned: String = prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    match cleaned.chars().next() {
        None => "op".to_string(),
        Some(c) if c.is_ascii_digit() => format!("op_{}", cleaned),
        Some(_) => cleaned,
    }
}

// ============================================================================
// 2. NODES
// ============================================================================

pub(crate) struct OpNode {
    pub op: Arc<dyn Operation>,
    pub kind: OpKind,
    pub input_locator: IndexMap<String, InputLocator>,
    pub inputs: IndexMap<String, Value>,
    pub outputs: IndexMap<String, Value>,
    pub input_docs: IndexMap<String, String>,
    pub output_docs: IndexMap<String, String>,
    /// Values written by an enclosing batch driver.
    pub driven: IndexMap<String, Value>,
    pub message_callback: Option<MessageCallback>,
    pub data_callback: Option<DataCallback>,
    pub completed: bool,
}

impl OpNode {
    fn new(op: Arc<dyn Operation>) -> Self {
        let inputs = op.input_specs();
        let outputs = op.output_specs();
        Self {
            kind: op.kind(),
            input_locator: inputs
                .iter()
                .map(|s| (s.name.clone(), s.default.clone().unwrap_or_default()))
                .collect(),
            inputs: inputs.iter().map(|s| (s.name.clone(), Value::Null)).collect(),
            outputs: outputs.iter().map(|s| (s.name.clone(), Value::Null)).collect(),
            input_docs: docs(&inputs),
            output_docs: docs(&outputs),
            driven: IndexMap::new(),
            message_callback: None,
            data_callback: None,
            completed: false,
            op,
        }
    }

    fn clear_state(&mut self) {
        self.inputs.values_mut().for_each(|v| *v = Value::Null);
        self.outputs.values_mut().for_each(|v| *v = Value::Null);
        self.driven.clear();
        self.completed = false;
    }

    fn snapshot(&self) -> Value {
        Value::map([
            ("inputs", Value::Map(self.inputs.clone())),
            ("outputs", Value::Map(self.outputs.clone())),
        ])
    }
}

fn docs(specs: &[IoSpec]) -> IndexMap<String, String> {
    specs.iter().map(|s| (s.name.clone(), s.doc.clone())).collect()
}

// ============================================================================
// 3. THE WORKFLOW
// ============================================================================

pub(crate) struct WorkflowInner {
    name: String,
    nodes: RwLock<IndexMap<String, OpNode>>,
    stop: StopFlag,
    running: AtomicBool,
    events: EventBus,
    log: LogBuffer,
    plugins: PluginManager,
    manager: Option<WeakWfManager>,
    config: EngineConfig,
}

/// Shared handle; clones refer to the same workflow.
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

/// Non-owning handle, used where a strong one would form a cycle.
#[derive(Clone)]
pub struct WeakWorkflow(Weak<WorkflowInner>);

impl WeakWorkflow {
    pub fn upgrade(&self) -> Option<Workflow> {
        self.0.upgrade().map(|inner| Workflow { inner })
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.inner.name)
            .field("ops", &self.op_tags())
            .finish()
    }
}

impl Workflow {
    /// A standalone workflow with its own, empty plugin namespace.
    pub fn new(name: &str) -> Self {
        Self::build(name, PluginManager::new(), None, EngineConfig::default())
    }

    /// A standalone workflow reading plugins from `plugins`.
    pub fn with_plugins(name: &str, plugins: PluginManager) -> Self {
        Self::build(name, plugins, None, EngineConfig::default())
    }

    pub(crate) fn managed(name: &str, manager: &WfManager) -> Self {
        Self::build(
            name,
            manager.plugins().clone(),
            Some(manager.downgrade()),
            manager.config().clone(),
        )
    }

    fn build(
        name: &str,
        plugins: PluginManager,
        manager: Option<WeakWfManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(WorkflowInner {
                name: name.to_string(),
                nodes: RwLock::new(IndexMap::new()),
                stop: StopFlag::default(),
                running: AtomicBool::new(false),
                events: EventBus::new(),
                log: LogBuffer::new(config.log_capacity),
                plugins,
                manager,
                config,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Identity, not structural equality.
    pub fn same_as(&self, other: &Workflow) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakWorkflow {
        WeakWorkflow(Arc::downgrade(&self.inner))
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.inner.plugins
    }

    pub fn manager(&self) -> Option<WfManager> {
        self.inner.manager.as_ref().and_then(WeakWfManager::upgrade)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, OpNode>> {
        self.inner.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, OpNode>> {
        self.inner.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn locate_context(&self) -> LocateContext {
        LocateContext {
            workflow: self.clone(),
            plugins: self.inner.plugins.clone(),
            manager: self.manager(),
        }
    }

    // ------------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------------

    pub fn is_good_tag(&self, tag: &str) -> (bool, TagStatus) {
        let status = match check_tag_format(tag) {
            TagStatus::Ok if self.contains(tag) => TagStatus::TagNotUnique,
            other => other,
        };
        (status == TagStatus::Ok, status)
    }

    /// First free `prefix_N`, N counting from 1.
    pub fn auto_tag(&self, prefix: &str) -> String {
        let base = sanitize_prefix(prefix);
        let nodes = self.read();
        let mut n = 1usize;
        loop {
            let tag = format!("{}_{}", base, n);
            if !nodes.contains_key(&tag) {
                return tag;
            }
            n += 1;
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.read().contains_key(tag)
    }

    pub fn op_tags(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub fn add_op(&self, tag: &str, op: impl Operation + 'static) -> FlowResult<()> {
        self.add_op_arc(tag, Arc::new(op))
    }

    /// Adds an operation with its class default locators.
    pub fn add_op_arc(&self, tag: &str, op: Arc<dyn Operation>) -> FlowResult<()> {
        let mut nodes = self.write();
        let status = match check_tag_format(tag) {
            TagStatus::Ok if nodes.contains_key(tag) => TagStatus::TagNotUnique,
            other => other,
        };
        status.into_result(tag)?;
        log::debug!("➕ [{}] {} ({})", self.inner.name, tag, op.type_name());
        nodes.insert(tag.to_string(), OpNode::new(op));
        Ok(())
    }

    /// Swaps the operation under `tag`, keeping the locators of inputs the
    /// new operation still declares.
    pub fn update_op(&self, tag: &str, op: Arc<dyn Operation>) -> FlowResult<()> {
        let mut nodes = self.write();
        let old = nodes
            .get_mut(tag)
            .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))?;
        let mut node = OpNode::new(op);
        for (name, locator) in node.input_locator.iter_mut() {
            if let Some(kept) = old.input_locator.get(name) {
                *locator = kept.clone();
            }
        }
        node.message_callback = old.message_callback.take();
        node.data_callback = old.data_callback.take();
        *old = node;
        Ok(())
    }

    pub fn remove_op(&self, tag: &str) -> FlowResult<()> {
        self.write()
            .shift_remove(tag)
            .map(|_| ())
            .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))
    }

    /// Removes every operation.
    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn op_type(&self, tag: &str) -> FlowResult<&'static str> {
        self.with_node(tag, |n| n.op.type_name())
    }

    pub fn op_kind(&self, tag: &str) -> FlowResult<OpKind> {
        self.with_node(tag, |n| n.kind)
    }

    pub fn op_inputs(&self, tag: &str) -> FlowResult<IndexMap<String, Value>> {
        self.with_node(tag, |n| n.inputs.clone())
    }

    pub fn op_outputs(&self, tag: &str) -> FlowResult<IndexMap<String, Value>> {
        self.with_node(tag, |n| n.outputs.clone())
    }

    pub fn input_doc(&self, tag: &str) -> FlowResult<IndexMap<String, String>> {
        self.with_node(tag, |n| n.input_docs.clone())
    }

    pub fn output_doc(&self, tag: &str) -> FlowResult<IndexMap<String, String>> {
        self.with_node(tag, |n| n.output_docs.clone())
    }

    fn with_node<T>(&self, tag: &str, f: impl FnOnce(&OpNode) -> T) -> FlowResult<T> {
        self.read()
            .get(tag)
            .map(f)
            .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))
    }

    fn with_node_mut<T>(&self, tag: &str, f: impl FnOnce(&mut OpNode) -> T) -> FlowResult<T> {
        self.write()
            .get_mut(tag)
            .map(f)
            .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))
    }

    // ------------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------------

    pub fn set_input_locator(&self, tag: &str, name: &str, locator: InputLocator) -> FlowResult<()> {
        let mut nodes = self.write();
        let node = nodes
            .get_mut(tag)
            .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))?;
        let slot = node.input_locator.get_mut(name).ok_or_else(|| {
            FlowError::unknown(&format!("{}.inputs.{}", tag, name), name)
        })?;
        *slot = locator;
        node.driven.shift_remove(name);
        Ok(())
    }

    pub fn input_locator(&self, tag: &str, name: &str) -> FlowResult<InputLocator> {
        let nodes = self.read();
        let node = nodes
            .get(tag)
            .ok_or_else(|| FlowError::UnknownTag(tag.to_string()))?;
        node.input_locator
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::unknown(&format!("{}.inputs.{}", tag, name), name))
    }

    pub fn input_locators(&self, tag: &str) -> FlowResult<IndexMap<String, InputLocator>> {
        self.with_node(tag, |n| n.input_locator.clone())
    }

    pub fn set_message_callback(&self, tag: &str, callback: MessageCallback) -> FlowResult<()> {
        self.with_node_mut(tag, |n| n.message_callback = Some(callback))
    }

    pub fn set_data_callback(&self, tag: &str, callback: DataCallback) -> FlowResult<()> {
        self.with_node_mut(tag, |n| n.data_callback = Some(callback))
    }

    /// Batch write into `tag.inputs.name`. Only BatchDriven inputs accept it.
    pub fn set_wf_input(&self, address: &str, value: Value) -> FlowResult<()> {
        let segments = address::split(address)?;
        let (tag, name) = match segments.as_slice() {
            [tag, "inputs", name] => (*tag, *name),
            [_, field, ..] if *field != "inputs" => {
                return Err(FlowError::unknown(address, field));
            }
            _ => return Err(FlowError::NotBatchDriven { address: address.to_string() }),
        };

        let mut nodes = self.write();
        let node = nodes
            .get_mut(tag)
            .ok_or_else(|| FlowError::unknown(address, tag))?;
        let locator = node
            .input_locator
            .get(name)
            .ok_or_else(|| FlowError::unknown(address, name))?;
        if locator.source() != Source::BatchDriven {
            return Err(FlowError::NotBatchDriven { address: address.to_string() });
        }
        let value = locator.coerce_driven(value)?;
        node.inputs.insert(name.to_string(), value.clone());
        node.driven.insert(name.to_string(), value);
        Ok(())
    }

    /// Clears produced outputs, located inputs and batch-written values.
    pub fn reset(&self) {
        self.write().values_mut().for_each(OpNode::clear_state);
    }

    /// Outputs of every operation that completed in the last run,
    /// `tag -> {output: value}`.
    pub fn wf_outputs_dict(&self) -> IndexMap<String, Value> {
        self.read()
            .iter()
            .filter(|(_, n)| n.completed)
            .map(|(tag, n)| (tag.clone(), Value::Map(n.outputs.clone())))
            .collect()
    }

    pub fn resolve(&self, address: &str) -> FlowResult<Value> {
        address::resolve(self, address)
    }

    // ------------------------------------------------------------------------
    // Control & observation
    // ------------------------------------------------------------------------

    /// Requests cancellation; honoured at the next layer boundary.
    pub fn stop_wf(&self) {
        log::info!("🛑 [{}] Stop requested", self.inner.name);
        self.inner.stop.request();
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.is_set()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.events.subscribe()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.inner.log.lines()
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub(crate) fn log_buffer(&self) -> &LogBuffer {
        &self.inner.log
    }

    pub(crate) fn stop_flag(&self) -> &StopFlag {
        &self.inner.stop
    }

    pub(crate) fn running_flag(&self) -> &AtomicBool {
        &self.inner.running
    }
}

// ============================================================================
// 4. ADDRESS ROOT
// ============================================================================

impl Resolvable for Workflow {
    fn resolve_segments(&self, segments: &[&str], address: &str) -> FlowResult<Value> {
        let Some((tag, rest)) = segments.split_first() else {
            return Ok(Value::Workflow(self.clone()));
        };

        let (walk, more) = {
            let nodes = self.read();
            let node = nodes
                .get(*tag)
                .ok_or_else(|| FlowError::unknown(address, tag))?;
            match rest.split_first() {
                None => (Walk::Found(node.snapshot()), rest),
                Some((&"inputs", more)) => (walk_map(&node.inputs, more, address)?, more),
                Some((&"outputs", more)) => (walk_map(&node.outputs, more, address)?, more),
                Some((other, _)) => return Err(FlowError::unknown(address, other)),
            }
        };
        finish(walk, more, address)
    }
}
