// src/operation.rs
//
// =============================================================================
// SAXSFLOW: OPERATION CONTRACT (v 0.1 )
// =============================================================================
//
// The Port every computational unit plugs into.
//
// Responsibilities:
// 1. Define the `Operation` trait (fixed input/output name sets + `run`).
// 2. Define `OpIo`, the per-invocation view `run` reads from and writes to.
// 3. Define the Batch/Realtime discriminator and the polling contract.

use crate::config::EngineConfig;
use crate::events::{EventBus, WorkflowEvent};
use crate::locator::InputLocator;
use crate::logs::LogBuffer;
use crate::value::Value;
use crate::workflow::{StopFlag, Workflow};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::sync::Arc;

/// Input naming the sub-workflow a Batch/Realtime operation drives.
pub const WORKFLOW_INPUT: &str = "workflow";
/// Input listing the sub-workflow addresses each input tuple is written to.
pub const ROUTES_INPUT: &str = "input_routes";
/// Outputs every Batch/Realtime operation produces.
pub const BATCH_INPUTS: &str = "batch_inputs";
pub const BATCH_OUTPUTS: &str = "batch_outputs";

pub type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type DataCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

// ============================================================================
// 1. DECLARATIONS
// ============================================================================

/// One declared input or output.
#[derive(Debug, Clone)]
pub struct IoSpec {
    pub name: String,
    pub doc: String,
    /// Class-provided default locator (inputs only).
    pub default: Option<InputLocator>,
}

impl IoSpec {
    pub fn new(name: &str, doc: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: doc.to_string(),
            default: None,
        }
    }

    pub fn with_default(mut self, locator: InputLocator) -> Self {
        self.default = Some(locator);
        self
    }
}

/// The `_batch` / `_realtime` discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Plain,
    Batch,
    Realtime,
}

impl OpKind {
    pub fn drives_subworkflow(self) -> bool {
        !matches!(self, OpKind::Plain)
    }
}

// ============================================================================
// 2. THE OPERATION TRAIT (The Contract)
// ============================================================================

#[async_trait]
pub trait Operation: Send + Sync {
    /// Class name. Used by the OpManager and by saved workflow documents.
    fn type_name(&self) -> &'static str;

    /// Ordered, fixed set of inputs.
    fn input_specs(&self) -> Vec<IoSpec>;

    /// Ordered, fixed set of outputs.
    fn output_specs(&self) -> Vec<IoSpec>;

    fn kind(&self) -> OpKind {
        OpKind::Plain
    }

    /// Reads `io` inputs, writes `io` outputs. Outputs left untouched stay
    /// null. Errors abort the enclosing workflow run.
    async fn run(&self, io: &mut OpIo) -> Result<()>;
}

/// Source of input tuples for Realtime operations. `Ok(None)` means
/// "nothing yet, ask again later".
#[async_trait]
pub trait InputPoller: Send {
    async fn poll(&mut self) -> Result<Option<Vec<Value>>>;
}

// ============================================================================
// 3. PER-INVOCATION VIEW
// ============================================================================

/// Callbacks and channels wired into one invocation.
#[derive(Clone, Default)]
pub(crate) struct OpHooks {
    pub workflow: String,
    pub events: Option<EventBus>,
    pub log: Option<LogBuffer>,
    pub message_callback: Option<MessageCallback>,
    pub data_callback: Option<DataCallback>,
    pub stop: StopFlag,
    pub config: EngineConfig,
}

pub struct OpIo {
    tag: String,
    inputs: IndexMap<String, Value>,
    outputs: IndexMap<String, Value>,
    hooks: OpHooks,
}

impl OpIo {
    pub(crate) fn new(
        tag: &str,
        inputs: IndexMap<String, Value>,
        output_names: impl IntoIterator<Item = String>,
        hooks: OpHooks,
    ) -> Self {
        Self {
            tag: tag.to_string(),
            inputs,
            outputs: output_names.into_iter().map(|n| (n, Value::Null)).collect(),
            hooks,
        }
    }

    /// An invocation that is not attached to any workflow. Handy for
    /// running an operation by hand.
    pub fn detached(op: &dyn Operation, inputs: IndexMap<String, Value>) -> Self {
        let mut all: IndexMap<String, Value> = op
            .input_specs()
            .into_iter()
            .map(|s| (s.name, Value::Null))
            .collect();
        for (k, v) in inputs {
            all.insert(k, v);
        }
        let outputs = op.output_specs().into_iter().map(|s| s.name);
        Self::new(op.type_name(), all, outputs, OpHooks::default())
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn inputs(&self) -> &IndexMap<String, Value> {
        &self.inputs
    }

    pub fn input(&self, name: &str) -> Result<&Value> {
        self.inputs
            .get(name)
            .ok_or_else(|| anyhow!("'{}' has no input named '{}'", self.tag, name))
    }

    pub fn input_str(&self, name: &str) -> Result<&str> {
        let v = self.input(name)?;
        v.as_str()
            .ok_or_else(|| anyhow!("input '{}' must be a string, got {}", name, v.type_name()))
    }

    pub fn input_f64(&self, name: &str) -> Result<f64> {
        let v = self.input(name)?;
        v.as_f64()
            .ok_or_else(|| anyhow!("input '{}' must be a number, got {}", name, v.type_name()))
    }

    pub fn input_i64(&self, name: &str) -> Result<i64> {
        let v = self.input(name)?;
        v.as_i64()
            .ok_or_else(|| anyhow!("input '{}' must be an integer, got {}", name, v.type_name()))
    }

    pub fn input_bool(&self, name: &str) -> Result<bool> {
        let v = self.input(name)?;
        v.as_bool()
            .ok_or_else(|| anyhow!("input '{}' must be a boolean, got {}", name, v.type_name()))
    }

    pub fn input_list(&self, name: &str) -> Result<&[Value]> {
        let v = self.input(name)?;
        v.as_list()
            .ok_or_else(|| anyhow!("input '{}' must be a list, got {}", name, v.type_name()))
    }

    /// Strings accepted as a single string or as a list of strings.
    pub fn input_strings(&self, name: &str) -> Result<Vec<String>> {
        match self.input(name)? {
            Value::Null => Ok(Vec::new()),
            Value::Str(s) => Ok(vec![s.clone()]),
            Value::List(items) => items
                .iter()
                .map(|i| {
                    i.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| anyhow!("input '{}' must only hold strings", name))
                })
                .collect(),
            other => bail!("input '{}' must be string(s), got {}", name, other.type_name()),
        }
    }

    pub fn input_workflow(&self, name: &str) -> Result<Workflow> {
        let v = self.input(name)?;
        v.as_workflow().cloned().ok_or_else(|| {
            anyhow!(
                "input '{}' must be a workflow (EntireWorkflow locator), got {}",
                name,
                v.type_name()
            )
        })
    }

    pub fn outputs(&self) -> &IndexMap<String, Value> {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    /// Writes a declared output. Undeclared names are an error.
    pub fn set_output(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.outputs.get_mut(name) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => bail!("'{}' has no output named '{}'", self.tag, name),
        }
    }

    /// Informational message (message_callback).
    pub fn message(&self, text: impl Into<String>) {
        let text = text.into();
        log::debug!("[{}] {}", self.tag, text);
        if let Some(log) = &self.hooks.log {
            log.push(&self.tag, &text);
        }
        if let Some(cb) = &self.hooks.message_callback {
            cb(&text);
        }
        if let Some(bus) = &self.hooks.events {
            bus.emit(WorkflowEvent::Message {
                workflow: self.hooks.workflow.clone(),
                tag: self.tag.clone(),
                text,
            });
        }
    }

    /// Partial output snapshot (data_callback). `suffix` is relative to this
    /// operation's outputs, e.g. `batch_outputs.3`.
    pub fn publish(&self, suffix: &str, value: &Value) {
        if let Some(cb) = &self.hooks.data_callback {
            cb(suffix, value);
        }
        if let Some(bus) = &self.hooks.events {
            bus.emit(WorkflowEvent::Data {
                workflow: self.hooks.workflow.clone(),
                address: format!("{}.outputs.{}", self.tag, suffix),
                value: value.clone(),
            });
        }
    }

    pub(crate) fn emit(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.hooks.events {
            bus.emit(event);
        }
    }

    pub(crate) fn workflow_name(&self) -> &str {
        &self.hooks.workflow
    }

    /// Engine settings of the enclosing workflow.
    pub fn config(&self) -> &EngineConfig {
        &self.hooks.config
    }

    /// True once `stop_wf` was called on the enclosing workflow.
    pub fn stop_requested(&self) -> bool {
        self.hooks.stop.is_set()
    }

    pub(crate) fn stop_flag(&self) -> &StopFlag {
        &self.hooks.stop
    }

    pub(crate) fn into_outputs(self) -> IndexMap<String, Value> {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scale;

    #[async_trait]
    impl Operation for Scale {
        fn type_name(&self) -> &'static str {
            "Scale"
        }
        fn input_specs(&self) -> Vec<IoSpec> {
            vec![IoSpec::new("x", "value"), IoSpec::new("k", "factor")]
        }
        fn output_specs(&self) -> Vec<IoSpec> {
            vec![IoSpec::new("y", "x * k")]
        }
        async fn run(&self, io: &mut OpIo) -> Result<()> {
            let y = io.input_f64("x")? * io.input_f64("k")?;
            io.set_output("y", y)
        }
    }

    #[tokio::test]
    async fn detached_invocation_runs() {
        let mut inputs = IndexMap::new();
        inputs.insert("x".to_string(), Value::Float(2.0));
        inputs.insert("k".to_string(), Value::Int(3));
        let mut io = OpIo::detached(&Scale, inputs);
        Scale.run(&mut io).await.unwrap();
        assert_eq!(io.output("y"), Some(&Value::Float(6.0)));
    }

    #[test]
    fn undeclared_outputs_are_rejected() {
        let mut io = OpIo::detached(&Scale, IndexMap::new());
        assert!(io.set_output("z", 1).is_err());
        assert_eq!(io.outputs().len(), 1);
        assert!(io.output("y").unwrap().is_null());
    }

    #[test]
    fn typed_accessors_report_shape() {
        let io = OpIo::detached(&Scale, IndexMap::new());
        let err = io.input_f64("x").unwrap_err().to_string();
        assert!(err.contains("must be a number"));
        assert!(io.input("nope").is_err());
    }
}
