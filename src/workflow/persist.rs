//! Workflow documents (YAML ⇄ JSON)
//!
//! A saved workflow is an ordered mapping `tag -> { type, inputs }` where
//! every input is stored in its wire form `{ src, tp, val }`:
//!
//! ```yaml
//! gen:
//!   type: Identity
//!   inputs:
//!     value: { src: literal, tp: int, val: 7 }
//! double:
//!   type: Identity
//!   inputs:
//!     value: { src: workflow_ref, tp: ref, val: gen.outputs.value }
//! ```
//!
//! Loading is lenient: unknown classes, unknown input names and invalid
//! locators are skipped with a warning and listed in the [`LoadReport`].

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::Workflow;
use crate::error::{FlowError, FlowResult};
use crate::locator::{InputLocator, RawLocator};
use crate::op_manager::OpManager;

// =============================================================================
// Document Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpDoc {
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: IndexMap<String, RawLocator>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowDoc {
    pub ops: IndexMap<String, OpDoc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Yaml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

impl WorkflowDoc {
    pub fn from_yaml_str(text: &str) -> FlowResult<Self> {
        serde_yaml::from_str(text).map_err(|e| FlowError::Document(e.to_string()))
    }

    pub fn from_json_str(text: &str) -> FlowResult<Self> {
        serde_json::from_str(text).map_err(|e| FlowError::Document(e.to_string()))
    }

    pub fn to_yaml(&self) -> FlowResult<String> {
        serde_yaml::to_string(self).map_err(|e| FlowError::Document(e.to_string()))
    }

    pub fn to_json(&self) -> FlowResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FlowError::Document(e.to_string()))
    }

    /// Reads a document; `.json` files are JSON, anything else YAML.
    pub fn read(path: &Path) -> FlowResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| FlowError::io(path.display(), e))?;
        match Format::of(path) {
            Format::Json => Self::from_json_str(&text),
            Format::Yaml => Self::from_yaml_str(&text),
        }
    }

    pub fn write(&self, path: &Path) -> FlowResult<()> {
        let text = match Format::of(path) {
            Format::Json => self.to_json()?,
            Format::Yaml => self.to_yaml()?,
        };
        fs::write(path, text).map_err(|e| FlowError::io(path.display(), e))
    }
}

/// What `load_doc` did with each entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    /// `(tag, reason)`
    pub skipped_ops: Vec<(String, String)>,
    /// `(tag.inputs.name, reason)`
    pub skipped_inputs: Vec<(String, String)>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.skipped_ops.is_empty() && self.skipped_inputs.is_empty()
    }
}

// =============================================================================
// Save / Load
// =============================================================================

impl Workflow {
    pub fn to_doc(&self) -> WorkflowDoc {
        let ops = self
            .read()
            .iter()
            .map(|(tag, node)| {
                let inputs = node
                    .input_locator
                    .iter()
                    .map(|(name, il)| (name.clone(), RawLocator::from(il.clone())))
                    .collect();
                let doc = OpDoc {
                    op_type: node.op.type_name().to_string(),
                    inputs,
                };
                (tag.clone(), doc)
            })
            .collect();
        WorkflowDoc { ops }
    }

    /// Replaces the contents of this workflow with `doc`.
    pub fn load_doc(&self, doc: &WorkflowDoc, ops: &OpManager) -> LoadReport {
        self.clear();
        let mut report = LoadReport::default();

        for (tag, op_doc) in &doc.ops {
            let op = match ops.create(&op_doc.op_type) {
                Ok(op) => op,
                Err(e) => {
                    log::warn!("⚠️  [{}] skipping '{}': {}", self.name(), tag, e);
                    report.skipped_ops.push((tag.clone(), e.to_string()));
                    continue;
                }
            };
            if let Err(e) = self.add_op_arc(tag, op) {
                log::warn!("⚠️  [{}] skipping '{}': {}", self.name(), tag, e);
                report.skipped_ops.push((tag.clone(), e.to_string()));
                continue;
            }

            for (name, raw) in &op_doc.inputs {
                let address = format!("{}.{}.{}", tag, "inputs", name);
                let applied = InputLocator::try_from(raw.clone())
                    .and_then(|il| self.set_input_locator(tag, name, il));
                if let Err(e) = applied {
                    log::warn!("⚠️  [{}] skipping input '{}': {}", self.name(), address, e);
                    report.skipped_inputs.push((address, e.to_string()));
                }
            }
            report.loaded.push(tag.clone());
        }

        log::info!(
            "📂 [{}] Loaded {} ops ({} skipped)",
            self.name(),
            report.loaded.len(),
            report.skipped_ops.len()
        );
        report
    }

    pub fn save(&self, path: &Path) -> FlowResult<()> {
        self.to_doc().write(path)
    }

    pub fn load(&self, path: &Path, ops: &OpManager) -> FlowResult<LoadReport> {
        let doc = WorkflowDoc::read(path)?;
        Ok(self.load_doc(&doc, ops))
    }
}
