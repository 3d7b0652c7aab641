// src/plugin.rs
//
// =============================================================================
// SAXSFLOW: PLUGINS (v 0.1 )
// =============================================================================
//
// Plugins are long-lived, named data sources that operations read through
// PluginRef locators (`name.content.key`, `name.inputs.x`).
//
// Responsibilities:
// 1. Define the `Plugin` trait (start/stop lifecycle + content).
// 2. Keep the named registry (PluginManager), which is also an address root.
// 3. Provide the built-in plugins (workflow wrapper, reference dataset).

use crate::address::{self, finish, walk_ref, Resolvable};
use crate::error::{FlowError, FlowResult};
use crate::value::Value;
use crate::workflow::{check_tag_format, WeakWorkflow, Workflow};
use anyhow::{bail, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

// ============================================================================
// 1. THE PLUGIN TRAIT
// ============================================================================

#[async_trait]
pub trait Plugin: Send + Sync {
    fn description(&self) -> String;

    /// Configuration values, addressable as `name.inputs.x`.
    fn inputs(&self) -> IndexMap<String, Value> {
        IndexMap::new()
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Current data, addressable as `name.content...`.
    fn content(&self) -> Value;
}

/// A registered plugin: its name plus the shared implementation.
#[derive(Clone)]
pub struct PluginRef {
    name: String,
    plugin: Arc<dyn Plugin>,
    running: Arc<AtomicBool>,
}

impl PluginRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn same_as(&self, other: &PluginRef) -> bool {
        Arc::ptr_eq(&self.plugin, &other.plugin)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for PluginRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginRef({})", self.name)
    }
}

impl Resolvable for PluginRef {
    fn resolve_segments(&self, segments: &[&str], address: &str) -> FlowResult<Value> {
        let Some((field, rest)) = segments.split_first() else {
            return Ok(Value::Plugin(self.clone()));
        };
        let root = match *field {
            "content" => self.plugin.content(),
            "inputs" => Value::Map(self.plugin.inputs()),
            other => return Err(FlowError::unknown(address, other)),
        };
        finish(walk_ref(&root, rest, address)?, rest, address)
    }
}

// ============================================================================
// 2. THE REGISTRY
// ============================================================================

#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: Arc<RwLock<IndexMap<String, PluginRef>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plugin(&self, name: &str, plugin: impl Plugin + 'static) -> FlowResult<()> {
        self.add_plugin_arc(name, Arc::new(plugin))
    }

    /// Registers under `name`, replacing any previous plugin of that name.
    pub fn add_plugin_arc(&self, name: &str, plugin: Arc<dyn Plugin>) -> FlowResult<()> {
        check_tag_format(name).into_result(name)?;
        let entry = PluginRef {
            name: name.to_string(),
            plugin,
            running: Arc::new(AtomicBool::new(false)),
        };
        let replaced = self
            .plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), entry);
        if replaced.is_some() {
            log::debug!("🔌 Plugin '{}' replaced", name);
        } else {
            log::debug!("🔌 Plugin '{}' registered", name);
        }
        Ok(())
    }

    pub fn remove_plugin(&self, name: &str) -> FlowResult<()> {
        self.plugins
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| FlowError::UnknownPlugin(name.to_string()))
    }

    pub fn get_plugin(&self, name: &str) -> FlowResult<PluginRef> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownPlugin(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Snapshot of every plugin, `name -> handle`.
    pub fn namespace(&self) -> IndexMap<String, Value> {
        self.plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, p)| (name.clone(), Value::Plugin(p.clone())))
            .collect()
    }

    /// Starts a plugin. A plugin that still has no content afterwards is
    /// reported as failed.
    pub async fn start_plugin(&self, name: &str) -> anyhow::Result<()> {
        let entry = self.get_plugin(name)?;
        entry.plugin.start().await?;
        if entry.plugin.content().is_null() {
            bail!("plugin '{}' produced no content after start", name);
        }
        entry.running.store(true, Ordering::SeqCst);
        log::info!("🔌 Plugin '{}' started", name);
        Ok(())
    }

    pub async fn stop_plugin(&self, name: &str) -> anyhow::Result<()> {
        let entry = self.get_plugin(name)?;
        entry.plugin.stop().await?;
        entry.running.store(false, Ordering::SeqCst);
        log::info!("🔌 Plugin '{}' stopped", name);
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> FlowResult<bool> {
        self.get_plugin(name).map(|p| p.is_running())
    }

    /// Resolves `uri` (`plugin.content...`) against the registry.
    pub fn get_data_from_uri(&self, uri: &str) -> FlowResult<Value> {
        address::resolve(self, uri)
    }
}

impl Resolvable for PluginManager {
    fn resolve_segments(&self, segments: &[&str], address: &str) -> FlowResult<Value> {
        let Some((name, rest)) = segments.split_first() else {
            return Ok(Value::Map(self.namespace()));
        };
        // Lock released before the plugin computes its content.
        let entry = self
            .plugins
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(*name)
            .cloned()
            .ok_or_else(|| FlowError::unknown(address, name))?;
        entry.resolve_segments(rest, address)
    }
}

// ============================================================================
// 3. BUILT-IN PLUGINS
// ============================================================================

/// Exposes a workflow: `content` is the live workflow itself, so
/// `name.content.<tag>.outputs.<field>` reads exactly what
/// `<tag>.outputs.<field>` reads inside it. `inputs` holds the located
/// inputs of every op. Holds a weak handle so a workflow can be registered
/// in the namespace it reads from.
pub struct WorkflowPlugin {
    workflow: WeakWorkflow,
    name: String,
}

impl WorkflowPlugin {
    pub fn new(workflow: &Workflow) -> Self {
        Self {
            name: workflow.name().to_string(),
            workflow: workflow.downgrade(),
        }
    }

    pub fn workflow(&self) -> Option<Workflow> {
        self.workflow.upgrade()
    }
}

#[async_trait]
impl Plugin for WorkflowPlugin {
    fn description(&self) -> String {
        format!("operations of workflow '{}'", self.name)
    }

    fn inputs(&self) -> IndexMap<String, Value> {
        let Some(wf) = self.workflow() else {
            return IndexMap::new();
        };
        wf.op_tags()
            .into_iter()
            .filter_map(|tag| wf.op_inputs(&tag).ok().map(|i| (tag, Value::Map(i))))
            .collect()
    }

    fn content(&self) -> Value {
        match self.workflow() {
            Some(wf) => Value::Workflow(wf),
            None => Value::Null,
        }
    }
}

/// A fixed reference dataset (calibrant tables, masks, ...).
pub struct ValuePlugin {
    description: String,
    inputs: IndexMap<String, Value>,
    content: RwLock<Value>,
}

impl ValuePlugin {
    pub fn new(description: &str, content: impl Into<Value>) -> Self {
        Self {
            description: description.to_string(),
            inputs: IndexMap::new(),
            content: RwLock::new(content.into()),
        }
    }

    pub fn with_input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.to_string(), value.into());
        self
    }

    /// Loads the dataset from a JSON or YAML file.
    pub fn from_file(path: &Path) -> FlowResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| FlowError::io(path.display(), e))?;
        let json: serde_json::Value = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&text).map_err(|e| FlowError::Document(e.to_string()))?,
            _ => serde_yaml::from_str(&text).map_err(|e| FlowError::Document(e.to_string()))?,
        };
        Ok(Self::new(&path.display().to_string(), json)
            .with_input("path", Value::from(path)))
    }

    pub fn set_content(&self, content: impl Into<Value>) {
        *self.content.write().unwrap_or_else(PoisonError::into_inner) = content.into();
    }
}

#[async_trait]
impl Plugin for ValuePlugin {
    fn description(&self) -> String {
        self.description.clone()
    }

    fn inputs(&self) -> IndexMap<String, Value> {
        self.inputs.clone()
    }

    fn content(&self) -> Value {
        self.content.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    fn calibrants() -> PluginManager {
        let pm = PluginManager::new();
        pm.add_plugin(
            "agbeh",
            ValuePlugin::new("silver behenate", json!({"d_spacing": 58.38, "peaks": [0.1076, 0.2152]}))
                .with_input("units", "nm"),
        )
        .unwrap();
        pm
    }

    #[test]
    fn uri_resolution() {
        let pm = calibrants();
        assert_eq!(pm.get_data_from_uri("agbeh.content.peaks.1").unwrap(), Value::Float(0.2152));
        assert_eq!(pm.get_data_from_uri("agbeh.inputs.units").unwrap(), Value::from("nm"));
        assert!(pm.get_data_from_uri("agbeh").unwrap().as_plugin().is_some());
        assert_eq!(
            pm.get_data_from_uri("agbeh.outputs").unwrap_err().kind(),
            ErrorKind::UnknownAddress
        );
        assert_eq!(
            pm.get_data_from_uri("nope.content").unwrap_err().kind(),
            ErrorKind::UnknownAddress
        );
    }

    #[test]
    fn plugin_handles_resolve_through_values() {
        let pm = calibrants();
        let handle = pm.get_data_from_uri("agbeh").unwrap();
        assert_eq!(
            address::resolve(&handle, "content.d_spacing").unwrap(),
            Value::Float(58.38)
        );
    }

    #[tokio::test]
    async fn start_requires_content() {
        let pm = calibrants();
        pm.add_plugin("empty", ValuePlugin::new("nothing", Value::Null)).unwrap();
        pm.start_plugin("agbeh").await.unwrap();
        assert!(pm.is_running("agbeh").unwrap());
        assert!(pm.start_plugin("empty").await.is_err());
        assert!(!pm.is_running("empty").unwrap());
        pm.stop_plugin("agbeh").await.unwrap();
        assert!(!pm.is_running("agbeh").unwrap());
    }

    #[test]
    fn registry_management() {
        let pm = calibrants();
        assert_eq!(pm.names(), vec!["agbeh".to_string()]);
        assert_eq!(pm.add_plugin("bad name", ValuePlugin::new("", 1)).unwrap_err().kind(), ErrorKind::TagMalformed);
        pm.remove_plugin("agbeh").unwrap();
        assert_eq!(pm.get_plugin("agbeh").unwrap_err().kind(), ErrorKind::UnknownPlugin);
    }

    #[test]
    fn workflow_plugin_content_is_the_workflow() {
        let wf = Workflow::new("reduce");
        wf.add_op("a", crate::ops::Identity).unwrap();
        wf.write()
            .get_mut("a")
            .unwrap()
            .outputs
            .insert("value".into(), Value::Int(3));

        let pm = PluginManager::new();
        pm.add_plugin("reduce", WorkflowPlugin::new(&wf)).unwrap();
        assert!(pm.get_data_from_uri("reduce.content").unwrap().as_workflow().is_some());
        assert_eq!(
            pm.get_data_from_uri("reduce.content.a.outputs.value").unwrap(),
            wf.resolve("a.outputs.value").unwrap()
        );
        assert!(pm.get_data_from_uri("reduce.content.a.inputs").unwrap().as_map().is_some());
        assert!(pm.get_data_from_uri("reduce.inputs.a").unwrap().as_map().is_some());

        let plugin = WorkflowPlugin::new(&wf);
        drop(wf);
        assert!(plugin.content().is_null());
    }
}
