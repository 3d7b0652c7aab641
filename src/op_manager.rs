// src/op_manager.rs
//
// =============================================================================
// SAXSFLOW: OPERATION FACTORY (v 0.1 )
// =============================================================================
//
// Registry of operation classes by name. This is where a class name found
// in a saved workflow turns into a fresh operation instance.

use crate::error::{FlowError, FlowResult};
use crate::operation::{IoSpec, Operation};
use crate::ops;
use indexmap::IndexMap;
use std::sync::Arc;

pub type OpFactory = Arc<dyn Fn() -> Arc<dyn Operation> + Send + Sync>;

/// Class description for listings.
#[derive(Debug, Clone)]
pub struct OpClassInfo {
    pub name: String,
    pub inputs: Vec<IoSpec>,
    pub outputs: Vec<IoSpec>,
}

#[derive(Clone, Default)]
pub struct OpManager {
    factories: IndexMap<String, OpFactory>,
}

impl OpManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every operation shipped with the crate.
    pub fn with_builtins() -> Self {
        let mut mgr = Self::new();
        mgr.register_op::<ops::Identity>();
        mgr.register_op::<ops::BatchFromList>();
        mgr.register_op::<ops::BatchFromFiles>();
        mgr.register_op::<ops::RealtimeFromFiles>();
        mgr
    }

    /// Registers `factory` under the class name of the operation it builds.
    pub fn register(&mut self, factory: OpFactory) {
        let name = factory().type_name().to_string();
        if self.factories.insert(name.clone(), factory).is_some() {
            log::debug!("🏭 Operation class '{}' re-registered", name);
        }
    }

    pub fn register_op<O>(&mut self)
    where
        O: Operation + Default + 'static,
    {
        self.register(Arc::new(|| Arc::new(O::default()) as Arc<dyn Operation>));
    }

    pub fn create(&self, name: &str) -> FlowResult<Arc<dyn Operation>> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| FlowError::UnknownOperation(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn describe(&self, name: &str) -> FlowResult<OpClassInfo> {
        let op = self.create(name)?;
        Ok(OpClassInfo {
            name: name.to_string(),
            inputs: op.input_specs(),
            outputs: op.output_specs(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn builtins_are_registered() {
        let mgr = OpManager::with_builtins();
        assert_eq!(
            mgr.list(),
            vec!["Identity", "BatchFromList", "BatchFromFiles", "RealtimeFromFiles"]
        );
        assert_eq!(mgr.create("Identity").unwrap().type_name(), "Identity");
    }

    #[test]
    fn unknown_classes_are_errors() {
        let err = OpManager::new().create("Identity").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    }

    #[test]
    fn describe_lists_io() {
        let info = OpManager::with_builtins().describe("BatchFromList").unwrap();
        let names: Vec<&str> = info.inputs.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"workflow"));
        assert!(names.contains(&"input_routes"));
        assert_eq!(info.outputs.len(), 2);
    }
}
