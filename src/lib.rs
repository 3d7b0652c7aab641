// src/lib.rs
//
// =============================================================================
// SAXSFLOW: LIBRARY ROOT
// =============================================================================
//
// This file declares the module tree and exports public types.

// 1. Declare Modules
pub mod address;
pub mod config;
pub mod error;
pub mod events;
pub mod locator;
pub mod logs;
pub mod manager;
pub mod op_manager;
pub mod operation;
pub mod ops;
pub mod plugin;
pub mod value;
pub mod workflow;

// 2. Re-exports (The Public API)
// These allow `use saxsflow::Workflow` or `use saxsflow::Value` to work elsewhere.

pub use address::Resolvable;
pub use config::EngineConfig;
pub use error::{ErrorKind, FlowError, FlowResult};
pub use events::{RunReport, RunStatus, WorkflowEvent};
pub use locator::{InputLocator, Source, TypeTag};
pub use logs::LogBuffer;
pub use manager::WfManager;
pub use op_manager::OpManager;
pub use operation::{IoSpec, OpIo, OpKind, Operation};
pub use plugin::{Plugin, PluginManager, ValuePlugin, WorkflowPlugin};
pub use value::Value;
pub use workflow::driver::{BatchDriver, RealtimeDriver};
pub use workflow::persist::{LoadReport, WorkflowDoc};
pub use workflow::{ExecutionStack, StackEntry, TagStatus, Workflow};
