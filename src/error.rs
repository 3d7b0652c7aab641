// src/error.rs
//
// =============================================================================
// SAXSFLOW: ERROR KINDS (v 0.1 )
// =============================================================================
//
// One enum for every failure the engine can diagnose on its own.
// Operation bodies keep returning `anyhow::Result`; the engine wraps those
// into `FlowError::OperationFailure` together with the offending tag.

use crate::locator::{Source, TypeTag};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type FlowResult<T> = std::result::Result<T, FlowError>;

// ============================================================================
// 1. KINDS (what completion signals carry)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownAddress,
    TypeMismatch,
    InvalidLocator,
    CoercionError,
    DependencyError,
    TagEmpty,
    TagMalformed,
    TagNotUnique,
    OperationFailure,
    UnknownTag,
    UnknownWorkflow,
    UnknownPlugin,
    UnknownOperation,
    NotBatchDriven,
    MissingBatchInput,
    AlreadyRunning,
    Io,
    Document,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One unscheduled operation and the first address that kept it waiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDependency {
    pub tag: String,
    pub address: String,
}

// ============================================================================
// 2. THE ERROR
// ============================================================================

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("unknown address '{address}': segment '{segment}' not found")]
    UnknownAddress { address: String, segment: String },

    #[error("type mismatch in '{address}': segment '{segment}' cannot descend into {found}")]
    TypeMismatch {
        address: String,
        segment: String,
        found: &'static str,
    },

    #[error("invalid locator ({src:?}, {tp:?}): {reason}")]
    InvalidLocator {
        src: Source,
        tp: TypeTag,
        reason: String,
    },

    #[error("cannot coerce {value} to {tp:?}: {reason}")]
    Coercion {
        value: String,
        tp: TypeTag,
        reason: String,
    },

    #[error("dependency error: {}{}", fmt_missing(.missing), fmt_cycles(.cycles))]
    Dependency {
        missing: Vec<MissingDependency>,
        cycles: Vec<Vec<String>>,
    },

    #[error("tag must not be empty")]
    TagEmpty,

    #[error("tag '{0}' is malformed (letters, digits and '_' only, no leading digit)")]
    TagMalformed(String),

    #[error("tag '{0}' is already in use")]
    TagNotUnique(String),

    #[error("operation '{tag}' failed: {error:#}")]
    OperationFailure {
        tag: String,
        #[source]
        error: anyhow::Error,
    },

    #[error("no operation tagged '{0}'")]
    UnknownTag(String),

    #[error("no workflow named '{0}'")]
    UnknownWorkflow(String),

    #[error("no plugin named '{0}'")]
    UnknownPlugin(String),

    #[error("no operation class '{0}' registered")]
    UnknownOperation(String),

    #[error("'{address}' is not a batch-driven input")]
    NotBatchDriven { address: String },

    #[error("batch-driven input '{address}' has no value; is it driven by a batch operation?")]
    MissingBatchInput { address: String },

    #[error("workflow '{0}' is already running")]
    AlreadyRunning(String),

    #[error("I/O error on {path}: {error}")]
    Io {
        path: String,
        #[source]
        error: std::io::Error,
    },

    #[error("workflow document error: {0}")]
    Document(String),
}

impl FlowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlowError::UnknownAddress { .. } => ErrorKind::UnknownAddress,
            FlowError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            FlowError::InvalidLocator { .. } => ErrorKind::InvalidLocator,
            FlowError::Coercion { .. } => ErrorKind::CoercionError,
            FlowError::Dependency { .. } => ErrorKind::DependencyError,
            FlowError::TagEmpty => ErrorKind::TagEmpty,
            FlowError::TagMalformed(_) => ErrorKind::TagMalformed,
            FlowError::TagNotUnique(_) => ErrorKind::TagNotUnique,
            FlowError::OperationFailure { .. } => ErrorKind::OperationFailure,
            FlowError::UnknownTag(_) => ErrorKind::UnknownTag,
            FlowError::UnknownWorkflow(_) => ErrorKind::UnknownWorkflow,
            FlowError::UnknownPlugin(_) => ErrorKind::UnknownPlugin,
            FlowError::UnknownOperation(_) => ErrorKind::UnknownOperation,
            FlowError::NotBatchDriven { .. } => ErrorKind::NotBatchDriven,
            FlowError::MissingBatchInput { .. } => ErrorKind::MissingBatchInput,
            FlowError::AlreadyRunning(_) => ErrorKind::AlreadyRunning,
            FlowError::Io { .. } => ErrorKind::Io,
            FlowError::Document(_) => ErrorKind::Document,
        }
    }

    pub(crate) fn unknown(address: &str, segment: &str) -> Self {
        FlowError::UnknownAddress {
            address: address.to_string(),
            segment: segment.to_string(),
        }
    }

    pub(crate) fn mismatch(address: &str, segment: &str, found: &'static str) -> Self {
        FlowError::TypeMismatch {
            address: address.to_string(),
            segment: segment.to_string(),
            found,
        }
    }

    pub(crate) fn io(path: impl fmt::Display, error: std::io::Error) -> Self {
        FlowError::Io {
            path: path.to_string(),
            error,
        }
    }
}

fn fmt_missing(missing: &[MissingDependency]) -> String {
    let parts: Vec<String> = missing
        .iter()
        .map(|m| format!("'{}' waits on '{}'", m.tag, m.address))
        .collect();
    format!("unscheduled operations [{}]", parts.join(", "))
}

fn fmt_cycles(cycles: &[Vec<String>]) -> String {
    if cycles.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = cycles.iter().map(|c| c.join(" -> ")).collect();
    format!("; cycles: {}", parts.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_message_lists_tags_and_cycles() {
        let err = FlowError::Dependency {
            missing: vec![
                MissingDependency {
                    tag: "a".into(),
                    address: "b.outputs.y".into(),
                },
                MissingDependency {
                    tag: "b".into(),
                    address: "a.outputs.x".into(),
                },
            ],
            cycles: vec![vec!["a".into(), "b".into()]],
        };
        let msg = err.to_string();
        assert!(msg.contains("'a' waits on 'b.outputs.y'"));
        assert!(msg.contains("cycles: a -> b"));
        assert_eq!(err.kind(), ErrorKind::DependencyError);
    }

    #[test]
    fn operation_failure_keeps_source() {
        let err = FlowError::OperationFailure {
            tag: "fit".into(),
            error: anyhow::anyhow!("diverged"),
        };
        assert_eq!(err.kind(), ErrorKind::OperationFailure);
        assert!(err.to_string().contains("diverged"));
    }
}
