// src/locator.rs
//
// =============================================================================
// SAXSFLOW: INPUT LOCATORS (v 0.1 )
// =============================================================================
//
// An InputLocator says where one operation input comes from and how to
// coerce it. It is an immutable value: (source, type, value).
//
// Responsibilities:
// 1. Encode the source x type validity matrix as data (FORBIDDEN).
// 2. Coerce literals into their declared type.
// 3. Locate a value against a live context (workflow, plugins, manager).

use crate::address;
use crate::error::{FlowError, FlowResult};
use crate::manager::WfManager;
use crate::plugin::PluginManager;
use crate::value::Value;
use crate::workflow::Workflow;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

// ============================================================================
// 1. SOURCE & TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    NoInput,
    WorkflowRef,
    PluginRef,
    FilesystemPath,
    Literal,
    BatchDriven,
    EntireWorkflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    None,
    Ref,
    String,
    Int,
    Float,
    Bool,
    Path,
    AutoCoerce,
    EntireWorkflowObject,
}

use Source as S;
use TypeTag as T;

/// Forbidden (source, type) pairs. Anything not listed is allowed.
const FORBIDDEN: &[(Source, &[TypeTag])] = &[
    (
        S::NoInput,
        &[T::Ref, T::String, T::Int, T::Float, T::Bool, T::Path, T::AutoCoerce, T::EntireWorkflowObject],
    ),
    (
        S::WorkflowRef,
        &[T::None, T::String, T::Int, T::Float, T::Bool, T::Path, T::AutoCoerce, T::EntireWorkflowObject],
    ),
    (
        S::PluginRef,
        &[T::None, T::String, T::Int, T::Float, T::Bool, T::Path, T::AutoCoerce, T::EntireWorkflowObject],
    ),
    (
        S::FilesystemPath,
        &[T::None, T::Ref, T::Int, T::Float, T::Bool, T::AutoCoerce, T::EntireWorkflowObject],
    ),
    (S::Literal, &[T::None, T::Ref, T::EntireWorkflowObject]),
    (S::BatchDriven, &[T::Ref, T::EntireWorkflowObject]),
    (
        S::EntireWorkflow,
        &[T::None, T::Ref, T::String, T::Int, T::Float, T::Bool, T::Path, T::AutoCoerce],
    ),
];

pub fn is_forbidden(src: Source, tp: TypeTag) -> bool {
    FORBIDDEN
        .iter()
        .any(|(s, types)| *s == src && types.contains(&tp))
}

// ============================================================================
// 2. THE LOCATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLocator", into = "RawLocator")]
pub struct InputLocator {
    src: Source,
    tp: TypeTag,
    val: Json,
}

/// Wire form `{ src, tp, val }`, validated on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLocator {
    pub src: Source,
    pub tp: TypeTag,
    #[serde(default)]
    pub val: Json,
}

impl TryFrom<RawLocator> for InputLocator {
    type Error = FlowError;

    fn try_from(raw: RawLocator) -> FlowResult<Self> {
        InputLocator::new(raw.src, raw.tp, raw.val)
    }
}

impl From<InputLocator> for RawLocator {
    fn from(il: InputLocator) -> Self {
        RawLocator {
            src: il.src,
            tp: il.tp,
            val: il.val,
        }
    }
}

impl Default for InputLocator {
    fn default() -> Self {
        InputLocator::no_input()
    }
}

impl InputLocator {
    /// Builds a locator, rejecting forbidden (source, type) pairs and values
    /// whose shape the source cannot use.
    pub fn new(src: Source, tp: TypeTag, val: impl Into<Json>) -> FlowResult<Self> {
        let val = val.into();
        let invalid = |reason: &str| FlowError::InvalidLocator {
            src,
            tp,
            reason: reason.to_string(),
        };

        if is_forbidden(src, tp) {
            return Err(invalid("type not allowed for this source"));
        }

        match src {
            S::WorkflowRef | S::PluginRef | S::FilesystemPath => {
                if !is_string_or_string_list(&val) {
                    return Err(invalid("value must be a string or a list of strings"));
                }
                if src != S::FilesystemPath {
                    for addr in strings_of(&val) {
                        address::split(addr).map_err(|_| invalid("malformed address"))?;
                    }
                }
            }
            S::EntireWorkflow => {
                if !val.is_string() {
                    return Err(invalid("value must name a workflow"));
                }
            }
            S::NoInput | S::BatchDriven | S::Literal => {}
        }

        Ok(Self { src, tp, val })
    }

    pub fn no_input() -> Self {
        Self {
            src: S::NoInput,
            tp: T::None,
            val: Json::Null,
        }
    }

    pub fn literal(tp: TypeTag, val: impl Into<Json>) -> FlowResult<Self> {
        Self::new(S::Literal, tp, val)
    }

    pub fn workflow_ref(address: &str) -> FlowResult<Self> {
        Self::new(S::WorkflowRef, T::Ref, address)
    }

    pub fn workflow_refs(addresses: &[&str]) -> FlowResult<Self> {
        Self::new(S::WorkflowRef, T::Ref, Json::from(addresses.to_vec()))
    }

    pub fn plugin_ref(address: &str) -> FlowResult<Self> {
        Self::new(S::PluginRef, T::Ref, address)
    }

    pub fn path(path: &str) -> FlowResult<Self> {
        Self::new(S::FilesystemPath, T::Path, path)
    }

    pub fn batch_driven() -> Self {
        Self {
            src: S::BatchDriven,
            tp: T::None,
            val: Json::Null,
        }
    }

    pub fn entire_workflow(name: &str) -> FlowResult<Self> {
        Self::new(S::EntireWorkflow, T::EntireWorkflowObject, name)
    }

    pub fn source(&self) -> Source {
        self.src
    }

    pub fn type_tag(&self) -> TypeTag {
        self.tp
    }

    pub fn value(&self) -> &Json {
        &self.val
    }

    /// Addresses this locator reads from the owning workflow.
    pub fn workflow_addresses(&self) -> Vec<&str> {
        if self.src == S::WorkflowRef {
            strings_of(&self.val)
        } else {
            Vec::new()
        }
    }

    // ========================================================================
    // 3. LOCATE
    // ========================================================================

    /// Produces the input value for the current context snapshot.
    pub fn locate(&self, ctx: &LocateContext) -> FlowResult<Located> {
        let value = match self.src {
            S::NoInput => Value::Null,
            S::Literal => coerce(&self.val, self.tp)?,
            S::FilesystemPath => Value::from(self.val.clone()),
            S::WorkflowRef => self.resolve_each(&ctx.workflow)?,
            S::PluginRef => self.resolve_each(&ctx.plugins)?,
            S::EntireWorkflow => {
                let name = self.val.as_str().unwrap_or_default();
                let wf = match &ctx.manager {
                    Some(mgr) => mgr.get_wf(name)?,
                    None if ctx.workflow.name() == name => ctx.workflow.clone(),
                    None => return Err(FlowError::UnknownWorkflow(name.to_string())),
                };
                Value::Workflow(wf)
            }
            S::BatchDriven => return Ok(Located::Driven),
        };
        Ok(Located::Value(value))
    }

    fn resolve_each<R: address::Resolvable + ?Sized>(&self, root: &R) -> FlowResult<Value> {
        match &self.val {
            Json::Array(items) => items
                .iter()
                .map(|a| address::resolve(root, a.as_str().unwrap_or_default()))
                .collect::<FlowResult<Vec<_>>>()
                .map(Value::List),
            other => address::resolve(root, other.as_str().unwrap_or_default()),
        }
    }

    /// Coerces a value written by a batch driver into this locator's type.
    pub fn coerce_driven(&self, value: Value) -> FlowResult<Value> {
        match self.tp {
            T::None | T::AutoCoerce => Ok(value),
            tp => coerce(&value.to_json(), tp),
        }
    }
}

/// What a locator produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Located {
    Value(Value),
    /// To be written by an enclosing batch driver.
    Driven,
}

/// Everything `locate` may look at.
#[derive(Clone)]
pub struct LocateContext {
    pub workflow: Workflow,
    pub plugins: PluginManager,
    pub manager: Option<WfManager>,
}

// ============================================================================
// 4. COERCION
// ============================================================================

/// Coerces a literal into `tp`. Lists are coerced element by element;
/// null stays null.
pub fn coerce(val: &Json, tp: TypeTag) -> FlowResult<Value> {
    match val {
        Json::Null => Ok(Value::Null),
        Json::Array(items) => items
            .iter()
            .map(|item| coerce(item, tp))
            .collect::<FlowResult<Vec<_>>>()
            .map(Value::List),
        scalar => coerce_scalar(scalar, tp),
    }
}

fn coerce_scalar(val: &Json, tp: TypeTag) -> FlowResult<Value> {
    let fail = |reason: &str| FlowError::Coercion {
        value: val.to_string(),
        tp,
        reason: reason.to_string(),
    };

    match tp {
        T::String | T::Path => match val {
            Json::String(s) => Ok(Value::Str(s.clone())),
            Json::Number(n) => Ok(Value::Str(n.to_string())),
            Json::Bool(b) => Ok(Value::Str(b.to_string())),
            _ => Err(fail("not a scalar")),
        },
        T::Int => match val {
            Json::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Ok(Value::Int(i)),
                (None, Some(f)) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                    Ok(Value::Int(f as i64))
                }
                _ => Err(fail("not an integer")),
            },
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|e| fail(&e.to_string())),
            _ => Err(fail("not an integer")),
        },
        T::Float => match val {
            Json::Number(n) => n.as_f64().map(Value::Float).ok_or_else(|| fail("not a number")),
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|e| fail(&e.to_string())),
            _ => Err(fail("not a number")),
        },
        T::Bool => match val {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => Err(fail("only 0 and 1 are booleans")),
            },
            Json::String(s) => parse_bool(s).map(Value::Bool).ok_or_else(|| fail("not a boolean")),
            _ => Err(fail("not a boolean")),
        },
        T::AutoCoerce => Ok(match val {
            Json::String(s) => auto_coerce(s),
            other => Value::from(other.clone()),
        }),
        T::None | T::Ref | T::EntireWorkflowObject => Err(fail("type does not describe a literal")),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

/// Best-effort typing of a string literal: int, float, bool, null, else string.
fn auto_coerce(s: &str) -> Value {
    let t = s.trim();
    if let Ok(i) = t.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = t.parse::<f64>() {
        return Value::Float(f);
    }
    match t.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "none" | "null" => Value::Null,
        _ => Value::Str(s.to_string()),
    }
}

fn is_string_or_string_list(val: &Json) -> bool {
    match val {
        Json::String(_) => true,
        Json::Array(items) => items.iter().all(Json::is_string),
        _ => false,
    }
}

fn strings_of(val: &Json) -> Vec<&str> {
    match val {
        Json::String(s) => vec![s.as_str()],
        Json::Array(items) => items.iter().filter_map(Json::as_str).collect(),
        _ => Vec::new(),
    }
}
