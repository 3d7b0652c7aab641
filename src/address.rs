// src/address.rs
//
// =============================================================================
// SAXSFLOW: SYMBOLIC ADDRESS RESOLVER (v 0.1 )
// =============================================================================
//
// Addresses look like `fit.outputs.q_I.0`: the first segment picks an entity
// out of a root namespace, every further segment descends one level.
//
// Descent rules, per node shape:
//   Map       -> key lookup
//   List      -> non-negative integer index
//   Workflow  -> op tag, then `inputs` / `outputs`
//   Plugin    -> `content` / `inputs`
//   leaf      -> TypeMismatch
//
// Resolution only reads. It never calls operation code.

use crate::error::{FlowError, FlowResult};
use crate::value::Value;
use indexmap::IndexMap;

pub const SEPARATOR: char = '.';

/// Capability: "can resolve the remaining segments of an address".
///
/// Implemented by root namespaces (workflows, the plugin manager, plain
/// maps) and by the live handles that can sit inside a value tree.
pub trait Resolvable {
    fn resolve_segments(&self, segments: &[&str], address: &str) -> FlowResult<Value>;
}

/// Resolve `address` against `root`.
pub fn resolve<R: Resolvable + ?Sized>(root: &R, address: &str) -> FlowResult<Value> {
    let segments = split(address)?;
    root.resolve_segments(&segments, address)
}

/// Same traversal as [`resolve`], never fails.
pub fn contains<R: Resolvable + ?Sized>(root: &R, address: &str) -> bool {
    resolve(root, address).is_ok()
}

/// Splits an address into segments. Empty addresses and empty segments
/// (`a..b`, trailing dots) are unknown addresses.
pub fn split(address: &str) -> FlowResult<Vec<&str>> {
    let segments: Vec<&str> = address.split(SEPARATOR).collect();
    if let Some(empty) = segments.iter().find(|s| s.is_empty()) {
        return Err(FlowError::unknown(address, empty));
    }
    Ok(segments)
}

/// First segment of an address (the tag it is rooted at).
pub fn root_tag(address: &str) -> &str {
    address.split(SEPARATOR).next().unwrap_or(address)
}

// ============================================================================
// WALKING VALUE TREES
// ============================================================================

/// Outcome of walking by reference: either the addressed value, or a live
/// handle that must take over the remaining segments.
pub(crate) enum Walk {
    Found(Value),
    Handoff(Value, usize),
}

/// Walks `segments` below `node` without cloning intermediate containers.
/// Stops at the first live handle so callers can release any lock they
/// hold before the handle resolves the rest.
pub(crate) fn walk_ref(node: &Value, segments: &[&str], address: &str) -> FlowResult<Walk> {
    let mut current = node;
    for (i, segment) in segments.iter().enumerate() {
        current = match current {
            Value::Map(map) => map
                .get(*segment)
                .ok_or_else(|| FlowError::unknown(address, segment))?,
            Value::List(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| FlowError::mismatch(address, segment, "list"))?;
                items
                    .get(index)
                    .ok_or_else(|| FlowError::unknown(address, segment))?
            }
            Value::Workflow(_) | Value::Plugin(_) => {
                return Ok(Walk::Handoff(current.clone(), i));
            }
            leaf => return Err(FlowError::mismatch(address, segment, leaf.type_name())),
        };
    }
    Ok(Walk::Found(current.clone()))
}

/// Finishes a walk, letting live handles resolve their own segments.
pub(crate) fn finish(walk: Walk, segments: &[&str], address: &str) -> FlowResult<Value> {
    match walk {
        Walk::Found(value) => Ok(value),
        Walk::Handoff(handle, i) => handle.resolve_segments(&segments[i..], address),
    }
}

/// Like [`walk_ref`], rooted at a named collection. Handoff indices stay
/// relative to `segments`.
pub(crate) fn walk_map(
    map: &IndexMap<String, Value>,
    segments: &[&str],
    address: &str,
) -> FlowResult<Walk> {
    let Some((first, rest)) = segments.split_first() else {
        return Ok(Walk::Found(Value::Map(map.clone())));
    };
    let entry = map
        .get(*first)
        .ok_or_else(|| FlowError::unknown(address, first))?;
    Ok(match walk_ref(entry, rest, address)? {
        Walk::Handoff(handle, i) => Walk::Handoff(handle, i + 1),
        found => found,
    })
}

impl Resolvable for Value {
    fn resolve_segments(&self, segments: &[&str], address: &str) -> FlowResult<Value> {
        match self {
            Value::Workflow(wf) => wf.resolve_segments(segments, address),
            Value::Plugin(p) => p.resolve_segments(segments, address),
            other => finish(walk_ref(other, segments, address)?, segments, address),
        }
    }
}

impl Resolvable for IndexMap<String, Value> {
    fn resolve_segments(&self, segments: &[&str], address: &str) -> FlowResult<Value> {
        finish(walk_map(self, segments, address)?, segments, address)
    }
}
