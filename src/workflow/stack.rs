// src/workflow/stack.rs
//
// =============================================================================
// SAXSFLOW: EXECUTION STACK (v 0.1 )
// =============================================================================
//
// Layers the operations of a workflow so that every layer only reads from
// earlier layers.
//
// An input is satisfied when:
//   - WorkflowRef:  every address's root tag was scheduled in an earlier pass
//   - BatchDriven:  its address `tag.inputs.name` is being driven
//   - otherwise:    always
//
// Batch/Realtime operations carry the stack of the sub-workflow they drive,
// computed with their input routes marked as driven.

use super::Workflow;
use crate::address;
use crate::error::{FlowError, FlowResult, MissingDependency};
use crate::locator::{InputLocator, Located, Source};
use crate::operation::{OpKind, ROUTES_INPUT, WORKFLOW_INPUT};
use crate::value::Value;
use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum StackEntry {
    Op(String),
    /// A Batch/Realtime operation. `nested` is None when the driven
    /// workflow is only known at run time.
    Driver {
        tag: String,
        nested: Option<ExecutionStack>,
    },
}

impl StackEntry {
    pub fn tag(&self) -> &str {
        match self {
            StackEntry::Op(tag) | StackEntry::Driver { tag, .. } => tag,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStack {
    layers: Vec<Vec<StackEntry>>,
}

impl ExecutionStack {
    pub fn layers(&self) -> &[Vec<StackEntry>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Tags per layer, nested stacks left out.
    pub fn tags(&self) -> Vec<Vec<String>> {
        self.layers
            .iter()
            .map(|l| l.iter().map(|e| e.tag().to_string()).collect())
            .collect()
    }

    pub fn layer_of(&self, tag: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.iter().any(|e| e.tag() == tag))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        for (i, layer) in self.layers.iter().enumerate() {
            let tags: Vec<&str> = layer.iter().map(StackEntry::tag).collect();
            writeln!(f, "{}layer {}: {}", pad, i, tags.join(", "))?;
            for entry in layer {
                if let StackEntry::Driver { tag, nested } = entry {
                    match nested {
                        Some(sub) => {
                            writeln!(f, "{}  {} drives:", pad, tag)?;
                            sub.render(f, depth + 2)?;
                        }
                        None => writeln!(f, "{}  {} drives: <resolved at run time>", pad, tag)?,
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for ExecutionStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

// ============================================================================
// 1. DEPENDENCY SNAPSHOT
// ============================================================================

enum Need {
    Op { root: String, address: String },
    Driven { address: String },
}

struct DepInfo {
    tag: String,
    kind: OpKind,
    needs: Vec<Need>,
    workflow: Option<InputLocator>,
    routes: Option<InputLocator>,
}

fn snapshot(wf: &Workflow) -> Vec<DepInfo> {
    wf.read()
        .iter()
        .map(|(tag, node)| {
            let mut needs = Vec::new();
            for (name, locator) in &node.input_locator {
                match locator.source() {
                    Source::WorkflowRef => {
                        for addr in locator.workflow_addresses() {
                            needs.push(Need::Op {
                                root: address::root_tag(addr).to_string(),
                                address: addr.to_string(),
                            });
                        }
                    }
                    Source::BatchDriven => needs.push(Need::Driven {
                        address: format!("{}.inputs.{}", tag, name),
                    }),
                    _ => {}
                }
            }
            DepInfo {
                tag: tag.clone(),
                kind: node.kind,
                needs,
                workflow: node.input_locator.get(WORKFLOW_INPUT).cloned(),
                routes: node.input_locator.get(ROUTES_INPUT).cloned(),
            }
        })
        .collect()
}

// ============================================================================
// 2. LAYERING
// ============================================================================

fn satisfied(need: &Need, scheduled: &HashSet<&str>, driven: &HashSet<String>) -> bool {
    match need {
        Need::Op { root, .. } => scheduled.contains(root.as_str()),
        Need::Driven { address } => driven.contains(address),
    }
}

/// Indices into `infos`, grouped into layers.
fn layer(infos: &[DepInfo], driven: &HashSet<String>) -> FlowResult<Vec<Vec<usize>>> {
    let mut scheduled: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<usize> = (0..infos.len()).collect();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| {
                infos[i]
                    .needs
                    .iter()
                    .all(|n| satisfied(n, &scheduled, driven))
            })
            .collect();

        if ready.is_empty() {
            return Err(dependency_error(infos, &remaining, &scheduled, driven));
        }

        for &i in &ready {
            scheduled.insert(infos[i].tag.as_str());
        }
        remaining.retain(|i| !ready.contains(i));
        layers.push(ready);
    }
    Ok(layers)
}

fn dependency_error(
    infos: &[DepInfo],
    remaining: &[usize],
    scheduled: &HashSet<&str>,
    driven: &HashSet<String>,
) -> FlowError {
    let missing = remaining
        .iter()
        .filter_map(|&i| {
            infos[i]
                .needs
                .iter()
                .find(|n| !satisfied(n, scheduled, driven))
                .map(|n| MissingDependency {
                    tag: infos[i].tag.clone(),
                    address: match n {
                        Need::Op { address, .. } | Need::Driven { address } => address.clone(),
                    },
                })
        })
        .collect();

    // Reference graph among the stuck operations, edges point from the
    // producer to the consumer.
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: HashMap<&str, _> = remaining
        .iter()
        .map(|&i| (infos[i].tag.as_str(), graph.add_node(i)))
        .collect();
    for &i in remaining {
        for need in &infos[i].needs {
            if let Need::Op { root, .. } = need {
                if let Some(&from) = nodes.get(root.as_str()) {
                    graph.update_edge(from, nodes[infos[i].tag.as_str()], ());
                }
            }
        }
    }

    let mut cycles: Vec<Vec<String>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .map(|scc| {
            let mut idx: Vec<usize> = scc.iter().map(|n| graph[*n]).collect();
            idx.sort_unstable();
            idx.into_iter().map(|i| infos[i].tag.clone()).collect()
        })
        .collect();
    cycles.sort();

    FlowError::Dependency { missing, cycles }
}

// ============================================================================
// 3. THE STACK
// ============================================================================

impl Workflow {
    /// Layers of tags; every layer only reads from earlier layers.
    pub fn execution_stack(&self) -> FlowResult<ExecutionStack> {
        self.stack_with(&HashSet::new(), &mut vec![self.identity()])
    }

    /// `driven` holds the `tag.inputs.name` addresses an enclosing batch
    /// driver writes. `chain` guards against workflows driving themselves.
    pub(crate) fn stack_with(
        &self,
        driven: &HashSet<String>,
        chain: &mut Vec<usize>,
    ) -> FlowResult<ExecutionStack> {
        let infos = snapshot(self);
        let order = layer(&infos, driven)?;

        let mut layers = Vec::with_capacity(order.len());
        for idx in order {
            let mut entries = Vec::with_capacity(idx.len());
            for i in idx {
                let info = &infos[i];
                entries.push(if info.kind.drives_subworkflow() {
                    StackEntry::Driver {
                        tag: info.tag.clone(),
                        nested: self.nested_stack(info, chain)?,
                    }
                } else {
                    StackEntry::Op(info.tag.clone())
                });
            }
            layers.push(entries);
        }
        Ok(ExecutionStack { layers })
    }

    fn nested_stack(&self, info: &DepInfo, chain: &mut Vec<usize>) -> FlowResult<Option<ExecutionStack>> {
        let ctx = self.locate_context();
        let sub = match locate_static(info.workflow.as_ref(), &ctx)? {
            Some(Value::Workflow(sub)) => sub,
            _ => return Ok(None),
        };
        let routes: HashSet<String> = match locate_static(info.routes.as_ref(), &ctx)? {
            Some(Value::Str(route)) => HashSet::from([route]),
            Some(Value::List(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => HashSet::new(),
        };

        if chain.contains(&sub.identity()) {
            log::warn!(
                "🔁 [{}] '{}' drives a workflow already on the stack ('{}')",
                self.name(),
                info.tag,
                sub.name()
            );
            return Ok(None);
        }
        chain.push(sub.identity());
        let nested = sub.stack_with(&routes, chain);
        chain.pop();
        nested.map(Some)
    }
}

/// Locates inputs whose value is fixed before the run starts.
fn locate_static(
    locator: Option<&InputLocator>,
    ctx: &crate::locator::LocateContext,
) -> FlowResult<Option<Value>> {
    let Some(locator) = locator else {
        return Ok(None);
    };
    match locator.source() {
        Source::WorkflowRef | Source::BatchDriven | Source::NoInput => Ok(None),
        _ => match locator.locate(ctx)? {
            Located::Value(v) => Ok(Some(v)),
            Located::Driven => Ok(None),
        },
    }
}
