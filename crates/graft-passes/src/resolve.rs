//! Alias and assignment resolution.
//!
//! Relates primal inputs to the in-place assignments that write them, and
//! view nodes to the strided views derived from them.

use crate::classify::{NodeRole, classify, has_role};
use graft_core::{Error, Graph, NodeId, Result};
use tracing::warn;

use std::collections::{HashMap, HashSet};

/// What to do when a primal input is assigned by more than one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicateAssignmentPolicy {
    /// Fail with [`Error::Unsupported`].
    #[default]
    Reject,

    /// Keep the last assignment in graph order and log a warning.
    LastWins,
}

/// Configuration shared by the passes that consume [`Assignments`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    pub duplicate_assignments: DuplicateAssignmentPolicy,
}

/// Primal inputs and the assignment node writing each of them.
///
/// Iteration follows the order in which primals were first seen assigned.
#[derive(Debug, Clone, Default)]
pub struct Assignments {
    entries: Vec<(NodeId, NodeId)>,
    index: HashMap<NodeId, usize>,
}

impl Assignments {
    fn record(&mut self, primal: NodeId, assignment: NodeId) {
        match self.index.get(&primal) {
            Some(&slot) => self.entries[slot].1 = assignment,
            None => {
                self.index.insert(primal, self.entries.len());
                self.entries.push((primal, assignment));
            }
        }
    }

    /// The assignment node writing `primal`.
    pub fn get(&self, primal: NodeId) -> Option<NodeId> {
        self.index.get(&primal).map(|&slot| self.entries[slot].1)
    }

    /// The set of primal inputs that are written.
    pub fn written(&self) -> HashSet<NodeId> {
        self.entries.iter().map(|&(primal, _)| primal).collect()
    }

    /// `(primal, assignment)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collect the in-place assignments whose target is a tensor-valued primal.
///
/// # Errors
///
/// Under [`DuplicateAssignmentPolicy::Reject`], returns
/// [`Error::Unsupported`] if a primal is assigned more than once.
pub fn collect_assignments(graph: &Graph, config: &ResolverConfig) -> Result<Assignments> {
    let primals: HashSet<NodeId> = classify(graph).primal_inputs.into_iter().collect();
    let mut assignments = Assignments::default();

    for (id, node) in graph.nodes() {
        if !node.is_set_source() {
            continue;
        }
        let Some(primal) = node.input_node(0).filter(|p| primals.contains(p)) else {
            continue;
        };

        if let Some(previous) = assignments.get(primal) {
            match config.duplicate_assignments {
                DuplicateAssignmentPolicy::Reject => {
                    return Err(Error::Unsupported(format!(
                        "primal input '{}' is assigned by both '{}' and '{}'",
                        graph.name_of(primal),
                        graph.name_of(previous),
                        node.name
                    )));
                }
                DuplicateAssignmentPolicy::LastWins => {
                    warn!(
                        primal = graph.name_of(primal),
                        dropped = graph.name_of(previous),
                        kept = %node.name,
                        "primal input assigned more than once, keeping the last assignment"
                    );
                }
            }
        }

        assignments.record(primal, id);
    }

    Ok(assignments)
}

/// Strided views grouped by the view node they are derived from, in graph order.
pub fn collect_view_dependents(graph: &Graph) -> HashMap<NodeId, Vec<NodeId>> {
    let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for (id, node) in graph.nodes() {
        if !node.is_as_strided() {
            continue;
        }
        if let Some(view) = node.input_node(0).filter(|&v| has_role(graph, v, |n| n.is_view())) {
            dependents.entry(view).or_default().push(id);
        }
    }
    dependents
}

/// `(strided view, primal)` pairs for assignments whose new value is a
/// strided view, in assignment order.
///
/// A strided view feeding several assignments maps to the last primal.
pub fn strided_view_sources(graph: &Graph, assignments: &Assignments) -> Vec<(NodeId, NodeId)> {
    let mut sources: Vec<(NodeId, NodeId)> = Vec::new();
    for (primal, assignment) in assignments.iter() {
        let Some(source) = graph
            .node(assignment)
            .ok()
            .and_then(|node| node.input_node(1))
        else {
            continue;
        };
        if !has_role(graph, source, |n| n.is_as_strided()) {
            continue;
        }
        match sources.iter_mut().find(|(strided, _)| *strided == source) {
            Some(entry) => entry.1 = primal,
            None => sources.push((source, primal)),
        }
    }
    sources
}

/// Assignment nodes directly preceding the output node.
pub fn trailing_assignments(graph: &Graph) -> HashSet<NodeId> {
    graph
        .nodes()
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .skip_while(|(_, node)| node.is_output())
        .take_while(|(_, node)| node.is_set_source())
        .map(|(id, _)| id)
        .collect()
}
