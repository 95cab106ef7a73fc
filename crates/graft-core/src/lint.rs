//! Structural verification of a graph.

use crate::ir::{Graph, NodeId, Op};
use crate::{Error, Result};

use std::collections::HashSet;

impl Graph {
    /// Check the structural invariants every pass must leave intact.
    ///
    /// - every node in the order is live, and every live node is in the order
    /// - node names are unique
    /// - every argument reference points at a live node defined earlier
    /// - the def-use index matches the argument references exactly
    /// - there is exactly one output node, and it is last
    pub fn lint(&self) -> Result<()> {
        if self.order.len() != self.graph.node_count() {
            return Err(Error::Lint(format!(
                "{} nodes in execution order but {} nodes stored",
                self.order.len(),
                self.graph.node_count()
            )));
        }

        let mut defined: HashSet<NodeId> = HashSet::new();
        let mut names: HashSet<&str> = HashSet::new();
        let mut outputs = Vec::new();

        for &id in &self.order {
            let node = self
                .node(id)
                .map_err(|_| Error::Lint(format!("Erased node {} still ordered", id)))?;

            if !names.insert(node.name.as_str()) {
                return Err(Error::Lint(format!("Duplicate node name '{}'", node.name)));
            }

            let referenced: HashSet<NodeId> = node.referenced_nodes().into_iter().collect();
            for &input in &referenced {
                if !self.contains(input) {
                    return Err(Error::Lint(format!(
                        "Node '{}' references erased node {}",
                        node.name, input
                    )));
                }
                if !defined.contains(&input) {
                    return Err(Error::Lint(format!(
                        "Node '{}' uses '{}' before it is defined",
                        node.name,
                        self.name_of(input)
                    )));
                }
            }

            let indexed = self.producers(id);
            if indexed != referenced {
                return Err(Error::Lint(format!(
                    "Def-use index of '{}' is out of sync with its arguments",
                    node.name
                )));
            }

            if node.op == Op::Output {
                outputs.push(id);
            }
            defined.insert(id);
        }

        match outputs.as_slice() {
            [] => Err(Error::Lint("Graph has no output node".to_string())),
            [output] => {
                if self.order.last() != Some(output) || self.output != Some(*output) {
                    return Err(Error::Lint(format!(
                        "Output node '{}' is not the last node",
                        self.name_of(*output)
                    )));
                }
                Ok(())
            }
            many => Err(Error::Lint(format!(
                "Graph has {} output nodes",
                many.len()
            ))),
        }
    }
}
