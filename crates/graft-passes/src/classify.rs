//! Node roles: which nodes are primal inputs, views, assignments, ...

use graft_core::{Graph, Node, NodeId, Op};

/// Placeholder name fragments that mark inputs which are not primals.
const NON_PRIMAL_INPUTS: [&str; 5] = [
    "tangents",
    "fwd_seed",
    "fwd_base_offset",
    "bwd_seed",
    "bwd_base_offset",
];

/// Role predicates over a node's operation.
pub trait NodeRole {
    fn is_view(&self) -> bool;
    fn is_as_strided(&self) -> bool;
    fn is_permute(&self) -> bool;
    fn is_transpose(&self) -> bool;
    fn is_set_source(&self) -> bool;
    fn is_output(&self) -> bool;

    /// An input carrying a parameter value: a placeholder that is neither a
    /// tangent nor an RNG seed/offset input.
    fn is_primal(&self) -> bool;

    /// A primal input whose `val` metadata describes a tensor.
    fn is_tensor_primal(&self) -> bool;
}

impl NodeRole for Node {
    fn is_view(&self) -> bool {
        self.op == Op::View
    }

    fn is_as_strided(&self) -> bool {
        self.op == Op::AsStrided
    }

    fn is_permute(&self) -> bool {
        self.op == Op::Permute
    }

    fn is_transpose(&self) -> bool {
        self.op == Op::Transpose
    }

    fn is_set_source(&self) -> bool {
        self.op == Op::SetSource
    }

    fn is_output(&self) -> bool {
        self.op == Op::Output
    }

    fn is_primal(&self) -> bool {
        self.op == Op::Placeholder
            && !NON_PRIMAL_INPUTS
                .iter()
                .any(|fragment| self.name.contains(fragment))
    }

    fn is_tensor_primal(&self) -> bool {
        self.is_primal() && self.meta.is_tensor_valued()
    }
}

/// Whether `id` is a live node satisfying `role`.
pub fn has_role(graph: &Graph, id: NodeId, role: impl Fn(&Node) -> bool) -> bool {
    graph.node(id).is_ok_and(role)
}

/// Result of classifying a graph's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Tensor-valued primal inputs, in graph order.
    pub primal_inputs: Vec<NodeId>,

    /// The terminal output node.
    pub output: Option<NodeId>,
}

/// Classify the nodes of `graph` in a single scan.
pub fn classify(graph: &Graph) -> Classification {
    let mut classification = Classification::default();
    for (id, node) in graph.nodes() {
        if node.is_tensor_primal() {
            classification.primal_inputs.push(id);
        } else if node.is_output() && classification.output.is_none() {
            classification.output = Some(id);
        }
    }
    classification
}
