//! Append-style construction of graphs.

use crate::ir::{Arg, Graph, NodeId, NodeSpec, Op};
use crate::types::Meta;
use crate::Result;

impl Graph {
    /// Add an input node.
    ///
    /// Inputs are appended in order, always ahead of the output node.
    pub fn placeholder(&mut self, name: impl Into<String>, meta: Meta) -> NodeId {
        let index = self.append_index();
        let spec = NodeSpec::new(Op::Placeholder, Vec::new())
            .named(name)
            .with_meta(meta);
        self.link_node(index, spec)
    }

    /// Append a node computing `op(args)` ahead of the output node.
    ///
    /// # Errors
    ///
    /// Returns an error if `op` is [`Op::Output`] (use [`Graph::output`]) or
    /// if an argument references a node that is not in the graph.
    pub fn call(&mut self, op: Op, args: Vec<Arg>) -> Result<NodeId> {
        self.call_with(NodeSpec::new(op, args))
    }

    /// Append a fully described node ahead of the output node.
    pub fn call_with(&mut self, spec: NodeSpec) -> Result<NodeId> {
        if spec.op == Op::Output {
            return Err(crate::Error::InvalidGraph(
                "Use Graph::output to add the output node".to_string(),
            ));
        }
        self.append(spec)
    }

    /// Add the terminal output node.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph already has an output node.
    pub fn output(&mut self, args: Vec<Arg>) -> Result<NodeId> {
        self.append(NodeSpec::new(Op::Output, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, TensorMeta};

    #[test]
    fn test_build_simple_chain() {
        let mut graph = Graph::new();
        let x = graph.placeholder(
            "primals_1",
            Meta::tensor(TensorMeta::new(vec![2, 3], DataType::F32)),
        );
        let t = graph.call(Op::Transpose, vec![Arg::Node(x)]).unwrap();
        let out = graph.output(vec![Arg::List(vec![Arg::Node(t)])]).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.output_node(), Some(out));
        assert_eq!(graph.node(x).unwrap().name, "primals_1");
        assert_eq!(graph.users(t), vec![out]);
    }

    #[test]
    fn test_placeholder_after_output_stays_before_it() {
        let mut graph = Graph::new();
        let out = graph.output(vec![]).unwrap();
        let x = graph.placeholder("x", Meta::new());

        assert_eq!(graph.node_ids(), vec![x, out]);
    }

    #[test]
    fn test_call_rejects_output_op() {
        let mut graph = Graph::new();
        assert!(graph.call(Op::Output, vec![]).is_err());
        assert!(graph.output_node().is_none());
    }
}
