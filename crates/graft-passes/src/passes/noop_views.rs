//! Remove reshapes to the shape the input already has.
//!
//! ```text
//! %x = ...                        # f32[512, 1024]
//! %view_1 = view(%x, [512, 1024])
//! ```
//!
//! Users of `view_1` read `x` instead.

use crate::classify::NodeRole;
use graft_core::{Arg, GraphModule, Pass, Result};
use tracing::{debug, trace};

/// Pass that removes view nodes whose target shape equals the recorded
/// `tensor_meta` shape of their input.
///
/// Inputs without `tensor_meta` are never treated as matching.
pub struct RemoveNoopViews;

impl RemoveNoopViews {
    /// Create a new no-op view removal pass.
    pub fn new() -> Self {
        Self
    }
}

impl Pass for RemoveNoopViews {
    fn name(&self) -> &str {
        "remove_noop_views"
    }

    fn run(&self, module: &mut GraphModule) -> Result<bool> {
        let graph = module.graph_mut();
        let mut changed = false;

        for id in graph.node_ids() {
            let Ok(node) = graph.node(id) else {
                continue;
            };
            if !node.is_view() {
                continue;
            }
            let (Some(input), Some(shape)) =
                (node.input_node(0), node.arg(1).and_then(Arg::as_ints))
            else {
                continue;
            };
            let Some(tensor) = graph.node(input)?.meta.tensor_meta() else {
                trace!(view = %node.name, "view input has no tensor_meta");
                continue;
            };
            if !tensor.shape_matches(&shape) {
                continue;
            }

            debug!(
                view = %node.name,
                input = graph.name_of(input),
                shape = ?shape,
                "removing no-op view"
            );
            graph.replace_all_uses_with(id, input)?;
            graph.erase_node(id)?;
            changed = true;
        }

        module.finish_pass()?;
        Ok(changed)
    }
}

impl Default for RemoveNoopViews {
    fn default() -> Self {
        Self::new()
    }
}

/// Run [`RemoveNoopViews`] on `module`.
#[tracing::instrument(skip_all)]
pub fn remove_noop_views(module: &mut GraphModule) -> Result<bool> {
    RemoveNoopViews::new().run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{DataType, Graph, Meta, NodeId, Op, TensorMeta};

    fn input(graph: &mut Graph, shape: &[usize]) -> NodeId {
        graph.placeholder(
            "x",
            Meta::tensor(TensorMeta::new(shape.to_vec(), DataType::F32)),
        )
    }

    #[test]
    fn test_same_shape_view_removed() {
        let mut graph = Graph::new();
        let x = input(&mut graph, &[512, 1024]);
        let v = graph
            .call(Op::View, vec![Arg::Node(x), Arg::ints([512, 1024])])
            .unwrap();
        let relu = graph
            .call(Op::Other("relu".to_string()), vec![Arg::Node(v)])
            .unwrap();
        let out = graph.output(vec![Arg::Node(relu)]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(remove_noop_views(&mut module).unwrap());

        let graph = module.graph();
        assert_eq!(graph.node_ids(), vec![x, relu, out]);
        assert_eq!(graph.node(relu).unwrap().input_node(0), Some(x));
    }

    #[test]
    fn test_reshaping_view_kept() {
        let mut graph = Graph::new();
        let x = input(&mut graph, &[512, 1024]);
        let v = graph
            .call(Op::View, vec![Arg::Node(x), Arg::ints([524288])])
            .unwrap();
        graph.output(vec![Arg::Node(v)]).unwrap();
        let mut module = GraphModule::new(graph);
        let before = module.graph().node(v).unwrap().args().to_vec();

        assert!(!remove_noop_views(&mut module).unwrap());
        assert_eq!(module.graph().node(v).unwrap().args(), before.as_slice());
    }

    #[test]
    fn test_view_without_input_meta_kept() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", Meta::new());
        let v = graph
            .call(Op::View, vec![Arg::Node(x), Arg::ints([4])])
            .unwrap();
        graph.output(vec![Arg::Node(v)]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(!remove_noop_views(&mut module).unwrap());
        assert!(module.graph().contains(v));
    }

    #[test]
    fn test_chained_noop_views_collapse() {
        let mut graph = Graph::new();
        let x = input(&mut graph, &[4, 4]);
        let v1 = graph
            .call(Op::View, vec![Arg::Node(x), Arg::ints([4, 4])])
            .unwrap();
        let v2 = graph
            .call(Op::View, vec![Arg::Node(v1), Arg::ints([4, 4])])
            .unwrap();
        let out = graph.output(vec![Arg::Node(v2)]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(remove_noop_views(&mut module).unwrap());
        assert_eq!(module.graph().node_ids(), vec![x, out]);
    }
}
