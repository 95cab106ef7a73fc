//! Cancel back-to-back 2-D transposes.
//!
//! ```text
//! %t_13 = t(%view_73)  # f32[512, 1024]
//! %t_14 = t(%t_13)     # f32[1024, 512]
//! ```
//!
//! becomes a direct use of `view_73`.

use super::{collapse_pair, sole_cancelling_user};
use crate::classify::NodeRole;
use graft_core::{GraphModule, Pass, Result};
use tracing::debug;

/// Pass that removes no-op transpose pairs whose first transpose has no
/// other user.
pub struct CancelDoubleTranspose;

impl CancelDoubleTranspose {
    /// Create a new double-transpose cancellation pass.
    pub fn new() -> Self {
        Self
    }
}

impl Pass for CancelDoubleTranspose {
    fn name(&self) -> &str {
        "cancel_double_transpose"
    }

    fn run(&self, module: &mut GraphModule) -> Result<bool> {
        let graph = module.graph_mut();
        let mut changed = false;

        for first in graph.node_ids() {
            let Ok(node) = graph.node(first) else {
                continue;
            };
            if !node.is_transpose() {
                continue;
            }
            let Some(input) = node.input_node(0) else {
                continue;
            };
            let Some(second) = sole_cancelling_user(graph, first, |user| user.is_transpose())?
            else {
                continue;
            };

            debug!(
                first = graph.name_of(first),
                second = graph.name_of(second),
                input = graph.name_of(input),
                "cancelling transpose pair"
            );
            collapse_pair(graph, first, second, input)?;
            changed = true;
        }

        module.finish_pass()?;
        Ok(changed)
    }
}

impl Default for CancelDoubleTranspose {
    fn default() -> Self {
        Self::new()
    }
}

/// Run [`CancelDoubleTranspose`] on `module`.
#[tracing::instrument(skip_all)]
pub fn cancel_double_transpose(module: &mut GraphModule) -> Result<bool> {
    CancelDoubleTranspose::new().run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{Arg, DataType, Graph, Meta, Op, TensorMeta};

    #[test]
    fn test_cancels_transpose_pair() {
        let mut graph = Graph::new();
        let x = graph.placeholder(
            "view_73",
            Meta::tensor(TensorMeta::new(vec![1024, 512], DataType::F32)),
        );
        let t1 = graph.call(Op::Transpose, vec![Arg::Node(x)]).unwrap();
        let t2 = graph.call(Op::Transpose, vec![Arg::Node(t1)]).unwrap();
        let out = graph.output(vec![Arg::List(vec![Arg::Node(t2)])]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(cancel_double_transpose(&mut module).unwrap());

        let graph = module.graph();
        assert_eq!(graph.node_ids(), vec![x, out]);
        assert_eq!(graph.users(x), vec![out]);
        assert!(module.code().contains("%output = output([%view_73])"));
    }

    #[test]
    fn test_transpose_with_other_use_kept() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", Meta::new());
        let t1 = graph.call(Op::Transpose, vec![Arg::Node(x)]).unwrap();
        let t2 = graph.call(Op::Transpose, vec![Arg::Node(t1)]).unwrap();
        graph.output(vec![Arg::Node(t1), Arg::Node(t2)]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(!cancel_double_transpose(&mut module).unwrap());
        assert_eq!(module.graph().node_count(), 4);
    }

    #[test]
    fn test_single_transpose_kept() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", Meta::new());
        let t1 = graph.call(Op::Transpose, vec![Arg::Node(x)]).unwrap();
        graph.output(vec![Arg::Node(t1)]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(!cancel_double_transpose(&mut module).unwrap());
        assert_eq!(module.graph().node_count(), 3);
    }
}
