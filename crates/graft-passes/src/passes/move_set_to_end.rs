//! Sink primal assignments to the end of the forward graph.
//!
//! Once a primal is assigned from a strided view of the gathered buffer, the
//! rest of the graph can read the strided view directly and the assignment
//! itself only has to happen before the graph returns:
//!
//! ```text
//! %as_strided = as_strided(%view_6, [512, 512], [512, 1], 0)
//! %set_ = set_(%primals_6, %as_strided)
//! %mm = mm(%primals_6, %x)
//! %output = output([%mm, %primals_6])
//! ```
//!
//! becomes
//!
//! ```text
//! %as_strided = as_strided(%view_6, [512, 512], [512, 1], 0)
//! %mm = mm(%as_strided, %x)
//! %set_1 = set_(%primals_6, %as_strided)
//! %output = output([%mm, %primals_6])
//! ```

use crate::classify::{NodeRole, has_role};
use crate::resolve::{ResolverConfig, collect_assignments, trailing_assignments};
use graft_core::{
    Arg, Error, Graph, GraphModule, NodeId, NodeSpec, Op, Pass, PositionWindow, Result,
};
use tracing::{debug, trace};

use std::collections::{HashMap, HashSet};

/// Pass that moves each primal assignment whose new value is a strided view
/// to just before the output node.
///
/// Users of the primal located strictly between the strided view and the
/// output node are rewired to the strided view. The output node keeps
/// returning the primal.
pub struct MoveSetToEnd {
    config: ResolverConfig,
}

impl MoveSetToEnd {
    /// Create the pass with the default resolver configuration.
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self { config }
    }
}

/// Whether the assignment is already at the end and nothing is left to rewire.
fn already_sunk(
    graph: &Graph,
    primal: NodeId,
    assignment: NodeId,
    trailing: &HashSet<NodeId>,
    window: &PositionWindow<'_>,
) -> bool {
    trailing.contains(&assignment)
        && !graph
            .users(primal)
            .into_iter()
            .any(|user| window.contains(user) && !has_role(graph, user, |n| n.is_set_source()))
}

impl Pass for MoveSetToEnd {
    fn name(&self) -> &str {
        "move_set_to_end"
    }

    fn run(&self, module: &mut GraphModule) -> Result<bool> {
        let graph = module.graph_mut();
        let assignments = collect_assignments(graph, &self.config)?;
        if assignments.is_empty() {
            module.finish_pass()?;
            return Ok(false);
        }

        let output = graph
            .output_node()
            .ok_or_else(|| Error::InvalidGraph("Graph has no output node".to_string()))?;
        let positions: HashMap<NodeId, usize> = graph.positions();
        let output_pos = graph.position(output)?;
        let trailing = trailing_assignments(graph);
        let mut changed = false;

        for (primal, assignment) in assignments.iter() {
            let Some(source) = graph.node(assignment)?.input_node(1) else {
                continue;
            };
            if !has_role(graph, source, |n| n.is_as_strided()) {
                continue;
            }
            let Some(&source_pos) = positions.get(&source) else {
                continue;
            };
            let window = PositionWindow::new(&positions, source_pos, output_pos);

            if already_sunk(graph, primal, assignment, &trailing, &window) {
                trace!(
                    primal = graph.name_of(primal),
                    "assignment already at end of graph"
                );
                continue;
            }

            let assignment_node = graph.node(assignment)?;
            let spec = NodeSpec::new(Op::SetSource, vec![Arg::Node(primal), Arg::Node(source)])
                .with_kwargs(assignment_node.kwargs().clone());
            let meta = assignment_node.meta.clone();

            graph.erase_node(assignment)?;
            let rewired = graph.replace_uses_where(primal, source, |user| {
                user != output && window.contains(user)
            })?;
            let moved = graph.insert_before(output, spec)?;
            graph.node_mut(moved)?.meta.propagate_from(&meta);

            debug!(
                primal = graph.name_of(primal),
                source = graph.name_of(source),
                assignment = graph.name_of(moved),
                rewired = rewired.len(),
                "moved primal assignment before output"
            );
            changed = true;
        }

        module.finish_pass()?;
        Ok(changed)
    }
}

impl Default for MoveSetToEnd {
    fn default() -> Self {
        Self::new()
    }
}

/// Run [`MoveSetToEnd`] with the default configuration.
#[tracing::instrument(skip_all)]
pub fn move_set_to_end(module: &mut GraphModule) -> Result<bool> {
    MoveSetToEnd::new().run(module)
}
