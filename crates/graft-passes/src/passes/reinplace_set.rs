//! Re-anchor primal assignments on a single canonical strided view.
//!
//! After sharded parameters are gathered, every parameter is copied out of
//! the flat gather buffer through a strided view, and the same view may be
//! materialized several times:
//!
//! ```text
//! %view_6 = view(%getitem_4, [262144])
//! %as_strided_5 = as_strided(%view_6, [512, 512], [512, 1], 0)
//! ... (uses as_strided_5)
//! %as_strided_8 = as_strided(%view_6, [512, 512], [512, 1], 0)
//! %set_ = set_(%primals_6, %as_strided_8)
//! ```
//!
//! becomes
//!
//! ```text
//! %view_6 = view(%getitem_4, [262144])
//! %as_strided = as_strided(%view_6, [512, 512], [512, 1], 0)
//! %set_1 = set_(%primals_6, %as_strided)
//! ... (uses primals_6 instead of as_strided_5)
//! ```

use crate::classify::{NodeRole, has_role};
use crate::resolve::{
    ResolverConfig, collect_assignments, collect_view_dependents, strided_view_sources,
    trailing_assignments,
};
use graft_core::{Arg, Error, Graph, GraphModule, NodeId, NodeSpec, Op, Pass, Result};
use tracing::{debug, trace};

use std::collections::HashSet;

/// Pass that moves each primal assignment fed by a strided view right after
/// the view the strided view is derived from, and points every duplicate of
/// that strided view at the primal.
///
/// # Errors
///
/// Fails with [`Error::Invariant`] if the assigned strided view is not
/// derived from a view node, or if another strided view of the same view
/// node was built with different arguments. Other readers of the assigned
/// strided view are pointed at its re-anchored copy.
pub struct ReinplaceSetFromStridedView {
    config: ResolverConfig,
}

impl ReinplaceSetFromStridedView {
    /// Create the pass with the default resolver configuration.
    pub fn new() -> Self {
        Self::with_config(ResolverConfig::default())
    }

    pub fn with_config(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Rewrite one `strided -> set_(primal, strided)` pattern.
    ///
    /// Returns `false` when the pattern is already canonical: the strided
    /// view has no duplicates, directly follows its view, and is assigned
    /// either right after it or in the run of assignments ending the graph.
    fn reinplace(
        &self,
        graph: &mut Graph,
        strided: NodeId,
        primal: NodeId,
        assignment: NodeId,
        dependents: &[NodeId],
        trailing: &HashSet<NodeId>,
    ) -> Result<bool> {
        let strided_node = graph.node(strided)?;
        let view = strided_node
            .input_node(0)
            .filter(|&v| has_role(graph, v, |n| n.is_view()))
            .ok_or_else(|| {
                Error::Invariant(format!(
                    "strided view '{}' assigned to '{}' is not derived from a view node",
                    strided_node.name,
                    graph.name_of(primal)
                ))
            })?;

        let mut duplicates = Vec::new();
        for &other in dependents {
            if other == strided || !graph.contains(other) {
                continue;
            }
            let other_node = graph.node(other)?;
            if other_node.args() != strided_node.args() {
                return Err(Error::Invariant(format!(
                    "strided views '{}' and '{}' of '{}' have different arguments",
                    strided_node.name,
                    other_node.name,
                    graph.name_of(view)
                )));
            }
            duplicates.push(other);
        }

        let view_pos = graph.position(view)?;
        if duplicates.is_empty()
            && graph.position(strided)? == view_pos + 1
            && (graph.position(assignment)? == view_pos + 2 || trailing.contains(&assignment))
        {
            trace!(
                primal = graph.name_of(primal),
                "assignment already anchored after its view"
            );
            return Ok(false);
        }

        let strided_spec = NodeSpec::new(strided_node.op.clone(), strided_node.args().to_vec())
            .with_kwargs(strided_node.kwargs().clone());
        let strided_meta = strided_node.meta.clone();
        let assignment_node = graph.node(assignment)?;
        let assignment_kwargs = assignment_node.kwargs().clone();
        let assignment_meta = assignment_node.meta.clone();

        let new_strided = graph.insert_after(view, strided_spec)?;
        graph.node_mut(new_strided)?.meta.propagate_from(&strided_meta);
        let new_assignment = graph.insert_after(
            new_strided,
            NodeSpec::new(Op::SetSource, vec![Arg::Node(primal), Arg::Node(new_strided)])
                .with_kwargs(assignment_kwargs),
        )?;
        graph.node_mut(new_assignment)?.meta.propagate_from(&assignment_meta);

        debug!(
            primal = graph.name_of(primal),
            view = graph.name_of(view),
            strided = graph.name_of(new_strided),
            assignment = graph.name_of(new_assignment),
            duplicates = duplicates.len(),
            "re-anchored primal assignment after view"
        );

        graph.erase_node(assignment)?;
        // Readers left behind (e.g. by an earlier sink to the end) take the copy.
        let readers = graph.replace_all_uses_with(strided, new_strided)?;
        if !readers.is_empty() {
            trace!(
                strided = graph.name_of(new_strided),
                users = readers.len(),
                "strided view readers moved to re-anchored copy"
            );
        }
        graph.erase_node(strided)?;
        for duplicate in duplicates {
            let rewired = graph.replace_all_uses_with(duplicate, primal)?;
            trace!(
                duplicate = graph.name_of(duplicate),
                users = rewired.len(),
                "duplicate strided view now reads primal"
            );
            graph.erase_node(duplicate)?;
        }

        Ok(true)
    }
}

impl Pass for ReinplaceSetFromStridedView {
    fn name(&self) -> &str {
        "reinplace_set_from_strided_view"
    }

    fn run(&self, module: &mut GraphModule) -> Result<bool> {
        let graph = module.graph_mut();
        let assignments = collect_assignments(graph, &self.config)?;
        let view_dependents = collect_view_dependents(graph);
        let trailing = trailing_assignments(graph);
        let mut changed = false;

        for (strided, primal) in strided_view_sources(graph, &assignments) {
            if !graph.contains(strided) {
                trace!(
                    primal = graph.name_of(primal),
                    "strided view already replaced"
                );
                continue;
            }
            let Some(assignment) = assignments.get(primal) else {
                continue;
            };
            let dependents = graph
                .node(strided)?
                .input_node(0)
                .and_then(|view| view_dependents.get(&view))
                .cloned()
                .unwrap_or_default();

            changed |=
                self.reinplace(graph, strided, primal, assignment, &dependents, &trailing)?;
        }

        module.finish_pass()?;
        Ok(changed)
    }
}

impl Default for ReinplaceSetFromStridedView {
    fn default() -> Self {
        Self::new()
    }
}

/// Run [`ReinplaceSetFromStridedView`] with the default configuration.
#[tracing::instrument(skip_all)]
pub fn reinplace_set_from_strided_view(module: &mut GraphModule) -> Result<bool> {
    ReinplaceSetFromStridedView::new().run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{DataType, Meta, MetaValue, TensorMeta};

    fn tensor(shape: &[usize]) -> Meta {
        Meta::tensor(TensorMeta::new(shape.to_vec(), DataType::F32))
    }

    fn strided_args(view: NodeId, offset: i64) -> Vec<Arg> {
        vec![
            Arg::Node(view),
            Arg::ints([4, 4]),
            Arg::ints([4, 1]),
            Arg::Int(offset),
        ]
    }

    #[test]
    fn test_assignment_with_duplicates_reanchored() {
        let mut graph = Graph::new();
        let primal = graph.placeholder("primals_6", tensor(&[4, 4]));
        let buffer = graph.placeholder("getitem_4", tensor(&[16]));
        let view = graph
            .call(Op::View, vec![Arg::Node(buffer), Arg::ints([16])])
            .unwrap();
        let mut strided_meta = tensor(&[4, 4]);
        strided_meta.insert(Meta::STACK_TRACE, MetaValue::Str("copy_out".to_string()));
        let a = graph
            .call_with(NodeSpec::new(Op::AsStrided, strided_args(view, 0)).with_meta(strided_meta))
            .unwrap();
        let b = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
        let mm = graph
            .call(Op::Other("mm".to_string()), vec![Arg::Node(b), Arg::Node(b)])
            .unwrap();
        let set = graph
            .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
            .unwrap();
        let out = graph
            .output(vec![Arg::Node(mm), Arg::Node(primal)])
            .unwrap();
        let mut module = GraphModule::new(graph);

        let pass = ReinplaceSetFromStridedView::new();
        assert!(pass.run(&mut module).unwrap());

        let graph = module.graph();
        let ids = graph.node_ids();
        assert_eq!(ids.len(), 7);
        assert_eq!(&ids[..3], &[primal, buffer, view]);
        assert_eq!(&ids[5..], &[mm, out]);

        let new_strided_id = ids[3];
        let new_set_id = ids[4];
        assert_eq!(graph.node(new_strided_id).unwrap().op, Op::AsStrided);
        assert_eq!(graph.node(new_set_id).unwrap().op, Op::SetSource);
        assert_eq!(graph.users(view), vec![new_strided_id]);

        for gone in [a, b, set] {
            assert!(!graph.contains(gone));
        }
        assert_eq!(
            graph.node(new_strided_id).unwrap().meta.get(Meta::STACK_TRACE),
            Some(&MetaValue::Str("copy_out".to_string()))
        );
        assert_eq!(
            graph.node(new_set_id).unwrap().referenced_nodes(),
            vec![primal, new_strided_id]
        );
        assert_eq!(graph.node(mm).unwrap().referenced_nodes(), vec![primal, primal]);
    }

    #[test]
    fn test_mismatched_duplicate_is_an_invariant_violation() {
        let mut graph = Graph::new();
        let primal = graph.placeholder("primals_1", tensor(&[4, 4]));
        let buffer = graph.placeholder("getitem", tensor(&[32]));
        let view = graph
            .call(Op::View, vec![Arg::Node(buffer), Arg::ints([32])])
            .unwrap();
        let a = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
        let b = graph.call(Op::AsStrided, strided_args(view, 16)).unwrap();
        graph
            .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
            .unwrap();
        graph.output(vec![Arg::Node(b), Arg::Node(primal)]).unwrap();
        let mut module = GraphModule::new(graph);

        let err = reinplace_set_from_strided_view(&mut module).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)), "{err}");
    }

    #[test]
    fn test_strided_view_not_from_view_is_an_invariant_violation() {
        let mut graph = Graph::new();
        let primal = graph.placeholder("primals_1", tensor(&[4, 4]));
        let buffer = graph.placeholder("getitem", tensor(&[16]));
        let a = graph.call(Op::AsStrided, strided_args(buffer, 0)).unwrap();
        graph
            .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
            .unwrap();
        graph.output(vec![Arg::Node(primal)]).unwrap();
        let mut module = GraphModule::new(graph);

        let err = reinplace_set_from_strided_view(&mut module).unwrap_err();
        assert!(matches!(err, Error::Invariant(_)), "{err}");
    }

    #[test]
    fn test_canonical_pattern_left_alone() {
        let mut graph = Graph::new();
        let primal = graph.placeholder("primals_1", tensor(&[4, 4]));
        let buffer = graph.placeholder("getitem", tensor(&[16]));
        let view = graph
            .call(Op::View, vec![Arg::Node(buffer), Arg::ints([16])])
            .unwrap();
        let a = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
        let set = graph
            .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
            .unwrap();
        graph.output(vec![Arg::Node(primal)]).unwrap();
        let mut module = GraphModule::new(graph);
        let before = module.graph().node_ids();

        assert!(!reinplace_set_from_strided_view(&mut module).unwrap());
        assert_eq!(module.graph().node_ids(), before);
        assert!(module.graph().contains(set));
    }

    #[test]
    fn test_other_readers_of_assigned_view_take_the_copy() {
        let mut graph = Graph::new();
        let primal = graph.placeholder("primals_1", tensor(&[4, 4]));
        let buffer = graph.placeholder("getitem", tensor(&[2, 8]));
        let view = graph
            .call(Op::View, vec![Arg::Node(buffer), Arg::ints([16])])
            .unwrap();
        let a = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
        let b = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
        let mm = graph
            .call(Op::Other("mm".to_string()), vec![Arg::Node(a), Arg::Node(b)])
            .unwrap();
        graph
            .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
            .unwrap();
        graph.output(vec![Arg::Node(mm), Arg::Node(primal)]).unwrap();
        let mut module = GraphModule::new(graph);

        assert!(reinplace_set_from_strided_view(&mut module).unwrap());

        let graph = module.graph();
        let copy = graph.node_ids()[3];
        assert_eq!(graph.node(copy).unwrap().op, Op::AsStrided);
        assert!(!graph.contains(a));
        assert!(!graph.contains(b));
        assert_eq!(graph.node(mm).unwrap().referenced_nodes(), vec![copy, primal]);
    }

    #[test]
    fn test_assignment_sunk_to_end_left_alone() {
        let mut graph = Graph::new();
        let primal = graph.placeholder("primals_1", tensor(&[4, 4]));
        let buffer = graph.placeholder("getitem", tensor(&[2, 8]));
        let view = graph
            .call(Op::View, vec![Arg::Node(buffer), Arg::ints([16])])
            .unwrap();
        let a = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
        let mm = graph
            .call(Op::Other("mm".to_string()), vec![Arg::Node(a), Arg::Node(a)])
            .unwrap();
        graph
            .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
            .unwrap();
        graph.output(vec![Arg::Node(mm), Arg::Node(primal)]).unwrap();
        let mut module = GraphModule::new(graph);
        let before = module.graph().node_ids();

        assert!(!reinplace_set_from_strided_view(&mut module).unwrap());
        assert_eq!(module.graph().node_ids(), before);
    }
}
