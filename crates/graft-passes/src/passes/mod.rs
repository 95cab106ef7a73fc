//! Rewrite passes.

mod double_permute;
mod double_transpose;
mod move_set_to_end;
mod noop_views;
mod reinplace_set;

pub use double_permute::{CancelDoublePermute, cancel_double_permute};
pub use double_transpose::{CancelDoubleTranspose, cancel_double_transpose};
pub use move_set_to_end::{MoveSetToEnd, move_set_to_end};
pub use noop_views::{RemoveNoopViews, remove_noop_views};
pub use reinplace_set::{ReinplaceSetFromStridedView, reinplace_set_from_strided_view};

use graft_core::{Graph, Node, NodeId, Result};

/// The user of `first` that undoes it, if it is the only user of `first`.
fn sole_cancelling_user<F>(graph: &Graph, first: NodeId, cancels: F) -> Result<Option<NodeId>>
where
    F: Fn(&Node) -> bool,
{
    match graph.users(first).as_slice() {
        &[second] => {
            let user = graph.node(second)?;
            let undoes_first = user.input_node(0) == Some(first) && cancels(user);
            Ok(undoes_first.then_some(second))
        }
        _ => Ok(None),
    }
}

/// Route every use of `second` to `input` and drop the pair.
fn collapse_pair(graph: &mut Graph, first: NodeId, second: NodeId, input: NodeId) -> Result<()> {
    graph.replace_all_uses_with(second, input)?;
    graph.erase_node(second)?;
    graph.erase_node(first)
}
