//! Cancel back-to-back 2-axis permutations.
//!
//! ```text
//! %permute_3 = permute(%getitem_106, [1, 0])  # f32[12340, 12340]
//! %permute_4 = permute(%permute_3, [1, 0])    # f32[12340, 12340]
//! ```
//!
//! Applying the same 2-axis ordering twice is the identity, so the users of
//! `permute_4` can read `getitem_106` directly.

use super::{collapse_pair, sole_cancelling_user};
use crate::classify::NodeRole;
use graft_core::{Arg, GraphModule, Pass, Result};
use tracing::{debug, trace};

/// Pass that removes no-op permutation pairs.
///
/// Only orderings over exactly two axes are handled; higher-rank pairs are
/// left alone even when they cancel. The first permutation must have no
/// user other than the second.
pub struct CancelDoublePermute;

impl CancelDoublePermute {
    /// Create a new double-permute cancellation pass.
    pub fn new() -> Self {
        Self
    }
}

impl Pass for CancelDoublePermute {
    fn name(&self) -> &str {
        "cancel_double_permute"
    }

    fn run(&self, module: &mut GraphModule) -> Result<bool> {
        let graph = module.graph_mut();
        let mut changed = false;

        for first in graph.node_ids() {
            // Erased earlier in this pass.
            let Ok(node) = graph.node(first) else {
                continue;
            };
            if !node.is_permute() {
                continue;
            }
            let Some(dims) = node.arg(1).and_then(Arg::as_ints) else {
                continue;
            };
            if dims.len() != 2 {
                trace!(node = %node.name, rank = dims.len(), "skipping permute of rank != 2");
                continue;
            }
            let Some(input) = node.input_node(0) else {
                continue;
            };

            let partner = sole_cancelling_user(graph, first, |user| {
                user.is_permute() && user.arg(1).and_then(Arg::as_ints).as_ref() == Some(&dims)
            })?;
            let Some(second) = partner else {
                continue;
            };

            debug!(
                first = graph.name_of(first),
                second = graph.name_of(second),
                input = graph.name_of(input),
                "cancelling permute pair"
            );
            collapse_pair(graph, first, second, input)?;
            changed = true;
        }

        module.finish_pass()?;
        Ok(changed)
    }
}

impl Default for CancelDoublePermute {
    fn default() -> Self {
        Self::new()
    }
}

/// Run [`CancelDoublePermute`] on `module`.
#[tracing::instrument(skip_all)]
pub fn cancel_double_permute(module: &mut GraphModule) -> Result<bool> {
    CancelDoublePermute::new().run(module)
}
