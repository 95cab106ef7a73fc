//! Peephole rewrite passes for traced training graphs.
//!
//! The passes clean up what remains after sharded parameters are gathered
//! and copied back into their primal inputs:
//! 1. **Assignment placement** - re-anchor primal assignments on one canonical
//!    strided view, then sink them to the end of the graph
//! 2. **Cancellation** - drop back-to-back permutations and transposes that
//!    undo each other
//! 3. **Reshape cleanup** - drop views to the shape a tensor already has
//!
//! Passes are registered explicitly on a [`PassPipeline`]; nothing runs unless
//! the caller asks for it.
//!
//! # Example
//!
//! ```
//! use graft_core::{Arg, Graph, GraphModule, Meta, Op};
//! use graft_passes::{CancelDoubleTranspose, PassPipeline, RemoveNoopViews};
//!
//! # fn main() -> graft_core::Result<()> {
//! let mut graph = Graph::new();
//! let x = graph.placeholder("primals_1", Meta::new());
//! let t1 = graph.call(Op::Transpose, vec![Arg::Node(x)])?;
//! let t2 = graph.call(Op::Transpose, vec![Arg::Node(t1)])?;
//! graph.output(vec![Arg::Node(t2)])?;
//!
//! let mut module = GraphModule::new(graph);
//! let mut pipeline = PassPipeline::new();
//! pipeline
//!     .add_pass(CancelDoubleTranspose::new())
//!     .add_pass(RemoveNoopViews::new());
//!
//! assert!(pipeline.run(&mut module)?);
//! assert_eq!(module.graph().node_count(), 2);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod passes;
pub mod resolve;

pub use classify::{Classification, NodeRole, classify};
pub use passes::{
    CancelDoublePermute, CancelDoubleTranspose, MoveSetToEnd, ReinplaceSetFromStridedView,
    RemoveNoopViews, cancel_double_permute, cancel_double_transpose, move_set_to_end,
    reinplace_set_from_strided_view, remove_noop_views,
};
pub use resolve::{Assignments, DuplicateAssignmentPolicy, ResolverConfig};

pub use graft_core::{GraphModule, Pass};

use graft_core::Result;

/// Names accepted by [`pass_by_name`], in the order they usually run.
pub const PASS_NAMES: [&str; 5] = [
    "reinplace_set_from_strided_view",
    "move_set_to_end",
    "cancel_double_permute",
    "cancel_double_transpose",
    "remove_noop_views",
];

/// Instantiate a pass from its name.
///
/// `config` is used by the passes that resolve primal assignments and ignored
/// by the others.
pub fn pass_by_name(name: &str, config: ResolverConfig) -> Option<Box<dyn Pass>> {
    let pass: Box<dyn Pass> = match name {
        "reinplace_set_from_strided_view" => {
            Box::new(ReinplaceSetFromStridedView::with_config(config))
        }
        "move_set_to_end" => Box::new(MoveSetToEnd::with_config(config)),
        "cancel_double_permute" => Box::new(CancelDoublePermute::new()),
        "cancel_double_transpose" => Box::new(CancelDoubleTranspose::new()),
        "remove_noop_views" => Box::new(RemoveNoopViews::new()),
        _ => return None,
    };
    Some(pass)
}

/// Ordered list of passes run over a module.
///
/// Passes run in the order they were registered. Each pass verifies and
/// recompiles the module when it finishes, so a failing pass leaves the
/// error of the first broken invariant.
#[derive(Default)]
pub struct PassPipeline {
    passes: Vec<Box<dyn Pass>>,
}

impl PassPipeline {
    /// Create an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pass to the end of the pipeline.
    ///
    /// # Returns
    ///
    /// Returns a mutable reference to self for method chaining.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Add an already boxed pass, e.g. one built by [`pass_by_name`].
    pub fn add_boxed(&mut self, pass: Box<dyn Pass>) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn len(&self) -> usize {
        self.passes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Names of the registered passes, in run order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|pass| pass.name()).collect()
    }

    /// Run every pass once. Returns whether any pass changed the graph.
    ///
    /// # Errors
    ///
    /// Stops at the first pass that fails and returns its error.
    #[tracing::instrument(skip_all, fields(num_passes = self.passes.len(), num_nodes = module.graph().node_count()))]
    pub fn run(&self, module: &mut GraphModule) -> Result<bool> {
        let mut changed = false;
        for pass in &self.passes {
            let _span = tracing::debug_span!("pass", name = pass.name()).entered();
            let pass_changed = pass.run(module)?;
            tracing::debug!(changed = pass_changed, nodes = module.graph().node_count());
            changed |= pass_changed;
        }
        Ok(changed)
    }

    /// Run the pipeline repeatedly until no pass changes the graph, at most
    /// `max_rounds` times. Returns the number of rounds that changed it.
    #[tracing::instrument(skip(self, module))]
    pub fn run_until_fixpoint(&self, module: &mut GraphModule, max_rounds: usize) -> Result<usize> {
        let mut rounds = 0;
        while rounds < max_rounds {
            if !self.run(module)? {
                return Ok(rounds);
            }
            rounds += 1;
        }
        tracing::warn!(max_rounds, "pass pipeline did not reach a fixpoint");
        Ok(rounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{Arg, Graph, Meta, Op};

    struct NoOpPass;

    impl Pass for NoOpPass {
        fn name(&self) -> &str {
            "noop"
        }

        fn run(&self, _module: &mut GraphModule) -> Result<bool> {
            Ok(false)
        }
    }

    fn transposes(count: usize) -> GraphModule {
        let mut graph = Graph::new();
        let mut last = graph.placeholder("primals_1", Meta::new());
        for _ in 0..count {
            last = graph.call(Op::Transpose, vec![Arg::Node(last)]).unwrap();
        }
        graph.output(vec![Arg::Node(last)]).unwrap();
        GraphModule::new(graph)
    }

    #[test]
    fn test_pipeline_add_pass() {
        let mut pipeline = PassPipeline::new();
        assert!(pipeline.is_empty());

        pipeline.add_pass(NoOpPass).add_pass(CancelDoubleTranspose::new());

        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.pass_names(), vec!["noop", "cancel_double_transpose"]);
    }

    #[test]
    fn test_pipeline_reports_change() {
        let mut module = transposes(2);
        let mut pipeline = PassPipeline::new();
        pipeline.add_pass(NoOpPass);
        assert!(!pipeline.run(&mut module).unwrap());

        pipeline.add_pass(CancelDoubleTranspose::new());
        assert!(pipeline.run(&mut module).unwrap());
        assert_eq!(module.graph().node_count(), 2);
    }

    #[test]
    fn test_run_until_fixpoint() {
        let mut module = transposes(4);
        let mut pipeline = PassPipeline::new();
        pipeline.add_pass(CancelDoubleTranspose::new());

        let rounds = pipeline.run_until_fixpoint(&mut module, 10).unwrap();

        assert!(rounds >= 1);
        assert_eq!(module.graph().node_count(), 2);
        assert!(!pipeline.run(&mut module).unwrap());
    }

    #[test]
    fn test_pass_by_name_knows_every_pass() {
        for name in PASS_NAMES {
            let pass = pass_by_name(name, ResolverConfig::default()).unwrap();
            assert_eq!(pass.name(), name);
        }
        assert!(pass_by_name("constant_folding", ResolverConfig::default()).is_none());
    }
}
