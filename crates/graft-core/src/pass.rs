//! Rewrite pass trait.

use crate::Result;
use crate::module::GraphModule;

/// Trait for implementing graph rewrite passes.
///
/// A pass is a graph transformation over a [`GraphModule`]. It mutates the
/// graph in place and is expected to leave it structurally valid: passes end
/// with [`GraphModule::finish_pass`], which verifies the graph and refreshes
/// the cached listing.
///
/// Which passes run, and in what order, is decided by the caller.
///
/// # Return Value
///
/// The `run()` method returns `Ok(true)` if the pass made changes to the
/// graph, or `Ok(false)` if its pattern was absent. This allows callers to
/// detect when the graph reaches a fixed point.
///
/// # Example
///
/// ```ignore
/// struct DropUnusedTransposes;
///
/// impl Pass for DropUnusedTransposes {
///     fn name(&self) -> &str {
///         "drop_unused_transposes"
///     }
///
///     fn run(&self, module: &mut GraphModule) -> Result<bool> {
///         let mut changed = false;
///         // Erase transposes nobody reads...
///         module.finish_pass()?;
///         Ok(changed)
///     }
/// }
/// ```
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and for selecting passes by name).
    fn name(&self) -> &str;

    /// Run the pass on the given module.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if the pass made changes to the graph.
    /// * `Ok(false)` if no changes were made.
    /// * `Err(_)` if a structural invariant was violated. The graph may be
    ///   partially rewritten and must be discarded.
    fn run(&self, module: &mut GraphModule) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Arg, Graph};
    use crate::types::Meta;

    // Mock pass for testing
    struct NoOpPass;

    impl Pass for NoOpPass {
        fn name(&self) -> &str {
            "noop"
        }

        fn run(&self, module: &mut GraphModule) -> Result<bool> {
            module.finish_pass()?;
            Ok(false)
        }
    }

    #[test]
    fn test_pass_trait() {
        let mut graph = Graph::new();
        let x = graph.placeholder("x", Meta::new());
        graph.output(vec![Arg::Node(x)]).unwrap();
        let mut module = GraphModule::new(graph);

        let pass: Box<dyn Pass> = Box::new(NoOpPass);
        assert_eq!(pass.name(), "noop");
        assert!(!pass.run(&mut module).unwrap());
        assert_eq!(module.generation(), 1);
    }
}
