//! Graph-bearing module handed to passes.

use crate::ir::Graph;
use crate::Result;

/// A graph together with its cached program listing.
///
/// The listing is the executable form downstream consumers read. It goes
/// stale whenever the graph is mutated and is regenerated by
/// [`GraphModule::recompile`].
pub struct GraphModule {
    graph: Graph,

    /// Program listing as of the last recompilation.
    code: String,

    /// Number of recompilations so far.
    generation: u64,
}

impl GraphModule {
    /// Wrap a graph and compile its initial listing.
    pub fn new(graph: Graph) -> Self {
        let code = graph.to_string();
        Self {
            graph,
            code,
            generation: 0,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable access to the graph. The cached listing is stale until the
    /// next [`GraphModule::recompile`].
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    /// The cached program listing.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Regenerate the cached listing from the current graph.
    pub fn recompile(&mut self) {
        self.code = self.graph.to_string();
        self.generation += 1;
        tracing::trace!(generation = self.generation, "recompiled module");
    }

    /// Verify the graph, then recompile. Called by every pass on exit.
    pub fn finish_pass(&mut self) -> Result<()> {
        self.graph.lint()?;
        self.recompile();
        Ok(())
    }
}

impl From<Graph> for GraphModule {
    fn from(graph: Graph) -> Self {
        Self::new(graph)
    }
}
