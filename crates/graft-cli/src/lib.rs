//! Graft CLI library - shared functionality for testing and binary.

pub mod inspect;
pub mod listing;

use graft_core::GraphModule;
use graft_passes::{DuplicateAssignmentPolicy, PASS_NAMES, PassPipeline, ResolverConfig};

/// How the `run` command applies its passes.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Pass names, in run order.
    pub passes: Vec<String>,

    /// Repeat the passes until nothing changes, at most this many rounds.
    pub fixpoint: Option<usize>,

    /// Keep the last assignment when a primal is assigned more than once.
    pub allow_duplicate_assignments: bool,
}

impl RunOptions {
    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            duplicate_assignments: if self.allow_duplicate_assignments {
                DuplicateAssignmentPolicy::LastWins
            } else {
                DuplicateAssignmentPolicy::Reject
            },
        }
    }

    /// Build the pipeline for the requested pass names.
    ///
    /// # Errors
    ///
    /// Fails on an unknown pass name.
    pub fn pipeline(&self) -> anyhow::Result<PassPipeline> {
        let config = self.resolver_config();
        let mut pipeline = PassPipeline::new();
        for name in &self.passes {
            let pass = graft_passes::pass_by_name(name, config).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown pass '{}' (known passes: {})",
                    name,
                    PASS_NAMES.join(", ")
                )
            })?;
            pipeline.add_boxed(pass);
        }
        Ok(pipeline)
    }

    /// Run the requested passes over `module`. Returns whether the graph changed.
    pub fn apply(&self, module: &mut GraphModule) -> anyhow::Result<bool> {
        let pipeline = self.pipeline()?;
        let changed = match self.fixpoint {
            Some(max_rounds) => pipeline.run_until_fixpoint(module, max_rounds)? > 0,
            None => pipeline.run(module)?,
        };
        Ok(changed)
    }
}
