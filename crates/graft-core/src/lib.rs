//! Core dataflow graph, verification and pass trait for graft.
//!
//! This crate provides the substrate every rewrite pass operates on:
//! - Ordered graph IR (`Graph`, `Node`, `NodeId`, `Arg`, `Op`)
//! - Node metadata (`Meta`, `TensorMeta`, `DataType`)
//! - Structural verification (`Graph::lint`) and the graph-bearing
//!   `GraphModule` with its recompilation hook
//! - The `Pass` trait
//! - DOT export for debugging

pub mod dot;
pub mod ir;
pub mod ir_builder;
pub mod lint;
pub mod module;
pub mod pass;
pub mod types;

// Re-export commonly used types
pub use dot::to_dot;
pub use ir::{Arg, Graph, Node, NodeId, NodeSpec, Op, PositionWindow};
pub use module::GraphModule;
pub use pass::Pass;
pub use types::{DataType, Meta, MetaValue, TensorMeta};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for graph operations and passes.
///
/// Any error returned while a pass is rewriting leaves the graph in an
/// unspecified state; no rollback is attempted.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Cannot erase node '{node}': still used by {users:?}")]
    LiveUses { node: String, users: Vec<String> },

    #[error("Graph verification failed: {0}")]
    Lint(String),

    #[error("Pass invariant violated: {0}")]
    Invariant(String),

    #[error("Unsupported graph: {0}")]
    Unsupported(String),
}
