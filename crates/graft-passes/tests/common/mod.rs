//! Common test utilities for pass tests.
//!
//! Graph builders shaped like the forward graphs produced after gathering
//! sharded parameters, plus tracing setup.

#![allow(dead_code)]

use graft_core::{Arg, DataType, Graph, GraphModule, Meta, NodeId, Op, TensorMeta};

pub use graft_passes::{PASS_NAMES, Pass, ResolverConfig, pass_by_name};

/// Install a test subscriber so pass logs show up with `--nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// `f32` tensor metadata with the given shape.
pub fn tensor(shape: &[usize]) -> Meta {
    Meta::tensor(TensorMeta::new(shape.to_vec(), DataType::F32))
}

/// `as_strided(view, [4, 4], [4, 1], offset)`.
pub fn strided_args(view: NodeId, offset: i64) -> Vec<Arg> {
    vec![
        Arg::Node(view),
        Arg::ints([4, 4]),
        Arg::ints([4, 1]),
        Arg::Int(offset),
    ]
}

pub fn mm(graph: &mut Graph, a: NodeId, b: NodeId) -> NodeId {
    graph
        .call(Op::Other("mm".to_string()), vec![Arg::Node(a), Arg::Node(b)])
        .unwrap()
}

/// Handles into the graph built by [`make_gathered_param_graph`].
pub struct GatheredParam {
    pub primal: NodeId,
    pub x: NodeId,
    pub view: NodeId,
    pub a: NodeId,
    pub b: NodeId,
    pub set: NodeId,
    pub use_b: NodeId,
    pub use_primal: NodeId,
    pub output: NodeId,
}

/// A parameter copied out of a gathered flat buffer.
///
/// Graph structure:
/// - Inputs: primals_1:[4, 4], primals_2:[4, 4], getitem:[2, 8]
/// - view = view(getitem, [16])
/// - a = as_strided(view, ...), b = as_strided(view, ...) (same args)
/// - use_b = mm(b, primals_2)
/// - set_(primals_1, a)
/// - use_primal = mm(primals_1, use_b)
/// - Output: [use_primal, primals_1]
pub fn make_gathered_param_graph() -> (GraphModule, GatheredParam) {
    let mut graph = Graph::new();
    let primal = graph.placeholder("primals_1", tensor(&[4, 4]));
    let x = graph.placeholder("primals_2", tensor(&[4, 4]));
    let buffer = graph.placeholder("getitem", tensor(&[2, 8]));
    let view = graph
        .call(Op::View, vec![Arg::Node(buffer), Arg::ints([16])])
        .unwrap();
    let a = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
    let b = graph.call(Op::AsStrided, strided_args(view, 0)).unwrap();
    let use_b = mm(&mut graph, b, x);
    let set = graph
        .call(Op::SetSource, vec![Arg::Node(primal), Arg::Node(a)])
        .unwrap();
    let use_primal = mm(&mut graph, primal, use_b);
    let output = graph
        .output(vec![Arg::List(vec![Arg::Node(use_primal), Arg::Node(primal)])])
        .unwrap();

    let handles = GatheredParam {
        primal,
        x,
        view,
        a,
        b,
        set,
        use_b,
        use_primal,
        output,
    };
    (GraphModule::new(graph), handles)
}

/// A small graph exercising none of the rewrite patterns.
///
/// Inputs: primals_1:[4, 8], tangents_1:[8, 4]; one permute over 2 axes and
/// a reshape to a different shape.
pub fn make_plain_graph() -> GraphModule {
    let mut graph = Graph::new();
    let w = graph.placeholder("primals_1", tensor(&[4, 8]));
    let g = graph.placeholder("tangents_1", tensor(&[8, 4]));
    let p = graph
        .call(Op::Permute, vec![Arg::Node(w), Arg::ints([1, 0])])
        .unwrap();
    let prod = mm(&mut graph, p, g);
    let flat = graph
        .call(Op::View, vec![Arg::Node(prod), Arg::ints([64])])
        .unwrap();
    graph.output(vec![Arg::Node(flat), Arg::Node(w)]).unwrap();
    GraphModule::new(graph)
}

/// Instantiate every known pass with the default configuration.
pub fn all_passes() -> Vec<Box<dyn Pass>> {
    PASS_NAMES
        .iter()
        .map(|name| pass_by_name(name, ResolverConfig::default()).unwrap())
        .collect()
}
