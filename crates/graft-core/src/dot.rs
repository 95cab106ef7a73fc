//! DOT graph visualization for dataflow graphs.
//!
//! Generates Graphviz DOT format showing every node in execution order and
//! the def-use edges between them.

use crate::ir::{Graph, Op};

/// Generate a DOT graph from a dataflow graph.
///
/// The graph shows:
/// - Each node labeled with its name, op and position (`[#idx]`)
/// - Tensor shapes where `tensor_meta` is known
/// - Inputs in green, in-place assignments in red, the output as a double box
/// - Def-use edges from producer to user
///
/// # Example
///
/// ```ignore
/// let dot = to_dot(module.graph());
/// std::fs::write("graph.dot", dot)?;
/// // Render with: dot -Tpng graph.dot -o graph.png
/// ```
pub fn to_dot(graph: &Graph) -> String {
    let mut dot = String::new();
    dot.push_str("digraph dataflow {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    for (idx, (_, node)) in graph.nodes().enumerate() {
        let mut label = format!("{} [#{}]\\n{}", node.name, idx, node.op);
        if let Some(tensor) = node.meta.tensor_meta() {
            label.push_str(&format!("\\n{}", tensor));
        }

        let style = match node.op {
            Op::Placeholder => ", style=bold, color=green",
            Op::SetSource => ", color=red",
            Op::Output => ", shape=doubleoctagon",
            _ => "",
        };

        dot.push_str(&format!(
            "  {} [label=\"{}\"{}];\n",
            sanitize_name(&node.name),
            label,
            style
        ));
    }

    dot.push('\n');

    for (id, node) in graph.nodes() {
        for user in graph.users(id) {
            let edge_style = if graph.node(user).is_ok_and(|u| u.op == Op::SetSource) {
                " [style=dashed, color=red]"
            } else {
                ""
            };
            dot.push_str(&format!(
                "  {} -> {}{};\n",
                sanitize_name(&node.name),
                sanitize_name(graph.name_of(user)),
                edge_style
            ));
        }
    }

    dot.push_str("}\n");
    dot
}

/// Sanitize a name for use as a DOT identifier.
fn sanitize_name(name: &str) -> String {
    name.replace(['/', '.', ':', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Arg;
    use crate::types::{DataType, Meta, TensorMeta};

    #[test]
    fn test_to_dot_generates_valid_output() {
        let mut graph = Graph::new();
        let x = graph.placeholder(
            "primals_1",
            Meta::tensor(TensorMeta::new(vec![4, 8], DataType::F32)),
        );
        let t = graph.call(Op::Transpose, vec![Arg::Node(x)]).unwrap();
        graph.output(vec![Arg::Node(t)]).unwrap();

        let dot = to_dot(&graph);

        assert!(dot.contains("digraph dataflow"));
        assert!(dot.contains("primals_1 [label=\"primals_1 [#0]\\nplaceholder\\nf32[4, 8]\""));
        assert!(dot.contains("primals_1 -> t;"));
        assert!(dot.contains("t -> output;"));
        assert!(dot.contains("shape=doubleoctagon"));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("/model/add:0"), "_model_add_0");
        assert_eq!(sanitize_name("input.tensor"), "input_tensor");
    }
}
