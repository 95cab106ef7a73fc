//! Node inspection utilities.

use anyhow::{Context, Result};
use graft_core::{Graph, MetaValue, NodeId};
use graft_passes::NodeRole;

use std::fmt::Write;

/// Describe one or more nodes by name, separated by blank lines.
pub fn inspect_nodes(graph: &Graph, node_names: &[String]) -> Result<String> {
    let mut out = String::new();
    for (i, node_name) in node_names.iter().enumerate() {
        let node_id = graph
            .find_node_by_name(node_name)
            .with_context(|| format!("Node '{}' not found", node_name))?;
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&describe_node(graph, node_id)?);
    }
    Ok(out)
}

/// Position, definition, role, inputs, users and metadata of a node.
pub fn describe_node(graph: &Graph, node_id: NodeId) -> Result<String> {
    let node = graph.node(node_id)?;
    let mut out = String::new();

    writeln!(
        out,
        "Node: {} ({}) at position {}",
        node.name,
        node.op,
        graph.position(node_id)?
    )?;
    writeln!(out, "  {}", graph.format_node(node_id)?)?;
    if node.is_tensor_primal() {
        writeln!(out, "  Role: primal input")?;
    } else if node.is_primal() {
        writeln!(out, "  Role: primal input (not tensor-valued)")?;
    }

    let inputs = node.referenced_nodes();
    if inputs.is_empty() {
        writeln!(out, "  Inputs: (none)")?;
    } else {
        writeln!(out, "  Inputs:")?;
        for (i, input) in inputs.into_iter().enumerate() {
            writeln!(out, "    {}: {}", i, graph.name_of(input))?;
        }
    }

    let users = graph.users(node_id);
    if users.is_empty() {
        writeln!(out, "  Users: (none)")?;
    } else {
        writeln!(out, "  Users:")?;
        for user in users {
            writeln!(out, "    {} ({})", graph.name_of(user), graph.node(user)?.op)?;
        }
    }

    if node.meta.is_empty() {
        writeln!(out, "  Meta: (none)")?;
    } else {
        writeln!(out, "  Meta:")?;
        for (key, value) in node.meta.iter() {
            writeln!(out, "    {}: {}", key, display_meta(value))?;
        }
    }

    Ok(out)
}

fn display_meta(value: &MetaValue) -> String {
    match value {
        MetaValue::Tensor(tensor) => tensor.to_string(),
        MetaValue::Int(v) => v.to_string(),
        MetaValue::Bool(v) => v.to_string(),
        MetaValue::Str(s) if s.contains('\n') => format!("{:?}", s),
        MetaValue::Str(s) => s.clone(),
        MetaValue::None => "None".to_string(),
    }
}

/// Count of nodes per operation, most frequent first.
pub fn op_histogram(graph: &Graph) -> Vec<(String, usize)> {
    let mut counts: std::collections::BTreeMap<String, usize> = Default::default();
    for (_, node) in graph.nodes() {
        *counts.entry(node.op.target().to_string()).or_default() += 1;
    }
    let mut histogram: Vec<(String, usize)> = counts.into_iter().collect();
    histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    histogram
}

/// Names of the tensor-valued primal inputs, flagging the assigned ones.
pub fn primal_summary(graph: &Graph) -> Vec<(String, bool)> {
    let assigned: std::collections::HashSet<NodeId> = graph
        .nodes()
        .filter(|(_, node)| node.is_set_source())
        .filter_map(|(_, node)| node.input_node(0))
        .collect();
    graph
        .nodes()
        .filter(|(_, node)| node.is_tensor_primal())
        .map(|(id, node)| (node.name.clone(), assigned.contains(&id)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_core::{Arg, DataType, Meta, Op, TensorMeta};

    fn graph() -> Graph {
        let mut graph = Graph::new();
        let w = graph.placeholder(
            "primals_1",
            Meta::tensor(TensorMeta::new(vec![4, 4], DataType::F32)),
        );
        let g = graph.placeholder("tangents_1", Meta::new());
        let t = graph.call(Op::Transpose, vec![Arg::Node(w)]).unwrap();
        let t2 = graph.call(Op::Transpose, vec![Arg::Node(g)]).unwrap();
        graph
            .call(Op::SetSource, vec![Arg::Node(w), Arg::Node(t)])
            .unwrap();
        graph.output(vec![Arg::Node(t), Arg::Node(t2)]).unwrap();
        graph
    }

    #[test]
    fn test_describe_node() {
        let graph = graph();
        let w = graph.find_node_by_name("primals_1").unwrap();
        let text = describe_node(&graph, w).unwrap();

        assert!(text.starts_with("Node: primals_1 (placeholder) at position 0"), "{text}");
        assert!(text.contains("Role: primal input"), "{text}");
        assert!(text.contains("Inputs: (none)"), "{text}");
        assert!(text.contains("    t (t)"), "{text}");
        assert!(text.contains("    set (set_)"), "{text}");
        assert!(text.contains("tensor_meta: f32[4, 4]"), "{text}");
    }

    #[test]
    fn test_inspect_unknown_node() {
        let err = inspect_nodes(&graph(), &["missing".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Node 'missing' not found"));
    }

    #[test]
    fn test_op_histogram() {
        let histogram = op_histogram(&graph());
        assert_eq!(histogram[0], ("placeholder".to_string(), 2));
        assert_eq!(histogram[1], ("t".to_string(), 2));
        assert_eq!(histogram.len(), 4);
    }

    #[test]
    fn test_primal_summary() {
        assert_eq!(
            primal_summary(&graph()),
            vec![("primals_1".to_string(), true)]
        );
    }
}
