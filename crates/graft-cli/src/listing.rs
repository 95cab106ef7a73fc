//! JSON graph listings.
//!
//! A listing is an ordered array of nodes. Node references inside arguments
//! are written as `{"node": "<name>"}` and must point at an earlier node:
//!
//! ```json
//! [
//!   {"name": "primals_1", "op": "placeholder",
//!    "meta": {"val": {"shape": [4, 4], "dtype": "f32"}}},
//!   {"name": "t", "op": "t", "args": [{"node": "primals_1"}]},
//!   {"name": "output", "op": "output", "args": [[{"node": "t"}]]}
//! ]
//! ```

use anyhow::{Context, Result, bail};
use graft_core::{Arg, DataType, Graph, Meta, MetaValue, NodeId, NodeSpec, Op, TensorMeta};
use serde::{Deserialize, Serialize};

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One node of a listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub name: String,
    pub op: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<ArgEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kwargs: BTreeMap<String, ArgEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, MetaEntry>,
}

/// A node argument.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ArgEntry {
    Node { node: String },
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ArgEntry>),
    None,
}

/// A metadata value. Tensors are written as `{"shape": [...], "dtype": "f32"}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MetaEntry {
    Tensor { shape: Vec<usize>, dtype: String },
    Bool(bool),
    Int(i64),
    Str(String),
    None,
}

/// Read and parse a listing file.
pub fn load_graph(path: &Path) -> Result<Graph> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read graph from {}", path.display()))?;
    let entries: Vec<NodeEntry> = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse graph listing {}", path.display()))?;
    let graph = graph_from_listing(&entries)?;
    tracing::debug!(path = %path.display(), nodes = graph.node_count(), "loaded graph");
    Ok(graph)
}

/// Write the listing of `graph` as pretty-printed JSON.
pub fn save_graph(graph: &Graph, path: &Path) -> Result<()> {
    let entries = listing_from_graph(graph);
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, &entries)
        .with_context(|| format!("Failed to write graph listing to {}", path.display()))?;
    Ok(())
}

/// Build a graph from listing entries.
///
/// The graph is linted before it is returned, so a listing with forward
/// references, stray nodes after the output or no output at all is rejected.
pub fn graph_from_listing(entries: &[NodeEntry]) -> Result<Graph> {
    let mut graph = Graph::new();
    let mut ids: HashMap<&str, NodeId> = HashMap::new();

    for entry in entries {
        if ids.contains_key(entry.name.as_str()) {
            bail!("Duplicate node name '{}'", entry.name);
        }
        if let Some(output) = graph.output_node() {
            bail!(
                "Node '{}' follows the output node '{}'",
                entry.name,
                graph.name_of(output)
            );
        }

        let op = Op::from_target(&entry.op);
        let args = entry
            .args
            .iter()
            .map(|arg| resolve_arg(arg, &ids))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Invalid arguments of node '{}'", entry.name))?;
        let kwargs = entry
            .kwargs
            .iter()
            .map(|(key, arg)| Ok((key.clone(), resolve_arg(arg, &ids)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .with_context(|| format!("Invalid keyword arguments of node '{}'", entry.name))?;
        let meta = meta_from_entries(&entry.meta)
            .with_context(|| format!("Invalid metadata of node '{}'", entry.name))?;

        let spec = NodeSpec::new(op, args)
            .with_kwargs(kwargs)
            .with_meta(meta)
            .named(entry.name.clone());
        let id = graph
            .append(spec)
            .with_context(|| format!("Failed to add node '{}'", entry.name))?;
        ids.insert(entry.name.as_str(), id);
    }

    graph.lint().context("Graph listing is malformed")?;
    Ok(graph)
}

/// Listing entries of `graph`, in execution order.
pub fn listing_from_graph(graph: &Graph) -> Vec<NodeEntry> {
    graph
        .nodes()
        .map(|(_, node)| NodeEntry {
            name: node.name.clone(),
            op: node.op.target().to_string(),
            args: node.args().iter().map(|arg| arg_entry(graph, arg)).collect(),
            kwargs: node
                .kwargs()
                .iter()
                .map(|(key, arg)| (key.clone(), arg_entry(graph, arg)))
                .collect(),
            meta: node
                .meta
                .iter()
                .map(|(key, value)| (key.to_string(), meta_entry(value)))
                .collect(),
        })
        .collect()
}

fn resolve_arg(arg: &ArgEntry, ids: &HashMap<&str, NodeId>) -> Result<Arg> {
    Ok(match arg {
        ArgEntry::Node { node } => match ids.get(node.as_str()) {
            Some(&id) => Arg::Node(id),
            None => bail!("Reference to unknown or later node '{}'", node),
        },
        ArgEntry::Bool(v) => Arg::Bool(*v),
        ArgEntry::Int(v) => Arg::Int(*v),
        ArgEntry::Float(v) => Arg::Float(*v),
        ArgEntry::Str(s) => Arg::Str(s.clone()),
        ArgEntry::List(items) => Arg::List(
            items
                .iter()
                .map(|item| resolve_arg(item, ids))
                .collect::<Result<_>>()?,
        ),
        ArgEntry::None => Arg::None,
    })
}

fn arg_entry(graph: &Graph, arg: &Arg) -> ArgEntry {
    match arg {
        Arg::Node(id) => ArgEntry::Node {
            node: graph.name_of(*id).to_string(),
        },
        Arg::Bool(v) => ArgEntry::Bool(*v),
        Arg::Int(v) => ArgEntry::Int(*v),
        Arg::Float(v) => ArgEntry::Float(*v),
        Arg::Str(s) => ArgEntry::Str(s.clone()),
        Arg::List(items) => {
            ArgEntry::List(items.iter().map(|item| arg_entry(graph, item)).collect())
        }
        Arg::None => ArgEntry::None,
    }
}

fn meta_from_entries(entries: &BTreeMap<String, MetaEntry>) -> Result<Meta> {
    let mut meta = Meta::new();
    for (key, entry) in entries {
        let value = match entry {
            MetaEntry::Tensor { shape, dtype } => {
                let dtype = dtype.parse::<DataType>().map_err(anyhow::Error::msg)?;
                MetaValue::Tensor(TensorMeta::new(shape.clone(), dtype))
            }
            MetaEntry::Bool(v) => MetaValue::Bool(*v),
            MetaEntry::Int(v) => MetaValue::Int(*v),
            MetaEntry::Str(s) => MetaValue::Str(s.clone()),
            MetaEntry::None => MetaValue::None,
        };
        meta.insert(key.clone(), value);
    }
    // A tensor `val` without explicit `tensor_meta` describes the same tensor.
    let inferred = match (meta.val(), meta.get(Meta::TENSOR_META)) {
        (Some(MetaValue::Tensor(tensor)), None) => Some(tensor.clone()),
        _ => None,
    };
    if let Some(tensor) = inferred {
        meta.insert(Meta::TENSOR_META, MetaValue::Tensor(tensor));
    }
    Ok(meta)
}

fn meta_entry(value: &MetaValue) -> MetaEntry {
    match value {
        MetaValue::Tensor(tensor) => MetaEntry::Tensor {
            shape: tensor.shape.clone(),
            dtype: tensor.dtype.to_string(),
        },
        MetaValue::Bool(v) => MetaEntry::Bool(*v),
        MetaValue::Int(v) => MetaEntry::Int(*v),
        MetaValue::Str(s) => MetaEntry::Str(s.clone()),
        MetaValue::None => MetaEntry::None,
    }
}
