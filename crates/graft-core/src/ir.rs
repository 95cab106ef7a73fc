//! Ordered dataflow graph.
//!
//! The graph is an arena of [`Node`]s addressed by stable [`NodeId`] handles:
//! - **Nodes** live in a petgraph `StableGraph`. Its slots are recycled, so
//!   handles are drawn from a counter instead and mapped to slots. A handle
//!   kept after its node was erased never resolves to a newer node.
//! - **Edges** are the def-use index: one edge `producer -> user` for every
//!   pair where `user` references `producer` in its args or kwargs. They are
//!   patched on every insert, erase and rewire.
//! - **Order** is an explicit `Vec<NodeId>` giving the execution order. Every
//!   argument reference must point at an earlier node, and the single
//!   [`Op::Output`] node is always last.

use crate::types::Meta;
use crate::{Error, Result};
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Stable handle of a node. Never reused within a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

// ─────────────────────────────────── Op ──────────────────────────────────

/// Operation performed by a node.
///
/// Only the operations the rewrite passes recognize get their own variant;
/// everything else is carried verbatim in [`Op::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Op {
    /// External input of the graph.
    Placeholder,

    /// Reshape over the same storage: `view(input, shape)`.
    View,

    /// Strided view: `as_strided(input, size, stride, storage_offset)`.
    AsStrided,

    /// Axis permutation: `permute(input, dims)`.
    Permute,

    /// 2-D transpose: `t(input)`.
    Transpose,

    /// In-place assignment: `set_(primal, value)`.
    SetSource,

    /// Functionalized call of a mutating kernel.
    AutoFunctionalized,

    /// Element extraction from a tuple-valued node.
    GetItem,

    /// Terminal node returning the graph results.
    Output,

    /// Any operation the passes do not need to recognize.
    Other(String),
}

impl Op {
    /// Canonical textual target of the operation.
    pub fn target(&self) -> &str {
        match self {
            Op::Placeholder => "placeholder",
            Op::View => "view",
            Op::AsStrided => "as_strided",
            Op::Permute => "permute",
            Op::Transpose => "t",
            Op::SetSource => "set_",
            Op::AutoFunctionalized => "auto_functionalized",
            Op::GetItem => "getitem",
            Op::Output => "output",
            Op::Other(target) => target,
        }
    }

    /// Parse a textual target. Unknown targets become [`Op::Other`].
    pub fn from_target(target: &str) -> Self {
        match target {
            "placeholder" => Op::Placeholder,
            "view" => Op::View,
            "as_strided" => Op::AsStrided,
            "permute" => Op::Permute,
            "t" => Op::Transpose,
            "set_" => Op::SetSource,
            "auto_functionalized" => Op::AutoFunctionalized,
            "getitem" => Op::GetItem,
            "output" => Op::Output,
            other => Op::Other(other.to_string()),
        }
    }

    /// Prefix used when generating fresh node names.
    fn name_base(&self) -> String {
        let base: String = self
            .target()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let base = base.trim_matches('_');
        if base.is_empty() {
            "node".to_string()
        } else {
            base.to_string()
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target())
    }
}

// ─────────────────────────────────── Arg ─────────────────────────────────

/// A positional or keyword argument of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Node(NodeId),
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
    List(Vec<Arg>),
}

impl Arg {
    /// Build a list of integer literals (shapes, strides, permutation dims).
    pub fn ints<I>(values: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        Arg::List(values.into_iter().map(Arg::Int).collect())
    }

    /// The referenced node, if this argument is a direct node reference.
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            Arg::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// The integer values, if this argument is a flat list of integers.
    pub fn as_ints(&self) -> Option<Vec<i64>> {
        match self {
            Arg::List(items) => items
                .iter()
                .map(|item| match item {
                    Arg::Int(v) => Some(*v),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }

    /// Every node referenced by this argument, nested lists included, in order.
    pub fn flatten(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        self.collect_nodes(&mut nodes);
        nodes
    }

    fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        match self {
            Arg::Node(id) => out.push(*id),
            Arg::List(items) => items.iter().for_each(|item| item.collect_nodes(out)),
            _ => {}
        }
    }

    /// Replace every reference to `old` with `new`. Returns whether anything changed.
    fn replace_node(&mut self, old: NodeId, new: NodeId) -> bool {
        match self {
            Arg::Node(id) if *id == old => {
                *id = new;
                true
            }
            Arg::List(items) => items
                .iter_mut()
                .fold(false, |changed, item| item.replace_node(old, new) || changed),
            _ => false,
        }
    }
}

impl From<NodeId> for Arg {
    fn from(id: NodeId) -> Self {
        Arg::Node(id)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

// ─────────────────────────────────── Node ────────────────────────────────

/// A node of the graph.
///
/// `args` and `kwargs` are only mutable through [`Graph`] so the def-use
/// index stays in sync with the references they hold.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique name within the graph.
    pub name: String,

    /// Operation performed by the node.
    pub op: Op,

    /// Metadata (value description, tensor shape, provenance).
    pub meta: Meta,

    pub(crate) args: Vec<Arg>,
    pub(crate) kwargs: BTreeMap<String, Arg>,

    id: NodeId,
}

impl Node {
    /// Positional arguments.
    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Keyword arguments.
    pub fn kwargs(&self) -> &BTreeMap<String, Arg> {
        &self.kwargs
    }

    /// Positional argument at `index`.
    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    /// Positional argument at `index` when it is a direct node reference.
    pub fn input_node(&self, index: usize) -> Option<NodeId> {
        self.arg(index).and_then(Arg::as_node)
    }

    /// Every node referenced by args and kwargs, in argument order.
    pub fn referenced_nodes(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for arg in self.args.iter().chain(self.kwargs.values()) {
            arg.collect_nodes(&mut nodes);
        }
        nodes
    }

    fn replace_input(&mut self, old: NodeId, new: NodeId) -> bool {
        let mut changed = false;
        for arg in self.args.iter_mut().chain(self.kwargs.values_mut()) {
            changed |= arg.replace_node(old, new);
        }
        changed
    }
}

/// Description of a node to be created.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub op: Op,
    pub args: Vec<Arg>,
    pub kwargs: BTreeMap<String, Arg>,
    pub meta: Meta,

    /// Requested name; a fresh one is generated when absent or taken.
    pub name: Option<String>,
}

impl NodeSpec {
    pub fn new(op: Op, args: Vec<Arg>) -> Self {
        Self {
            op,
            args,
            kwargs: BTreeMap::new(),
            meta: Meta::new(),
            name: None,
        }
    }

    pub fn with_kwargs(mut self, kwargs: BTreeMap<String, Arg>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: Arg) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ───────────────────────────────── Graph ─────────────────────────────────

/// Ordered, mutable dataflow graph.
pub struct Graph {
    /// Node arena; edges are the def-use index (producer -> user).
    pub(crate) graph: StableGraph<Node, ()>,

    /// Arena slot of every live node.
    slots: HashMap<NodeId, NodeIndex>,

    next_id: u64,

    /// Execution order.
    pub(crate) order: Vec<NodeId>,

    /// Names in use.
    names: HashSet<String>,

    /// Next numeric suffix per name base.
    name_counters: HashMap<String, usize>,

    /// The terminal output node, once added.
    pub(crate) output: Option<NodeId>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            slots: HashMap::new(),
            next_id: 0,
            order: Vec::new(),
            names: HashSet::new(),
            name_counters: HashMap::new(),
            output: None,
        }
    }

    // ── Node access ──

    fn slot(&self, id: NodeId) -> Result<NodeIndex> {
        self.slots
            .get(&id)
            .copied()
            .ok_or_else(|| Error::InvalidGraph(format!("Node {} not found", id)))
    }

    /// Get an immutable reference to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        let slot = self.slot(id)?;
        self.graph
            .node_weight(slot)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {} not found", id)))
    }

    /// Get a mutable reference to a node (name and metadata only).
    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        let slot = self.slot(id)?;
        self.graph
            .node_weight_mut(slot)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {} not found", id)))
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slots.contains_key(&id)
    }

    /// Iterate over all nodes in execution order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.order
            .iter()
            .filter_map(|&id| self.node(id).ok().map(|node| (id, node)))
    }

    /// Nodes on the `direction` side of the def-use edges of `id`.
    fn neighbors(&self, id: NodeId, direction: Direction) -> HashSet<NodeId> {
        match self.slots.get(&id) {
            Some(&slot) => self
                .graph
                .neighbors_directed(slot, direction)
                .map(|n| self.graph[n].id)
                .collect(),
            None => HashSet::new(),
        }
    }

    /// Nodes referenced by `id`, according to the def-use index.
    pub(crate) fn producers(&self, id: NodeId) -> HashSet<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Snapshot of the execution order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.order.clone()
    }

    /// Get the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The terminal output node, if one has been added.
    pub fn output_node(&self) -> Option<NodeId> {
        self.output
    }

    /// Position of a node in the execution order.
    pub fn position(&self, id: NodeId) -> Result<usize> {
        self.order
            .iter()
            .position(|&n| n == id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {} is not in the graph", id)))
    }

    /// Position of every node in the execution order.
    pub fn positions(&self) -> HashMap<NodeId, usize> {
        self.order
            .iter()
            .enumerate()
            .map(|(index, &id)| (id, index))
            .collect()
    }

    /// Nodes that reference `id`, in execution order.
    pub fn users(&self, id: NodeId) -> Vec<NodeId> {
        let users = self.neighbors(id, Direction::Outgoing);
        if users.is_empty() {
            return Vec::new();
        }
        self.order
            .iter()
            .copied()
            .filter(|n| users.contains(n))
            .collect()
    }

    /// Whether any node references `id`.
    pub fn has_users(&self, id: NodeId) -> bool {
        self.slots.get(&id).is_some_and(|&slot| {
            self.graph
                .neighbors_directed(slot, Direction::Outgoing)
                .next()
                .is_some()
        })
    }

    /// Find a node by its name.
    pub fn find_node_by_name(&self, name: &str) -> Result<NodeId> {
        self.nodes()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node '{}' not found", name)))
    }

    /// Name of a node, or a placeholder text for erased handles.
    pub fn name_of(&self, id: NodeId) -> &str {
        self.node(id)
            .map(|node| node.name.as_str())
            .unwrap_or("<erased>")
    }

    // ── Graph mutation ──

    /// Insert a node directly after `anchor`.
    pub fn insert_after(&mut self, anchor: NodeId, spec: NodeSpec) -> Result<NodeId> {
        let index = self.position(anchor)? + 1;
        self.insert_at(index, spec)
    }

    /// Insert a node directly before `anchor`.
    pub fn insert_before(&mut self, anchor: NodeId, spec: NodeSpec) -> Result<NodeId> {
        let index = self.position(anchor)?;
        self.insert_at(index, spec)
    }

    /// Append a node before the output node, or at the end if there is none.
    pub fn append(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let index = if spec.op == Op::Output {
            self.order.len()
        } else {
            self.append_index()
        };
        self.insert_at(index, spec)
    }

    fn insert_at(&mut self, index: usize, spec: NodeSpec) -> Result<NodeId> {
        if spec.op == Op::Output && self.output.is_some() {
            return Err(Error::InvalidGraph(
                "Graph already has an output node".to_string(),
            ));
        }

        let missing = spec
            .args
            .iter()
            .chain(spec.kwargs.values())
            .flat_map(Arg::flatten)
            .find(|&input| !self.contains(input));
        if let Some(missing) = missing {
            return Err(Error::InvalidGraph(format!(
                "New {} node references unknown node {}",
                spec.op, missing
            )));
        }

        Ok(self.link_node(index, spec))
    }

    /// Add a validated node at `index` and register its def-use edges.
    pub(crate) fn link_node(&mut self, index: usize, spec: NodeSpec) -> NodeId {
        let name = self.claim_name(spec.name.as_deref(), &spec.op);
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = Node {
            name,
            op: spec.op,
            meta: spec.meta,
            args: spec.args,
            kwargs: spec.kwargs,
            id,
        };

        let inputs = node.referenced_nodes();
        let is_output = node.op == Op::Output;
        let slot = self.graph.add_node(node);
        self.slots.insert(id, slot);
        for input in inputs {
            if let Some(&input_slot) = self.slots.get(&input) {
                self.graph.update_edge(input_slot, slot, ());
            }
        }
        self.order.insert(index, id);
        if is_output {
            self.output = Some(id);
        }

        id
    }

    /// Index at which `append` places a non-output node.
    pub(crate) fn append_index(&self) -> usize {
        match self.output {
            Some(_) => self.order.len() - 1,
            None => self.order.len(),
        }
    }

    /// Remove a node from the graph.
    ///
    /// Fails with [`Error::LiveUses`] if any node still references it.
    pub fn erase_node(&mut self, id: NodeId) -> Result<()> {
        let users = self.users(id);
        if !users.is_empty() {
            return Err(Error::LiveUses {
                node: self.name_of(id).to_string(),
                users: users
                    .iter()
                    .map(|&user| self.name_of(user).to_string())
                    .collect(),
            });
        }

        // Removing the node also drops its incoming def-use edges.
        let slot = self.slot(id)?;
        let node = self
            .graph
            .remove_node(slot)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {} not found", id)))?;
        self.slots.remove(&id);
        self.order.retain(|&n| n != id);
        self.names.remove(&node.name);
        if self.output == Some(id) {
            self.output = None;
        }

        Ok(())
    }

    /// Rewire every use of `old` to `new`. Returns the rewired users.
    pub fn replace_all_uses_with(&mut self, old: NodeId, new: NodeId) -> Result<Vec<NodeId>> {
        self.replace_uses_where(old, new, |_| true)
    }

    /// Rewire the uses of `old` to `new` in the users accepted by `filter`.
    ///
    /// Nested list arguments and kwargs are rewired too. `new` itself is never
    /// rewired, so a node cannot end up referencing itself. Returns the
    /// rewired users in execution order.
    pub fn replace_uses_where<F>(
        &mut self,
        old: NodeId,
        new: NodeId,
        mut filter: F,
    ) -> Result<Vec<NodeId>>
    where
        F: FnMut(NodeId) -> bool,
    {
        let old_slot = self.slot(old)?;
        let new_slot = self.slot(new)?;

        let mut rewired = Vec::new();
        for user in self.users(old) {
            if user == new || !filter(user) {
                continue;
            }
            if self.node_mut(user)?.replace_input(old, new) {
                let user_slot = self.slot(user)?;
                if let Some(edge) = self.graph.find_edge(old_slot, user_slot) {
                    self.graph.remove_edge(edge);
                }
                self.graph.update_edge(new_slot, user_slot, ());
                rewired.push(user);
            }
        }

        Ok(rewired)
    }

    // ── Naming ──

    /// Reserve `requested` if it is free, otherwise generate a fresh name.
    fn claim_name(&mut self, requested: Option<&str>, op: &Op) -> String {
        if let Some(name) = requested {
            if !name.is_empty() && self.names.insert(name.to_string()) {
                return name.to_string();
            }
        }
        let name = self.fresh_name(&op.name_base());
        self.names.insert(name.clone());
        name
    }

    /// Generate a name `{base}_{n}` that is not in use.
    pub fn fresh_name(&mut self, base: &str) -> String {
        let counter = self.name_counters.entry(base.to_string()).or_insert(0);
        loop {
            let candidate = if *counter == 0 {
                base.to_string()
            } else {
                format!("{}_{}", base, counter)
            };
            *counter += 1;
            if !self.names.contains(&candidate) {
                return candidate;
            }
        }
    }

    // ── Formatting ──

    fn write_arg(&self, out: &mut String, arg: &Arg) {
        match arg {
            Arg::Node(id) => {
                out.push('%');
                out.push_str(self.name_of(*id));
            }
            Arg::Int(v) => out.push_str(&v.to_string()),
            Arg::Float(v) => out.push_str(&format!("{:?}", v)),
            Arg::Bool(v) => out.push_str(if *v { "True" } else { "False" }),
            Arg::Str(s) => out.push_str(&format!("{:?}", s)),
            Arg::None => out.push_str("None"),
            Arg::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_arg(out, item);
                }
                out.push(']');
            }
        }
    }

    /// Render one node as a program line.
    pub fn format_node(&self, id: NodeId) -> Result<String> {
        let node = self.node(id)?;
        let mut line = format!("%{} = {}(", node.name, node.op);
        let mut first = true;
        for arg in &node.args {
            if !first {
                line.push_str(", ");
            }
            first = false;
            self.write_arg(&mut line, arg);
        }
        for (key, value) in &node.kwargs {
            if !first {
                line.push_str(", ");
            }
            first = false;
            line.push_str(key);
            line.push('=');
            self.write_arg(&mut line, value);
        }
        line.push(')');
        if let Some(tensor) = node.meta.tensor_meta() {
            line.push_str(&format!("  # {}", tensor));
        }
        Ok(line)
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.nodes()).finish()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &id in &self.order {
            let line = self.format_node(id).map_err(|_| fmt::Error)?;
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

// ───────────────────────────── PositionWindow ────────────────────────────

/// Open interval of execution positions, over a position map taken before a
/// pass started mutating the graph.
///
/// Nodes missing from the map (created after it was taken) are outside.
#[derive(Debug, Clone, Copy)]
pub struct PositionWindow<'a> {
    positions: &'a HashMap<NodeId, usize>,
    after: usize,
    before: usize,
}

impl<'a> PositionWindow<'a> {
    pub fn new(positions: &'a HashMap<NodeId, usize>, after: usize, before: usize) -> Self {
        Self {
            positions,
            after,
            before,
        }
    }

    /// Whether `id` was strictly between `after` and `before`.
    pub fn contains(&self, id: NodeId) -> bool {
        self.positions
            .get(&id)
            .is_some_and(|&pos| pos > self.after && pos < self.before)
    }
}
