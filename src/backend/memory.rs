// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! In-process reference backend.
//!
//! `InMemoryBackend` keeps a handle table of graphs behind a single mutex and
//! serializes graphs as JSON [`GraphDef`] documents. It implements the full
//! [`NativeGraphOps`] contract without any native library, which makes it
//! the default backend and the one the test-suite runs against.

use super::NativeGraphOps;
use crate::error::{NativeGraphError, Result};
use crate::handle::{EntryHandle, RawHandle};
use crate::types::{OperationInfo, OperationSpec, Output};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Serialization format version understood by this backend.
pub const GRAPH_DEF_VERSION: u32 = 1;

/// Base name for automatically chosen gradient prefixes.
const DEFAULT_GRADIENT_PREFIX: &str = "gradients";

// ---------------------------------------------------------------------------
// Serialization format
// ---------------------------------------------------------------------------

/// Serialized graph definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDef {
    /// Format version (default: 1)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Nodes in insertion order
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

/// One node of a [`GraphDef`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Node name, unique within the definition
    pub name: String,

    /// Operation type
    pub op: String,

    /// Input references, `"name"` for output 0 or `"name:index"`
    #[serde(default)]
    pub inputs: Vec<String>,

    /// Number of outputs (default: 1)
    #[serde(default = "default_num_outputs")]
    pub num_outputs: u32,
}

fn default_version() -> u32 {
    GRAPH_DEF_VERSION
}
fn default_num_outputs() -> u32 {
    1
}

impl Default for GraphDef {
    fn default() -> Self {
        Self {
            version: default_version(),
            nodes: Vec::new(),
        }
    }
}

impl GraphDef {
    /// Create an empty definition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single-output node.
    pub fn node(mut self, name: &str, op: &str, inputs: &[&str]) -> Self {
        self.nodes.push(NodeDef {
            name: name.to_string(),
            op: op.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            num_outputs: default_num_outputs(),
        });
        self
    }

    /// Encode as bytes accepted by [`InMemoryBackend`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode bytes produced by [`InMemoryBackend`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| NativeGraphError::InvalidFormat(e.to_string()))
    }
}

/// Separates a node name from an output index in input references, so it
/// cannot appear in names.
const OUTPUT_SEPARATOR: char = ':';

fn parse_input(input: &str) -> Result<(&str, u32)> {
    match input.rsplit_once(OUTPUT_SEPARATOR) {
        Some((name, index)) => {
            let index = index.parse::<u32>().map_err(|_| {
                NativeGraphError::InvalidFormat(format!("malformed input reference '{input}'"))
            })?;
            Ok((name, index))
        }
        None => Ok((input, 0)),
    }
}

// ---------------------------------------------------------------------------
// Graph storage
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    entry: EntryHandle,
    name: String,
    op_type: String,
    inputs: Vec<Output>,
    num_outputs: u32,
}

#[derive(Debug, Default)]
struct GraphStore {
    nodes: Vec<Node>,
    by_name: HashMap<String, usize>,
    by_entry: HashMap<EntryHandle, usize>,
}

impl GraphStore {
    fn node(&self, entry: EntryHandle) -> Option<&Node> {
        self.by_entry.get(&entry).map(|&i| &self.nodes[i])
    }

    fn insert(&mut self, node: Node) {
        let index = self.nodes.len();
        self.by_name.insert(node.name.clone(), index);
        self.by_entry.insert(node.entry, index);
        self.nodes.push(node);
    }

    fn check_output(&self, output: &Output) -> Result<()> {
        let node = self.node(output.operation).ok_or_else(|| {
            NativeGraphError::InvalidArgument(format!(
                "{:?} does not belong to this graph",
                output.operation
            ))
        })?;
        if output.index >= node.num_outputs {
            return Err(NativeGraphError::InvalidArgument(format!(
                "output index {} out of range for '{}' with {} outputs",
                output.index, node.name, node.num_outputs
            )));
        }
        Ok(())
    }

    fn has_prefix(&self, prefix: &str) -> bool {
        let scoped = format!("{prefix}/");
        self.nodes
            .iter()
            .any(|n| n.name == prefix || n.name.starts_with(&scoped))
    }

    fn unique_prefix(&self, base: &str) -> String {
        if !self.has_prefix(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.has_prefix(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    fn input_reference(&self, output: &Output) -> String {
        let name = self
            .node(output.operation)
            .map(|n| n.name.as_str())
            .unwrap_or_default();
        if output.index == 0 {
            name.to_string()
        } else {
            format!("{}:{}", name, output.index)
        }
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// Graph backend that keeps everything in process memory.
#[derive(Debug)]
pub struct InMemoryBackend {
    graphs: Mutex<HashMap<u64, GraphStore>>,
    next_graph: AtomicU64,
    next_entry: AtomicU64,
    max_live_graphs: Option<usize>,
    allocations: AtomicUsize,
    frees: AtomicUsize,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    /// Create a backend with no limit on live graphs.
    pub fn new() -> Self {
        Self {
            graphs: Mutex::new(HashMap::new()),
            next_graph: AtomicU64::new(1),
            next_entry: AtomicU64::new(1),
            max_live_graphs: None,
            allocations: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    /// Create a backend whose `alloc` fails once `limit` graphs are live.
    pub fn with_graph_limit(limit: usize) -> Self {
        Self {
            max_live_graphs: Some(limit),
            ..Self::new()
        }
    }

    /// Number of successful `alloc` calls.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Number of `free` calls that destroyed a graph.
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::SeqCst)
    }

    /// Number of graphs currently allocated.
    pub fn live_graphs(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, GraphStore>> {
        self.graphs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_entry(&self) -> EntryHandle {
        EntryHandle::from_raw(self.next_entry.fetch_add(1, Ordering::Relaxed))
    }
}

fn unknown_graph(handle: RawHandle) -> NativeGraphError {
    NativeGraphError::State(format!("{handle:?} is not a live graph"))
}

impl NativeGraphOps for InMemoryBackend {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn version(&self) -> String {
        format!("in-memory {}", env!("CARGO_PKG_VERSION"))
    }

    fn alloc(&self) -> Result<RawHandle> {
        let mut graphs = self.lock();
        if let Some(limit) = self.max_live_graphs {
            if graphs.len() >= limit {
                return Err(NativeGraphError::Allocation(format!(
                    "live graph limit of {limit} reached"
                )));
            }
        }
        let raw = self.next_graph.fetch_add(1, Ordering::Relaxed);
        graphs.insert(raw, GraphStore::default());
        self.allocations.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(handle = raw, "allocated in-memory graph");
        Ok(RawHandle::from_raw(raw))
    }

    fn free(&self, handle: RawHandle) {
        if self.lock().remove(&handle.into_raw()).is_some() {
            self.frees.fetch_add(1, Ordering::SeqCst);
        } else {
            tracing::warn!(?handle, "free of unknown graph handle ignored");
        }
    }

    fn lookup(&self, handle: RawHandle, name: &str) -> Option<EntryHandle> {
        let graphs = self.lock();
        let store = graphs.get(&handle.into_raw())?;
        store.by_name.get(name).map(|&i| store.nodes[i].entry)
    }

    fn advance(&self, handle: RawHandle, position: usize) -> Option<(EntryHandle, usize)> {
        let graphs = self.lock();
        let store = graphs.get(&handle.into_raw())?;
        store.nodes.get(position).map(|n| (n.entry, position + 1))
    }

    fn describe(&self, handle: RawHandle, entry: EntryHandle) -> Result<OperationInfo> {
        let graphs = self.lock();
        let store = graphs
            .get(&handle.into_raw())
            .ok_or_else(|| unknown_graph(handle))?;
        let node = store.node(entry).ok_or_else(|| {
            NativeGraphError::InvalidArgument(format!("{entry:?} does not belong to this graph"))
        })?;
        Ok(OperationInfo {
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            num_outputs: node.num_outputs,
        })
    }

    fn add_operation(&self, handle: RawHandle, spec: &OperationSpec) -> Result<EntryHandle> {
        let mut graphs = self.lock();
        let store = graphs
            .get_mut(&handle.into_raw())
            .ok_or_else(|| unknown_graph(handle))?;

        if spec.name.is_empty() || spec.op_type.is_empty() {
            return Err(NativeGraphError::InvalidArgument(
                "operation name and type must be non-empty".into(),
            ));
        }
        if spec.name.contains(OUTPUT_SEPARATOR) {
            return Err(NativeGraphError::InvalidArgument(format!(
                "operation name '{}' must not contain '{OUTPUT_SEPARATOR}'",
                spec.name
            )));
        }
        if store.by_name.contains_key(&spec.name) {
            return Err(NativeGraphError::InvalidArgument(format!(
                "operation '{}' already exists",
                spec.name
            )));
        }
        for input in &spec.inputs {
            store.check_output(input)?;
        }

        let entry = self.next_entry();
        store.insert(Node {
            entry,
            name: spec.name.clone(),
            op_type: spec.op_type.clone(),
            inputs: spec.inputs.clone(),
            num_outputs: spec.num_outputs,
        });
        Ok(entry)
    }

    fn import(&self, handle: RawHandle, graph_def: &[u8], prefix: &str) -> Result<()> {
        let def = GraphDef::from_bytes(graph_def)?;
        if def.version != GRAPH_DEF_VERSION {
            return Err(NativeGraphError::InvalidFormat(format!(
                "unsupported graph definition version {}",
                def.version
            )));
        }

        if prefix.contains(OUTPUT_SEPARATOR) {
            return Err(NativeGraphError::InvalidArgument(format!(
                "import prefix '{prefix}' must not contain '{OUTPUT_SEPARATOR}'"
            )));
        }

        let mut graphs = self.lock();
        let store = graphs
            .get_mut(&handle.into_raw())
            .ok_or_else(|| unknown_graph(handle))?;
        let full_name = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            }
        };

        // Validate everything before touching the store.
        let mut local: HashMap<&str, (usize, u32)> = HashMap::new();
        for (i, node) in def.nodes.iter().enumerate() {
            if node.name.is_empty() || node.op.is_empty() {
                return Err(NativeGraphError::InvalidFormat(format!(
                    "node {i} is missing a name or an op"
                )));
            }
            if node.name.contains(OUTPUT_SEPARATOR) {
                return Err(NativeGraphError::InvalidFormat(format!(
                    "node name '{}' must not contain '{OUTPUT_SEPARATOR}'",
                    node.name
                )));
            }
            if local.insert(node.name.as_str(), (i, node.num_outputs)).is_some() {
                return Err(NativeGraphError::InvalidFormat(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
            let name = full_name(&node.name);
            if store.by_name.contains_key(&name) {
                return Err(NativeGraphError::InvalidFormat(format!(
                    "node '{name}' already exists in the graph"
                )));
            }
        }

        let mut resolved = Vec::with_capacity(def.nodes.len());
        for node in &def.nodes {
            let mut inputs = Vec::with_capacity(node.inputs.len());
            for input in &node.inputs {
                let (source, index) = parse_input(input)?;
                let &(position, num_outputs) = local.get(source).ok_or_else(|| {
                    NativeGraphError::InvalidFormat(format!(
                        "node '{}' references unknown input '{}'",
                        node.name, input
                    ))
                })?;
                if index >= num_outputs {
                    return Err(NativeGraphError::InvalidFormat(format!(
                        "node '{}' references output {} of '{}' which has {}",
                        node.name, index, source, num_outputs
                    )));
                }
                inputs.push((position, index));
            }
            resolved.push(inputs);
        }

        let entries: Vec<EntryHandle> = def.nodes.iter().map(|_| self.next_entry()).collect();
        let count = entries.len();
        for ((node, entry), inputs) in def.nodes.into_iter().zip(&entries).zip(resolved) {
            store.insert(Node {
                entry: *entry,
                name: full_name(&node.name),
                op_type: node.op,
                inputs: inputs
                    .into_iter()
                    .map(|(position, index)| Output::new(entries[position], index))
                    .collect(),
                num_outputs: node.num_outputs,
            });
        }
        tracing::debug!(?handle, count, prefix, "imported graph definition");
        Ok(())
    }

    fn export(&self, handle: RawHandle) -> Result<Vec<u8>> {
        let graphs = self.lock();
        let store = graphs
            .get(&handle.into_raw())
            .ok_or_else(|| unknown_graph(handle))?;
        let def = GraphDef {
            version: GRAPH_DEF_VERSION,
            nodes: store
                .nodes
                .iter()
                .map(|n| NodeDef {
                    name: n.name.clone(),
                    op: n.op_type.clone(),
                    inputs: n.inputs.iter().map(|o| store.input_reference(o)).collect(),
                    num_outputs: n.num_outputs,
                })
                .collect(),
        };
        def.to_bytes()
    }

    fn compute_derivative(
        &self,
        handle: RawHandle,
        prefix: Option<&str>,
        outputs: &[Output],
        inputs: &[Output],
        seed_grads: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        let mut graphs = self.lock();
        let store = graphs
            .get_mut(&handle.into_raw())
            .ok_or_else(|| unknown_graph(handle))?;

        if outputs.is_empty() {
            return Err(NativeGraphError::InvalidArgument(
                "at least one output to differentiate is required".into(),
            ));
        }
        if let Some(seeds) = seed_grads {
            if seeds.len() != outputs.len() {
                return Err(NativeGraphError::InvalidArgument(format!(
                    "expected {} seed gradients, got {}",
                    outputs.len(),
                    seeds.len()
                )));
            }
        }
        for output in outputs
            .iter()
            .chain(inputs)
            .chain(seed_grads.unwrap_or_default())
        {
            store.check_output(output)?;
        }

        let prefix = match prefix {
            Some(p) if !p.is_empty() => {
                if p.contains(OUTPUT_SEPARATOR) {
                    return Err(NativeGraphError::InvalidArgument(format!(
                        "gradient prefix '{p}' must not contain '{OUTPUT_SEPARATOR}'"
                    )));
                }
                if store.has_prefix(p) {
                    return Err(NativeGraphError::InvalidArgument(format!(
                        "gradient prefix '{p}' is already in use"
                    )));
                }
                p.to_string()
            }
            _ => store.unique_prefix(DEFAULT_GRADIENT_PREFIX),
        };

        let seeds = match seed_grads {
            Some(seeds) => seeds.to_vec(),
            None => {
                let mut seeds = Vec::with_capacity(outputs.len());
                for (i, y) in outputs.iter().enumerate() {
                    let entry = self.next_entry();
                    store.insert(Node {
                        entry,
                        name: format!("{prefix}/OnesLike_{i}"),
                        op_type: "OnesLike".into(),
                        inputs: vec![*y],
                        num_outputs: 1,
                    });
                    seeds.push(Output::new(entry, 0));
                }
                seeds
            }
        };

        let mut derivatives = Vec::with_capacity(inputs.len());
        for (j, x) in inputs.iter().enumerate() {
            let entry = self.next_entry();
            let mut node_inputs = Vec::with_capacity(outputs.len() + seeds.len() + 1);
            node_inputs.extend_from_slice(outputs);
            node_inputs.extend_from_slice(&seeds);
            node_inputs.push(*x);
            store.insert(Node {
                entry,
                name: format!("{prefix}/SymbolicGradient_{j}"),
                op_type: "SymbolicGradient".into(),
                inputs: node_inputs,
                num_outputs: 1,
            });
            derivatives.push(Output::new(entry, 0));
        }
        tracing::debug!(?handle, prefix = %prefix, count = derivatives.len(), "added gradients");
        Ok(derivatives)
    }
}
