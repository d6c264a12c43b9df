// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Dataflow graph backed by a native library.
//!
//! [`Graph`] is thread-safe. Its native resources are freed by
//! [`Graph::close`] or on drop; `close` blocks until every [`Session`] and
//! other borrow of the graph has been released.
//!
//! [`Session`]: crate::Session

use crate::backend::NativeGraphOps;
use crate::borrow::ScopedBorrow;
use crate::config::GraphConfig;
use crate::error::{NativeGraphError, Result};
use crate::handle::{EntryHandle, RawHandle};
use crate::iter::Entries;
use crate::resource::{CloseInterrupt, CloseStatus, ResourceHandle};
use crate::runtime;
use crate::types::{OperationInfo, OperationSpec, Output};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A dataflow graph whose nodes live in a native library.
pub struct Graph {
    resource: ResourceHandle,
    config: GraphConfig,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("resource", &self.resource)
            .field("config", &self.config)
            .finish()
    }
}

impl Graph {
    /// Create an empty graph on the runtime's default backend.
    pub fn new() -> Result<Self> {
        let runtime = runtime::ensure_initialized()?;
        Self::with_backend(runtime.backend())
    }

    /// Create an empty graph on a specific backend.
    pub fn with_backend(backend: Arc<dyn NativeGraphOps>) -> Result<Self> {
        Self::with_config(backend, GraphConfig::default())
    }

    /// Create an empty graph with explicit configuration.
    pub fn with_config(backend: Arc<dyn NativeGraphOps>, config: GraphConfig) -> Result<Self> {
        Ok(Self {
            resource: ResourceHandle::new(backend)?,
            config,
        })
    }

    /// Wrap an existing native graph, taking ownership of it.
    pub fn from_raw(backend: Arc<dyn NativeGraphOps>, handle: RawHandle) -> Result<Self> {
        Ok(Self {
            resource: ResourceHandle::from_raw(backend, handle)?,
            config: GraphConfig::default(),
        })
    }

    /// Configuration this graph was created with.
    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Lifecycle manager for the native graph.
    pub fn resource(&self) -> &ResourceHandle {
        &self.resource
    }

    /// Pin the native graph open until the returned borrow is released.
    pub fn borrow(&self) -> Result<ScopedBorrow<'_>> {
        self.resource.borrow()
    }

    /// The operation with the given name, or `None` if there is none.
    pub fn operation(&self, name: &str) -> Result<Option<Operation<'_>>> {
        Ok(self
            .resource
            .lookup(name)?
            .map(|handle| Operation::new(self, handle)))
    }

    /// Iterate over all operations in unspecified order.
    pub fn operations(&self) -> Operations<'_> {
        Operations {
            graph: self,
            entries: Entries::new(&self.resource),
        }
    }

    /// Start building an operation of type `op_type` named `name`.
    pub fn op_builder(&self, op_type: &str, name: &str) -> OperationBuilder<'_> {
        OperationBuilder {
            graph: self,
            spec: OperationSpec::new(op_type, name),
        }
    }

    /// Import a serialized graph using the configured import prefix.
    pub fn import_graph_def(&self, graph_def: &[u8]) -> Result<()> {
        self.import_graph_def_with_prefix(graph_def, &self.config.import_prefix)
    }

    /// Import a serialized graph, prepending `prefix` to every imported name.
    ///
    /// On [`NativeGraphError::InvalidFormat`] the graph is left unchanged.
    pub fn import_graph_def_with_prefix(&self, graph_def: &[u8], prefix: &str) -> Result<()> {
        if graph_def.len() > self.config.max_graph_def_bytes {
            return Err(NativeGraphError::InvalidFormat(format!(
                "graph definition of {} bytes exceeds the {} byte limit",
                graph_def.len(),
                self.config.max_graph_def_bytes
            )));
        }
        self.resource.import(graph_def, prefix)
    }

    /// Serialize the graph.
    pub fn to_graph_def(&self) -> Result<Vec<u8>> {
        self.resource.export()
    }

    /// Add operations computing `d(y_1 + y_2 + ...)/dx_i` for every `x_i`.
    ///
    /// `dx`, when given and non-empty, holds the initial gradients for each
    /// `y` and must have the same length. `prefix` names the new operations;
    /// `None` lets the native layer choose a fresh one. The result has one
    /// entry per `x`.
    pub fn add_gradients(
        &self,
        prefix: Option<&str>,
        y: &[Output],
        x: &[Output],
        dx: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        let dx = dx.filter(|dx| !dx.is_empty());
        if let Some(dx) = dx {
            if dx.len() != y.len() {
                return Err(NativeGraphError::InvalidArgument(format!(
                    "dx must have the size of y ({}), got {}",
                    y.len(),
                    dx.len()
                )));
            }
        }
        self.resource.compute_derivative(prefix, y, x, dx)
    }

    /// Gradients of a single output with the configured prefix and no seeds.
    pub fn add_gradients_for(&self, y: Output, x: &[Output]) -> Result<Vec<Output>> {
        self.add_gradients(self.config.gradient_prefix.as_deref(), &[y], x, None)
    }

    /// Release the native graph, waiting for outstanding borrows first.
    pub fn close(&self) -> CloseStatus {
        self.resource.close()
    }

    /// Close, giving up the wait when `interrupt` fires.
    pub fn close_interruptible(&self, interrupt: &CloseInterrupt) -> CloseStatus {
        self.resource.close_interruptible(interrupt)
    }

    /// Token for [`close_interruptible`](Self::close_interruptible).
    pub fn close_interrupt(&self) -> CloseInterrupt {
        self.resource.close_interrupt()
    }

    /// Whether the native graph has been released.
    pub fn is_closed(&self) -> bool {
        self.resource.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A node in a [`Graph`].
///
/// The handle is only valid while the graph is open; every accessor takes a
/// borrow and fails with [`NativeGraphError::Closed`] afterwards.
#[derive(Clone, Copy)]
pub struct Operation<'g> {
    graph: &'g Graph,
    handle: EntryHandle,
}

impl<'g> Operation<'g> {
    pub(crate) fn new(graph: &'g Graph, handle: EntryHandle) -> Self {
        Self { graph, handle }
    }

    /// The graph owning this operation.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Native handle of this operation.
    pub fn handle(&self) -> EntryHandle {
        self.handle
    }

    /// Name, type and arity in one native call.
    pub fn info(&self) -> Result<OperationInfo> {
        self.graph.resource.describe(self.handle)
    }

    /// Full name of the operation.
    pub fn name(&self) -> Result<String> {
        Ok(self.info()?.name)
    }

    /// Type of the operation.
    pub fn op_type(&self) -> Result<String> {
        Ok(self.info()?.op_type)
    }

    /// Number of outputs.
    pub fn num_outputs(&self) -> Result<u32> {
        Ok(self.info()?.num_outputs)
    }

    /// Reference to output `index`.
    pub fn output(&self, index: u32) -> Output {
        Output::new(self.handle, index)
    }
}

impl PartialEq for Operation<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.graph, other.graph) && self.handle == other.handle
    }
}

impl Eq for Operation<'_> {}

impl Hash for Operation<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.handle.hash(state);
    }
}

impl fmt::Debug for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("handle", &self.handle)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OperationBuilder
// ---------------------------------------------------------------------------

/// Builder adding one operation to a [`Graph`] on [`build`](Self::build).
#[derive(Debug)]
pub struct OperationBuilder<'g> {
    graph: &'g Graph,
    spec: OperationSpec,
}

impl<'g> OperationBuilder<'g> {
    /// Append one input.
    pub fn add_input(mut self, input: Output) -> Self {
        self.spec.inputs.push(input);
        self
    }

    /// Append several inputs.
    pub fn add_inputs(mut self, inputs: &[Output]) -> Self {
        self.spec.inputs.extend_from_slice(inputs);
        self
    }

    /// Number of outputs the operation produces (default: 1).
    pub fn num_outputs(mut self, num_outputs: u32) -> Self {
        self.spec.num_outputs = num_outputs;
        self
    }

    /// Add the operation to the graph.
    pub fn build(self) -> Result<Operation<'g>> {
        let handle = self.graph.resource.add_operation(&self.spec)?;
        Ok(Operation::new(self.graph, handle))
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Iterator returned by [`Graph::operations`].
#[derive(Debug)]
pub struct Operations<'g> {
    graph: &'g Graph,
    entries: Entries<'g>,
}

impl<'g> Iterator for Operations<'g> {
    type Item = Result<Operation<'g>>;

    fn next(&mut self) -> Option<Self::Item> {
        let graph = self.graph;
        self.entries
            .next()
            .map(|entry| entry.map(|handle| Operation::new(graph, handle)))
    }
}

impl std::iter::FusedIterator for Operations<'_> {}
