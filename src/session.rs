// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Long-lived borrowers of a graph.

use crate::borrow::ScopedBorrow;
use crate::error::Result;
use crate::graph::{Graph, Operation};

/// A session pins its [`Graph`] open from creation until it is closed or
/// dropped. [`Graph::close`] waits for every open session.
///
/// Lookups made through the session use its own borrow, so they keep
/// working while a close of the graph is draining.
#[derive(Debug)]
pub struct Session<'g> {
    graph: &'g Graph,
    borrow: ScopedBorrow<'g>,
}

impl<'g> Session<'g> {
    /// Open a session on `graph`.
    ///
    /// Fails with [`NativeGraphError::Closed`](crate::NativeGraphError::Closed)
    /// if the graph is closed or closing.
    pub fn new(graph: &'g Graph) -> Result<Self> {
        let borrow = graph.borrow()?;
        tracing::debug!(handle = ?borrow.handle(), "session opened");
        Ok(Self { graph, borrow })
    }

    /// The graph this session runs against.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Whether the session still holds the graph open.
    pub fn is_open(&self) -> bool {
        self.borrow.is_active()
    }

    /// Find an operation through the session's borrow.
    pub fn operation(&self, name: &str) -> Result<Option<Operation<'g>>> {
        let graph = self.graph;
        Ok(self
            .borrow
            .lookup(name)?
            .map(|handle| Operation::new(graph, handle)))
    }

    /// Serialize the graph through the session's borrow.
    pub fn to_graph_def(&self) -> Result<Vec<u8>> {
        self.borrow.export()
    }

    /// Release the graph. Idempotent.
    pub fn close(&mut self) {
        if self.borrow.is_active() {
            tracing::debug!(handle = ?self.borrow.handle(), "session closed");
        }
        self.borrow.release();
    }
}
