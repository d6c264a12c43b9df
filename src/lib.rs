// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! # native-graph
//!
//! Safe lifetime management for native computation graphs.
//!
//! A native graph lives outside Rust's ownership model: it is created and
//! destroyed through a C-style API and referred to by an opaque handle.
//! This crate wraps such a handle so that:
//!
//! - **Borrowing** pins the graph open for the duration of a native call
//! - **Closing** waits for every outstanding borrow before freeing it
//! - **Iteration** walks the graph's operations one short borrow at a time
//!
//! ## Quick Start
//!
//! ```ignore
//! use native_graph::{Graph, GraphDef};
//!
//! let graph = Graph::new()?;
//!
//! let def = GraphDef::new()
//!     .node("x", "Placeholder", &[])
//!     .node("y", "Square", &["x"]);
//! graph.import_graph_def_with_prefix(&def.to_bytes()?, "model")?;
//!
//! for op in graph.operations() {
//!     let op = op?;
//!     println!("{} ({})", op.name()?, op.op_type()?);
//! }
//!
//! graph.close();
//! ```
//!
//! ## Gradients
//!
//! ```ignore
//! let x = graph.operation("model/x")?.expect("x").output(0);
//! let y = graph.operation("model/y")?.expect("y").output(0);
//! let dy_dx = graph.add_gradients(None, &[y], &[x], None)?;
//! ```
//!
//! ## Features
//!
//! - `tensorflow`: Link against `libtensorflow` and enable
//!   [`backend::tensorflow::TensorFlowBackend`]

#![warn(missing_docs)]

pub mod backend;
pub mod borrow;
pub mod config;
pub mod error;
pub mod graph;
pub mod handle;
pub mod iter;
pub mod resource;
pub mod runtime;
pub mod session;
pub mod types;

// Re-export main types at crate root for convenience
pub use backend::memory::{GraphDef, NodeDef};
pub use backend::{InMemoryBackend, NativeGraphOps};
pub use borrow::ScopedBorrow;
pub use config::{BackendKind, GraphConfig, RuntimeConfig};
pub use error::{NativeGraphError, Result};
pub use graph::{Graph, Operation, OperationBuilder, Operations};
pub use handle::{EntryHandle, RawHandle};
pub use iter::Entries;
pub use resource::{CloseInterrupt, CloseStatus, ResourceHandle};
pub use session::Session;
pub use types::{OperationInfo, OperationSpec, Output};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_graph_lifecycle_end_to_end() {
        let backend = Arc::new(InMemoryBackend::new());
        let graph = Graph::with_backend(backend.clone()).unwrap();

        let def = GraphDef::new()
            .node("x", "Placeholder", &[])
            .node("y", "Square", &["x"]);
        graph
            .import_graph_def_with_prefix(&def.to_bytes().unwrap(), "model")
            .unwrap();

        let mut names: Vec<String> = graph
            .operations()
            .map(|op| op.unwrap().name().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["model/x", "model/y"]);

        let x = graph.operation("model/x").unwrap().unwrap().output(0);
        let y = graph.operation("model/y").unwrap().unwrap().output(0);
        let grads = graph.add_gradients(None, &[y], &[x], None).unwrap();
        assert_eq!(grads.len(), 1);

        assert_eq!(graph.close(), CloseStatus::Closed);
        assert_eq!(graph.close(), CloseStatus::AlreadyClosed);
        assert!(matches!(graph.to_graph_def(), Err(NativeGraphError::Closed)));
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_closed_status_is_reported_uniformly() {
        let resource = ResourceHandle::new(Arc::new(InMemoryBackend::new())).unwrap();
        resource.close();
        assert!(matches!(resource.borrow(), Err(NativeGraphError::Closed)));
        assert!(matches!(resource.lookup("x"), Err(NativeGraphError::Closed)));
        assert!(matches!(
            Entries::new(&resource).next(),
            Some(Err(NativeGraphError::Closed))
        ));
    }
}
