// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Native graph backends.
//!
//! [`NativeGraphOps`] is the fixed set of entry points the lifecycle layer
//! calls across the native boundary. Every call except `alloc` and `version`
//! receives a handle that the caller guarantees is live for the duration of
//! the call.

pub mod memory;

#[cfg(feature = "tensorflow")]
pub mod tensorflow;

use crate::error::Result;
use crate::handle::{EntryHandle, RawHandle};
use crate::types::{OperationInfo, OperationSpec, Output};

pub use memory::InMemoryBackend;

/// Native entry points for a graph resource.
///
/// Implementations must tolerate concurrent calls on the same handle; the
/// lifecycle layer only guarantees that the handle is not freed while a call
/// is in flight.
///
/// Handles are plain integers that safe code can forge, and these methods
/// are public. An implementation must reject a graph or entry handle it did
/// not hand out, or one whose graph it already freed, instead of
/// dereferencing it.
pub trait NativeGraphOps: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Version string of the native library.
    fn version(&self) -> String;

    /// Create an empty graph.
    fn alloc(&self) -> Result<RawHandle>;

    /// Destroy a graph. The lifecycle layer calls this at most once per
    /// handle; unknown handles are ignored.
    fn free(&self, handle: RawHandle);

    /// Find an operation by name.
    fn lookup(&self, handle: RawHandle, name: &str) -> Option<EntryHandle>;

    /// Operation following `position`, and the position to resume from.
    ///
    /// `None` marks the end of the sequence.
    fn advance(&self, handle: RawHandle, position: usize) -> Option<(EntryHandle, usize)>;

    /// Name, type and arity of an operation.
    fn describe(&self, handle: RawHandle, entry: EntryHandle) -> Result<OperationInfo>;

    /// Add one operation.
    fn add_operation(&self, handle: RawHandle, spec: &OperationSpec) -> Result<EntryHandle>;

    /// Merge a serialized graph definition, prefixing every imported name
    /// with `prefix` when it is non-empty.
    fn import(&self, handle: RawHandle, graph_def: &[u8], prefix: &str) -> Result<()>;

    /// Serialize the current graph.
    fn export(&self, handle: RawHandle) -> Result<Vec<u8>>;

    /// Add operations computing `d(sum(outputs))/d(inputs)`.
    ///
    /// `seed_grads`, when present, has one entry per output. The returned
    /// list is expected to have one entry per input; callers verify this.
    fn compute_derivative(
        &self,
        handle: RawHandle,
        prefix: Option<&str>,
        outputs: &[Output],
        inputs: &[Output],
        seed_grads: Option<&[Output]>,
    ) -> Result<Vec<Output>>;
}
