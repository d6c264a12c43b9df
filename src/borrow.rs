// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Scoped access to a native graph.

use crate::backend::NativeGraphOps;
use crate::error::{NativeGraphError, Result};
use crate::handle::{EntryHandle, RawHandle};
use crate::resource::ResourceHandle;
use crate::types::{OperationInfo, OperationSpec, Output};
use std::fmt;

/// A time-bounded right to use a native graph.
///
/// While a `ScopedBorrow` is active its owner cannot free the native graph.
/// The borrow is released by [`release`](Self::release) or on drop,
/// whichever comes first; releasing twice is a no-op.
pub struct ScopedBorrow<'a> {
    owner: &'a ResourceHandle,
    handle: RawHandle,
    active: bool,
}

impl<'a> ScopedBorrow<'a> {
    pub(crate) fn new(owner: &'a ResourceHandle, handle: RawHandle) -> Self {
        Self {
            owner,
            handle,
            active: true,
        }
    }

    /// The native handle, or the invalid handle once released.
    pub fn handle(&self) -> RawHandle {
        if self.active {
            self.handle
        } else {
            RawHandle::invalid()
        }
    }

    /// Whether this borrow still pins the native graph.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The resource this borrow was taken from.
    pub fn owner(&self) -> &'a ResourceHandle {
        self.owner
    }

    /// Give up the borrow. Safe to call more than once.
    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.owner.release_one();
    }

    fn live(&self) -> Result<(&dyn NativeGraphOps, RawHandle)> {
        if self.active {
            Ok((self.owner.backend(), self.handle))
        } else {
            Err(NativeGraphError::Closed)
        }
    }

    /// Find an operation by name.
    pub fn lookup(&self, name: &str) -> Result<Option<EntryHandle>> {
        let (backend, handle) = self.live()?;
        Ok(backend.lookup(handle, name))
    }

    /// Operation after `position` and the next position, or `None` at the end.
    pub fn advance(&self, position: usize) -> Result<Option<(EntryHandle, usize)>> {
        let (backend, handle) = self.live()?;
        Ok(backend.advance(handle, position))
    }

    /// Name, type and arity of an operation.
    pub fn describe(&self, entry: EntryHandle) -> Result<OperationInfo> {
        let (backend, handle) = self.live()?;
        backend.describe(handle, entry)
    }

    /// Add one operation.
    pub fn add_operation(&self, spec: &OperationSpec) -> Result<EntryHandle> {
        let (backend, handle) = self.live()?;
        backend.add_operation(handle, spec)
    }

    /// Merge a serialized definition. A rejected payload leaves the graph
    /// unchanged and fails with [`NativeGraphError::InvalidFormat`].
    pub fn import(&self, graph_def: &[u8], prefix: &str) -> Result<()> {
        let (backend, handle) = self.live()?;
        backend.import(handle, graph_def, prefix)
    }

    /// Serialize the graph.
    pub fn export(&self) -> Result<Vec<u8>> {
        let (backend, handle) = self.live()?;
        backend.export(handle)
    }

    /// Add operations computing the partial derivatives of the sum of
    /// `outputs` with respect to each of `inputs`.
    ///
    /// Returns exactly one output per input. A native result of any other
    /// length is reported as [`NativeGraphError::State`] and discarded.
    pub fn compute_derivative(
        &self,
        prefix: Option<&str>,
        outputs: &[Output],
        inputs: &[Output],
        seed_grads: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        let (backend, handle) = self.live()?;
        let derivatives = backend.compute_derivative(handle, prefix, outputs, inputs, seed_grads)?;
        if derivatives.len() != inputs.len() {
            return Err(NativeGraphError::State(format!(
                "{} gradients were added to the graph when {} were expected",
                derivatives.len(),
                inputs.len()
            )));
        }
        Ok(derivatives)
    }
}

impl Drop for ScopedBorrow<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ScopedBorrow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedBorrow")
            .field("handle", &self.handle)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use std::sync::Arc;

    /// Delegates to the in-memory backend but drops the last derivative.
    struct ShortDerivatives(InMemoryBackend);

    impl NativeGraphOps for ShortDerivatives {
        fn name(&self) -> &'static str {
            "short-derivatives"
        }
        fn version(&self) -> String {
            self.0.version()
        }
        fn alloc(&self) -> Result<RawHandle> {
            self.0.alloc()
        }
        fn free(&self, handle: RawHandle) {
            self.0.free(handle)
        }
        fn lookup(&self, handle: RawHandle, name: &str) -> Option<EntryHandle> {
            self.0.lookup(handle, name)
        }
        fn advance(&self, handle: RawHandle, position: usize) -> Option<(EntryHandle, usize)> {
            self.0.advance(handle, position)
        }
        fn describe(&self, handle: RawHandle, entry: EntryHandle) -> Result<OperationInfo> {
            self.0.describe(handle, entry)
        }
        fn add_operation(&self, handle: RawHandle, spec: &OperationSpec) -> Result<EntryHandle> {
            self.0.add_operation(handle, spec)
        }
        fn import(&self, handle: RawHandle, graph_def: &[u8], prefix: &str) -> Result<()> {
            self.0.import(handle, graph_def, prefix)
        }
        fn export(&self, handle: RawHandle) -> Result<Vec<u8>> {
            self.0.export(handle)
        }
        fn compute_derivative(
            &self,
            handle: RawHandle,
            prefix: Option<&str>,
            outputs: &[Output],
            inputs: &[Output],
            seed_grads: Option<&[Output]>,
        ) -> Result<Vec<Output>> {
            let mut derivatives =
                self.0
                    .compute_derivative(handle, prefix, outputs, inputs, seed_grads)?;
            derivatives.pop();
            Ok(derivatives)
        }
    }

    fn constant(borrow: &ScopedBorrow<'_>, name: &str) -> Output {
        let entry = borrow
            .add_operation(&OperationSpec::new("Const", name))
            .unwrap();
        Output::new(entry, 0)
    }

    #[test]
    fn test_release_is_idempotent() {
        let resource = ResourceHandle::new(Arc::new(InMemoryBackend::new())).unwrap();
        let mut borrow = resource.borrow().unwrap();
        assert!(borrow.handle().is_valid());

        borrow.release();
        borrow.release();
        assert!(!borrow.is_active());
        assert!(!borrow.handle().is_valid());
        assert_eq!(resource.borrow_count(), 0);

        drop(borrow);
        assert_eq!(resource.borrow_count(), 0);
    }

    #[test]
    fn test_released_borrow_refuses_native_calls() {
        let resource = ResourceHandle::new(Arc::new(InMemoryBackend::new())).unwrap();
        let mut borrow = resource.borrow().unwrap();
        borrow.release();
        assert!(matches!(borrow.lookup("x"), Err(NativeGraphError::Closed)));
        assert!(matches!(borrow.export(), Err(NativeGraphError::Closed)));
    }

    #[test]
    fn test_error_path_still_releases() {
        let resource = ResourceHandle::new(Arc::new(InMemoryBackend::new())).unwrap();
        let result = resource.import(b"{ not json", "");
        assert!(matches!(result, Err(NativeGraphError::InvalidFormat(_))));
        assert_eq!(resource.borrow_count(), 0);
    }

    #[test]
    fn test_rejected_import_keeps_previous_state() {
        let resource = ResourceHandle::new(Arc::new(InMemoryBackend::new())).unwrap();
        {
            let borrow = resource.borrow().unwrap();
            constant(&borrow, "a");
        }
        let before = resource.export().unwrap();
        let handle_before = resource.borrow().unwrap().handle();

        let result = resource.import(b"\x00\x01garbage", "");
        assert!(matches!(result, Err(NativeGraphError::InvalidFormat(_))));
        assert_eq!(resource.export().unwrap(), before);
        assert_eq!(resource.borrow().unwrap().handle(), handle_before);
    }

    #[test]
    fn test_derivative_count_mismatch_is_state_error() {
        let backend = Arc::new(ShortDerivatives(InMemoryBackend::new()));
        let resource = ResourceHandle::new(backend).unwrap();
        let borrow = resource.borrow().unwrap();
        let x0 = constant(&borrow, "x0");
        let x1 = constant(&borrow, "x1");
        let x2 = constant(&borrow, "x2");
        let y = constant(&borrow, "y");

        let result = borrow.compute_derivative(None, &[y], &[x0, x1, x2], None);
        match result {
            Err(NativeGraphError::State(message)) => {
                assert!(message.contains("2 gradients"));
                assert!(message.contains("3 were expected"));
            }
            other => panic!("expected a state error, got {other:?}"),
        }
    }
}
