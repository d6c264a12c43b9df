// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle management for a shared native graph handle.
//!
//! A [`ResourceHandle`] owns one native handle. Any code that needs the
//! native graph to stay alive takes a [`ScopedBorrow`]; [`ResourceHandle::close`]
//! refuses new borrows, waits for the outstanding ones to drain and then
//! frees the native graph exactly once.
//!
//! ```ignore
//! let resource = ResourceHandle::new(backend)?;
//! {
//!     let borrow = resource.borrow()?;
//!     let entry = borrow.lookup("input")?;
//! } // borrow released here
//! resource.close();
//! assert!(resource.borrow().is_err());
//! ```

use crate::backend::NativeGraphOps;
use crate::borrow::ScopedBorrow;
use crate::error::{NativeGraphError, Result};
use crate::handle::{EntryHandle, RawHandle};
use crate::types::{OperationInfo, OperationSpec, Output};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Outcome of a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// This call drained the borrows and freed the native graph.
    Closed,
    /// The native graph had already been freed.
    AlreadyClosed,
    /// Another thread is currently draining; it will free the graph.
    InProgress,
    /// The wait was interrupted. The native graph is still allocated and
    /// outstanding borrows stay valid; call close again to finish teardown.
    Interrupted,
}

#[derive(Debug)]
struct State {
    handle: RawHandle,
    borrow_count: usize,
    close_requested: bool,
    closer_waiting: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    drained: Condvar,
}

impl Shared {
    // State is only touched in short sections that cannot panic, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Token that aborts a blocked [`ResourceHandle::close_interruptible`].
///
/// Obtained from [`ResourceHandle::close_interrupt`]. Clones share the same
/// flag, so one clone can be handed to another thread. An interruption is
/// consumed by the close it aborts, so the token can be reused for a retry.
#[derive(Clone)]
pub struct CloseInterrupt {
    shared: Arc<Shared>,
    fired: Arc<AtomicBool>,
}

impl CloseInterrupt {
    /// Abort the wait of the close call using this token.
    pub fn interrupt(&self) {
        self.fired.store(true, Ordering::SeqCst);
        // Taking the lock orders this notification after the waiter's check.
        let _state = self.shared.lock();
        self.shared.drained.notify_all();
    }

    /// Whether an interruption is pending.
    pub fn is_interrupted(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CloseInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseInterrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Owner of a single native graph handle.
///
/// `ResourceHandle` is `Send + Sync`; share it between threads by reference
/// or behind an `Arc`.
pub struct ResourceHandle {
    shared: Arc<Shared>,
    backend: Arc<dyn NativeGraphOps>,
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ResourceHandle")
            .field("backend", &self.backend.name())
            .field("handle", &state.handle)
            .field("borrow_count", &state.borrow_count)
            .field("close_requested", &state.close_requested)
            .finish()
    }
}

impl ResourceHandle {
    /// Allocate a fresh native graph.
    pub fn new(backend: Arc<dyn NativeGraphOps>) -> Result<Self> {
        let handle = backend.alloc()?;
        Self::from_raw(backend, handle)
    }

    /// Take ownership of a native graph allocated elsewhere.
    pub fn from_raw(backend: Arc<dyn NativeGraphOps>, handle: RawHandle) -> Result<Self> {
        if !handle.is_valid() {
            return Err(NativeGraphError::Allocation(format!(
                "{} backend returned an invalid handle",
                backend.name()
            )));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    handle,
                    borrow_count: 0,
                    close_requested: false,
                    closer_waiting: false,
                }),
                drained: Condvar::new(),
            }),
            backend,
        })
    }

    pub(crate) fn backend(&self) -> &dyn NativeGraphOps {
        self.backend.as_ref()
    }

    /// Take a borrow that keeps the native graph alive until released.
    ///
    /// Fails with [`NativeGraphError::Closed`] once a close has been
    /// requested, even while that close is still draining.
    pub fn borrow(&self) -> Result<ScopedBorrow<'_>> {
        let mut state = self.shared.lock();
        if !state.handle.is_valid() || state.close_requested {
            return Err(NativeGraphError::Closed);
        }
        state.borrow_count += 1;
        let handle = state.handle;
        drop(state);
        tracing::trace!(?handle, "borrow acquired");
        Ok(ScopedBorrow::new(self, handle))
    }

    /// Release a borrow. Equivalent to dropping it.
    pub fn release(&self, mut borrow: ScopedBorrow<'_>) {
        borrow.release();
    }

    pub(crate) fn release_one(&self) {
        let mut state = self.shared.lock();
        debug_assert!(state.borrow_count > 0, "borrow released twice");
        state.borrow_count = state.borrow_count.saturating_sub(1);
        if state.borrow_count == 0 {
            self.shared.drained.notify_all();
        }
        tracing::trace!(handle = ?state.handle, remaining = state.borrow_count, "borrow released");
    }

    /// Free the native graph once every outstanding borrow is released.
    ///
    /// Blocks the calling thread while borrows are outstanding. Idempotent:
    /// later or concurrent calls return without freeing again.
    pub fn close(&self) -> CloseStatus {
        self.close_inner(None)
    }

    /// Like [`close`](Self::close), but gives up waiting when `interrupt`
    /// fires.
    ///
    /// An interrupted close leaves the native graph allocated rather than
    /// freeing it under a live borrower. New borrows stay refused; a later
    /// `close` completes the teardown.
    pub fn close_interruptible(&self, interrupt: &CloseInterrupt) -> CloseStatus {
        debug_assert!(
            Arc::ptr_eq(&interrupt.shared, &self.shared),
            "interrupt token belongs to another resource"
        );
        self.close_inner(Some(interrupt))
    }

    /// Create a token able to interrupt a close of this resource.
    pub fn close_interrupt(&self) -> CloseInterrupt {
        CloseInterrupt {
            shared: Arc::clone(&self.shared),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    fn close_inner(&self, interrupt: Option<&CloseInterrupt>) -> CloseStatus {
        let mut state = self.shared.lock();
        if !state.handle.is_valid() {
            return CloseStatus::AlreadyClosed;
        }
        if state.closer_waiting {
            return CloseStatus::InProgress;
        }
        state.close_requested = true;
        state.closer_waiting = true;

        while state.borrow_count > 0 {
            if let Some(interrupt) = interrupt.filter(|i| i.is_interrupted()) {
                interrupt.fired.store(false, Ordering::SeqCst);
                state.closer_waiting = false;
                tracing::warn!(
                    handle = ?state.handle,
                    outstanding = state.borrow_count,
                    "close interrupted while draining, native graph left allocated"
                );
                return CloseStatus::Interrupted;
            }
            tracing::debug!(handle = ?state.handle, outstanding = state.borrow_count, "waiting for borrows to drain");
            state = self
                .shared
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let handle = std::mem::replace(&mut state.handle, RawHandle::invalid());
        state.closer_waiting = false;
        drop(state);

        self.backend.free(handle);
        tracing::info!(?handle, backend = self.backend.name(), "native graph closed");
        CloseStatus::Closed
    }

    /// Whether the native graph has been freed.
    pub fn is_closed(&self) -> bool {
        !self.shared.lock().handle.is_valid()
    }

    /// Whether a close has been requested (draining or done).
    pub fn is_close_requested(&self) -> bool {
        let state = self.shared.lock();
        state.close_requested || !state.handle.is_valid()
    }

    /// Number of outstanding borrows.
    pub fn borrow_count(&self) -> usize {
        self.shared.lock().borrow_count
    }

    // -----------------------------------------------------------------------
    // Native operations, each under a short-lived borrow
    // -----------------------------------------------------------------------

    /// Find an entry by name. Absence is `Ok(None)`, not an error.
    pub fn lookup(&self, name: &str) -> Result<Option<EntryHandle>> {
        self.borrow()?.lookup(name)
    }

    /// Entry following `position` and the position to resume from.
    pub fn advance(&self, position: usize) -> Result<Option<(EntryHandle, usize)>> {
        self.borrow()?.advance(position)
    }

    /// Metadata for one entry.
    pub fn describe(&self, entry: EntryHandle) -> Result<OperationInfo> {
        self.borrow()?.describe(entry)
    }

    /// Add one operation.
    pub fn add_operation(&self, spec: &OperationSpec) -> Result<EntryHandle> {
        self.borrow()?.add_operation(spec)
    }

    /// Merge a serialized definition into the native graph.
    pub fn import(&self, graph_def: &[u8], prefix: &str) -> Result<()> {
        self.borrow()?.import(graph_def, prefix)
    }

    /// Snapshot the native graph as opaque bytes.
    pub fn export(&self) -> Result<Vec<u8>> {
        self.borrow()?.export()
    }

    /// Add derivative operations; see [`ScopedBorrow::compute_derivative`].
    pub fn compute_derivative(
        &self,
        prefix: Option<&str>,
        outputs: &[Output],
        inputs: &[Output],
        seed_grads: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        self.borrow()?
            .compute_derivative(prefix, outputs, inputs, seed_grads)
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if !state.handle.is_valid() {
            return;
        }
        if state.borrow_count > 0 {
            // Only reachable if a borrow was leaked with mem::forget.
            tracing::warn!(
                handle = ?state.handle,
                outstanding = state.borrow_count,
                "resource dropped with leaked borrows, native graph not freed"
            );
            return;
        }
        let handle = std::mem::replace(&mut state.handle, RawHandle::invalid());
        drop(state);
        self.backend.free(handle);
        tracing::debug!(?handle, "native graph freed on drop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use std::sync::mpsc;
    use std::thread;

    fn resource_with_op() -> (Arc<InMemoryBackend>, ResourceHandle) {
        let backend = Arc::new(InMemoryBackend::new());
        let resource = ResourceHandle::new(backend.clone()).unwrap();
        resource
            .add_operation(&OperationSpec::new("Const", "a"))
            .unwrap();
        (backend, resource)
    }

    fn wait_for_close_request(resource: &ResourceHandle) {
        while !resource.is_close_requested() {
            thread::yield_now();
        }
    }

    #[test]
    fn test_allocation_failure() {
        let backend = Arc::new(InMemoryBackend::with_graph_limit(0));
        let result = ResourceHandle::new(backend);
        assert!(matches!(result, Err(NativeGraphError::Allocation(_))));
    }

    #[test]
    fn test_from_raw_rejects_invalid_handle() {
        let backend = Arc::new(InMemoryBackend::new());
        let result = ResourceHandle::from_raw(backend, RawHandle::invalid());
        assert!(matches!(result, Err(NativeGraphError::Allocation(_))));
    }

    #[test]
    fn test_borrow_counts() {
        let (_, resource) = resource_with_op();
        let first = resource.borrow().unwrap();
        let second = resource.borrow().unwrap();
        assert_eq!(resource.borrow_count(), 2);
        assert_eq!(first.handle(), second.handle());

        resource.release(first);
        drop(second);
        assert_eq!(resource.borrow_count(), 0);
    }

    #[test]
    fn test_close_then_borrow_fails() {
        let (backend, resource) = resource_with_op();
        assert_eq!(resource.close(), CloseStatus::Closed);
        assert!(resource.is_closed());
        assert!(matches!(resource.borrow(), Err(NativeGraphError::Closed)));
        assert!(matches!(resource.lookup("a"), Err(NativeGraphError::Closed)));
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (backend, resource) = resource_with_op();
        assert_eq!(resource.close(), CloseStatus::Closed);
        assert_eq!(resource.close(), CloseStatus::AlreadyClosed);
        drop(resource);
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_close_waits_for_borrow() {
        let (backend, resource) = resource_with_op();
        let borrow = resource.borrow().unwrap();

        thread::scope(|s| {
            let closer = s.spawn(|| resource.close());
            wait_for_close_request(&resource);

            // Draining: no new borrows, the existing one still works.
            assert!(matches!(resource.borrow(), Err(NativeGraphError::Closed)));
            assert!(borrow.lookup("a").unwrap().is_some());
            assert!(!resource.is_closed());
            assert_eq!(backend.frees(), 0);

            drop(borrow);
            assert_eq!(closer.join().unwrap(), CloseStatus::Closed);
        });

        assert!(matches!(resource.borrow(), Err(NativeGraphError::Closed)));
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_concurrent_close_frees_once() {
        let (backend, resource) = resource_with_op();
        let borrow = resource.borrow().unwrap();

        thread::scope(|s| {
            let first = s.spawn(|| resource.close());
            wait_for_close_request(&resource);
            assert_eq!(resource.close(), CloseStatus::InProgress);
            drop(borrow);
            assert_eq!(first.join().unwrap(), CloseStatus::Closed);
        });

        assert_eq!(resource.close(), CloseStatus::AlreadyClosed);
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_interrupted_close_leaves_resource_allocated() {
        let (backend, resource) = resource_with_op();
        let borrow = resource.borrow().unwrap();
        let interrupt = resource.close_interrupt();

        thread::scope(|s| {
            let closer = s.spawn(|| resource.close_interruptible(&interrupt));
            wait_for_close_request(&resource);
            interrupt.interrupt();
            assert_eq!(closer.join().unwrap(), CloseStatus::Interrupted);
        });

        assert!(!interrupt.is_interrupted());
        assert!(!resource.is_closed());
        assert_eq!(backend.frees(), 0);
        assert!(borrow.lookup("a").unwrap().is_some());
        assert!(matches!(resource.borrow(), Err(NativeGraphError::Closed)));

        drop(borrow);
        assert_eq!(resource.close(), CloseStatus::Closed);
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_interrupt_token_can_be_reused() {
        let (backend, resource) = resource_with_op();
        let borrow = resource.borrow().unwrap();
        let interrupt = resource.close_interrupt();

        thread::scope(|s| {
            let closer = s.spawn(|| resource.close_interruptible(&interrupt));
            wait_for_close_request(&resource);
            interrupt.interrupt();
            assert_eq!(closer.join().unwrap(), CloseStatus::Interrupted);

            // The retry waits for the borrow again instead of returning at once.
            let retry = s.spawn(|| resource.close_interruptible(&interrupt));
            thread::sleep(std::time::Duration::from_millis(50));
            assert!(!retry.is_finished());
            assert_eq!(backend.frees(), 0);

            drop(borrow);
            assert_eq!(retry.join().unwrap(), CloseStatus::Closed);
        });
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_many_borrowers_one_close() {
        let (backend, resource) = resource_with_op();
        let resource = Arc::new(resource);
        let (started_tx, started_rx) = mpsc::channel();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let resource = Arc::clone(&resource);
                let started = started_tx.clone();
                thread::spawn(move || {
                    let mut completed = 0usize;
                    let mut signalled = false;
                    loop {
                        let Ok(borrow) = resource.borrow() else {
                            break;
                        };
                        // The graph must still be alive under every borrow.
                        assert!(borrow.lookup("a").unwrap().is_some());
                        drop(borrow);
                        completed += 1;
                        if !signalled {
                            started.send(()).unwrap();
                            signalled = true;
                        }
                    }
                    completed
                })
            })
            .collect();

        for _ in 0..8 {
            started_rx.recv().unwrap();
        }
        assert_eq!(resource.close(), CloseStatus::Closed);

        let total: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();
        assert!(total >= 8);
        assert_eq!(resource.borrow_count(), 0);
        assert_eq!(backend.frees(), 1);
    }

    #[test]
    fn test_drop_frees_open_resource() {
        let (backend, resource) = resource_with_op();
        drop(resource);
        assert_eq!(backend.frees(), 1);
        assert_eq!(backend.live_graphs(), 0);
    }

    #[test]
    fn test_drop_with_leaked_borrow_does_not_free() {
        let (backend, resource) = resource_with_op();
        std::mem::forget(resource.borrow().unwrap());
        drop(resource);
        assert_eq!(backend.frees(), 0);
        assert_eq!(backend.live_graphs(), 1);
    }
}
