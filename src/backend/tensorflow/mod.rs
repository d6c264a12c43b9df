// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! TensorFlow C API backend.
//!
//! Raw handles are `TF_Graph*` pointers and entry handles are
//! `TF_Operation*` pointers, both carried as integers. Only handles found in
//! the backend's registry are ever converted back to pointers. Serialized
//! graphs are binary `GraphDef` protocol buffers.

mod ffi;

use super::NativeGraphOps;
use crate::error::{NativeGraphError, Result};
use crate::handle::{EntryHandle, RawHandle};
use crate::types::{OperationInfo, OperationSpec, Output};
use std::collections::{HashMap, HashSet};
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Owned `TF_Status`.
struct Status {
    ptr: *mut ffi::TF_Status,
}

impl Status {
    fn new() -> Self {
        Self {
            ptr: unsafe { ffi::TF_NewStatus() },
        }
    }

    fn code(&self) -> c_int {
        unsafe { ffi::TF_GetCode(self.ptr) }
    }

    fn message(&self) -> String {
        unsafe { c_string(ffi::TF_Message(self.ptr)) }
    }

    /// Map a failed status to an error. `invalid` builds the error used
    /// for `TF_INVALID_ARGUMENT`.
    fn check(&self, invalid: fn(String) -> NativeGraphError) -> Result<()> {
        match self.code() {
            ffi::TF_OK => Ok(()),
            ffi::TF_INVALID_ARGUMENT => Err(invalid(self.message())),
            code => Err(NativeGraphError::Native(format!(
                "TensorFlow status {code}: {}",
                self.message()
            ))),
        }
    }
}

impl Drop for Status {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::TF_DeleteStatus(self.ptr) };
        }
    }
}

/// Owned `TF_Buffer`.
struct Buffer {
    ptr: *mut ffi::TF_Buffer,
}

impl Buffer {
    fn empty() -> Self {
        Self {
            ptr: unsafe { ffi::TF_NewBuffer() },
        }
    }

    /// Copies `bytes` into a TensorFlow-owned buffer.
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            ptr: unsafe { ffi::TF_NewBufferFromString(bytes.as_ptr().cast(), bytes.len()) },
        }
    }

    fn to_vec(&self) -> Vec<u8> {
        let buffer = unsafe { &*self.ptr };
        if buffer.data.is_null() || buffer.length == 0 {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(buffer.data.cast::<u8>(), buffer.length) }.to_vec()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::TF_DeleteBuffer(self.ptr) };
        }
    }
}

/// Owned `TF_ImportGraphDefOptions`.
struct ImportOptions {
    ptr: *mut ffi::TF_ImportGraphDefOptions,
}

impl Drop for ImportOptions {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { ffi::TF_DeleteImportGraphDefOptions(self.ptr) };
        }
    }
}

unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    CStr::from_ptr(ptr).to_string_lossy().into_owned()
}

fn c_str(value: &str) -> Result<CString> {
    CString::new(value)
        .map_err(|_| NativeGraphError::InvalidArgument(format!("{value:?} contains a NUL byte")))
}

fn graph_ptr(handle: RawHandle) -> *mut ffi::TF_Graph {
    handle.into_raw() as usize as *mut ffi::TF_Graph
}

fn operation_ptr(entry: EntryHandle) -> *mut ffi::TF_Operation {
    entry.into_raw() as usize as *mut ffi::TF_Operation
}

fn entry(oper: *mut ffi::TF_Operation) -> Option<EntryHandle> {
    if oper.is_null() {
        None
    } else {
        Some(EntryHandle::from_raw(oper as usize as u64))
    }
}

fn to_tf_output(output: &Output) -> ffi::TF_Output {
    ffi::TF_Output {
        oper: operation_ptr(output.operation),
        index: output.index as c_int,
    }
}

fn from_tf_output(output: &ffi::TF_Output) -> Output {
    Output::new(
        EntryHandle::from_raw(output.oper as usize as u64),
        output.index as u32,
    )
}

fn count(len: usize, what: &str) -> Result<c_int> {
    c_int::try_from(len)
        .map_err(|_| NativeGraphError::InvalidArgument(format!("too many {what}: {len}")))
}

/// Operations seen so far in each live graph, keyed by graph pointer.
type Registry = HashMap<u64, HashSet<u64>>;

/// Backend that drives `libtensorflow` through its C API.
///
/// Every handle is checked against a registry of the graphs this backend
/// allocated and the operations found in them before it is turned back
/// into a pointer. The registry lock is held across each native call, so
/// `free` cannot delete a graph another call is using.
#[derive(Debug, Default)]
pub struct TensorFlowBackend {
    graphs: Mutex<Registry>,
}

impl TensorFlowBackend {
    /// Create the backend. The shared library is resolved at link time.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.graphs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unknown_graph(handle: RawHandle) -> NativeGraphError {
    NativeGraphError::InvalidArgument(format!("{handle:?} is not a live TensorFlow graph"))
}

fn live(graphs: &mut Registry, handle: RawHandle) -> Result<&mut HashSet<u64>> {
    graphs
        .get_mut(&handle.into_raw())
        .ok_or_else(|| unknown_graph(handle))
}

/// Record every operation currently in `graph`. Operations are never
/// removed from a TensorFlow graph, so the set only grows.
fn rescan(known: &mut HashSet<u64>, graph: *mut ffi::TF_Graph) {
    let mut pos = 0usize;
    loop {
        let oper = unsafe { ffi::TF_GraphNextOperation(graph, &mut pos) };
        if oper.is_null() {
            break;
        }
        known.insert(oper as usize as u64);
    }
}

/// Resolve `entry` to an operation of `graph`, or fail without touching it.
fn operation_in(
    known: &mut HashSet<u64>,
    graph: *mut ffi::TF_Graph,
    entry: EntryHandle,
) -> Result<*mut ffi::TF_Operation> {
    let raw = entry.into_raw();
    if entry.is_valid() && !known.contains(&raw) {
        rescan(known, graph);
    }
    if known.contains(&raw) {
        Ok(operation_ptr(entry))
    } else {
        Err(NativeGraphError::InvalidArgument(format!(
            "{entry:?} does not belong to this graph"
        )))
    }
}

fn outputs_in(
    known: &mut HashSet<u64>,
    graph: *mut ffi::TF_Graph,
    outputs: &[Output],
) -> Result<Vec<ffi::TF_Output>> {
    outputs
        .iter()
        .map(|output| {
            operation_in(known, graph, output.operation)?;
            Ok(to_tf_output(output))
        })
        .collect()
}

impl NativeGraphOps for TensorFlowBackend {
    fn name(&self) -> &'static str {
        "tensorflow"
    }

    fn version(&self) -> String {
        unsafe { c_string(ffi::TF_Version()) }
    }

    fn alloc(&self) -> Result<RawHandle> {
        let graph = unsafe { ffi::TF_NewGraph() };
        if graph.is_null() {
            return Err(NativeGraphError::Allocation(
                "TF_NewGraph returned null".to_string(),
            ));
        }
        let raw = graph as usize as u64;
        self.lock().insert(raw, HashSet::new());
        tracing::debug!(handle = raw, "allocated TensorFlow graph");
        Ok(RawHandle::from_raw(raw))
    }

    fn free(&self, handle: RawHandle) {
        let mut graphs = self.lock();
        if graphs.remove(&handle.into_raw()).is_some() {
            unsafe { ffi::TF_DeleteGraph(graph_ptr(handle)) };
        } else {
            tracing::warn!(?handle, "free of unknown graph handle ignored");
        }
    }

    fn lookup(&self, handle: RawHandle, name: &str) -> Option<EntryHandle> {
        // A name with an interior NUL cannot exist in the graph.
        let name = CString::new(name).ok()?;
        let mut graphs = self.lock();
        let known = graphs.get_mut(&handle.into_raw())?;
        let found = entry(unsafe { ffi::TF_GraphOperationByName(graph_ptr(handle), name.as_ptr()) })?;
        known.insert(found.into_raw());
        Some(found)
    }

    fn advance(&self, handle: RawHandle, position: usize) -> Option<(EntryHandle, usize)> {
        let mut graphs = self.lock();
        let known = graphs.get_mut(&handle.into_raw())?;
        let mut pos = position;
        let oper = unsafe { ffi::TF_GraphNextOperation(graph_ptr(handle), &mut pos) };
        let found = entry(oper)?;
        known.insert(found.into_raw());
        Some((found, pos))
    }

    fn describe(&self, handle: RawHandle, entry: EntryHandle) -> Result<OperationInfo> {
        let mut graphs = self.lock();
        let known = live(&mut graphs, handle)?;
        let oper = operation_in(known, graph_ptr(handle), entry)?;
        let (name, op_type, num_outputs) = unsafe {
            (
                c_string(ffi::TF_OperationName(oper)),
                c_string(ffi::TF_OperationOpType(oper)),
                ffi::TF_OperationNumOutputs(oper),
            )
        };
        Ok(OperationInfo {
            name,
            op_type,
            num_outputs: num_outputs.max(0) as u32,
        })
    }

    // Output arity comes from the registered op definition, so
    // `spec.num_outputs` is not forwarded.
    fn add_operation(&self, handle: RawHandle, spec: &OperationSpec) -> Result<EntryHandle> {
        let op_type = c_str(&spec.op_type)?;
        let name = c_str(&spec.name)?;
        let mut graphs = self.lock();
        let known = live(&mut graphs, handle)?;
        let graph = graph_ptr(handle);
        let inputs = outputs_in(known, graph, &spec.inputs)?;

        let status = Status::new();
        let oper = unsafe {
            let desc = ffi::TF_NewOperation(graph, op_type.as_ptr(), name.as_ptr());
            for input in inputs {
                ffi::TF_AddInput(desc, input);
            }
            ffi::TF_FinishOperation(desc, status.ptr)
        };
        status.check(NativeGraphError::InvalidArgument)?;
        let added = entry(oper).ok_or_else(|| {
            NativeGraphError::Native("TF_FinishOperation returned null".to_string())
        })?;
        known.insert(added.into_raw());
        Ok(added)
    }

    fn import(&self, handle: RawHandle, graph_def: &[u8], prefix: &str) -> Result<()> {
        let prefix = c_str(prefix)?;
        let mut graphs = self.lock();
        live(&mut graphs, handle)?;

        let buffer = Buffer::from_bytes(graph_def);
        let options = ImportOptions {
            ptr: unsafe { ffi::TF_NewImportGraphDefOptions() },
        };
        let status = Status::new();
        unsafe {
            ffi::TF_ImportGraphDefOptionsSetPrefix(options.ptr, prefix.as_ptr());
            ffi::TF_GraphImportGraphDef(graph_ptr(handle), buffer.ptr, options.ptr, status.ptr);
        }
        status.check(NativeGraphError::InvalidFormat)
    }

    fn export(&self, handle: RawHandle) -> Result<Vec<u8>> {
        let mut graphs = self.lock();
        live(&mut graphs, handle)?;

        let buffer = Buffer::empty();
        let status = Status::new();
        unsafe { ffi::TF_GraphToGraphDef(graph_ptr(handle), buffer.ptr, status.ptr) };
        status.check(NativeGraphError::Native)?;
        Ok(buffer.to_vec())
    }

    fn compute_derivative(
        &self,
        handle: RawHandle,
        prefix: Option<&str>,
        outputs: &[Output],
        inputs: &[Output],
        seed_grads: Option<&[Output]>,
    ) -> Result<Vec<Output>> {
        let prefix = prefix.map(c_str).transpose()?;
        let ny = count(outputs.len(), "outputs")?;
        let nx = count(inputs.len(), "inputs")?;

        let mut graphs = self.lock();
        let known = live(&mut graphs, handle)?;
        let graph = graph_ptr(handle);
        let mut y = outputs_in(known, graph, outputs)?;
        let mut x = outputs_in(known, graph, inputs)?;
        let mut dx = seed_grads
            .map(|seeds| outputs_in(known, graph, seeds))
            .transpose()?;
        let mut dy = vec![
            ffi::TF_Output {
                oper: std::ptr::null_mut(),
                index: 0,
            };
            inputs.len()
        ];

        let status = Status::new();
        unsafe {
            ffi::TF_AddGradientsWithPrefix(
                graph,
                prefix.as_ref().map_or(std::ptr::null(), |p| p.as_ptr()),
                y.as_mut_ptr(),
                ny,
                x.as_mut_ptr(),
                nx,
                dx.as_mut().map_or(std::ptr::null_mut(), |d| d.as_mut_ptr()),
                status.ptr,
                dy.as_mut_ptr(),
            );
        }
        status.check(NativeGraphError::InvalidArgument)?;

        // An input with no path to the outputs comes back as a null
        // operation, which maps to the invalid entry handle.
        Ok(dy.iter().map(from_tf_output).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(backend: &TensorFlowBackend, graph: RawHandle, name: &str) -> EntryHandle {
        // NoOp needs no attributes, unlike Const.
        backend
            .add_operation(graph, &OperationSpec::new("NoOp", name))
            .unwrap()
    }

    #[test]
    fn test_forged_entry_is_rejected() {
        let backend = TensorFlowBackend::new();
        let graph = backend.alloc().unwrap();
        let a = constant(&backend, graph, "a");
        assert_eq!(backend.describe(graph, a).unwrap().name, "a");

        let forged = EntryHandle::from_raw(1);
        assert!(matches!(
            backend.describe(graph, forged),
            Err(NativeGraphError::InvalidArgument(_))
        ));
        backend.free(graph);
    }

    #[test]
    fn test_entry_from_another_graph_is_rejected() {
        let backend = TensorFlowBackend::new();
        let first = backend.alloc().unwrap();
        let second = backend.alloc().unwrap();
        let a = constant(&backend, first, "a");

        let mut spec = OperationSpec::new("NoOp", "b");
        spec.inputs.push(Output::new(a, 0));
        assert!(matches!(
            backend.add_operation(second, &spec),
            Err(NativeGraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            backend.describe(second, a),
            Err(NativeGraphError::InvalidArgument(_))
        ));

        backend.free(first);
        backend.free(second);
    }

    #[test]
    fn test_freed_graph_is_not_dereferenced() {
        let backend = TensorFlowBackend::new();
        let graph = backend.alloc().unwrap();
        let a = constant(&backend, graph, "a");
        backend.free(graph);
        backend.free(graph);

        assert!(matches!(
            backend.describe(graph, a),
            Err(NativeGraphError::InvalidArgument(_))
        ));
        assert!(backend.lookup(graph, "a").is_none());
        assert!(backend.advance(graph, 0).is_none());
        assert!(matches!(
            backend.export(graph),
            Err(NativeGraphError::InvalidArgument(_))
        ));
        assert!(matches!(
            backend.compute_derivative(graph, None, &[Output::new(a, 0)], &[], None),
            Err(NativeGraphError::InvalidArgument(_))
        ));
    }
}
