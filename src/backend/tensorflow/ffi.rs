// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Raw FFI declarations for the TensorFlow C API.
//!
//! Hand-written to match `tensorflow/c/c_api.h`. Only the graph building,
//! import/export and gradient entry points are declared.

#![allow(non_camel_case_types)]
#![allow(dead_code)]

use std::os::raw::{c_char, c_int, c_void};

// ---------------------------------------------------------------------------
// Opaque types
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct TF_Graph {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TF_Operation {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TF_OperationDescription {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TF_Status {
    _private: [u8; 0],
}

#[repr(C)]
pub struct TF_ImportGraphDefOptions {
    _private: [u8; 0],
}

// ---------------------------------------------------------------------------
// Plain data
// ---------------------------------------------------------------------------

/// Status codes returned by `TF_GetCode`.
pub const TF_OK: c_int = 0;
pub const TF_CANCELLED: c_int = 1;
pub const TF_UNKNOWN: c_int = 2;
pub const TF_INVALID_ARGUMENT: c_int = 3;
pub const TF_NOT_FOUND: c_int = 5;
pub const TF_ALREADY_EXISTS: c_int = 6;
pub const TF_FAILED_PRECONDITION: c_int = 9;
pub const TF_OUT_OF_RANGE: c_int = 11;
pub const TF_UNIMPLEMENTED: c_int = 12;
pub const TF_INTERNAL: c_int = 13;

/// A single output of an operation.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TF_Output {
    pub oper: *mut TF_Operation,
    pub index: c_int,
}

/// A contiguous byte buffer owned by TensorFlow or the caller.
#[repr(C)]
pub struct TF_Buffer {
    pub data: *const c_void,
    pub length: usize,
    pub data_deallocator: Option<unsafe extern "C" fn(data: *mut c_void, length: usize)>,
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

extern "C" {
    pub fn TF_Version() -> *const c_char;

    // Status
    pub fn TF_NewStatus() -> *mut TF_Status;
    pub fn TF_DeleteStatus(status: *mut TF_Status);
    pub fn TF_GetCode(status: *const TF_Status) -> c_int;
    pub fn TF_Message(status: *const TF_Status) -> *const c_char;

    // Buffers
    pub fn TF_NewBuffer() -> *mut TF_Buffer;
    pub fn TF_NewBufferFromString(proto: *const c_void, proto_len: usize) -> *mut TF_Buffer;
    pub fn TF_DeleteBuffer(buffer: *mut TF_Buffer);

    // Graphs
    pub fn TF_NewGraph() -> *mut TF_Graph;
    pub fn TF_DeleteGraph(graph: *mut TF_Graph);
    pub fn TF_GraphOperationByName(graph: *mut TF_Graph, oper_name: *const c_char)
        -> *mut TF_Operation;
    pub fn TF_GraphNextOperation(graph: *mut TF_Graph, pos: *mut usize) -> *mut TF_Operation;
    pub fn TF_GraphToGraphDef(
        graph: *mut TF_Graph,
        output_graph_def: *mut TF_Buffer,
        status: *mut TF_Status,
    );

    // Import
    pub fn TF_NewImportGraphDefOptions() -> *mut TF_ImportGraphDefOptions;
    pub fn TF_DeleteImportGraphDefOptions(opts: *mut TF_ImportGraphDefOptions);
    pub fn TF_ImportGraphDefOptionsSetPrefix(
        opts: *mut TF_ImportGraphDefOptions,
        prefix: *const c_char,
    );
    pub fn TF_GraphImportGraphDef(
        graph: *mut TF_Graph,
        graph_def: *const TF_Buffer,
        options: *const TF_ImportGraphDefOptions,
        status: *mut TF_Status,
    );

    // Operations
    pub fn TF_OperationName(oper: *mut TF_Operation) -> *const c_char;
    pub fn TF_OperationOpType(oper: *mut TF_Operation) -> *const c_char;
    pub fn TF_OperationNumOutputs(oper: *mut TF_Operation) -> c_int;
    pub fn TF_NewOperation(
        graph: *mut TF_Graph,
        op_type: *const c_char,
        oper_name: *const c_char,
    ) -> *mut TF_OperationDescription;
    pub fn TF_AddInput(desc: *mut TF_OperationDescription, input: TF_Output);
    pub fn TF_FinishOperation(
        desc: *mut TF_OperationDescription,
        status: *mut TF_Status,
    ) -> *mut TF_Operation;

    // Gradients
    pub fn TF_AddGradientsWithPrefix(
        graph: *mut TF_Graph,
        prefix: *const c_char,
        y: *mut TF_Output,
        ny: c_int,
        x: *mut TF_Output,
        nx: c_int,
        dx: *mut TF_Output,
        status: *mut TF_Status,
        dy: *mut TF_Output,
    );
}
