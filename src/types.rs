// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Common types passed across the native boundary.

use crate::handle::EntryHandle;
use serde::{Deserialize, Serialize};

/// One output of an operation: the operation handle plus an output index.
///
/// Like the operation handle it refers to, an `Output` is only meaningful
/// while the owning graph is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Output {
    /// Operation producing the value.
    pub operation: EntryHandle,
    /// Index among the operation's outputs.
    pub index: u32,
}

impl Output {
    /// Create a new output reference.
    pub fn new(operation: EntryHandle, index: u32) -> Self {
        Self { operation, index }
    }
}

/// Request to add one operation to a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSpec {
    /// Operation type, e.g. `"Const"` or `"MatMul"`.
    pub op_type: String,
    /// Unique name within the graph.
    pub name: String,
    /// Inputs consumed by the operation, in order.
    pub inputs: Vec<Output>,
    /// Number of outputs the operation produces.
    pub num_outputs: u32,
}

impl OperationSpec {
    /// Describe an operation with no inputs and a single output.
    pub fn new(op_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            name: name.into(),
            inputs: Vec::new(),
            num_outputs: 1,
        }
    }
}

/// Metadata reported by the native layer for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// Full operation name, including any import prefix.
    pub name: String,
    /// Operation type.
    pub op_type: String,
    /// Number of outputs.
    pub num_outputs: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_spec_defaults() {
        let spec = OperationSpec::new("Const", "a");
        assert_eq!(spec.op_type, "Const");
        assert_eq!(spec.name, "a");
        assert!(spec.inputs.is_empty());
        assert_eq!(spec.num_outputs, 1);
    }

    #[test]
    fn test_output_equality() {
        let op = EntryHandle::from_raw(3);
        assert_eq!(Output::new(op, 0), Output::new(op, 0));
        assert_ne!(Output::new(op, 0), Output::new(op, 1));
    }
}
