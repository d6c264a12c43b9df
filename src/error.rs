// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the native-graph library.

use thiserror::Error;

/// Main error type for the native-graph library.
#[derive(Error, Debug)]
pub enum NativeGraphError {
    /// The native library could not create the resource
    #[error("Native allocation failed: {0}")]
    Allocation(String),

    /// The resource has been closed, or is draining towards close
    #[error("close() has been called on the graph")]
    Closed,

    /// A serialized payload was rejected by the native layer
    #[error("Invalid graph definition: {0}")]
    InvalidFormat(String),

    /// A request was rejected before or by the native layer
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Native and managed state disagree
    #[error("Inconsistent native state: {0}")]
    State(String),

    /// Any other failure reported by the native library
    #[error("Native error: {0}")]
    Native(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for native-graph operations.
pub type Result<T> = std::result::Result<T, NativeGraphError>;
