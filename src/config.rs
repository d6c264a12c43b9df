// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Configuration structs for the runtime and for individual graphs.
//!
//! Both structs deserialize from JSON with per-field defaults, so a config
//! file only needs to name the settings it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which native library backs newly created graphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process reference backend.
    #[default]
    InMemory,
    /// TensorFlow C API (requires the `tensorflow` feature).
    #[serde(rename = "tensorflow")]
    TensorFlow,
}

impl BackendKind {
    /// Name as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InMemory => "in_memory",
            BackendKind::TensorFlow => "tensorflow",
        }
    }
}

/// Process-wide runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Backend used by `Graph::new()` (default: in_memory)
    #[serde(default)]
    pub backend: BackendKind,

    /// Maximum number of live graphs for the in-memory backend (default: unlimited)
    #[serde(default)]
    pub graph_limit: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            graph_limit: None,
        }
    }
}

impl RuntimeConfig {
    /// Load runtime config from a JSON file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}

/// Per-graph configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Prefix applied by `import_graph_def` (default: none)
    #[serde(default)]
    pub import_prefix: String,

    /// Prefix for `add_gradients_for`; `None` lets the backend pick a fresh one
    #[serde(default)]
    pub gradient_prefix: Option<String>,

    /// Largest serialized graph accepted by import (default: 64 MiB)
    #[serde(default = "default_max_graph_def_bytes")]
    pub max_graph_def_bytes: usize,
}

fn default_max_graph_def_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            import_prefix: String::new(),
            gradient_prefix: None,
            max_graph_def_bytes: default_max_graph_def_bytes(),
        }
    }
}

impl GraphConfig {
    /// Load graph config from a JSON file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }
}
