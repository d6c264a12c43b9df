// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide runtime state.
//!
//! The runtime owns the default native backend shared by every graph created
//! through [`Graph::new`](crate::Graph::new). It is set up exactly once,
//! either explicitly through [`init`] or lazily by [`ensure_initialized`].

use crate::backend::{InMemoryBackend, NativeGraphOps};
use crate::config::{BackendKind, RuntimeConfig};
use crate::error::{NativeGraphError, Result};
use std::fmt;
use std::sync::{Arc, OnceLock};

/// The process-wide runtime. Initialized once on first use.
static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Default backend and the native library it talks to.
pub struct Runtime {
    backend: Arc<dyn NativeGraphOps>,
    kind: BackendKind,
    version: String,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("backend", &self.backend.name())
            .field("kind", &self.kind)
            .field("version", &self.version)
            .finish()
    }
}

impl Runtime {
    /// Backend shared by graphs created without an explicit backend.
    pub fn backend(&self) -> Arc<dyn NativeGraphOps> {
        Arc::clone(&self.backend)
    }

    /// Which backend was selected.
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Version string reported by the native library.
    pub fn version(&self) -> &str {
        &self.version
    }
}

fn build_backend(config: &RuntimeConfig) -> Result<Arc<dyn NativeGraphOps>> {
    match config.backend {
        BackendKind::InMemory => Ok(match config.graph_limit {
            Some(limit) => Arc::new(InMemoryBackend::with_graph_limit(limit)),
            None => Arc::new(InMemoryBackend::new()),
        }),
        #[cfg(feature = "tensorflow")]
        BackendKind::TensorFlow => Ok(Arc::new(crate::backend::tensorflow::TensorFlowBackend::new())),
        #[cfg(not(feature = "tensorflow"))]
        BackendKind::TensorFlow => Err(NativeGraphError::InvalidArgument(
            "the tensorflow backend requires building with the `tensorflow` feature".into(),
        )),
    }
}

/// Initialize the runtime with the given configuration.
///
/// Only the first successful call has an effect; later calls return the
/// already-initialized runtime and ignore `config`.
pub fn init(config: &RuntimeConfig) -> Result<&'static Runtime> {
    if let Some(runtime) = RUNTIME.get() {
        warn_if_ignored(runtime, config);
        return Ok(runtime);
    }

    let backend = build_backend(config)?;
    let version = backend.version();
    let runtime = RUNTIME.get_or_init(|| {
        tracing::info!(backend = backend.name(), %version, "native graph runtime initialized");
        Runtime {
            backend,
            kind: config.backend,
            version,
        }
    });
    // Another thread may have won the race with a different config.
    warn_if_ignored(runtime, config);
    Ok(runtime)
}

/// Warn when `config` asks for a backend other than the active one.
/// Returns whether the request was ignored.
fn warn_if_ignored(runtime: &Runtime, config: &RuntimeConfig) -> bool {
    if runtime.kind == config.backend {
        return false;
    }
    tracing::warn!(
        active = runtime.kind.as_str(),
        requested = config.backend.as_str(),
        "runtime already initialized, ignoring requested backend"
    );
    true
}

/// Get the runtime, initializing it with defaults if nobody has yet.
pub fn ensure_initialized() -> Result<&'static Runtime> {
    match RUNTIME.get() {
        Some(runtime) => Ok(runtime),
        None => init(&RuntimeConfig::default()),
    }
}

/// Version string of the default native library.
pub fn version() -> Result<String> {
    Ok(ensure_initialized()?.version().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let first = ensure_initialized().unwrap();
        let second = ensure_initialized().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(!first.version().is_empty());
        assert_eq!(version().unwrap(), first.version());
    }

    #[test]
    fn test_mismatched_request_is_flagged() {
        let runtime = Runtime {
            backend: Arc::new(crate::backend::InMemoryBackend::new()),
            kind: BackendKind::InMemory,
            version: "test".into(),
        };
        assert!(!warn_if_ignored(&runtime, &RuntimeConfig::default()));

        let other = RuntimeConfig {
            backend: BackendKind::TensorFlow,
            graph_limit: None,
        };
        assert!(warn_if_ignored(&runtime, &other));
    }

    #[test]
    fn test_racing_inits_share_one_runtime() {
        let runtimes: Vec<&'static Runtime> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    s.spawn(move || {
                        let config = RuntimeConfig {
                            backend: BackendKind::InMemory,
                            graph_limit: Some(i + 1),
                        };
                        init(&config).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(runtimes.iter().all(|r| std::ptr::eq(*r, runtimes[0])));

        // Once initialized, a request for another backend gets the active one.
        let other = RuntimeConfig {
            backend: BackendKind::TensorFlow,
            graph_limit: None,
        };
        assert!(std::ptr::eq(init(&other).unwrap(), runtimes[0]));
    }

    #[test]
    fn test_build_backend_in_memory_limit() {
        let config = RuntimeConfig {
            backend: BackendKind::InMemory,
            graph_limit: Some(1),
        };
        let backend = build_backend(&config).unwrap();
        let handle = backend.alloc().unwrap();
        assert!(matches!(backend.alloc(), Err(NativeGraphError::Allocation(_))));
        backend.free(handle);
    }

    #[cfg(not(feature = "tensorflow"))]
    #[test]
    fn test_tensorflow_backend_requires_feature() {
        let config = RuntimeConfig {
            backend: BackendKind::TensorFlow,
            graph_limit: None,
        };
        assert!(matches!(
            build_backend(&config),
            Err(NativeGraphError::InvalidArgument(_))
        ));
    }
}
