// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Lazy enumeration over the entries of a native graph.

use crate::error::Result;
use crate::handle::EntryHandle;
use crate::resource::ResourceHandle;

/// Forward-only iterator over the entries of a [`ResourceHandle`].
///
/// Every step takes its own short-lived borrow and releases it before
/// yielding, so an iterator never blocks `close`. Iteration order is
/// whatever the native layer reports and is not stable if the graph is
/// mutated while iterating. If the resource is closed part-way, the
/// iterator yields one `Err(Closed)` and then ends.
#[derive(Debug)]
pub struct Entries<'a> {
    resource: &'a ResourceHandle,
    position: usize,
    done: bool,
}

impl<'a> Entries<'a> {
    /// Start from the beginning of the graph.
    pub fn new(resource: &'a ResourceHandle) -> Self {
        Self {
            resource,
            position: 0,
            done: false,
        }
    }
}

impl Iterator for Entries<'_> {
    type Item = Result<EntryHandle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.resource.advance(self.position) {
            Ok(Some((entry, next))) => {
                self.position = next;
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Entries<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::error::NativeGraphError;
    use crate::types::OperationSpec;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn resource_with(names: &[&str]) -> ResourceHandle {
        let resource = ResourceHandle::new(Arc::new(InMemoryBackend::new())).unwrap();
        for name in names {
            resource
                .add_operation(&OperationSpec::new("Const", *name))
                .unwrap();
        }
        resource
    }

    #[test]
    fn test_visits_each_entry_once() {
        let resource = resource_with(&["A", "B", "C"]);
        let entries: Vec<EntryHandle> = Entries::new(&resource).map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 3);

        let names: HashSet<String> = entries
            .iter()
            .map(|e| resource.describe(*e).unwrap().name)
            .collect();
        let expected: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_empty_graph() {
        let resource = resource_with(&[]);
        let mut entries = Entries::new(&resource);
        assert!(entries.next().is_none());
        assert!(entries.next().is_none());
    }

    #[test]
    fn test_step_does_not_hold_borrow() {
        let resource = resource_with(&["A", "B"]);
        let mut entries = Entries::new(&resource);
        assert!(entries.next().unwrap().is_ok());
        assert_eq!(resource.borrow_count(), 0);
    }

    #[test]
    fn test_close_mid_iteration() {
        let resource = resource_with(&["A", "B"]);
        let mut entries = Entries::new(&resource);
        assert!(entries.next().unwrap().is_ok());

        resource.close();
        assert!(matches!(entries.next(), Some(Err(NativeGraphError::Closed))));
        assert!(entries.next().is_none());
    }
}
