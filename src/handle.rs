// Copyright 2026 The native-graph authors.
// SPDX-License-Identifier: Apache-2.0

//! Opaque handles to native objects.
//!
//! Handles stand in for native pointers. They are only ever produced by a
//! backend and passed back to it; no arithmetic is defined on them. The
//! value `0` is reserved as the invalid sentinel.

use std::fmt;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            raw: u64,
        }

        impl $name {
            /// Create an invalid (null) handle.
            #[inline]
            pub const fn invalid() -> Self {
                Self { raw: 0 }
            }

            /// Wrap a raw value handed out by a native backend.
            #[inline]
            pub const fn from_raw(raw: u64) -> Self {
                Self { raw }
            }

            /// The raw value, for passing back across the native boundary.
            #[inline]
            pub const fn into_raw(self) -> u64 {
                self.raw
            }

            /// Check if this handle is valid (non-zero).
            #[inline]
            pub const fn is_valid(&self) -> bool {
                self.raw != 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::invalid()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_valid() {
                    write!(f, concat!(stringify!($name), "({:#x})"), self.raw)
                } else {
                    write!(f, concat!(stringify!($name), "(invalid)"))
                }
            }
        }
    };
}

define_handle!(
    /// Handle to a native graph.
    RawHandle
);

define_handle!(
    /// Handle to an entry (operation) owned by a native graph.
    ///
    /// Only meaningful while the owning graph is open.
    EntryHandle
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_sentinel() {
        assert!(!RawHandle::invalid().is_valid());
        assert!(!RawHandle::default().is_valid());
        assert!(RawHandle::from_raw(7).is_valid());
        assert_eq!(EntryHandle::from_raw(42).into_raw(), 42);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", RawHandle::from_raw(16)), "RawHandle(0x10)");
        assert_eq!(format!("{:?}", EntryHandle::invalid()), "EntryHandle(invalid)");
    }
}
