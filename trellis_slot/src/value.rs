// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type-erased storage cells.
//!
//! Instance storage areas hold values of many different types under one
//! namespace (one cached value per slot, one value per configuration name).
//! [`OpaqueValue`] erases a `Clone + Send + Sync` value behind a box so
//! those heterogeneous maps stay simple, while typed access goes through
//! checked downcasts.

use std::any::{Any, TypeId, type_name};
use std::fmt;

/// A type-erased, cloneable storage cell.
///
/// Wraps any `Clone + Send + Sync + 'static` value together with its type
/// identity for later downcasting. Cells cross thread boundaries inside
/// instance storage, so the contained type must be `Send + Sync`.
///
/// # Example
///
/// ```rust
/// use trellis_slot::OpaqueValue;
///
/// let cell = OpaqueValue::new(42_i32);
/// assert!(cell.holds::<i32>());
/// assert_eq!(cell.downcast_ref::<i32>(), Some(&42));
/// assert_eq!(cell.downcast_ref::<f64>(), None);
///
/// let copy = cell.clone();
/// assert_eq!(copy.downcast_ref::<i32>(), Some(&42));
/// ```
pub struct OpaqueValue {
    cell: Box<dyn OpaqueCell>,
    type_id: TypeId,
    type_name: &'static str,
}

impl OpaqueValue {
    /// Erases a concrete value.
    #[must_use]
    pub fn new<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            cell: Box::new(value),
        }
    }

    /// Returns `true` if the contained value is of type `T`.
    #[must_use]
    #[inline]
    pub fn holds<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Returns the name of the contained type, for diagnostics.
    #[must_use]
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the contained value as `T`, or `None` on a type mismatch.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.cell.as_any().downcast_ref()
    }

    /// Clones the contained value out as `T`, or `None` on a type mismatch.
    #[must_use]
    pub fn extract<T: Clone + 'static>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }
}

impl Clone for OpaqueValue {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone_boxed(),
            type_id: self.type_id,
            type_name: self.type_name,
        }
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueValue")
            .field("type", &self.type_name)
            .finish_non_exhaustive()
    }
}

trait OpaqueCell: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn clone_boxed(&self) -> Box<dyn OpaqueCell>;
}

impl<T: Clone + Send + Sync + 'static> OpaqueCell for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn OpaqueCell> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn roundtrip_integer() {
        let cell = OpaqueValue::new(42_i32);
        assert!(cell.holds::<i32>());
        assert!(!cell.holds::<i64>());
        assert_eq!(cell.downcast_ref::<i32>(), Some(&42));
        assert_eq!(cell.extract::<i32>(), Some(42));
        assert_eq!(cell.downcast_ref::<i64>(), None);
    }

    #[test]
    fn roundtrip_string() {
        let cell = OpaqueValue::new(String::from("hello"));
        assert_eq!(cell.downcast_ref::<String>().map(String::as_str), Some("hello"));
    }

    #[test]
    fn clone_preserves_both_cells() {
        let cell = OpaqueValue::new(vec![1_u8, 2, 3]);
        let copy = cell.clone();

        assert_eq!(copy.extract::<Vec<u8>>(), Some(vec![1, 2, 3]));
        assert_eq!(cell.extract::<Vec<u8>>(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn holds_shared_callables() {
        type Hook = Arc<dyn Fn(i32) -> i32 + Send + Sync>;

        let hook: Hook = Arc::new(|v| v + 1);
        let cell = OpaqueValue::new(hook);
        let back = cell.extract::<Hook>().unwrap();
        assert_eq!(back(1), 2);
    }

    #[test]
    fn reports_type_name() {
        let cell = OpaqueValue::new(3.5_f64);
        assert_eq!(cell.type_name(), "f64");
        assert!(format!("{cell:?}").contains("f64"));
    }
}
