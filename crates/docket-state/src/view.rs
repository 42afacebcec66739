//! Read-only view of a document scope.
//!
//! Callbacks registered on a schema (required predicates, default
//! generators, validators, getters, virtuals) receive a [`DocView`] of the
//! document or embedded document that owns the field, never the mutable
//! document itself.

use crate::value::get_at;
use crate::Path;
use serde_json::Value;

/// A borrowed view of one document scope.
#[derive(Debug, Clone, Copy)]
pub struct DocView<'a> {
    value: &'a Value,
    is_new: bool,
}

impl<'a> DocView<'a> {
    /// Create a view over `value`.
    pub fn new(value: &'a Value, is_new: bool) -> Self {
        Self { value, is_new }
    }

    /// The raw value of the scope.
    #[inline]
    pub fn value(&self) -> &'a Value {
        self.value
    }

    /// Read a path relative to the scope.
    pub fn get(&self, path: impl Into<Path>) -> Option<&'a Value> {
        get_at(self.value, &path.into())
    }

    /// Read a string field.
    pub fn get_str(&self, path: impl Into<Path>) -> Option<&'a str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Read a numeric field as `f64`.
    pub fn get_f64(&self, path: impl Into<Path>) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// True if the scope has never been persisted.
    #[inline]
    pub fn is_new(&self) -> bool {
        self.is_new
    }
}
