//! # Request Attributes
//!
//! Typed, per-request storage carried by the [`Context`](crate::Context).
//! Middleware uses it to hand values to handlers and to its own `after`
//! hook. One value per type; the context owns it, so no locking is needed.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

/// Type-keyed attribute map
#[derive(Default)]
pub struct Attributes {
    data: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Attributes {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous value of the same type
    pub fn insert<T: Send + 'static>(&mut self, value: T) -> Option<T> {
        self.data
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    /// Borrow a value by type
    #[must_use]
    pub fn get<T: Send + 'static>(&self) -> Option<&T> {
        self.data.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrow a value by type
    pub fn get_mut<T: Send + 'static>(&mut self) -> Option<&mut T> {
        self.data
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Take a value out
    pub fn remove<T: Send + 'static>(&mut self) -> Option<T> {
        self.data
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    /// Check if a type is present
    #[must_use]
    pub fn contains<T: Send + 'static>(&self) -> bool {
        self.data.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes").field("len", &self.data.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct UserId(u64);

    #[test]
    fn test_insert_and_get() {
        let mut attrs = Attributes::new();
        assert!(attrs.is_empty());

        assert_eq!(attrs.insert(UserId(7)), None);
        assert_eq!(attrs.get::<UserId>(), Some(&UserId(7)));
        assert!(attrs.contains::<UserId>());
        assert!(!attrs.contains::<String>());
    }

    #[test]
    fn test_insert_replaces_same_type() {
        let mut attrs = Attributes::new();
        attrs.insert(UserId(1));
        assert_eq!(attrs.insert(UserId(2)), Some(UserId(1)));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_get_mut_and_remove() {
        let mut attrs = Attributes::new();
        attrs.insert(String::from("a"));
        if let Some(s) = attrs.get_mut::<String>() {
            s.push('b');
        }
        assert_eq!(attrs.remove::<String>().as_deref(), Some("ab"));
        assert!(attrs.remove::<String>().is_none());
    }
}
