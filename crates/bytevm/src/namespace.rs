use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::value::Value;

/// A name-keyed scope: module globals, builtins, or unoptimized locals.
///
/// Cloning yields another handle to the same scope, so a function keeps its
/// defining module's globals alive and sees later stores to them.
#[derive(Debug, Clone, Default)]
pub struct Namespace(Rc<RefCell<AHashMap<Rc<str>, Value>>>);

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub fn set(&self, name: impl Into<Rc<str>>, value: Value) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    /// Removes a name, returning whether it was bound.
    pub fn delete(&self, name: &str) -> bool {
        self.0.borrow_mut().remove(name).is_some()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Sorted snapshot of the bound names.
    #[must_use]
    pub fn names(&self) -> Vec<Rc<str>> {
        let mut names: Vec<Rc<str>> = self.0.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<K: Into<Rc<str>>> FromIterator<(K, Value)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let map = iter.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self(Rc::new(RefCell::new(map)))
    }
}
