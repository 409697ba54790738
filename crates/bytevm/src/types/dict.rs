//! Insertion-ordered dict keyed by hashable values.

use std::{
    cell::RefCell,
    hash::{Hash, Hasher},
    rc::Rc,
};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    exception::{ExcType, RunResult},
    value::{Value, check_compare_depth},
};

type DictMap = IndexMap<DictKey, Value, ahash::RandomState>;

/// Python dict type preserving insertion order (matching Python 3.7+ behavior).
///
/// Shared by reference: cloning a `Dict` yields another handle to the same map.
#[derive(Debug, Clone, Default)]
pub struct Dict(Rc<RefCell<DictMap>>);

/// A value that has been checked to be hashable.
///
/// Hashing and equality follow the reference language, so `1`, `1.0` and `True`
/// are the same key.
#[derive(Debug, Clone)]
pub struct DictKey(Value);

impl DictKey {
    /// Wraps `value`, raising `TypeError` for unhashable values such as lists.
    pub fn new(value: Value) -> RunResult<Self> {
        if let Some(type_name) = unhashable(&value) {
            return Err(ExcType::type_error(format!("unhashable type: '{type_name}'")));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn value(&self) -> &Value {
        &self.0
    }
}

/// Returns the type name of the first unhashable component of `value`.
fn unhashable(value: &Value) -> Option<&'static str> {
    match value {
        Value::List(_) | Value::Dict(_) => Some(value.type_name()),
        Value::Tuple(items) => items.iter().find_map(unhashable),
        _ => None,
    }
}

impl PartialEq for DictKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.py_eq(&other.0)
    }
}

impl Eq for DictKey {}

impl Hash for DictKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn hash_value<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::None => state.write_u8(0),
        Value::Bool(b) => state.write_i64(i64::from(*b)),
        Value::Int(i) => state.write_i64(*i),
        Value::Float(f) => {
            let int = *f as i64;
            // integral floats must collide with the equal int
            if f.fract() == 0.0 && int as f64 == *f {
                state.write_i64(int);
            } else {
                state.write_u64(f.to_bits());
            }
        }
        Value::Str(s) => s.hash(state),
        Value::Tuple(items) => {
            state.write_usize(items.len());
            for item in items.iter() {
                hash_value(item, state);
            }
        }
        Value::Range(range) => range.hash(state),
        Value::ExcType(exc_type) => exc_type.hash(state),
        // identity-hashed objects
        other => state.write_u8(other.type_name().len() as u8),
    }
}

impl Dict {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dict from key/value pairs, later duplicates overwriting earlier ones.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> RunResult<Self> {
        let dict = Self::new();
        for (key, value) in pairs {
            dict.set(key, value)?;
        }
        Ok(dict)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn get(&self, key: &Value) -> RunResult<Option<Value>> {
        let key = DictKey::new(key.clone())?;
        Ok(self.0.borrow().get(&key).cloned())
    }

    /// Inserts or replaces a value; replacing keeps the original insertion position.
    pub fn set(&self, key: Value, value: Value) -> RunResult<()> {
        let key = DictKey::new(key)?;
        self.0.borrow_mut().insert(key, value);
        Ok(())
    }

    /// Removes a key, preserving the order of the remaining entries.
    pub fn remove(&self, key: &Value) -> RunResult<Option<Value>> {
        let key = DictKey::new(key.clone())?;
        Ok(self.0.borrow_mut().shift_remove(&key))
    }

    pub fn contains(&self, key: &Value) -> RunResult<bool> {
        let key = DictKey::new(key.clone())?;
        Ok(self.0.borrow().contains_key(&key))
    }

    /// Snapshot of the keys in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<Value> {
        self.0.borrow().keys().map(|k| k.0.clone()).collect()
    }

    #[must_use]
    pub fn items(&self) -> Vec<(Value, Value)> {
        self.0.borrow().iter().map(|(k, v)| (k.0.clone(), v.clone())).collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        self.eq_at(other, 0).unwrap_or(false)
    }

    pub(crate) fn eq_at(&self, other: &Self, depth: usize) -> RunResult<bool> {
        if self.ptr_eq(other) {
            return Ok(true);
        }
        let (a, b) = (self.0.borrow(), other.0.borrow());
        if a.len() != b.len() {
            return Ok(false);
        }
        check_compare_depth(depth)?;
        for (k, v) in a.iter() {
            match b.get(k) {
                Some(ov) if v.eq_at(ov, depth + 1)? => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    #[must_use]
    pub fn py_repr(&self) -> String {
        self.repr_in(&mut AHashSet::new())
    }

    pub(crate) fn repr_in(&self, repr_ids: &mut AHashSet<usize>) -> String {
        let id = Rc::as_ptr(&self.0) as usize;
        if !repr_ids.insert(id) {
            return "{...}".to_owned();
        }
        let entries: Vec<String> = self
            .0
            .borrow()
            .iter()
            .map(|(k, v)| format!("{}: {}", k.0.repr_in(repr_ids), v.repr_in(repr_ids)))
            .collect();
        repr_ids.remove(&id);
        format!("{{{}}}", entries.join(", "))
    }
}
