//! Iterator support for `for` loops and constructors.
//!
//! `ForIterator` stores iteration state (an index plus a handle to the container)
//! rather than a Rust iterator, so the container stays shareable and mutations
//! made by the loop body are observed the way the reference language observes them.
//! Generators are not wrapped here: the VM resumes their frames directly.

use std::{cell::RefCell, rc::Rc};

use crate::{
    exception::{ExcType, RunResult},
    types::{Dict, Range},
    value::Value,
};

/// Iterator state for built-in iterable types.
#[derive(Debug)]
pub struct ForIterator {
    /// Current iteration index, shared across all iterator types.
    index: usize,
    iter_value: ForIterValue,
}

/// Type-specific iteration data.
#[derive(Debug)]
enum ForIterValue {
    Range(Range),
    /// Checks the current list length on each step, so appends during iteration are seen.
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    /// Characters of a string, yielded as one-character strings.
    Str(Vec<char>),
    /// Snapshot of the keys; the dict's length is compared to detect mutation.
    DictKeys { dict: Dict, keys: Vec<Value> },
    Exhausted,
}

impl ForIterator {
    /// Creates an iterator over a built-in iterable, or `None` if `value` is not one.
    #[must_use]
    pub fn new(value: &Value) -> Option<Self> {
        let iter_value = match value {
            Value::Range(range) => ForIterValue::Range(*range),
            Value::List(list) => ForIterValue::List(list.clone()),
            Value::Tuple(items) => ForIterValue::Tuple(items.clone()),
            Value::Str(s) => ForIterValue::Str(s.chars().collect()),
            Value::Dict(dict) => ForIterValue::DictKeys {
                dict: dict.clone(),
                keys: dict.keys(),
            },
            _ => return None,
        };
        Some(Self { index: 0, iter_value })
    }

    /// Name of the iterator's class, e.g. `list_iterator`.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self.iter_value {
            ForIterValue::Range(_) => "range_iterator",
            ForIterValue::List(_) => "list_iterator",
            ForIterValue::Tuple(_) => "tuple_iterator",
            ForIterValue::Str(_) => "str_iterator",
            ForIterValue::DictKeys { .. } => "dict_keyiterator",
            ForIterValue::Exhausted => "iterator",
        }
    }

    /// Returns the next item, or `Ok(None)` once exhausted.
    ///
    /// # Errors
    /// `RuntimeError` if a dict changed size during iteration.
    pub fn for_next(&mut self) -> RunResult<Option<Value>> {
        let i = self.index;
        let item = match &self.iter_value {
            ForIterValue::Range(range) => range.get(i64::try_from(i).unwrap_or(i64::MAX)).map(Value::Int),
            ForIterValue::List(list) => list.borrow().get(i).cloned(),
            ForIterValue::Tuple(items) => items.get(i).cloned(),
            ForIterValue::Str(chars) => chars.get(i).map(|c| Value::from(c.to_string())),
            ForIterValue::DictKeys { dict, keys } => {
                if dict.len() != keys.len() {
                    self.iter_value = ForIterValue::Exhausted;
                    return Err(ExcType::RuntimeError.err("dictionary changed size during iteration"));
                }
                keys.get(i).cloned()
            }
            ForIterValue::Exhausted => None,
        };
        match item {
            Some(value) => {
                self.index += 1;
                Ok(Some(value))
            }
            None => {
                // release the container once finished
                self.iter_value = ForIterValue::Exhausted;
                Ok(None)
            }
        }
    }

    /// Drains the remaining items.
    pub fn collect(mut self) -> RunResult<Vec<Value>> {
        let mut items = Vec::new();
        while let Some(item) = self.for_next()? {
            items.push(item);
        }
        Ok(items)
    }
}
