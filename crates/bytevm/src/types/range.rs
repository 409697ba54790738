//! Python range type implementation.
//!
//! Provides a range object that supports iteration over a sequence of integers
//! with configurable start, stop, and step values.

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    value::Value,
};

/// Python range object representing an immutable sequence of integers.
///
/// Supports three forms of construction:
/// - `range(stop)` - integers from 0 to stop-1
/// - `range(start, stop)` - integers from start to stop-1
/// - `range(start, stop, step)` - integers from start, incrementing by step
///
/// The range is computed lazily during iteration, not stored as a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    /// Never 0.
    pub step: i64,
}

impl Range {
    /// Creates a range, raising `ValueError` if `step` is zero.
    pub fn new(start: i64, stop: i64, step: i64) -> RunResult<Self> {
        if step == 0 {
            return Err(ExcType::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    /// Returns the number of elements the range yields.
    #[must_use]
    pub fn len(&self) -> usize {
        let (lo, hi, step) = if self.step > 0 {
            (self.start, self.stop, i128::from(self.step))
        } else {
            (self.stop, self.start, -i128::from(self.step))
        };
        if hi <= lo {
            return 0;
        }
        // i128 keeps the arithmetic exact for extreme bounds
        let len = (i128::from(hi) - i128::from(lo) - 1) / step + 1;
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element at `index`, accepting negative indices.
    #[must_use]
    pub fn get(&self, index: i64) -> Option<i64> {
        let len = i64::try_from(self.len()).ok()?;
        let index = if index < 0 { index + len } else { index };
        if !(0..len).contains(&index) {
            return None;
        }
        self.start.checked_add(index.checked_mul(self.step)?)
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }

    /// Ranges compare equal when they produce the same sequence.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        let len = self.len();
        if len != other.len() {
            return false;
        }
        match len {
            0 => true,
            1 => self.start == other.start,
            _ => self.start == other.start && self.step == other.step,
        }
    }

    #[must_use]
    pub fn py_repr(&self) -> String {
        if self.step == 1 {
            format!("range({}, {})", self.start, self.stop)
        } else {
            format!("range({}, {}, {})", self.start, self.stop, self.step)
        }
    }

    /// Creates a range from the `range()` constructor call.
    pub fn init(args: ArgValues) -> RunResult<Value> {
        args.check_no_kwargs("range")?;
        let range = match args.positional() {
            [stop] => Self::new(0, stop.as_int()?, 1)?,
            [start, stop] => Self::new(start.as_int()?, stop.as_int()?, 1)?,
            [start, stop, step] => Self::new(start.as_int()?, stop.as_int()?, step.as_int()?)?,
            [] => return Err(ExcType::type_error("range expected 1 argument, got 0")),
            many => {
                return Err(ExcType::type_error(format!(
                    "range expected at most 3 arguments, got {}",
                    many.len()
                )))
            }
        };
        Ok(Value::Range(range))
    }
}
