//! Operator dispatch for primitive values.
//!
//! The VM never inspects operand types itself: every arithmetic, comparison,
//! subscript, attribute and iteration instruction goes through [`OperatorHooks`].
//! A hook returns `Ok(None)` for operand types it does not support, and the VM
//! turns that into the reference interpreter's `TypeError` (or `AttributeError`).
//!
//! The trait methods default to the free functions in this module, which
//! implement the reference semantics for the built-in value types. An embedder
//! overrides only the methods it needs and delegates the rest.

use std::cmp::Ordering;

use strum::{Display, IntoStaticStr};

use crate::{
    bytecode::CompareOp,
    exception::{ExcType, RunResult},
    for_iterator::ForIterator,
    value::{Number, Value},
};

/// Binary operators, displayed as their source symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum BinaryOp {
    #[strum(serialize = "**")]
    Power,
    #[strum(serialize = "*")]
    Multiply,
    #[strum(serialize = "@")]
    MatrixMultiply,
    #[strum(serialize = "//")]
    FloorDivide,
    #[strum(serialize = "/")]
    TrueDivide,
    #[strum(serialize = "%")]
    Modulo,
    #[strum(serialize = "+")]
    Add,
    #[strum(serialize = "-")]
    Subtract,
    #[strum(serialize = "<<")]
    Lshift,
    #[strum(serialize = ">>")]
    Rshift,
    #[strum(serialize = "&")]
    And,
    #[strum(serialize = "^")]
    Xor,
    #[strum(serialize = "|")]
    Or,
}

/// Unary operators other than `not`, which is defined by truthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum UnaryOp {
    #[strum(serialize = "+")]
    Positive,
    #[strum(serialize = "-")]
    Negative,
    #[strum(serialize = "~")]
    Invert,
}

/// Pluggable semantics for operations on values.
///
/// Every method has a default implementing the reference behavior for built-in types.
pub trait OperatorHooks {
    fn binary(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        binary_op(op, lhs, rhs)
    }

    /// In-place form (`+=` etc). Mutable containers are updated and returned.
    fn inplace(&self, op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
        inplace_op(op, lhs, rhs)
    }

    fn unary(&self, op: UnaryOp, operand: &Value) -> RunResult<Option<Value>> {
        unary_op(op, operand)
    }

    /// Ordering comparisons: `<`, `<=`, `>` and `>=`.
    fn compare(&self, op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<Option<bool>> {
        compare_op(op, lhs, rhs)
    }

    fn eq(&self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        lhs.try_eq(rhs)
    }

    /// Membership test, `item in container`.
    fn contains(&self, container: &Value, item: &Value) -> RunResult<Option<bool>> {
        contains_op(container, item)
    }

    fn truthy(&self, value: &Value) -> RunResult<bool> {
        Ok(value.py_bool())
    }

    fn getitem(&self, obj: &Value, index: &Value) -> RunResult<Option<Value>> {
        getitem_op(obj, index)
    }

    fn setitem(&self, obj: &Value, index: &Value, value: Value) -> RunResult<Option<()>> {
        setitem_op(obj, index, value)
    }

    fn delitem(&self, obj: &Value, index: &Value) -> RunResult<Option<()>> {
        delitem_op(obj, index)
    }

    fn getattr(&self, obj: &Value, name: &str) -> RunResult<Option<Value>> {
        Ok(getattr_op(obj, name))
    }

    fn setattr(&self, _obj: &Value, _name: &str, _value: Value) -> RunResult<Option<()>> {
        Ok(None)
    }

    fn delattr(&self, _obj: &Value, _name: &str) -> RunResult<Option<()>> {
        Ok(None)
    }

    /// Returns an iterator over `value`, like `iter()`.
    fn iter(&self, value: &Value) -> RunResult<Option<Value>> {
        Ok(iter_op(value))
    }
}

/// The reference semantics, with no overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOperators;

impl OperatorHooks for DefaultOperators {}

// ============================================================================
// Arithmetic
// ============================================================================

/// Default binary operation.
pub fn binary_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    if let (Value::Bool(a), Value::Bool(b)) = (lhs, rhs) {
        match op {
            BinaryOp::And => return Ok(Some(Value::Bool(a & b))),
            BinaryOp::Or => return Ok(Some(Value::Bool(a | b))),
            BinaryOp::Xor => return Ok(Some(Value::Bool(a ^ b))),
            _ => {}
        }
    }
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return match (a, b) {
            (Number::Int(a), Number::Int(b)) => int_op(op, a, b),
            (a, b) => float_op(op, a.to_f64(), b.to_f64()),
        };
    }
    let result = match (op, lhs, rhs) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Some(Value::from(format!("{a}{b}"))),
        (BinaryOp::Add, Value::Tuple(a), Value::Tuple(b)) => Some(Value::tuple(a.iter().chain(b.iter()).cloned().collect())),
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Value::list(items))
        }
        (BinaryOp::Multiply, seq, count) | (BinaryOp::Multiply, count, seq)
            if matches!(count, Value::Int(_) | Value::Bool(_))
                && matches!(seq, Value::Str(_) | Value::Tuple(_) | Value::List(_)) =>
        {
            Some(repeat(seq, count.as_int()?)?)
        }
        _ => None,
    };
    Ok(result)
}

/// Default in-place operation: lists extend in place, everything else rebinds.
pub fn inplace_op(op: BinaryOp, lhs: &Value, rhs: &Value) -> RunResult<Option<Value>> {
    if let (BinaryOp::Add, Value::List(list)) = (op, lhs) {
        let Some(extra) = ForIterator::new(rhs) else {
            return Err(ExcType::not_iterable(rhs.type_name()));
        };
        let extra = extra.collect()?;
        list.borrow_mut().extend(extra);
        return Ok(Some(lhs.clone()));
    }
    if let (BinaryOp::Multiply, Value::List(list)) = (op, lhs) {
        if matches!(rhs, Value::Int(_) | Value::Bool(_)) {
            let count = usize::try_from(rhs.as_int()?).unwrap_or(0);
            let repeated = repeat_items(&list.borrow(), count)?;
            *list.borrow_mut() = repeated;
            return Ok(Some(lhs.clone()));
        }
    }
    binary_op(op, lhs, rhs)
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> RunResult<Option<Value>> {
    let value = match op {
        BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(ExcType::overflow)?),
        BinaryOp::Subtract => Value::Int(a.checked_sub(b).ok_or_else(ExcType::overflow)?),
        BinaryOp::Multiply => Value::Int(a.checked_mul(b).ok_or_else(ExcType::overflow)?),
        BinaryOp::TrueDivide => {
            if b == 0 {
                return Err(ExcType::zero_division("division by zero"));
            }
            Value::Float(a as f64 / b as f64)
        }
        BinaryOp::FloorDivide => Value::Int(floor_div(a, b)?),
        BinaryOp::Modulo => Value::Int(floor_mod(a, b)?),
        BinaryOp::Power => {
            if b < 0 {
                if a == 0 {
                    return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
                }
                Value::Float((a as f64).powf(b as f64))
            } else {
                let exp = u32::try_from(b).map_err(|_| ExcType::overflow())?;
                Value::Int(a.checked_pow(exp).ok_or_else(ExcType::overflow)?)
            }
        }
        BinaryOp::Lshift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            if a == 0 {
                Value::Int(0)
            } else {
                let shift = u32::try_from(b).ok().filter(|&s| s < 64).ok_or_else(ExcType::overflow)?;
                let shifted = a << shift;
                if shifted >> shift != a {
                    return Err(ExcType::overflow());
                }
                Value::Int(shifted)
            }
        }
        BinaryOp::Rshift => {
            if b < 0 {
                return Err(ExcType::value_error("negative shift count"));
            }
            Value::Int(a >> b.min(63))
        }
        BinaryOp::And => Value::Int(a & b),
        BinaryOp::Xor => Value::Int(a ^ b),
        BinaryOp::Or => Value::Int(a | b),
        BinaryOp::MatrixMultiply => return Ok(None),
    };
    Ok(Some(value))
}

/// Floor division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(ExcType::zero_division("integer division or modulo by zero"));
    }
    let q = a.checked_div(b).ok_or_else(ExcType::overflow)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Modulo whose result takes the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> RunResult<i64> {
    if b == 0 {
        return Err(ExcType::zero_division("integer division or modulo by zero"));
    }
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) { Ok(r + b) } else { Ok(r) }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> RunResult<Option<Value>> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::TrueDivide => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDivide => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float divmod()"));
            }
            (a / b).floor()
        }
        BinaryOp::Modulo => {
            if b == 0.0 {
                return Err(ExcType::zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }
        }
        BinaryOp::Power => {
            if a == 0.0 && b < 0.0 {
                return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
            }
            a.powf(b)
        }
        _ => return Ok(None),
    };
    Ok(Some(Value::Float(value)))
}

/// Longest sequence, in items or string bytes, that repetition may produce.
const MAX_REPEAT_LEN: usize = 1 << 24;

/// Sequence repetition; non-positive counts give an empty sequence.
fn repeat(seq: &Value, count: i64) -> RunResult<Value> {
    let count = usize::try_from(count).unwrap_or(0);
    Ok(match seq {
        Value::Str(s) => {
            repeated_len(s.len(), count)?;
            Value::from(s.repeat(count))
        }
        Value::Tuple(items) => Value::tuple(repeat_items(items, count)?),
        Value::List(items) => Value::list(repeat_items(&items.borrow(), count)?),
        other => return Err(ExcType::binary_type_error("*", other.type_name(), "int")),
    })
}

fn repeat_items(items: &[Value], count: usize) -> RunResult<Vec<Value>> {
    let mut out = Vec::with_capacity(repeated_len(items.len(), count)?);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn repeated_len(len: usize, count: usize) -> RunResult<usize> {
    match len.checked_mul(count) {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(total),
        _ => Err(ExcType::OverflowError.err("repeated sequence is too long")),
    }
}

/// Default unary operation.
pub fn unary_op(op: UnaryOp, operand: &Value) -> RunResult<Option<Value>> {
    let value = match (op, operand) {
        (UnaryOp::Negative, Value::Int(i)) => Value::Int(i.checked_neg().ok_or_else(ExcType::overflow)?),
        (UnaryOp::Negative, Value::Bool(b)) => Value::Int(-i64::from(*b)),
        (UnaryOp::Negative, Value::Float(f)) => Value::Float(-f),
        (UnaryOp::Positive, Value::Int(_) | Value::Float(_)) => operand.clone(),
        (UnaryOp::Positive, Value::Bool(b)) => Value::Int(i64::from(*b)),
        (UnaryOp::Invert, Value::Int(i)) => Value::Int(!i),
        (UnaryOp::Invert, Value::Bool(b)) => Value::Int(!i64::from(*b)),
        _ => return Ok(None),
    };
    Ok(Some(value))
}

// ============================================================================
// Comparison and membership
// ============================================================================

/// Default ordering comparison; `op` must be one of `<`, `<=`, `>`, `>=`.
pub fn compare_op(op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<Option<bool>> {
    let Some(ordering) = partial_order(lhs, rhs)? else {
        return Ok(None);
    };
    // NaN compares false with everything
    let Some(ordering) = ordering else {
        return Ok(Some(false));
    };
    Ok(Some(match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        _ => return Ok(None),
    }))
}

/// Outer `None`: types not orderable. Inner `None`: unordered floats.
fn partial_order(lhs: &Value, rhs: &Value) -> RunResult<Option<Option<Ordering>>> {
    if let (Some(a), Some(b)) = (lhs.as_number(), rhs.as_number()) {
        return Ok(Some(match (a, b) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
        }));
    }
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(Some(a.cmp(b)))),
        (Value::Tuple(a), Value::Tuple(b)) => sequence_order(a, b).map(Some),
        (Value::List(a), Value::List(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            sequence_order(&a, &b).map(Some)
        }
        _ => Ok(None),
    }
}

/// Lexicographic order: the first unequal pair decides, then length.
fn sequence_order(a: &[Value], b: &[Value]) -> RunResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.try_eq(y)? {
            return partial_order(x, y)?
                .ok_or_else(|| ExcType::compare_type_error("<", x.type_name(), y.type_name()));
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// Default membership test.
pub fn contains_op(container: &Value, item: &Value) -> RunResult<Option<bool>> {
    let found = match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => haystack.contains(&**needle),
            other => {
                return Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                )));
            }
        },
        Value::List(items) => contains_item(&items.borrow(), item)?,
        Value::Tuple(items) => contains_item(items, item)?,
        Value::Dict(dict) => dict.contains(item)?,
        Value::Range(range) => match item.as_number() {
            Some(Number::Int(i)) => range.contains(i),
            Some(Number::Float(f)) => f.fract() == 0.0 && range.contains(f as i64),
            None => false,
        },
        _ => return Ok(None),
    };
    Ok(Some(found))
}

fn contains_item(items: &[Value], item: &Value) -> RunResult<bool> {
    for v in items {
        if v.try_eq(item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// Subscripts
// ============================================================================

/// Resolves a possibly negative index against `len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) { usize::try_from(index).ok() } else { None }
}

fn sequence_index(obj: &Value, index: &Value) -> RunResult<i64> {
    match index {
        Value::Int(_) | Value::Bool(_) => index.as_int(),
        other => Err(ExcType::type_error(format!(
            "{} indices must be integers or slices, not {}",
            obj.type_name(),
            other.type_name()
        ))),
    }
}

/// Default `obj[index]`.
pub fn getitem_op(obj: &Value, index: &Value) -> RunResult<Option<Value>> {
    let value = match obj {
        Value::List(items) => {
            let i = sequence_index(obj, index)?;
            let items = items.borrow();
            let at = normalize_index(i, items.len()).ok_or_else(|| ExcType::index_error("list"))?;
            items[at].clone()
        }
        Value::Tuple(items) => {
            let i = sequence_index(obj, index)?;
            let at = normalize_index(i, items.len()).ok_or_else(|| ExcType::index_error("tuple"))?;
            items[at].clone()
        }
        Value::Str(s) => {
            let i = match index {
                Value::Int(_) | Value::Bool(_) => index.as_int()?,
                other => {
                    return Err(ExcType::type_error(format!(
                        "string indices must be integers, not {}",
                        other.type_name()
                    )));
                }
            };
            let chars: Vec<char> = s.chars().collect();
            let at = normalize_index(i, chars.len()).ok_or_else(|| ExcType::index_error("string"))?;
            Value::from(chars[at].to_string())
        }
        Value::Range(range) => {
            let i = sequence_index(obj, index)?;
            Value::Int(
                range
                    .get(i)
                    .ok_or_else(|| ExcType::IndexError.err("range object index out of range"))?,
            )
        }
        Value::Dict(dict) => dict.get(index)?.ok_or_else(|| ExcType::key_error(index.clone()))?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Default `obj[index] = value`.
pub fn setitem_op(obj: &Value, index: &Value, value: Value) -> RunResult<Option<()>> {
    match obj {
        Value::List(items) => {
            let i = sequence_index(obj, index)?;
            let mut items = items.borrow_mut();
            let at = normalize_index(i, items.len())
                .ok_or_else(|| ExcType::IndexError.err("list assignment index out of range"))?;
            items[at] = value;
        }
        Value::Dict(dict) => dict.set(index.clone(), value)?,
        _ => return Ok(None),
    }
    Ok(Some(()))
}

/// Default `del obj[index]`.
pub fn delitem_op(obj: &Value, index: &Value) -> RunResult<Option<()>> {
    match obj {
        Value::List(items) => {
            let i = sequence_index(obj, index)?;
            let mut items = items.borrow_mut();
            let at = normalize_index(i, items.len())
                .ok_or_else(|| ExcType::IndexError.err("list assignment index out of range"))?;
            items.remove(at);
        }
        Value::Dict(dict) => {
            if dict.remove(index)?.is_none() {
                return Err(ExcType::key_error(index.clone()));
            }
        }
        _ => return Ok(None),
    }
    Ok(Some(()))
}

// ============================================================================
// Attributes and iteration
// ============================================================================

/// Default attribute lookup: the introspection attributes of built-in objects.
#[must_use]
pub fn getattr_op(obj: &Value, name: &str) -> Option<Value> {
    match (obj, name) {
        (Value::Exception(exc), "args") => Some(Value::tuple(exc.args().to_vec())),
        (Value::Exception(exc), "__cause__") => Some(exc.cause().cloned().map_or(Value::None, Value::exception)),
        (Value::Exception(exc), "value") if exc.exc_type() == ExcType::StopIteration => Some(exc.value()),
        (Value::Function(func), "__name__") => Some(Value::from(func.name())),
        (Value::Function(func), "__qualname__") => Some(Value::from(func.qualname())),
        (Value::Function(func), "__doc__") => Some(func.doc().map_or(Value::None, Value::Str)),
        (Value::Function(func), "__code__") => Some(Value::Code(func.code().clone())),
        (Value::Native(native), "__name__") => Some(Value::from(native.name())),
        (Value::Generator(generator), "__name__") => Some(Value::Str(generator.name())),
        (Value::ExcType(exc_type), "__name__") => Some(Value::from(<&'static str>::from(*exc_type))),
        (Value::Code(code), "co_name") => Some(Value::Str(code.name.clone())),
        (Value::Code(code), "co_filename") => Some(Value::Str(code.filename.clone())),
        (Value::Range(range), "start") => Some(Value::Int(range.start)),
        (Value::Range(range), "stop") => Some(Value::Int(range.stop)),
        (Value::Range(range), "step") => Some(Value::Int(range.step)),
        _ => None,
    }
}

/// Default `iter()`: iterators and generators are their own iterators.
#[must_use]
pub fn iter_op(value: &Value) -> Option<Value> {
    match value {
        Value::Iterator(_) | Value::Generator(_) => Some(value.clone()),
        other => ForIterator::new(other).map(|it| Value::Iterator(std::rc::Rc::new(std::cell::RefCell::new(it)))),
    }
}
