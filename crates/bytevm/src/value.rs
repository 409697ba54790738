//! The operand value model.
//!
//! `Value` is the unit pushed on every frame's operand stack. Immediate values are
//! stored inline; containers and callables are reference counted with `Rc`, so
//! cloning a `Value` is always cheap and never copies container contents.

use std::{cell::RefCell, fmt, rc::Rc};

use ahash::AHashSet;
use thiserror::Error;

use crate::{
    bytecode::{CodeObject, Why},
    callable::NativeFunction,
    exception::{ExcType, Exception, RunResult},
    for_iterator::ForIterator,
    function::Function,
    generator::Generator,
    types::{Dict, Range},
};

/// A runtime value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<[Value]>),
    List(Rc<RefCell<Vec<Value>>>),
    Dict(Dict),
    Range(Range),
    Function(Rc<Function>),
    Native(NativeFunction),
    Generator(Generator),
    Iterator(Rc<RefCell<ForIterator>>),
    /// A raised (or constructed) exception instance.
    Exception(Rc<Exception>),
    /// An exception class, e.g. the value of the builtin name `ValueError`.
    ExcType(ExcType),
    Cell(Cell),
    Code(Rc<CodeObject>),
    /// Marker pushed by the block protocol while a `finally` body runs.
    Why(Why),
}

impl Value {
    #[must_use]
    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Tuple(items.into())
    }

    #[must_use]
    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(s.into())
    }

    #[must_use]
    pub fn exception(exc: Exception) -> Self {
        Self::Exception(Rc::new(exc))
    }

    /// Name of the value's class as the reference language reports it.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Tuple(_) => "tuple",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Range(_) => "range",
            Self::Function(_) => "function",
            Self::Native(_) => "builtin_function_or_method",
            Self::Generator(_) => "generator",
            Self::Iterator(it) => it.borrow().type_name(),
            Self::Exception(exc) => exc.exc_type().into(),
            Self::ExcType(_) => "type",
            Self::Cell(_) => "cell",
            Self::Code(_) => "code",
            Self::Why(_) => "why",
        }
    }

    /// Truthiness following the reference language's rules.
    #[must_use]
    pub fn py_bool(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Dict(dict) => !dict.is_empty(),
            Self::Range(range) => !range.is_empty(),
            _ => true,
        }
    }

    /// Identity comparison (`is`).
    ///
    /// Immediates compare by value, shared objects by pointer.
    #[must_use]
    pub fn is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => a.ptr_eq(b),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => a.ptr_eq(b),
            (Self::Generator(a), Self::Generator(b)) => a.ptr_eq(b),
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Cell(a), Self::Cell(b)) => a.ptr_eq(b),
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Why(a), Self::Why(b)) => a == b,
            _ => false,
        }
    }

    /// Equality (`==`), including numeric comparison across bool, int and float.
    ///
    /// Containers nested too deeply to compare are reported as unequal; use
    /// [`Value::try_eq`] to get the `RecursionError` instead.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        self.try_eq(other).unwrap_or(false)
    }

    /// Equality (`==`), raising `RecursionError` when containers nest too deeply,
    /// as self-referential lists do.
    pub fn try_eq(&self, other: &Self) -> RunResult<bool> {
        self.eq_at(other, 0)
    }

    pub(crate) fn eq_at(&self, other: &Self, depth: usize) -> RunResult<bool> {
        if let (Some(a), Some(b)) = (self.as_number(), other.as_number()) {
            return Ok(a.eq(b));
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(a == b),
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b, depth),
            (Self::List(a), Self::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return Ok(true);
                }
                seq_eq(&a.borrow(), &b.borrow(), depth)
            }
            (Self::Dict(a), Self::Dict(b)) => a.eq_at(b, depth),
            (Self::Range(a), Self::Range(b)) => Ok(a.py_eq(b)),
            _ => Ok(self.is(other)),
        }
    }

    /// Numeric view used for mixed-type arithmetic and comparison.
    pub(crate) fn as_number(&self) -> Option<Number> {
        match self {
            Self::Bool(b) => Some(Number::Int(i64::from(*b))),
            Self::Int(i) => Some(Number::Int(*i)),
            Self::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Interprets the value as an integer index (`int` or `bool`), else `TypeError`.
    pub(crate) fn as_int(&self) -> RunResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Bool(b) => Ok(i64::from(*b)),
            other => Err(ExcType::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        }
    }

    /// The `repr()` of the value.
    ///
    /// A list or dict that contains itself prints as `[...]` or `{...}` at the
    /// point of recursion.
    #[must_use]
    pub fn py_repr(&self) -> String {
        self.repr_in(&mut AHashSet::new())
    }

    /// `repr()` with `repr_ids` holding the addresses of containers currently being printed.
    pub(crate) fn repr_in(&self, repr_ids: &mut AHashSet<usize>) -> String {
        match self {
            Self::None => "None".to_owned(),
            Self::Bool(true) => "True".to_owned(),
            Self::Bool(false) => "False".to_owned(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => float_repr(*f),
            Self::Str(s) => string_repr(s),
            Self::Tuple(items) => {
                if items.len() == 1 {
                    format!("({},)", items[0].repr_in(repr_ids))
                } else {
                    format!("({})", join_repr(items, repr_ids))
                }
            }
            Self::List(items) => {
                let id = Rc::as_ptr(items) as usize;
                if !repr_ids.insert(id) {
                    return "[...]".to_owned();
                }
                let repr = format!("[{}]", join_repr(&items.borrow(), repr_ids));
                repr_ids.remove(&id);
                repr
            }
            Self::Dict(dict) => dict.repr_in(repr_ids),
            Self::Range(range) => range.py_repr(),
            Self::Function(func) => format!("<function {}>", func.qualname()),
            Self::Native(native) => format!("<built-in function {}>", native.name()),
            Self::Generator(generator) => format!("<generator object {}>", generator.name()),
            Self::Iterator(it) => format!("<{} object>", it.borrow().type_name()),
            Self::Exception(exc) => exc.py_repr(),
            Self::ExcType(exc_type) => format!("<class '{exc_type}'>"),
            Self::Cell(cell) => match cell.get() {
                Some(v) => format!("<cell: {} object>", v.type_name()),
                None => "<cell: empty>".to_owned(),
            },
            Self::Code(code) => format!("<code object {}, file \"{}\">", code.name, code.filename),
            Self::Why(why) => format!("<why {why:?}>"),
        }
    }

    /// The `str()` of the value.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(exc) => exc.message().unwrap_or_default(),
            _ => self.py_repr(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.py_str())
    }
}

/// Numeric operand after bool/int/float coercion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    fn eq(self, other: Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (a, b) => a.to_f64() == b.to_f64(),
        }
    }
}

/// Nesting depth at which container equality gives up with `RecursionError`.
pub(crate) const MAX_COMPARE_DEPTH: usize = 1000;

pub(crate) fn check_compare_depth(depth: usize) -> RunResult<()> {
    if depth >= MAX_COMPARE_DEPTH {
        return Err(ExcType::RecursionError.err("maximum recursion depth exceeded in comparison"));
    }
    Ok(())
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> RunResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    check_compare_depth(depth)?;
    for (x, y) in a.iter().zip(b) {
        if !x.eq_at(y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn join_repr(items: &[Value], repr_ids: &mut AHashSet<usize>) -> String {
    items.iter().map(|item| item.repr_in(repr_ids)).collect::<Vec<_>>().join(", ")
}

fn float_repr(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Quotes a string with single quotes unless it contains one and no double quotes.
pub(crate) fn string_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::list(v)
    }
}

impl From<ExcType> for Value {
    fn from(v: ExcType) -> Self {
        Self::ExcType(v)
    }
}

/// Error returned when a `Value` cannot be converted to the requested host type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected {expected}, got {actual}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl ConversionError {
    fn new(expected: &'static str, value: &Value) -> Self {
        Self {
            expected,
            actual: value.type_name(),
        }
    }
}

impl TryFrom<&Value> for i64 {
    type Error = ConversionError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(Self::from(*b)),
            _ => Err(ConversionError::new("int", value)),
        }
    }
}

impl TryFrom<&Value> for f64 {
    type Error = ConversionError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        value
            .as_number()
            .map(Number::to_f64)
            .ok_or_else(|| ConversionError::new("float", value))
    }
}

impl TryFrom<&Value> for bool {
    type Error = ConversionError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(*b),
            _ => Err(ConversionError::new("bool", value)),
        }
    }
}

impl TryFrom<&Value> for String {
    type Error = ConversionError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(s) => Ok(s.to_string()),
            _ => Err(ConversionError::new("str", value)),
        }
    }
}

/// A shared, mutable slot used for closures.
///
/// An enclosing frame and every function that captured the variable hold the same
/// `Cell`, so a store through one is visible through all of them.
#[derive(Debug, Clone, Default)]
pub struct Cell(Rc<RefCell<Option<Value>>>);

impl Cell {
    #[must_use]
    pub fn new(value: Option<Value>) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }

    /// Returns the contents, or `None` if the cell is empty.
    #[must_use]
    pub fn get(&self) -> Option<Value> {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = Some(value);
    }

    /// Empties the cell, returning whether it held a value.
    pub fn clear(&self) -> bool {
        self.0.borrow_mut().take().is_some()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
