//! Exception classes, raised exceptions and the two-tier error model.
//!
//! User-level exceptions ([`Exception`]) travel through the block stack and can be
//! caught by handler code. Fatal errors ([`FatalError`]) indicate a broken VM or an
//! incompatible code object and always escape straight to the embedder.

use std::{borrow::Cow, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::{bytecode::Opcode, resource::ResourceError, value::Value};

/// Result type alias for operations that can raise.
pub type RunResult<T> = Result<T, RunError>;

/// Exception classes known to the VM.
///
/// Uses strum derives for `Display`, `FromStr` and `Into<&'static str>`; the string
/// form matches the class name exactly (e.g. `ValueError` -> "ValueError").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr, Serialize, Deserialize,
)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    GeneratorExit,
    Exception,
    StopIteration,

    // --- ArithmeticError hierarchy ---
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,

    // --- LookupError hierarchy ---
    LookupError,
    IndexError,
    KeyError,

    // --- NameError hierarchy ---
    NameError,
    /// Subclass of NameError - a local variable read before assignment.
    UnboundLocalError,

    // --- RuntimeError hierarchy ---
    RuntimeError,
    NotImplementedError,
    RecursionError,

    AssertionError,
    AttributeError,
    TypeError,
    ValueError,
}

impl ExcType {
    /// Returns the direct base class, or `None` for `BaseException`.
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::SystemExit | Self::KeyboardInterrupt | Self::GeneratorExit | Self::Exception => {
                Some(Self::BaseException)
            }
            Self::StopIteration
            | Self::ArithmeticError
            | Self::LookupError
            | Self::NameError
            | Self::RuntimeError
            | Self::AssertionError
            | Self::AttributeError
            | Self::TypeError
            | Self::ValueError => Some(Self::Exception),
            Self::OverflowError | Self::ZeroDivisionError => Some(Self::ArithmeticError),
            Self::IndexError | Self::KeyError => Some(Self::LookupError),
            Self::UnboundLocalError => Some(Self::NameError),
            Self::NotImplementedError | Self::RecursionError => Some(Self::RuntimeError),
        }
    }

    /// Checks if this exception class is a subclass of `handler_type`.
    ///
    /// Returns true if an instance of `self` would be caught by `except handler_type:`.
    #[must_use]
    pub fn is_subclass_of(self, handler_type: Self) -> bool {
        let mut current = Some(self);
        while let Some(exc_type) = current {
            if exc_type == handler_type {
                return true;
            }
            current = exc_type.parent();
        }
        false
    }

    /// Creates a `RunError` carrying a new instance of this class with a message.
    pub(crate) fn err(self, msg: impl Into<String>) -> RunError {
        Exception::with_message(self, msg).into()
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> RunError {
        Self::TypeError.err(msg)
    }

    pub(crate) fn value_error(msg: impl Into<String>) -> RunError {
        Self::ValueError.err(msg)
    }

    pub(crate) fn name_error(name: &str) -> RunError {
        Self::NameError.err(format!("name '{name}' is not defined"))
    }

    pub(crate) fn unbound_local_error(name: &str) -> RunError {
        Self::UnboundLocalError.err(format!("local variable '{name}' referenced before assignment"))
    }

    pub(crate) fn unbound_free_error(name: &str) -> RunError {
        Self::NameError.err(format!(
            "free variable '{name}' referenced before assignment in enclosing scope"
        ))
    }

    /// Matches CPython's format: `unsupported operand type(s) for +: 'int' and 'str'`
    pub(crate) fn binary_type_error(op: &str, lhs: &str, rhs: &str) -> RunError {
        Self::type_error(format!("unsupported operand type(s) for {op}: '{lhs}' and '{rhs}'"))
    }

    pub(crate) fn unary_type_error(op: &str, operand: &str) -> RunError {
        Self::type_error(format!("bad operand type for unary {op}: '{operand}'"))
    }

    pub(crate) fn compare_type_error(op: &str, lhs: &str, rhs: &str) -> RunError {
        Self::type_error(format!(
            "'{op}' not supported between instances of '{lhs}' and '{rhs}'"
        ))
    }

    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        Self::AttributeError.err(format!("'{type_name}' object has no attribute '{attr}'"))
    }

    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    pub(crate) fn not_iterable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not iterable"))
    }

    pub(crate) fn zero_division(msg: &str) -> RunError {
        Self::ZeroDivisionError.err(msg)
    }

    pub(crate) fn overflow() -> RunError {
        Self::OverflowError.err("integer overflow")
    }

    pub(crate) fn index_error(type_name: &str) -> RunError {
        Self::IndexError.err(format!("{type_name} index out of range"))
    }

    pub(crate) fn key_error(key: Value) -> RunError {
        Exception::new(Self::KeyError, vec![key]).into()
    }

    pub(crate) fn arg_count_error(name: &str, expected: usize, actual: usize) -> RunError {
        if expected == 1 {
            Self::type_error(format!("{name}() takes exactly one argument ({actual} given)"))
        } else {
            Self::type_error(format!("{name}() takes {expected} arguments ({actual} given)"))
        }
    }
}

/// One line of a traceback: the frame that was executing when the exception passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub filename: Rc<str>,
    pub function: Rc<str>,
    pub line: Option<u32>,
    /// Index of the instruction that was executing.
    pub instruction: usize,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => writeln!(f, "  File \"{}\", line {line}, in {}", self.filename, self.function),
            None => writeln!(
                f,
                "  File \"{}\", instruction {}, in {}",
                self.filename, self.instruction, self.function
            ),
        }
    }
}

/// An exception instance: a class, its constructor arguments and a traceback.
#[derive(Debug, Clone)]
pub struct Exception {
    exc_type: ExcType,
    args: Vec<Value>,
    cause: Option<Box<Exception>>,
    /// Innermost frame first.
    traceback: Vec<TraceEntry>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, args: Vec<Value>) -> Self {
        Self {
            exc_type,
            args,
            cause: None,
            traceback: Vec::new(),
        }
    }

    /// Creates an exception with a single string argument.
    #[must_use]
    pub fn with_message(exc_type: ExcType, msg: impl Into<String>) -> Self {
        Self::new(exc_type, vec![Value::from(msg.into())])
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Returns the message as `str()` would render it, or `None` without arguments.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self.args.as_slice() {
            [] => None,
            // KeyError shows the missing key's repr
            [key] if self.exc_type == ExcType::KeyError => Some(key.py_repr()),
            [single] => Some(single.py_str()),
            many => Some(Value::tuple(many.to_vec()).py_str()),
        }
    }

    /// The payload carried by `StopIteration`: its first argument, or `None`.
    #[must_use]
    pub fn value(&self) -> Value {
        self.args.first().cloned().unwrap_or(Value::None)
    }

    #[must_use]
    pub fn cause(&self) -> Option<&Exception> {
        self.cause.as_deref()
    }

    pub(crate) fn set_cause(&mut self, cause: Option<Exception>) {
        self.cause = cause.map(Box::new);
    }

    /// Traceback entries, innermost frame first.
    #[must_use]
    pub fn traceback(&self) -> &[TraceEntry] {
        &self.traceback
    }

    pub(crate) fn push_trace(&mut self, entry: TraceEntry) {
        self.traceback.push(entry);
    }

    /// Returns true if `except handler_type:` would catch this exception.
    #[must_use]
    pub fn matches(&self, handler_type: ExcType) -> bool {
        self.exc_type.is_subclass_of(handler_type)
    }

    /// Returns the repr, e.g. `ValueError('bad value')`.
    #[must_use]
    pub fn py_repr(&self) -> String {
        let args: Vec<String> = self.args.iter().map(Value::py_repr).collect();
        format!("{}({})", self.exc_type, args.join(", "))
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(msg) if !msg.is_empty() => write!(f, "{}: {msg}", self.exc_type),
            _ => write!(f, "{}", self.exc_type),
        }
    }
}

impl std::error::Error for Exception {}

/// Errors that indicate a bug in the VM or a code object it cannot run.
///
/// These are never visible to handler code and always propagate to the embedder.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FatalError {
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("unknown opcode {opcode} at instruction {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("instruction pointer {0} is outside the code object")]
    InstructionOutOfRange(usize),
    #[error("invalid operand {operand} for {opcode}")]
    InvalidOperand { opcode: Opcode, operand: u32 },
    #[error("corrupt block stack: {0}")]
    CorruptBlockStack(Cow<'static, str>),
    #[error("generator already executing")]
    GeneratorAlreadyRunning,
    #[error("unsupported bytecode version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },
    #[error("malformed code object: {0}")]
    InvalidCode(Cow<'static, str>),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("internal error: {0}")]
    Internal(Cow<'static, str>),
}

impl FatalError {
    pub(crate) fn corrupt_blocks(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::CorruptBlockStack(msg.into())
    }

    pub(crate) fn invalid_code(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidCode(msg.into())
    }
}

/// Runtime error: either a catchable exception or a fatal VM error.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("{0}")]
    Exc(#[from] Exception),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        Self::Fatal(FatalError::Resource(err))
    }
}

impl RunError {
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Fatal(FatalError::Internal(msg.into()))
    }
}

/// A user-level exception that escaped every handler, returned to the embedder.
#[derive(Debug, Clone, Error)]
#[error("{}", format_traceback(.exception))]
pub struct UnhandledException {
    exception: Exception,
}

impl UnhandledException {
    #[must_use]
    pub fn new(exception: Exception) -> Self {
        Self { exception }
    }

    #[must_use]
    pub fn exception(&self) -> &Exception {
        &self.exception
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exception.exc_type()
    }

    #[must_use]
    pub fn into_exception(self) -> Exception {
        self.exception
    }
}

/// Renders an exception the way the reference interpreter prints an uncaught one.
fn format_traceback(exc: &Exception) -> String {
    let mut out = String::new();
    if let Some(cause) = exc.cause() {
        out.push_str(&format_traceback(cause));
        out.push_str("\nThe above exception was the direct cause of the following exception:\n\n");
    }
    if !exc.traceback().is_empty() {
        out.push_str("Traceback (most recent call last):\n");
        for entry in exc.traceback().iter().rev() {
            out.push_str(&entry.to_string());
        }
    }
    out.push_str(&exc.to_string());
    out
}

/// Errors returned from the driver API.
#[derive(Debug, Error)]
pub enum VmError {
    #[error(transparent)]
    Unhandled(#[from] UnhandledException),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    /// `resume` was called on a generator that already finished.
    #[error("generator is exhausted")]
    GeneratorExhausted,
}

impl From<RunError> for VmError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Exc(exc) => Self::Unhandled(UnhandledException::new(exc)),
            RunError::Fatal(fatal) => Self::Fatal(fatal),
        }
    }
}

impl VmError {
    /// Returns the unhandled exception, if this is a user-level error.
    #[must_use]
    pub fn as_unhandled(&self) -> Option<&UnhandledException> {
        match self {
            Self::Unhandled(exc) => Some(exc),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}
