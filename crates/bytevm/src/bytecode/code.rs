//! Code objects: the immutable unit of compiled code the VM executes.

use std::{fmt, ops::BitOr, rc::Rc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::op::{CompareOp, Opcode};
use crate::{exception::FatalError, value::Value};

/// Bytecode format version accepted by [`CodeObject::load`].
///
/// Matches the reference compiler's 3.7 magic number.
pub const MAGIC_NUMBER: u16 = 3394;

/// Largest `stacksize` a code object may declare.
pub const MAX_STACK_SIZE: u32 = 1 << 16;

/// Code object flags, numbered as in the reference compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const OPTIMIZED: Self = Self(0x01);
    /// A fresh locals mapping is created for each call.
    pub const NEWLOCALS: Self = Self(0x02);
    /// Excess positional arguments are collected into `*args`.
    pub const VARARGS: Self = Self(0x04);
    /// Excess keyword arguments are collected into `**kwargs`.
    pub const VARKEYWORDS: Self = Self(0x08);
    pub const NESTED: Self = Self(0x10);
    /// Calling the function creates a generator instead of running the body.
    pub const GENERATOR: Self = Self(0x20);
    pub const NOFREE: Self = Self(0x40);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for CodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One decoded instruction.
///
/// The opcode is kept as a raw byte so that code from an unsupported compiler
/// version can still be loaded; the VM reports unknown opcodes when it reaches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u8,
    pub arg: u32,
}

impl Instruction {
    #[must_use]
    pub fn new(opcode: Opcode, arg: u32) -> Self {
        Self {
            opcode: opcode as u8,
            arg,
        }
    }

    #[must_use]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_repr(self.opcode)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode() {
            Some(op) if op.has_arg() => write!(f, "{op} {}", self.arg),
            Some(op) => write!(f, "{op}"),
            None => write!(f, "<{}> {}", self.opcode, self.arg),
        }
    }
}

/// An entry of a code object's constants table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Vec<Constant>),
    Code(Rc<CodeObject>),
}

impl Constant {
    /// Materializes the constant as a runtime value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::Str(s.clone()),
            Self::Tuple(items) => Value::tuple(items.iter().map(Self::to_value).collect()),
            Self::Code(code) => Value::Code(code.clone()),
        }
    }
}

impl From<i64> for Constant {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Constant {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<bool> for Constant {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for Constant {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Constant {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl From<CodeObject> for Constant {
    fn from(v: CodeObject) -> Self {
        Self::Code(Rc::new(v))
    }
}

/// Immutable description of one compiled unit.
///
/// Produced by an external compiler (or [`super::CodeBuilder`]) and shared
/// read-only by every function and frame created from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: Rc<str>,
    pub filename: Rc<str>,
    pub first_line: u32,
    /// Number of positional-or-keyword parameters.
    pub argcount: u32,
    pub kwonlyargcount: u32,
    /// Maximum operand stack depth, used to pre-size frame stacks.
    pub stacksize: u32,
    pub flags: CodeFlags,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    /// Names used by global, name and attribute instructions.
    pub names: Vec<Rc<str>>,
    /// Fast locals; parameters come first.
    pub varnames: Vec<Rc<str>>,
    /// Locals captured by nested functions.
    pub cellvars: Vec<Rc<str>>,
    /// Variables captured from enclosing functions.
    pub freevars: Vec<Rc<str>>,
    /// Source line of each instruction; empty when unknown.
    pub lines: Vec<u32>,
}

impl CodeObject {
    #[must_use]
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Source line of the instruction at `ip`.
    #[must_use]
    pub fn line_for(&self, ip: usize) -> Option<u32> {
        self.lines.get(ip).copied()
    }

    /// The docstring: the first constant, when it is a string.
    #[must_use]
    pub fn docstring(&self) -> Option<Rc<str>> {
        match self.constants.first() {
            Some(Constant::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Name of the cell or free variable at closure slot `index`.
    #[must_use]
    pub fn deref_name(&self, index: usize) -> Option<&Rc<str>> {
        self.cellvars
            .get(index)
            .or_else(|| self.freevars.get(index.checked_sub(self.cellvars.len())?))
    }

    /// Serializes the code object to the postcard binary format.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&SerializedCode {
            magic: MAGIC_NUMBER,
            code: self,
        })
    }

    /// Deserializes and verifies a code object produced by [`CodeObject::dump`].
    ///
    /// # Errors
    /// Returns an error if decoding fails, the version does not match, or the code
    /// object fails [`CodeObject::verify`].
    pub fn load(bytes: &[u8]) -> Result<Self, CodeError> {
        let LoadedCode { magic, code } = postcard::from_bytes(bytes)?;
        if magic != MAGIC_NUMBER {
            return Err(FatalError::UnsupportedVersion {
                found: magic,
                expected: MAGIC_NUMBER,
            }
            .into());
        }
        code.verify()?;
        Ok(code)
    }

    /// Checks operand indices, jump targets and parameter counts.
    ///
    /// Unknown opcodes are not rejected here; executing one is a fatal error.
    /// Nested code objects in the constants table are verified too.
    pub fn verify(&self) -> Result<(), FatalError> {
        let invalid = |msg: String| Err(FatalError::invalid_code(format!("{}: {msg}", self.name)));

        let params = self.argcount as usize
            + self.kwonlyargcount as usize
            + usize::from(self.flags.contains(CodeFlags::VARARGS))
            + usize::from(self.flags.contains(CodeFlags::VARKEYWORDS));
        if params > self.varnames.len() {
            return invalid(format!("{params} parameters but {} varnames", self.varnames.len()));
        }
        if self.stacksize > MAX_STACK_SIZE {
            return invalid(format!("stack size {} exceeds {MAX_STACK_SIZE}", self.stacksize));
        }
        if !self.lines.is_empty() && self.lines.len() != self.instructions.len() {
            return invalid("line table length does not match instructions".to_owned());
        }

        let n_derefs = self.cellvars.len() + self.freevars.len();
        let mut ext: u32 = 0;
        for (ip, ins) in self.instructions.iter().enumerate() {
            let Some(op) = ins.opcode() else {
                ext = 0;
                continue;
            };
            let arg = fold_extended_arg(ext, ins.arg);
            if op == Opcode::ExtendedArg {
                ext = arg;
                continue;
            }
            ext = 0;
            let (table, len) = match op {
                Opcode::LoadConst => ("constants", self.constants.len()),
                Opcode::LoadName
                | Opcode::StoreName
                | Opcode::DeleteName
                | Opcode::LoadGlobal
                | Opcode::StoreGlobal
                | Opcode::DeleteGlobal
                | Opcode::LoadAttr
                | Opcode::StoreAttr
                | Opcode::DeleteAttr => ("names", self.names.len()),
                Opcode::LoadFast | Opcode::StoreFast | Opcode::DeleteFast => ("varnames", self.varnames.len()),
                Opcode::LoadClosure | Opcode::LoadDeref | Opcode::StoreDeref | Opcode::DeleteDeref => {
                    ("cell and free variables", n_derefs)
                }
                Opcode::CompareOp if CompareOp::from_repr(u8::try_from(arg).unwrap_or(u8::MAX)).is_none() => {
                    return invalid(format!("instruction {ip}: unknown comparison {arg}"));
                }
                _ => ("", usize::MAX),
            };
            if arg as usize >= len {
                return invalid(format!("instruction {ip}: {op} operand {arg} out of range for {table}"));
            }
            if let Some(target) = op.jump_target(arg, ip + 1) {
                if target >= self.instructions.len() {
                    return invalid(format!("instruction {ip}: {op} jumps to {target} past the end"));
                }
            }
        }

        for constant in &self.constants {
            verify_constant(constant)?;
        }
        Ok(())
    }

    /// Computes the maximum operand stack depth over every control-flow path.
    ///
    /// Each instruction is analysed once, at the depth of the first path that
    /// reaches it; later edges into it still count towards the maximum. Unknown
    /// opcodes are treated as stack-neutral and depths are clamped at zero, so the
    /// result is an estimate for malformed code.
    #[must_use]
    pub fn max_stack_depth(&self) -> u32 {
        let args = self.folded_args();
        let mut seen = vec![false; self.instructions.len()];
        let mut work = vec![(0usize, 0i64)];
        let mut max = 0i64;
        while let Some((ip, depth)) = work.pop() {
            let Some(ins) = self.instructions.get(ip) else {
                continue;
            };
            if std::mem::replace(&mut seen[ip], true) {
                continue;
            }
            let Some(op) = ins.opcode() else {
                work.push((ip + 1, depth));
                continue;
            };
            let arg = args[ip];
            if let Some(target) = op.jump_target(arg, ip + 1) {
                let taken = (depth + op.stack_effect(arg, true)).max(0);
                max = max.max(taken);
                work.push((target, taken));
            }
            let next = (depth + op.stack_effect(arg, false)).max(0);
            max = max.max(next);
            if !op.is_terminal() {
                work.push((ip + 1, next));
            }
        }
        u32::try_from(max).unwrap_or(u32::MAX)
    }

    /// Operand of every instruction with its `EXTENDED_ARG` prefixes folded in.
    fn folded_args(&self) -> Vec<u32> {
        let mut ext: u32 = 0;
        self.instructions
            .iter()
            .map(|ins| {
                let arg = fold_extended_arg(ext, ins.arg);
                ext = if ins.opcode() == Some(Opcode::ExtendedArg) { arg } else { 0 };
                arg
            })
            .collect()
    }
}

fn verify_constant(constant: &Constant) -> Result<(), FatalError> {
    match constant {
        Constant::Code(code) => code.verify(),
        Constant::Tuple(items) => items.iter().try_for_each(verify_constant),
        _ => Ok(()),
    }
}

/// Combines the operand accumulated from `EXTENDED_ARG` prefixes with `arg`.
#[must_use]
pub fn fold_extended_arg(ext: u32, arg: u32) -> u32 {
    (ext << 8) | arg
}

#[derive(Serialize)]
struct SerializedCode<'a> {
    magic: u16,
    code: &'a CodeObject,
}

#[derive(Deserialize)]
struct LoadedCode {
    magic: u16,
    code: CodeObject,
}

/// Error returned by [`CodeObject::load`].
#[derive(Debug, Error)]
pub enum CodeError {
    #[error("failed to decode code object: {0}")]
    Decode(#[from] postcard::Error),
    #[error(transparent)]
    Invalid(#[from] FatalError),
}
