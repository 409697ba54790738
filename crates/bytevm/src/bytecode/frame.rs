//! Activation records and the block stack.
//!
//! A [`Frame`] owns everything one invocation needs: its operand stack, block stack,
//! fast locals and closure cells. The caller of a frame is the frame beneath it on
//! the VM's call stack, so frames never point at each other.

use std::rc::Rc;

use super::code::{CodeObject, MAX_STACK_SIZE};
use crate::{
    exception::{ExcType, Exception, FatalError, RunResult, TraceEntry},
    function::Function,
    generator::Generator,
    namespace::Namespace,
    signature::Signature,
    value::{Cell, Value},
};

/// Kind of control region recorded on a frame's block stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Pushed by `SETUP_LOOP`; `handler` is the instruction after the loop.
    Loop,
    /// Pushed by `SETUP_EXCEPT`; `handler` is the first handler instruction.
    SetupExcept,
    /// Pushed by `SETUP_FINALLY`; `handler` is the start of the `finally` body.
    Finally,
    /// Pushed while an `except` clause runs. Three values under `level` hold the
    /// exception that was being handled before, restored by `POP_EXCEPT`.
    ExceptHandler,
}

/// An active control region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub handler: usize,
    /// Operand stack depth to restore when the block is left.
    pub level: usize,
}

/// Reason a `finally` body is running, pushed as a marker for `END_FINALLY`.
///
/// An exception is represented by its class and value instead of a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Why {
    /// A `return` is pending; the return value sits under the marker.
    Return,
    /// A `continue` is pending; the loop target sits under the marker.
    Continue,
    Break,
}

/// Where a frame's result goes when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resumer {
    /// Pushed by a call instruction: the result is pushed on the caller's stack.
    Call,
    /// Generator resumed by `FOR_ITER`: yields are pushed on the caller's stack,
    /// completion jumps the caller to `exit`.
    ForIter { exit: usize },
    /// Generator resumed by `YIELD_FROM`: yields pass through the caller.
    YieldFrom,
    /// Entered from Rust; the run loop returns when this frame exits.
    Driver,
}

/// One activation record.
#[derive(Debug)]
pub struct Frame {
    pub(crate) code: Rc<CodeObject>,
    /// Index of the next instruction to fetch.
    pub(crate) ip: usize,
    /// Index of the instruction being executed, for tracebacks.
    pub(crate) last_ip: usize,
    pub(crate) stack: Vec<Value>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) fast_locals: Vec<Option<Value>>,
    /// Name-based locals, used by module-level code instead of `fast_locals`.
    pub(crate) locals: Option<Namespace>,
    /// Cell variables followed by free variables.
    pub(crate) cells: Vec<Cell>,
    pub(crate) globals: Namespace,
    pub(crate) builtins: Namespace,
    /// Exception currently being handled by an `except` clause, used by bare `raise`.
    pub(crate) handled: Option<Rc<Exception>>,
    pub(crate) resumer: Resumer,
    /// The generator this frame belongs to, set only while the frame is on the call stack.
    pub(crate) owner: Option<Generator>,
    /// Qualified name shown in tracebacks.
    pub(crate) name: Rc<str>,
}

impl Frame {
    /// Creates a frame for module-level code whose locals mapping is `globals`.
    pub(crate) fn for_module(code: Rc<CodeObject>, globals: Namespace, builtins: Namespace) -> Self {
        Self {
            name: code.name.clone(),
            stack: Vec::with_capacity(code.stacksize.min(MAX_STACK_SIZE) as usize),
            fast_locals: vec![None; code.varnames.len()],
            locals: Some(globals.clone()),
            cells: code.cellvars.iter().map(|_| Cell::default()).collect(),
            code,
            ip: 0,
            last_ip: 0,
            blocks: Vec::new(),
            globals,
            builtins,
            handled: None,
            resumer: Resumer::Driver,
            owner: None,
        }
    }

    /// Creates a frame for a call to `func` with parameters already bound into `slots`.
    ///
    /// Cell variables named after a parameter take the bound argument, and the
    /// parameter's fast slot is cleared. Free variables share the function's closure cells.
    pub(crate) fn for_function(
        func: &Function,
        mut slots: Vec<Option<Value>>,
        builtins: Namespace,
    ) -> Result<Self, FatalError> {
        let code = func.code.clone();
        if func.closure.len() != code.freevars.len() {
            return Err(FatalError::invalid_code(format!(
                "{} expects {} free variables, closure has {}",
                code.name,
                code.freevars.len(),
                func.closure.len()
            )));
        }
        slots.resize(slots.len().max(code.varnames.len()), None);

        let n_params = Signature::of(&code).total_slots();
        let mut cells = Vec::with_capacity(code.cellvars.len() + code.freevars.len());
        for cell_name in &code.cellvars {
            let initial = code
                .varnames
                .iter()
                .take(n_params)
                .position(|param| param == cell_name)
                .and_then(|index| slots[index].take());
            cells.push(Cell::new(initial));
        }
        cells.extend(func.closure.iter().cloned());

        Ok(Self {
            name: func.qualname.clone(),
            stack: Vec::with_capacity(code.stacksize.min(MAX_STACK_SIZE) as usize),
            fast_locals: slots,
            locals: None,
            cells,
            code,
            ip: 0,
            last_ip: 0,
            blocks: Vec::new(),
            globals: func.globals.clone(),
            builtins,
            handled: None,
            resumer: Resumer::Call,
            owner: None,
        })
    }

    // ========================================================================
    // Operand stack
    // ========================================================================

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Pops TOS; an empty stack is a fatal error.
    pub fn pop(&mut self) -> Result<Value, FatalError> {
        self.stack.pop().ok_or(FatalError::StackUnderflow)
    }

    /// Pops `n` values, returned in push order (deepest first).
    pub fn popn(&mut self, n: usize) -> Result<Vec<Value>, FatalError> {
        let at = self.stack.len().checked_sub(n).ok_or(FatalError::StackUnderflow)?;
        Ok(self.stack.split_off(at))
    }

    /// Returns the `n`th value from the top; `peek(1)` is TOS.
    pub fn peek(&self, n: usize) -> Result<&Value, FatalError> {
        n.checked_sub(1)
            .and_then(|depth| self.stack.len().checked_sub(depth + 1))
            .and_then(|index| self.stack.get(index))
            .ok_or(FatalError::StackUnderflow)
    }

    pub fn top(&self) -> Result<&Value, FatalError> {
        self.peek(1)
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Drops values above `level`. A level above the current depth is a corrupt block.
    pub(crate) fn truncate(&mut self, level: usize) -> Result<(), FatalError> {
        if level > self.stack.len() {
            return Err(FatalError::corrupt_blocks(format!(
                "block level {level} exceeds stack depth {}",
                self.stack.len()
            )));
        }
        self.stack.truncate(level);
        Ok(())
    }

    // ========================================================================
    // Block stack
    // ========================================================================

    /// Pushes a block recording the current stack depth.
    pub fn enter_block(&mut self, kind: BlockKind, handler: usize) {
        let level = self.stack.len();
        self.blocks.push(Block { kind, handler, level });
    }

    pub fn exit_block(&mut self) -> Result<Block, FatalError> {
        self.blocks
            .pop()
            .ok_or_else(|| FatalError::corrupt_blocks("pop from an empty block stack"))
    }

    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    // ========================================================================
    // Names
    // ========================================================================

    /// Looks a name up through locals, closure cells, globals and builtins.
    ///
    /// # Errors
    /// `NameError` if the name is bound nowhere.
    pub fn get(&self, name: &str) -> RunResult<Value> {
        if let Some(value) = self.get_local(name) {
            return Ok(value);
        }
        if let Some(value) = self.cell_by_name(name).and_then(Cell::get) {
            return Ok(value);
        }
        self.get_global(name)
    }

    /// Looks a name up in globals, then builtins.
    pub(crate) fn get_global(&self, name: &str) -> RunResult<Value> {
        self.globals
            .get(name)
            .or_else(|| self.builtins.get(name))
            .ok_or_else(|| ExcType::name_error(name))
    }

    /// Binds a name in the innermost scope that declares it.
    pub fn set(&mut self, name: &str, value: Value) {
        if let Some(locals) = &self.locals {
            locals.set(name, value);
        } else if let Some(index) = self.varname_index(name) {
            self.fast_locals[index] = Some(value);
        } else if let Some(cell) = self.cell_by_name(name) {
            cell.set(value);
        } else {
            self.globals.set(name, value);
        }
    }

    /// Unbinds a name from the innermost scope that declares it.
    ///
    /// # Errors
    /// `NameError` if the name is not bound there.
    pub fn delete(&mut self, name: &str) -> RunResult<()> {
        let deleted = if let Some(locals) = &self.locals {
            locals.delete(name)
        } else if let Some(index) = self.varname_index(name) {
            self.fast_locals[index].take().is_some()
        } else if let Some(cell) = self.cell_by_name(name) {
            cell.clear()
        } else {
            self.globals.delete(name)
        };
        if deleted { Ok(()) } else { Err(ExcType::name_error(name)) }
    }

    fn get_local(&self, name: &str) -> Option<Value> {
        match &self.locals {
            Some(locals) => locals.get(name),
            None => self
                .varname_index(name)
                .and_then(|index| self.fast_locals[index].clone()),
        }
    }

    fn varname_index(&self, name: &str) -> Option<usize> {
        self.code
            .varnames
            .iter()
            .position(|v| &**v == name)
            .filter(|&index| index < self.fast_locals.len())
    }

    fn cell_by_name(&self, name: &str) -> Option<&Cell> {
        let index = self
            .code
            .cellvars
            .iter()
            .chain(&self.code.freevars)
            .position(|v| &**v == name)?;
        self.cells.get(index)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[must_use]
    pub fn code(&self) -> &CodeObject {
        &self.code
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Source line of the instruction being executed.
    #[must_use]
    pub fn line_number(&self) -> Option<u32> {
        self.code.line_for(self.last_ip)
    }

    pub(crate) fn trace_entry(&self) -> TraceEntry {
        TraceEntry {
            filename: self.code.filename.clone(),
            function: self.name.clone(),
            line: self.line_number(),
            instruction: self.last_ip,
        }
    }
}
