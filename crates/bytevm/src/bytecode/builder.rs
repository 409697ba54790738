//! Assembler for code objects.
//!
//! `CodeBuilder` plays the part of the external compiler in tests and for embedders
//! that generate bytecode: it interns names and constants, resolves forward jump
//! labels and computes the stack size.

use std::rc::Rc;

use super::{
    code::{CodeFlags, CodeObject, Constant, Instruction},
    op::{CompareOp, Opcode},
};
use crate::exception::FatalError;

/// A jump target that may be bound after jumps to it are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builds a [`CodeObject`] instruction by instruction.
///
/// Emitting methods take `&mut self` and return it for chaining:
///
/// ```
/// use bytevm::bytecode::{CodeBuilder, Opcode};
///
/// let mut b = CodeBuilder::new("add");
/// b.arg("a").arg("b");
/// b.load_fast("a").load_fast("b").op(Opcode::BinaryAdd).return_value();
/// let code = b.build().unwrap();
/// assert_eq!(code.argcount, 2);
/// ```
#[derive(Debug, Clone)]
pub struct CodeBuilder {
    name: Rc<str>,
    filename: Rc<str>,
    first_line: u32,
    line: u32,
    argcount: u32,
    kwonlyargcount: u32,
    flags: CodeFlags,
    instructions: Vec<Instruction>,
    lines: Vec<u32>,
    constants: Vec<Constant>,
    names: Vec<Rc<str>>,
    varnames: Vec<Rc<str>>,
    cellvars: Vec<Rc<str>>,
    freevars: Vec<Rc<str>>,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, Label)>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            filename: "<bytecode>".into(),
            first_line: 1,
            line: 1,
            argcount: 0,
            kwonlyargcount: 0,
            flags: CodeFlags::OPTIMIZED | CodeFlags::NEWLOCALS,
            instructions: Vec::new(),
            lines: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            varnames: Vec::new(),
            cellvars: Vec::new(),
            freevars: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
        }
    }

    /// Starts a module-level code object: names resolve through a locals mapping.
    #[must_use]
    pub fn module(filename: &str) -> Self {
        let mut builder = Self::new("<module>");
        builder.filename = filename.into();
        builder.flags = CodeFlags::empty();
        builder
    }

    pub fn filename(&mut self, filename: &str) -> &mut Self {
        self.filename = filename.into();
        self
    }

    /// Sets the source line recorded for subsequently emitted instructions.
    pub fn line(&mut self, line: u32) -> &mut Self {
        if self.instructions.is_empty() {
            self.first_line = line;
        }
        self.line = line;
        self
    }

    pub fn flags(&mut self, flags: CodeFlags) -> &mut Self {
        self.flags.insert(flags);
        self
    }

    /// Marks the code as a generator body.
    pub fn generator(&mut self) -> &mut Self {
        self.flags(CodeFlags::GENERATOR)
    }

    /// Declares the next positional-or-keyword parameter.
    ///
    /// Parameters must be declared before any other local.
    pub fn arg(&mut self, name: &str) -> &mut Self {
        self.varnames.push(name.into());
        self.argcount += 1;
        self
    }

    /// Declares a keyword-only parameter, after all positional ones.
    pub fn kwonly_arg(&mut self, name: &str) -> &mut Self {
        self.varnames.push(name.into());
        self.kwonlyargcount += 1;
        self
    }

    /// Declares the `*args` parameter.
    pub fn var_args(&mut self, name: &str) -> &mut Self {
        self.varnames.push(name.into());
        self.flags(CodeFlags::VARARGS)
    }

    /// Declares the `**kwargs` parameter, after `*args` if both are present.
    pub fn var_kwargs(&mut self, name: &str) -> &mut Self {
        self.varnames.push(name.into());
        self.flags(CodeFlags::VARKEYWORDS)
    }

    /// Declares a cell variable, returning its closure slot.
    pub fn cellvar(&mut self, name: &str) -> u32 {
        intern(&mut self.cellvars, name)
    }

    /// Declares a free variable. Free slots follow all cell slots.
    pub fn freevar(&mut self, name: &str) -> u32 {
        intern(&mut self.freevars, name)
    }

    /// Index of a fast local, declaring it if needed.
    pub fn local(&mut self, name: &str) -> u32 {
        intern(&mut self.varnames, name)
    }

    /// Index into the names table, adding `name` if needed.
    pub fn name(&mut self, name: &str) -> u32 {
        intern(&mut self.names, name)
    }

    /// Index into the constants table, reusing an equal constant.
    pub fn constant(&mut self, constant: impl Into<Constant>) -> u32 {
        let constant = constant.into();
        let index = match self.constants.iter().position(|c| *c == constant) {
            Some(index) => index,
            None => {
                self.constants.push(constant);
                self.constants.len() - 1
            }
        };
        index_u32(index)
    }

    #[must_use]
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next emitted instruction.
    pub fn mark(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.instructions.len());
        }
        self
    }

    /// Index the next instruction will have.
    #[must_use]
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    pub fn emit(&mut self, op: Opcode, arg: u32) -> &mut Self {
        self.emit_raw(op as u8, arg)
    }

    /// Emits an opcode that ignores its operand.
    pub fn op(&mut self, op: Opcode) -> &mut Self {
        self.emit(op, 0)
    }

    /// Emits an arbitrary byte, which need not be a known opcode.
    pub fn emit_raw(&mut self, opcode: u8, arg: u32) -> &mut Self {
        self.instructions.push(Instruction { opcode, arg });
        self.lines.push(self.line);
        self
    }

    /// Emits a jump to `label`, relative or absolute according to `op`.
    pub fn jump(&mut self, op: Opcode, label: Label) -> &mut Self {
        self.fixups.push((self.instructions.len(), label));
        self.emit(op, 0)
    }

    pub fn load_const(&mut self, constant: impl Into<Constant>) -> &mut Self {
        let index = self.constant(constant);
        self.emit(Opcode::LoadConst, index)
    }

    pub fn load_none(&mut self) -> &mut Self {
        self.load_const(Constant::None)
    }

    pub fn load_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit(Opcode::LoadFast, index)
    }

    pub fn store_fast(&mut self, name: &str) -> &mut Self {
        let index = self.local(name);
        self.emit(Opcode::StoreFast, index)
    }

    pub fn load_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::LoadGlobal, index)
    }

    pub fn store_global(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::StoreGlobal, index)
    }

    pub fn load_name(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::LoadName, index)
    }

    pub fn store_name(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::StoreName, index)
    }

    pub fn load_attr(&mut self, name: &str) -> &mut Self {
        let index = self.name(name);
        self.emit(Opcode::LoadAttr, index)
    }

    /// `LOAD_DEREF` of a previously declared cell or free variable.
    pub fn load_deref(&mut self, name: &str) -> &mut Self {
        let index = self.deref_slot(name);
        self.emit(Opcode::LoadDeref, index)
    }

    pub fn store_deref(&mut self, name: &str) -> &mut Self {
        let index = self.deref_slot(name);
        self.emit(Opcode::StoreDeref, index)
    }

    pub fn load_closure(&mut self, name: &str) -> &mut Self {
        let index = self.deref_slot(name);
        self.emit(Opcode::LoadClosure, index)
    }

    /// Closure slot of `name`: cellvars first, then freevars.
    ///
    /// Unknown names are declared as free variables.
    fn deref_slot(&mut self, name: &str) -> u32 {
        if let Some(index) = self.cellvars.iter().position(|c| &**c == name) {
            return index_u32(index);
        }
        let free = self.freevar(name);
        index_u32(self.cellvars.len()) + free
    }

    pub fn compare(&mut self, op: CompareOp) -> &mut Self {
        self.emit(Opcode::CompareOp, op as u32)
    }

    pub fn call(&mut self, argc: u32) -> &mut Self {
        self.emit(Opcode::CallFunction, argc)
    }

    pub fn pop_top(&mut self) -> &mut Self {
        self.op(Opcode::PopTop)
    }

    pub fn return_value(&mut self) -> &mut Self {
        self.op(Opcode::ReturnValue)
    }

    /// Pushes `code` and its qualified name, then `MAKE_FUNCTION flags`.
    ///
    /// Values selected by `flags` must already be on the stack.
    pub fn make_function(&mut self, code: CodeObject, flags: u32) -> &mut Self {
        let qualname = code.name.clone();
        self.load_const(code);
        self.load_const(Constant::Str(qualname));
        self.emit(Opcode::MakeFunction, flags)
    }

    /// Resolves labels, computes the stack size and verifies the result.
    ///
    /// # Errors
    /// Returns an error for unbound labels, backward relative jumps, or a code
    /// object that fails [`CodeObject::verify`].
    pub fn build(&self) -> Result<CodeObject, FatalError> {
        let mut instructions = self.instructions.clone();
        for &(at, label) in &self.fixups {
            let Some(target) = self.labels.get(label.0).copied().flatten() else {
                return Err(FatalError::invalid_code(format!("{}: unbound label at {at}", self.name)));
            };
            instructions[at].arg = jump_operand(instructions[at], at, target).ok_or_else(|| {
                FatalError::invalid_code(format!("{}: backward relative jump at {at}", self.name))
            })?;
        }
        let code = self.finish(instructions);
        code.verify()?;
        Ok(code)
    }

    /// Builds without verification, for deliberately malformed code.
    ///
    /// Unresolvable jumps are left with operand 0.
    #[must_use]
    pub fn build_unchecked(&self) -> CodeObject {
        let mut instructions = self.instructions.clone();
        for &(at, label) in &self.fixups {
            if let Some(target) = self.labels.get(label.0).copied().flatten() {
                instructions[at].arg = jump_operand(instructions[at], at, target).unwrap_or(0);
            }
        }
        self.finish(instructions)
    }

    fn finish(&self, instructions: Vec<Instruction>) -> CodeObject {
        let mut flags = self.flags;
        if self.freevars.is_empty() && self.cellvars.is_empty() {
            flags.insert(CodeFlags::NOFREE);
        }
        let mut code = CodeObject {
            name: self.name.clone(),
            filename: self.filename.clone(),
            first_line: self.first_line,
            argcount: self.argcount,
            kwonlyargcount: self.kwonlyargcount,
            stacksize: 0,
            flags,
            instructions,
            constants: self.constants.clone(),
            names: self.names.clone(),
            varnames: self.varnames.clone(),
            cellvars: self.cellvars.clone(),
            freevars: self.freevars.clone(),
            lines: self.lines.clone(),
        };
        code.stacksize = code.max_stack_depth();
        code
    }
}

/// Operand encoding a jump from instruction `at` to `target`.
fn jump_operand(ins: Instruction, at: usize, target: usize) -> Option<u32> {
    let relative = ins.opcode().is_some_and(Opcode::is_relative_jump);
    let operand = if relative { target.checked_sub(at + 1)? } else { target };
    u32::try_from(operand).ok()
}

fn intern(table: &mut Vec<Rc<str>>, name: &str) -> u32 {
    let index = match table.iter().position(|n| &**n == name) {
        Some(index) => index,
        None => {
            table.push(name.into());
            table.len() - 1
        }
    };
    index_u32(index)
}

fn index_u32(index: usize) -> u32 {
    u32::try_from(index).unwrap_or(u32::MAX)
}
