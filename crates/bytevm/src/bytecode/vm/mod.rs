//! Bytecode virtual machine.
//!
//! The VM keeps its call stack as a `Vec<Frame>` and never recurses on the native
//! stack for bytecode calls: a call pushes a frame, a return pops one and hands the
//! result to the frame beneath it according to that frame's [`Resumer`]. Generator
//! suspension moves a frame off the call stack into its generator object.
//!
//! Each instruction either completes normally or produces a [`Signal`] (return,
//! raise, break, continue, yield). Signals unwind the current frame's block stack;
//! anything that escapes a frame is delivered to the frame below.

mod binary;
mod call;
mod collections;
mod exceptions;
mod generator;

use std::rc::Rc;

use log::{debug, trace};

use super::{
    code::{CodeObject, fold_extended_arg},
    frame::{BlockKind, Frame, Resumer},
    op::{CompareOp, Opcode},
};
use crate::{
    args::ArgValues,
    builtins::default_builtins,
    callable::{Interpreter, NativeFunction},
    exception::{ExcType, Exception, FatalError, RunError, RunResult, VmError},
    function::Function,
    generator::Generator,
    namespace::Namespace,
    operators::{BinaryOp, DefaultOperators, OperatorHooks, UnaryOp},
    resource::{LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker},
    value::Value,
};

/// Outcome of one instruction that transfers control.
#[derive(Debug)]
pub(crate) enum Signal {
    /// Unwind with an exception. Tracebacks are extended before a signal is made.
    Raise(Exception),
    Return(Value),
    Break,
    /// `continue`, with the loop's jump target.
    Continue(usize),
    Yield(Value),
}

/// How the driver frame of a run loop finished.
#[derive(Debug)]
pub(crate) enum FrameExit {
    Return(Value),
    Yield(Value),
}

/// What the run loop does after a signal was handled.
enum Flow {
    Continue,
    Signal(Signal),
    Exit(FrameExit),
}

// ============================================================================
// Virtual Machine
// ============================================================================

/// The bytecode virtual machine.
///
/// `H` supplies operator semantics and `T` enforces resource limits; both
/// default to the reference behavior with no limits.
///
/// ```
/// use std::rc::Rc;
/// use bytevm::{VirtualMachine, Value, bytecode::{CodeBuilder, Opcode}};
///
/// let mut b = CodeBuilder::new("add");
/// b.arg("a").arg("b");
/// b.load_fast("a").load_fast("b").op(Opcode::BinaryAdd).return_value();
///
/// let mut vm = VirtualMachine::default();
/// let add = vm.make_function(b.build().unwrap(), &vm.new_globals());
/// let result = vm.run(&add, vec![Value::Int(2), Value::Int(3)]).unwrap();
/// assert_eq!(i64::try_from(&result).unwrap(), 5);
/// ```
pub struct VirtualMachine<H: OperatorHooks = DefaultOperators, T: ResourceTracker = NoLimitTracker> {
    /// Call stack; the last frame is executing.
    frames: Vec<Frame>,
    hooks: H,
    tracker: T,
    builtins: Namespace,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new(DefaultOperators, NoLimitTracker)
    }
}

impl<H: OperatorHooks> VirtualMachine<H, LimitedTracker> {
    /// Creates a VM enforcing `limits`.
    pub fn with_limits(hooks: H, limits: ResourceLimits) -> Self {
        Self::new(hooks, LimitedTracker::new(limits))
    }
}

impl<H: OperatorHooks, T: ResourceTracker> VirtualMachine<H, T> {
    pub fn new(hooks: H, tracker: T) -> Self {
        Self {
            frames: Vec::with_capacity(16),
            hooks,
            tracker,
            builtins: default_builtins(),
        }
    }

    /// Number of frames on the call stack; zero whenever the VM is idle.
    #[must_use]
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// The namespace consulted after globals by every frame.
    #[must_use]
    pub fn builtins(&self) -> &Namespace {
        &self.builtins
    }

    /// Replaces the builtins namespace for frames created from now on.
    pub fn set_builtins(&mut self, builtins: Namespace) {
        self.builtins = builtins;
    }

    /// Adds (or replaces) a builtin implemented in Rust.
    pub fn register_native(
        &mut self,
        name: &str,
        func: impl Fn(&mut dyn Interpreter, ArgValues) -> RunResult<Value> + 'static,
    ) {
        self.builtins.set(name, Value::Native(NativeFunction::new(name, func)));
    }

    /// Creates an empty module namespace with `__name__` set to `"__main__"`.
    #[must_use]
    pub fn new_globals(&self) -> Namespace {
        let globals = Namespace::new();
        globals.set("__name__", Value::str("__main__"));
        globals
    }

    /// Binds a code object to `globals` as a top-level function without defaults.
    ///
    /// The code object is not verified here; use [`CodeObject::verify`] (or build
    /// it with `CodeBuilder::build`) for untrusted input.
    pub fn make_function(&self, code: impl Into<Rc<CodeObject>>, globals: &Namespace) -> Function {
        Function::new(code.into(), globals.clone())
    }

    /// Calls `func` with `args` and runs it to completion.
    ///
    /// Calling a generator function returns the new generator without running it.
    ///
    /// # Errors
    /// [`VmError::Unhandled`] if an exception escapes the function, [`VmError::Fatal`]
    /// for VM integrity errors and exceeded resource limits.
    pub fn run(&mut self, func: &Function, args: impl Into<ArgValues>) -> Result<Value, VmError> {
        let frame = self.build_frame(func, args.into())?;
        if func.is_generator() {
            return Ok(Value::Generator(Generator::new(frame)));
        }
        self.run_frame(frame).map_err(VmError::from)
    }

    /// Calls any callable value: a function, native function or exception class.
    pub fn call(&mut self, callable: &Value, args: impl Into<ArgValues>) -> Result<Value, VmError> {
        self.call_nested(callable, args.into()).map_err(VmError::from)
    }

    /// Executes module-level code with `globals` as its locals mapping.
    ///
    /// `__name__` defaults to `"__main__"`. Returns the value of the code's final
    /// `RETURN_VALUE`, normally `None`.
    pub fn run_module(&mut self, code: impl Into<Rc<CodeObject>>, globals: &Namespace) -> Result<Value, VmError> {
        if !globals.contains("__name__") {
            globals.set("__name__", Value::str("__main__"));
        }
        let frame = Frame::for_module(code.into(), globals.clone(), self.builtins.clone());
        self.run_frame(frame).map_err(VmError::from)
    }

    /// Pushes a frame as a driver frame and runs it to completion.
    fn run_frame(&mut self, mut frame: Frame) -> RunResult<Value> {
        frame.resumer = Resumer::Driver;
        self.push_frame(frame)?;
        match self.run_loop(None)? {
            FrameExit::Return(value) => Ok(value),
            FrameExit::Yield(_) => Err(RunError::internal("driver frame yielded")),
        }
    }

    // ========================================================================
    // Run loop
    // ========================================================================

    /// Executes until the innermost driver frame returns or yields.
    ///
    /// `pending` is handled before the first instruction, which is how an exception
    /// is thrown into a resumed generator.
    ///
    /// On a fatal error every frame down to and including the driver frame is
    /// discarded, so the caller sees a consistent call stack.
    pub(crate) fn run_loop(&mut self, pending: Option<Signal>) -> RunResult<FrameExit> {
        let mut signal = pending;
        loop {
            let current = match signal.take() {
                Some(signal) => signal,
                None => match self.step() {
                    Ok(None) => continue,
                    Ok(Some(signal)) => signal,
                    Err(RunError::Exc(mut exc)) => {
                        if let Some(frame) = self.frames.last() {
                            exc.push_trace(frame.trace_entry());
                        }
                        Signal::Raise(exc)
                    }
                    Err(RunError::Fatal(fatal)) => {
                        self.abandon_frames();
                        return Err(fatal.into());
                    }
                },
            };
            match self.handle_signal(current) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Signal(next)) => signal = Some(next),
                Ok(Flow::Exit(exit)) => return Ok(exit),
                // the exception escaped the driver frame, which is already popped
                Err(RunError::Exc(exc)) => return Err(exc.into()),
                Err(RunError::Fatal(fatal)) => {
                    self.abandon_frames();
                    return Err(fatal.into());
                }
            }
        }
    }

    /// Routes a signal: yields suspend the frame, everything else unwinds its blocks.
    fn handle_signal(&mut self, signal: Signal) -> RunResult<Flow> {
        if let Signal::Yield(value) = signal {
            return self.yield_frame(value);
        }
        match self.unwind(signal)? {
            None => Ok(Flow::Continue),
            Some(result) => self.exit_frame(result),
        }
    }

    /// Pops the finished frame and delivers its result according to its resumer.
    ///
    /// `Err` is returned only for an exception escaping a driver frame, or a fatal error.
    fn exit_frame(&mut self, result: Result<Value, Exception>) -> RunResult<Flow> {
        let frame = self.frames.pop().ok_or_else(|| RunError::internal("exit with no frame"))?;
        trace!("pop frame {} (depth {})", frame.name, self.frames.len());
        let mut result = result;
        if let Some(generator) = &frame.owner {
            generator.finish();
            if let Err(exc) = &result {
                if exc.exc_type() == ExcType::StopIteration {
                    result = Err(stop_iteration_escaped(exc));
                }
            }
        }
        if let Err(exc) = &result {
            debug!("frame {} abandoned by {}", frame.name, exc.exc_type());
        }

        if frame.resumer == Resumer::Driver {
            return match result {
                Ok(value) => Ok(Flow::Exit(FrameExit::Return(value))),
                Err(exc) => Err(exc.into()),
            };
        }
        let caller = self.frame_mut()?;
        let value = match result {
            Ok(value) => value,
            Err(mut exc) => {
                exc.push_trace(caller.trace_entry());
                return Ok(Flow::Signal(Signal::Raise(exc)));
            }
        };
        match frame.resumer {
            Resumer::Call => caller.push(value),
            Resumer::ForIter { exit } => {
                caller.pop()?;
                caller.ip = exit;
            }
            Resumer::YieldFrom => {
                // the caller was rewound onto its YIELD_FROM; step past it
                caller.pop()?;
                caller.push(value);
                caller.ip += 1;
            }
            Resumer::Driver => {}
        }
        Ok(Flow::Continue)
    }

    /// Discards frames down to and including the innermost driver frame.
    ///
    /// Generators whose frames are discarded are marked finished.
    fn abandon_frames(&mut self) {
        while let Some(frame) = self.frames.pop() {
            if let Some(generator) = &frame.owner {
                generator.finish();
            }
            if frame.resumer == Resumer::Driver {
                break;
            }
        }
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, FatalError> {
        self.frames
            .last_mut()
            .ok_or(FatalError::Internal("no frame on the call stack".into()))
    }

    fn frame(&self) -> Result<&Frame, FatalError> {
        self.frames
            .last()
            .ok_or(FatalError::Internal("no frame on the call stack".into()))
    }

    fn push(&mut self, value: Value) -> Result<(), FatalError> {
        self.frame_mut()?.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, FatalError> {
        self.frame_mut()?.pop()
    }

    fn popn(&mut self, n: usize) -> Result<Vec<Value>, FatalError> {
        self.frame_mut()?.popn(n)
    }

    /// Fetches the next instruction, folding `EXTENDED_ARG` prefixes into its operand.
    fn fetch(&mut self) -> Result<(Opcode, u32), FatalError> {
        let frame = self.frame_mut()?;
        let mut ext = 0;
        loop {
            let at = frame.ip;
            let ins = *frame
                .code
                .instructions
                .get(at)
                .ok_or(FatalError::InstructionOutOfRange(at))?;
            frame.ip += 1;
            let op = ins.opcode().ok_or(FatalError::UnknownOpcode {
                opcode: ins.opcode,
                offset: at,
            })?;
            let arg = fold_extended_arg(ext, ins.arg);
            if op == Opcode::ExtendedArg {
                ext = arg;
                continue;
            }
            frame.last_ip = at;
            return Ok((op, arg));
        }
    }

    /// Name-table operand.
    fn name_at(&self, op: Opcode, index: u32) -> Result<Rc<str>, FatalError> {
        self.frame()?
            .code
            .names
            .get(index as usize)
            .cloned()
            .ok_or(FatalError::InvalidOperand { opcode: op, operand: index })
    }

    fn jump_to(&mut self, op: Opcode, arg: u32) -> Result<(), FatalError> {
        let frame = self.frame_mut()?;
        frame.ip = op.jump_target(arg, frame.ip).ok_or(FatalError::InvalidOperand { opcode: op, operand: arg })?;
        Ok(())
    }

    fn truthy(&self, value: &Value) -> RunResult<bool> {
        self.hooks.truthy(value)
    }

    /// Executes one instruction.
    fn step(&mut self) -> RunResult<Option<Signal>> {
        self.tracker.on_instruction()?;
        let (op, arg) = self.fetch()?;
        let invalid = || FatalError::InvalidOperand { opcode: op, operand: arg };

        match op {
            // ============================================================
            // Stack Operations
            // ============================================================
            Opcode::Nop | Opcode::ExtendedArg => {}
            Opcode::PopTop => {
                self.pop()?;
            }
            Opcode::RotTwo => {
                let mut top = self.popn(2)?;
                top.reverse();
                self.frame_mut()?.stack.extend(top);
            }
            Opcode::RotThree => {
                // [a, b, c] -> [c, a, b]
                let mut top = self.popn(3)?;
                top.rotate_right(1);
                self.frame_mut()?.stack.extend(top);
            }
            Opcode::DupTop => {
                let top = self.frame()?.top()?.clone();
                self.push(top)?;
            }
            Opcode::DupTopTwo => {
                let frame = self.frame_mut()?;
                let second = frame.peek(2)?.clone();
                let top = frame.peek(1)?.clone();
                frame.push(second);
                frame.push(top);
            }

            // ============================================================
            // Unary and Binary Operations
            // ============================================================
            Opcode::UnaryPositive => self.unary(UnaryOp::Positive)?,
            Opcode::UnaryNegative => self.unary(UnaryOp::Negative)?,
            Opcode::UnaryInvert => self.unary(UnaryOp::Invert)?,
            Opcode::UnaryNot => {
                let value = self.pop()?;
                let result = !self.truthy(&value)?;
                self.push(Value::Bool(result))?;
            }
            Opcode::BinaryPower => self.binary(BinaryOp::Power, false)?,
            Opcode::BinaryMultiply => self.binary(BinaryOp::Multiply, false)?,
            Opcode::BinaryMatrixMultiply => self.binary(BinaryOp::MatrixMultiply, false)?,
            Opcode::BinaryFloorDivide => self.binary(BinaryOp::FloorDivide, false)?,
            Opcode::BinaryTrueDivide => self.binary(BinaryOp::TrueDivide, false)?,
            Opcode::BinaryModulo => self.binary(BinaryOp::Modulo, false)?,
            Opcode::BinaryAdd => self.binary(BinaryOp::Add, false)?,
            Opcode::BinarySubtract => self.binary(BinaryOp::Subtract, false)?,
            Opcode::BinaryLshift => self.binary(BinaryOp::Lshift, false)?,
            Opcode::BinaryRshift => self.binary(BinaryOp::Rshift, false)?,
            Opcode::BinaryAnd => self.binary(BinaryOp::And, false)?,
            Opcode::BinaryXor => self.binary(BinaryOp::Xor, false)?,
            Opcode::BinaryOr => self.binary(BinaryOp::Or, false)?,
            Opcode::InplacePower => self.binary(BinaryOp::Power, true)?,
            Opcode::InplaceMultiply => self.binary(BinaryOp::Multiply, true)?,
            Opcode::InplaceMatrixMultiply => self.binary(BinaryOp::MatrixMultiply, true)?,
            Opcode::InplaceFloorDivide => self.binary(BinaryOp::FloorDivide, true)?,
            Opcode::InplaceTrueDivide => self.binary(BinaryOp::TrueDivide, true)?,
            Opcode::InplaceModulo => self.binary(BinaryOp::Modulo, true)?,
            Opcode::InplaceAdd => self.binary(BinaryOp::Add, true)?,
            Opcode::InplaceSubtract => self.binary(BinaryOp::Subtract, true)?,
            Opcode::InplaceLshift => self.binary(BinaryOp::Lshift, true)?,
            Opcode::InplaceRshift => self.binary(BinaryOp::Rshift, true)?,
            Opcode::InplaceAnd => self.binary(BinaryOp::And, true)?,
            Opcode::InplaceXor => self.binary(BinaryOp::Xor, true)?,
            Opcode::InplaceOr => self.binary(BinaryOp::Or, true)?,
            Opcode::CompareOp => {
                let cmp = u8::try_from(arg).ok().and_then(CompareOp::from_repr).ok_or_else(invalid)?;
                self.compare(cmp)?;
            }

            // ============================================================
            // Subscripts and Attributes
            // ============================================================
            Opcode::BinarySubscr => self.binary_subscr()?,
            Opcode::StoreSubscr => self.store_subscr()?,
            Opcode::DeleteSubscr => self.delete_subscr()?,
            Opcode::LoadAttr => {
                let name = self.name_at(op, arg)?;
                let obj = self.pop()?;
                let value = self
                    .hooks
                    .getattr(&obj, &name)?
                    .ok_or_else(|| ExcType::attribute_error(obj.type_name(), &name))?;
                self.push(value)?;
            }
            Opcode::StoreAttr => {
                let name = self.name_at(op, arg)?;
                let obj = self.pop()?;
                let value = self.pop()?;
                self.hooks
                    .setattr(&obj, &name, value)?
                    .ok_or_else(|| ExcType::attribute_error(obj.type_name(), &name))?;
            }
            Opcode::DeleteAttr => {
                let name = self.name_at(op, arg)?;
                let obj = self.pop()?;
                self.hooks
                    .delattr(&obj, &name)?
                    .ok_or_else(|| ExcType::attribute_error(obj.type_name(), &name))?;
            }

            // ============================================================
            // Constants and Names
            // ============================================================
            Opcode::LoadConst => {
                let frame = self.frame_mut()?;
                let value = frame.code.constants.get(arg as usize).ok_or_else(invalid)?.to_value();
                frame.push(value);
            }
            Opcode::LoadName => {
                let name = self.name_at(op, arg)?;
                let value = self.frame()?.get(&name)?;
                self.push(value)?;
            }
            Opcode::StoreName => {
                let name = self.name_at(op, arg)?;
                let value = self.pop()?;
                self.frame_mut()?.set(&name, value);
            }
            Opcode::DeleteName => {
                let name = self.name_at(op, arg)?;
                self.frame_mut()?.delete(&name)?;
            }
            Opcode::LoadGlobal => {
                let name = self.name_at(op, arg)?;
                let value = self.frame()?.get_global(&name)?;
                self.push(value)?;
            }
            Opcode::StoreGlobal => {
                let name = self.name_at(op, arg)?;
                let value = self.pop()?;
                self.frame()?.globals.set(name, value);
            }
            Opcode::DeleteGlobal => {
                let name = self.name_at(op, arg)?;
                if !self.frame()?.globals.delete(&name) {
                    return Err(ExcType::name_error(&name));
                }
            }
            Opcode::LoadFast => {
                let frame = self.frame_mut()?;
                let slot = frame.fast_locals.get(arg as usize).ok_or_else(invalid)?;
                let value = match slot {
                    Some(value) => value.clone(),
                    None => return Err(ExcType::unbound_local_error(varname(&frame.code, arg as usize))),
                };
                frame.push(value);
            }
            Opcode::StoreFast => {
                let frame = self.frame_mut()?;
                let value = frame.pop()?;
                *frame.fast_locals.get_mut(arg as usize).ok_or_else(invalid)? = Some(value);
            }
            Opcode::DeleteFast => {
                let frame = self.frame_mut()?;
                let slot = frame.fast_locals.get_mut(arg as usize).ok_or_else(invalid)?;
                if slot.take().is_none() {
                    return Err(ExcType::unbound_local_error(varname(&frame.code, arg as usize)));
                }
            }
            Opcode::LoadClosure => {
                let frame = self.frame_mut()?;
                let cell = frame.cells.get(arg as usize).ok_or_else(invalid)?.clone();
                frame.push(Value::Cell(cell));
            }
            Opcode::LoadDeref => {
                let frame = self.frame_mut()?;
                let cell = frame.cells.get(arg as usize).ok_or_else(invalid)?;
                match cell.get() {
                    Some(value) => frame.push(value),
                    None => return Err(unbound_deref(&frame.code, arg as usize)),
                }
            }
            Opcode::StoreDeref => {
                let frame = self.frame_mut()?;
                let value = frame.pop()?;
                frame.cells.get(arg as usize).ok_or_else(invalid)?.set(value);
            }
            Opcode::DeleteDeref => {
                let frame = self.frame_mut()?;
                if !frame.cells.get(arg as usize).ok_or_else(invalid)?.clear() {
                    return Err(unbound_deref(&frame.code, arg as usize));
                }
            }

            // ============================================================
            // Collections
            // ============================================================
            Opcode::BuildTuple => {
                let items = self.popn(arg as usize)?;
                self.push(Value::tuple(items))?;
            }
            Opcode::BuildList => {
                let items = self.popn(arg as usize)?;
                self.push(Value::list(items))?;
            }
            Opcode::BuildMap => self.build_map(arg as usize)?,
            Opcode::BuildConstKeyMap => self.build_const_key_map(arg as usize)?,
            Opcode::BuildString => self.build_string(arg as usize)?,
            Opcode::UnpackSequence => self.unpack_sequence(arg as usize)?,
            Opcode::ListAppend => self.list_append(arg as usize)?,
            Opcode::MapAdd => self.map_add(arg as usize)?,

            // ============================================================
            // Jumps
            // ============================================================
            Opcode::JumpForward | Opcode::JumpAbsolute => self.jump_to(op, arg)?,
            Opcode::PopJumpIfFalse | Opcode::PopJumpIfTrue => {
                let value = self.pop()?;
                if self.truthy(&value)? == (op == Opcode::PopJumpIfTrue) {
                    self.jump_to(op, arg)?;
                }
            }
            Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                let value = self.frame()?.top()?.clone();
                if self.truthy(&value)? == (op == Opcode::JumpIfTrueOrPop) {
                    self.jump_to(op, arg)?;
                } else {
                    self.pop()?;
                }
            }

            // ============================================================
            // Iteration and Generators
            // ============================================================
            Opcode::GetIter => {
                let value = self.pop()?;
                let iterator = self.get_iter(&value)?;
                self.push(iterator)?;
            }
            Opcode::GetYieldFromIter => {
                if !matches!(self.frame()?.top()?, Value::Generator(_)) {
                    let value = self.pop()?;
                    let iterator = self.get_iter(&value)?;
                    self.push(iterator)?;
                }
            }
            Opcode::ForIter => {
                let exit = op.jump_target(arg, self.frame()?.ip).ok_or_else(invalid)?;
                self.for_iter(exit)?;
            }
            Opcode::YieldValue => {
                let value = self.pop()?;
                return Ok(Some(Signal::Yield(value)));
            }
            Opcode::YieldFrom => return self.yield_from(),

            // ============================================================
            // Blocks
            // ============================================================
            Opcode::SetupLoop | Opcode::SetupExcept | Opcode::SetupFinally => {
                let frame = self.frame_mut()?;
                let handler = op.jump_target(arg, frame.ip).ok_or_else(invalid)?;
                let kind = match op {
                    Opcode::SetupLoop => BlockKind::Loop,
                    Opcode::SetupExcept => BlockKind::SetupExcept,
                    _ => BlockKind::Finally,
                };
                frame.enter_block(kind, handler);
            }
            Opcode::PopBlock => {
                let frame = self.frame_mut()?;
                let block = frame.exit_block()?;
                frame.truncate(block.level)?;
            }
            Opcode::PopExcept => self.pop_except()?,
            Opcode::EndFinally => return self.end_finally(),
            Opcode::BreakLoop => return Ok(Some(Signal::Break)),
            Opcode::ContinueLoop => return Ok(Some(Signal::Continue(arg as usize))),
            Opcode::ReturnValue => {
                let value = self.pop()?;
                return Ok(Some(Signal::Return(value)));
            }
            Opcode::RaiseVarargs => return self.raise_varargs(arg),

            // ============================================================
            // Calls
            // ============================================================
            Opcode::CallFunction => {
                let args = self.popn(arg as usize)?;
                let callable = self.pop()?;
                self.call_value(callable, ArgValues::positional_only(args))?;
            }
            Opcode::CallFunctionKw => self.call_function_kw(arg as usize)?,
            Opcode::CallFunctionEx => self.call_function_ex(arg)?,
            Opcode::MakeFunction => self.make_function_op(arg)?,
        }
        Ok(None)
    }
}

fn varname(code: &CodeObject, index: usize) -> &str {
    code.varnames.get(index).map_or("?", |n| &**n)
}

/// Error for reading an empty closure cell at `index`.
fn unbound_deref(code: &CodeObject, index: usize) -> RunError {
    let name = code.deref_name(index).map_or("?", |n| &**n);
    if index < code.cellvars.len() {
        ExcType::unbound_local_error(name)
    } else {
        ExcType::unbound_free_error(name)
    }
}

/// `StopIteration` may not escape a generator; it becomes `RuntimeError`.
fn stop_iteration_escaped(exc: &Exception) -> Exception {
    let mut converted = Exception::with_message(ExcType::RuntimeError, "generator raised StopIteration");
    for entry in exc.traceback() {
        converted.push_trace(entry.clone());
    }
    converted.set_cause(Some(exc.clone()));
    converted
}

// ============================================================================
// Re-entry for native functions
// ============================================================================

impl<H: OperatorHooks, T: ResourceTracker> Interpreter for VirtualMachine<H, T> {
    fn call(&mut self, callable: &Value, args: ArgValues) -> RunResult<Value> {
        self.call_nested(callable, args)
    }

    fn iter(&mut self, value: &Value) -> RunResult<Value> {
        self.get_iter(value)
    }

    fn next(&mut self, iterator: &Value) -> RunResult<Option<Value>> {
        self.next_nested(iterator)
    }
}
