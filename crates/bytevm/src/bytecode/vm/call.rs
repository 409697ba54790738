//! Function call helpers for the VM.

use std::rc::Rc;

use log::trace;

use super::{FrameExit, VirtualMachine};
use crate::{
    args::ArgValues,
    bytecode::{Frame, Opcode, Resumer},
    callable::Interpreter,
    exception::{ExcType, Exception, FatalError, RunError, RunResult},
    function::Function,
    generator::Generator,
    operators::OperatorHooks,
    resource::ResourceTracker,
    signature::Signature,
    types::Dict,
    value::{Cell, Value},
};

impl<H: OperatorHooks, T: ResourceTracker> VirtualMachine<H, T> {
    /// Binds `args` to `func`'s parameters and creates its frame.
    ///
    /// The frame is not pushed; generator functions wrap it in a generator instead.
    pub(super) fn build_frame(&self, func: &Function, args: ArgValues) -> RunResult<Frame> {
        let code = &func.code;
        let slots = Signature::of(code).bind(
            &func.name,
            args,
            &func.defaults,
            func.kwdefaults.as_ref(),
            code.varnames.len(),
        )?;
        Ok(Frame::for_function(func, slots, self.builtins.clone())?)
    }

    /// Pushes a frame on the call stack, enforcing the recursion limit.
    pub(super) fn push_frame(&mut self, frame: Frame) -> RunResult<()> {
        self.tracker.on_frame_push(self.frames.len() + 1)?;
        trace!("push frame {} (depth {})", frame.name, self.frames.len() + 1);
        self.frames.push(frame);
        Ok(())
    }

    /// Calls `callable` from a call instruction.
    ///
    /// Bytecode functions get a frame that returns into the current frame; every
    /// other callable completes immediately and its result is pushed.
    pub(super) fn call_value(&mut self, callable: Value, args: ArgValues) -> RunResult<()> {
        match callable {
            Value::Function(func) => {
                let frame = self.build_frame(&func, args)?;
                if func.is_generator() {
                    self.push(Value::Generator(Generator::new(frame)))?;
                } else {
                    self.push_frame(frame)?;
                }
            }
            Value::Native(native) => {
                let result = native.call(self, args)?;
                self.push(result)?;
            }
            Value::ExcType(exc_type) => {
                let result = instantiate(exc_type, args)?;
                self.push(result)?;
            }
            other => return Err(ExcType::not_callable(other.type_name())),
        }
        Ok(())
    }

    /// Calls `callable` from Rust, running any bytecode in a nested run loop.
    pub(super) fn call_nested(&mut self, callable: &Value, args: ArgValues) -> RunResult<Value> {
        match callable {
            Value::Function(func) => {
                let frame = self.build_frame(func, args)?;
                if func.is_generator() {
                    return Ok(Value::Generator(Generator::new(frame)));
                }
                self.run_frame(frame)
            }
            Value::Native(native) => native.call(self, args),
            Value::ExcType(exc_type) => instantiate(*exc_type, args),
            other => Err(ExcType::not_callable(other.type_name())),
        }
    }

    /// `CALL_FUNCTION_KW`: the last `len(names)` arguments are keywords.
    pub(super) fn call_function_kw(&mut self, argc: usize) -> RunResult<()> {
        let names = self.pop()?;
        let Value::Tuple(names) = names else {
            return Err(FatalError::invalid_code("CALL_FUNCTION_KW expects a tuple of names").into());
        };
        let mut positional = self.popn(argc)?;
        let split = positional
            .len()
            .checked_sub(names.len())
            .ok_or(FatalError::InvalidOperand {
                opcode: Opcode::CallFunctionKw,
                operand: argc as u32,
            })?;
        let values = positional.split_off(split);
        let mut keywords = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            let Value::Str(name) = name else {
                return Err(FatalError::invalid_code("keyword names must be strings").into());
            };
            keywords.push((name.clone(), value));
        }
        let callable = self.pop()?;
        self.call_value(callable, ArgValues::new(positional, keywords))
    }

    /// `CALL_FUNCTION_EX`: arguments come from an iterable and, with flag bit 0, a dict.
    pub(super) fn call_function_ex(&mut self, flags: u32) -> RunResult<()> {
        let kwargs = if flags & 0x01 != 0 { Some(self.pop()?) } else { None };
        let args = self.pop()?;
        let callable = self.pop()?;

        let positional = match &args {
            Value::Tuple(items) => items.to_vec(),
            other => Interpreter::collect(self, other)?,
        };
        let mut keywords = Vec::new();
        if let Some(kwargs) = kwargs {
            let Value::Dict(dict) = &kwargs else {
                return Err(ExcType::type_error(format!(
                    "argument after ** must be a mapping, not {}",
                    kwargs.type_name()
                )));
            };
            for (key, value) in dict.items() {
                let Value::Str(key) = key else {
                    return Err(ExcType::type_error("keywords must be strings"));
                };
                keywords.push((key, value));
            }
        }
        self.call_value(callable, ArgValues::new(positional, keywords))
    }

    /// `MAKE_FUNCTION`: builds a function from the code object and qualified name on
    /// the stack, plus the optional parts selected by `flags`.
    pub(super) fn make_function_op(&mut self, flags: u32) -> RunResult<()> {
        let qualname = match self.pop()? {
            Value::Str(s) => s,
            _ => return Err(FatalError::invalid_code("MAKE_FUNCTION expects a qualified name").into()),
        };
        let code = match self.pop()? {
            Value::Code(code) => code,
            _ => return Err(FatalError::invalid_code("MAKE_FUNCTION expects a code object").into()),
        };
        let closure = if flags & 0x08 != 0 {
            let cells = match self.pop()? {
                Value::Tuple(items) => items
                    .iter()
                    .map(|item| match item {
                        Value::Cell(cell) => Ok(cell.clone()),
                        _ => Err(FatalError::invalid_code("closure items must be cells")),
                    })
                    .collect::<Result<Vec<Cell>, _>>()?,
                _ => return Err(FatalError::invalid_code("closure must be a tuple").into()),
            };
            if cells.len() != code.freevars.len() {
                return Err(FatalError::invalid_code(format!(
                    "{} expects {} free variables, closure has {}",
                    code.name,
                    code.freevars.len(),
                    cells.len()
                ))
                .into());
            }
            cells
        } else {
            Vec::new()
        };
        let annotations = if flags & 0x04 != 0 { Some(self.pop_dict("annotations")?) } else { None };
        let kwdefaults = if flags & 0x02 != 0 { Some(self.pop_dict("keyword defaults")?) } else { None };
        let defaults = if flags & 0x01 != 0 {
            match self.pop()? {
                Value::Tuple(items) => items.to_vec(),
                _ => return Err(FatalError::invalid_code("defaults must be a tuple").into()),
            }
        } else {
            Vec::new()
        };

        let globals = self.frame()?.globals.clone();
        let func = Function {
            name: code.name.clone(),
            qualname,
            code,
            globals,
            defaults,
            kwdefaults,
            closure,
            annotations,
        };
        self.push(Value::Function(Rc::new(func)))?;
        Ok(())
    }

    fn pop_dict(&mut self, what: &'static str) -> Result<Dict, FatalError> {
        match self.pop()? {
            Value::Dict(dict) => Ok(dict),
            _ => Err(FatalError::invalid_code(format!("{what} must be a dict"))),
        }
    }

    /// Advances an iterator or generator from Rust; `None` once it is exhausted.
    pub(super) fn next_nested(&mut self, iterator: &Value) -> RunResult<Option<Value>> {
        match iterator {
            Value::Generator(generator) => {
                if !self.enter_generator(generator, Some(Value::None), Resumer::Driver)? {
                    return Ok(None);
                }
                match self.run_loop(None)? {
                    FrameExit::Yield(value) => Ok(Some(value)),
                    FrameExit::Return(_) => Ok(None),
                }
            }
            Value::Iterator(it) => it.borrow_mut().for_next(),
            other => Err(ExcType::type_error(format!("'{}' object is not an iterator", other.type_name()))),
        }
    }

    /// Returns an iterator over `value`, like `GET_ITER`.
    pub(super) fn get_iter(&self, value: &Value) -> RunResult<Value> {
        self.hooks
            .iter(value)?
            .ok_or_else(|| ExcType::not_iterable(value.type_name()))
    }
}

/// Calling an exception class creates an instance; the class accepts no keywords.
fn instantiate(exc_type: ExcType, args: ArgValues) -> Result<Value, RunError> {
    args.check_no_kwargs(exc_type.into())?;
    let (positional, _) = args.into_parts();
    Ok(Value::exception(Exception::new(exc_type, positional)))
}
