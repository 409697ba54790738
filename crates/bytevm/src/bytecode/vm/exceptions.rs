//! Block-stack unwinding and exception handling for the VM.
//!
//! When a signal leaves an instruction, the current frame's blocks are popped
//! innermost first until one of them claims it:
//!
//! - a loop block claims `break` and `continue`
//! - a `try`/`except` block claims a raised exception
//! - a `finally` block claims everything, pushing a marker that `END_FINALLY`
//!   uses to resume the signal once the `finally` body completes
//!
//! Entering a handler for an exception pushes an except-handler block and six
//! values: the previously handled exception (traceback, value, class) followed by
//! the new one, class on top. Leaving the handler restores the previous one.

use std::rc::Rc;

use log::trace;

use super::{Signal, VirtualMachine};
use crate::{
    bytecode::{Block, BlockKind, Frame, Opcode, Why},
    exception::{ExcType, Exception, FatalError, RunError, RunResult},
    operators::OperatorHooks,
    resource::ResourceTracker,
    value::Value,
};

impl<H: OperatorHooks, T: ResourceTracker> VirtualMachine<H, T> {
    /// Unwinds the current frame's block stack for `signal`.
    ///
    /// Returns `None` when a block claimed the signal and execution continues in
    /// this frame, or the frame's result when the signal left it.
    pub(super) fn unwind(&mut self, signal: Signal) -> Result<Option<Result<Value, Exception>>, FatalError> {
        let frame = self.frame_mut()?;
        let mut signal = signal;
        while let Some(block) = frame.blocks.pop() {
            signal = match (block.kind, signal) {
                (BlockKind::Loop, Signal::Continue(target)) => {
                    frame.blocks.push(block);
                    frame.ip = target;
                    return Ok(None);
                }
                (BlockKind::Loop, Signal::Break) => {
                    frame.truncate(block.level)?;
                    frame.ip = block.handler;
                    return Ok(None);
                }
                (BlockKind::ExceptHandler, signal) => {
                    restore_handled(frame, block.level)?;
                    signal
                }
                (BlockKind::SetupExcept | BlockKind::Finally, Signal::Raise(exc)) => {
                    trace!("{} caught by handler at {} in {}", exc.exc_type(), block.handler, frame.name);
                    enter_handler(frame, block, exc)?;
                    return Ok(None);
                }
                (BlockKind::Finally, signal) => {
                    frame.truncate(block.level)?;
                    match signal {
                        Signal::Return(value) => {
                            frame.push(value);
                            frame.push(Value::Why(Why::Return));
                        }
                        Signal::Continue(target) => {
                            frame.push(Value::Int(target as i64));
                            frame.push(Value::Why(Why::Continue));
                        }
                        Signal::Break => frame.push(Value::Why(Why::Break)),
                        Signal::Raise(_) | Signal::Yield(_) => {
                            return Err(FatalError::Internal("yield reached the block stack".into()));
                        }
                    }
                    frame.ip = block.handler;
                    return Ok(None);
                }
                // loops let exceptions and returns pass; try/except lets everything else pass
                (_, signal) => {
                    frame.truncate(block.level)?;
                    signal
                }
            };
        }

        match signal {
            Signal::Raise(exc) => Ok(Some(Err(exc))),
            Signal::Return(value) => Ok(Some(Ok(value))),
            Signal::Break | Signal::Continue(_) => Err(FatalError::corrupt_blocks("'break' or 'continue' outside a loop")),
            Signal::Yield(_) => Err(FatalError::Internal("yield reached the block stack".into())),
        }
    }

    /// `POP_EXCEPT`: leaves an `except` body.
    pub(super) fn pop_except(&mut self) -> RunResult<()> {
        let frame = self.frame_mut()?;
        let block = frame.exit_block()?;
        if block.kind != BlockKind::ExceptHandler {
            return Err(FatalError::corrupt_blocks(format!("POP_EXCEPT popped a {:?} block", block.kind)).into());
        }
        restore_handled(frame, block.level)?;
        Ok(())
    }

    /// `END_FINALLY`: resumes whatever signal the `finally` body interrupted.
    pub(super) fn end_finally(&mut self) -> RunResult<Option<Signal>> {
        let frame = self.frame_mut()?;
        match frame.pop()? {
            Value::None => Ok(None),
            Value::Why(Why::Return) => Ok(Some(Signal::Return(frame.pop()?))),
            Value::Why(Why::Continue) => match frame.pop()? {
                Value::Int(target) => {
                    let target = usize::try_from(target)
                        .map_err(|_| FatalError::corrupt_blocks("negative continue target"))?;
                    Ok(Some(Signal::Continue(target)))
                }
                _ => Err(FatalError::corrupt_blocks("continue marker without a target").into()),
            },
            Value::Why(Why::Break) => Ok(Some(Signal::Break)),
            Value::ExcType(_) => {
                let value = frame.pop()?;
                frame.pop()?;
                match value {
                    // re-raised as is, the traceback already covers this frame
                    Value::Exception(exc) => Ok(Some(Signal::Raise((*exc).clone()))),
                    _ => Err(FatalError::corrupt_blocks("exception class without an instance").into()),
                }
            }
            other => Err(FatalError::corrupt_blocks(format!(
                "END_FINALLY found a '{}' on the stack",
                other.type_name()
            ))
            .into()),
        }
    }

    /// `RAISE_VARARGS`.
    ///
    /// A bare `raise` re-raises the exception being handled by the innermost frame
    /// that is handling one, without adding to its traceback.
    pub(super) fn raise_varargs(&mut self, argc: u32) -> RunResult<Option<Signal>> {
        match argc {
            0 => match self.frames.iter().rev().find_map(|frame| frame.handled.clone()) {
                Some(exc) => Ok(Some(Signal::Raise((*exc).clone()))),
                None => Err(ExcType::RuntimeError.err("No active exception to reraise")),
            },
            1 => {
                let value = self.pop()?;
                Err(make_exception(value)?.into())
            }
            2 => {
                let cause = self.pop()?;
                let value = self.pop()?;
                let mut exc = make_exception(value)?;
                let cause = match cause {
                    Value::None => None,
                    Value::ExcType(t) => Some(Exception::new(t, Vec::new())),
                    Value::Exception(e) => Some((*e).clone()),
                    _ => return Err(ExcType::type_error("exception causes must derive from BaseException")),
                };
                exc.set_cause(cause);
                Err(exc.into())
            }
            _ => Err(FatalError::InvalidOperand {
                opcode: Opcode::RaiseVarargs,
                operand: argc,
            }
            .into()),
        }
    }

    /// Handler for `COMPARE_OP` with the exception-match operand.
    ///
    /// `rhs` must be an exception class or a tuple of them.
    pub(super) fn exception_match(&self, lhs: &Value, rhs: &Value) -> RunResult<bool> {
        let handlers: Vec<ExcType> = match rhs {
            Value::ExcType(t) => vec![*t],
            Value::Tuple(items) => items
                .iter()
                .map(|item| match item {
                    Value::ExcType(t) => Ok(*t),
                    _ => Err(catching_non_exception()),
                })
                .collect::<RunResult<_>>()?,
            _ => return Err(catching_non_exception()),
        };
        let raised = match lhs {
            Value::ExcType(t) => *t,
            Value::Exception(exc) => exc.exc_type(),
            _ => return Ok(false),
        };
        Ok(handlers.iter().any(|&handler| raised.is_subclass_of(handler)))
    }
}

/// Jumps to the handler of `block` for `exc`, saving the previously handled exception.
fn enter_handler(frame: &mut Frame, block: Block, exc: Exception) -> Result<(), FatalError> {
    frame.truncate(block.level)?;
    frame.enter_block(BlockKind::ExceptHandler, block.handler);
    match frame.handled.take() {
        Some(old) => {
            let old_type = old.exc_type();
            frame.push(Value::None);
            frame.push(Value::Exception(old));
            frame.push(Value::ExcType(old_type));
        }
        None => {
            frame.push(Value::None);
            frame.push(Value::None);
            frame.push(Value::None);
        }
    }
    let exc_type = exc.exc_type();
    let exc = Rc::new(exc);
    frame.handled = Some(exc.clone());
    frame.push(Value::None);
    frame.push(Value::Exception(exc));
    frame.push(Value::ExcType(exc_type));
    frame.ip = block.handler;
    Ok(())
}

/// Leaves an except-handler block whose saved exception sits just above `level`.
fn restore_handled(frame: &mut Frame, level: usize) -> Result<(), FatalError> {
    frame.truncate(level + 3)?;
    if frame.stack_depth() != level + 3 {
        return Err(FatalError::corrupt_blocks("except handler lost its saved exception"));
    }
    let _exc_type = frame.pop()?;
    frame.handled = match frame.pop()? {
        Value::Exception(exc) => Some(exc),
        Value::None => None,
        _ => return Err(FatalError::corrupt_blocks("except handler saved a non-exception")),
    };
    frame.pop()?;
    Ok(())
}

/// Converts the operand of `raise` into an exception instance.
fn make_exception(value: Value) -> RunResult<Exception> {
    match value {
        Value::ExcType(t) => Ok(Exception::new(t, Vec::new())),
        Value::Exception(exc) => Ok((*exc).clone()),
        _ => Err(ExcType::type_error("exceptions must derive from BaseException")),
    }
}

fn catching_non_exception() -> RunError {
    ExcType::type_error("catching classes that do not inherit from BaseException is not allowed")
}
