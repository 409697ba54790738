//! Generator resumption, suspension and delegation.
//!
//! A generator's frame is pushed on the call stack when it is resumed and moved
//! back into the generator when it yields. What happens to a yielded value depends
//! on who resumed the generator:
//!
//! - `FOR_ITER` pushes it on the loop's stack
//! - `YIELD_FROM` re-yields it from the delegating frame, which was rewound onto
//!   its `YIELD_FROM` so the next resume delegates again
//! - the driver API returns it to Rust

use log::trace;

use super::{Flow, FrameExit, Signal, VirtualMachine};
use crate::{
    bytecode::{Opcode, Resumer},
    exception::{ExcType, Exception, FatalError, RunError, RunResult, UnhandledException, VmError},
    generator::{GenState, Generator, GeneratorState, Resumed},
    operators::OperatorHooks,
    resource::ResourceTracker,
    value::Value,
};

impl<H: OperatorHooks, T: ResourceTracker> VirtualMachine<H, T> {
    /// Pushes a generator's frame so that it runs next.
    ///
    /// `sent` becomes the result of the `yield` the generator is paused at; `None`
    /// leaves the stack untouched, which is how `throw` resumes. Returns false if
    /// the generator had already finished.
    pub(super) fn enter_generator(
        &mut self,
        generator: &Generator,
        sent: Option<Value>,
        resumer: Resumer,
    ) -> RunResult<bool> {
        if generator.state() == GeneratorState::Created && sent.as_ref().is_some_and(|v| !matches!(v, Value::None)) {
            return Err(ExcType::type_error("can't send non-None value to a just-started generator"));
        }
        let mut frame = match generator.start() {
            GenState::Finished => return Ok(false),
            GenState::Running => return Err(FatalError::GeneratorAlreadyRunning.into()),
            GenState::Created(frame) => frame,
            GenState::Suspended(mut frame) => {
                if let Some(sent) = sent {
                    frame.push(sent);
                }
                frame
            }
        };
        trace!("resume generator {} ({resumer:?})", frame.name);
        frame.owner = Some(generator.clone());
        frame.resumer = resumer;
        if let Err(err) = self.push_frame(*frame) {
            generator.finish();
            return Err(err);
        }
        Ok(true)
    }

    /// Suspends the current generator frame after `YIELD_VALUE` or a delegated yield.
    pub(super) fn yield_frame(&mut self, value: Value) -> RunResult<Flow> {
        if self.frame()?.owner.is_none() {
            return Err(FatalError::invalid_code("yield outside a generator").into());
        }
        let mut frame = self.frames.pop().ok_or_else(|| RunError::internal("yield with no frame"))?;
        let resumer = frame.resumer;
        if let Some(generator) = frame.owner.take() {
            trace!("suspend generator {} (depth {})", frame.name, self.frames.len());
            generator.suspend(Box::new(frame));
        }
        match resumer {
            Resumer::Driver => Ok(Flow::Exit(FrameExit::Yield(value))),
            Resumer::ForIter { .. } => {
                self.push(value)?;
                Ok(Flow::Continue)
            }
            Resumer::YieldFrom => Ok(Flow::Signal(Signal::Yield(value))),
            Resumer::Call => Err(RunError::internal("generator frame was entered by a call")),
        }
    }

    /// `FOR_ITER`: advances the iterator at TOS, jumping to `exit` once it is exhausted.
    pub(super) fn for_iter(&mut self, exit: usize) -> RunResult<()> {
        let iterator = self.frame()?.top()?.clone();
        let next = match &iterator {
            Value::Generator(generator) => {
                if self.enter_generator(generator, Some(Value::None), Resumer::ForIter { exit })? {
                    // the generator's frame delivers the next item
                    return Ok(());
                }
                None
            }
            Value::Iterator(it) => it.borrow_mut().for_next()?,
            other => {
                return Err(ExcType::type_error(format!(
                    "'{}' object is not an iterator",
                    other.type_name()
                )));
            }
        };
        let frame = self.frame_mut()?;
        match next {
            Some(value) => frame.push(value),
            None => {
                frame.pop()?;
                frame.ip = exit;
            }
        }
        Ok(())
    }

    /// `YIELD_FROM`: sends TOS to the sub-iterator below it.
    ///
    /// While the sub-iterator yields, this frame stays on its `YIELD_FROM` so that
    /// every resume is forwarded. Completion replaces the sub-iterator with its
    /// return value.
    pub(super) fn yield_from(&mut self) -> RunResult<Option<Signal>> {
        let sent = self.pop()?;
        let receiver = self.frame()?.top()?.clone();
        match &receiver {
            Value::Generator(generator) => {
                let frame = self.frame_mut()?;
                frame.ip = frame.last_ip;
                if !self.enter_generator(generator, Some(sent), Resumer::YieldFrom)? {
                    let frame = self.frame_mut()?;
                    frame.ip = frame.last_ip + 1;
                    frame.pop()?;
                    frame.push(Value::None);
                }
                Ok(None)
            }
            Value::Iterator(it) => {
                if !matches!(sent, Value::None) {
                    return Err(ExcType::attribute_error(it.borrow().type_name(), "send"));
                }
                let next = it.borrow_mut().for_next()?;
                let frame = self.frame_mut()?;
                match next {
                    Some(value) => {
                        frame.ip = frame.last_ip;
                        Ok(Some(Signal::Yield(value)))
                    }
                    None => {
                        frame.pop()?;
                        frame.push(Value::None);
                        Ok(None)
                    }
                }
            }
            other => Err(ExcType::type_error(format!(
                "'{}' object is not an iterator",
                other.type_name()
            ))),
        }
    }

    // ========================================================================
    // Driver API
    // ========================================================================

    /// Resumes `generator`, sending `value` as the result of its current `yield`.
    ///
    /// The first resume must send `None`.
    ///
    /// # Errors
    /// [`VmError::GeneratorExhausted`] if it already finished, [`VmError::Unhandled`]
    /// if an exception escapes it, which also finishes it.
    pub fn resume(&mut self, generator: &Generator, value: Value) -> Result<Resumed, VmError> {
        match generator.state() {
            GeneratorState::Finished => return Err(VmError::GeneratorExhausted),
            GeneratorState::Running => return Err(FatalError::GeneratorAlreadyRunning.into()),
            GeneratorState::Created | GeneratorState::Suspended => {}
        }
        if !self.enter_generator(generator, Some(value), Resumer::Driver)? {
            return Err(VmError::GeneratorExhausted);
        }
        Ok(into_resumed(self.run_loop(None)?))
    }

    /// Raises `exc` inside `generator` at the point where it is paused.
    ///
    /// If the generator is delegating with `yield from`, the exception is raised in
    /// the innermost delegate. A finished generator returns the exception unchanged.
    pub fn throw(&mut self, generator: &Generator, exc: Exception) -> Result<Resumed, VmError> {
        match generator.state() {
            GeneratorState::Finished => return Err(UnhandledException::new(exc).into()),
            GeneratorState::Running => return Err(FatalError::GeneratorAlreadyRunning.into()),
            GeneratorState::Created | GeneratorState::Suspended => {}
        }
        self.enter_generator(generator, None, Resumer::Driver)?;
        if let Err(err) = self.enter_delegates() {
            self.abandon_frames();
            return Err(err.into());
        }
        let mut exc = exc;
        exc.push_trace(self.frame()?.trace_entry());
        Ok(into_resumed(self.run_loop(Some(Signal::Raise(exc)))?))
    }

    /// Pushes the frames of the generators the current frame is delegating to.
    fn enter_delegates(&mut self) -> RunResult<()> {
        loop {
            let frame = self.frame_mut()?;
            let at_yield_from = frame
                .code
                .instructions
                .get(frame.ip)
                .and_then(|ins| ins.opcode())
                == Some(Opcode::YieldFrom);
            let delegate = match frame.stack.last() {
                Some(Value::Generator(sub)) if at_yield_from && sub.state() == GeneratorState::Suspended => sub.clone(),
                _ => return Ok(()),
            };
            frame.last_ip = frame.ip;
            self.enter_generator(&delegate, None, Resumer::YieldFrom)?;
        }
    }

    /// Finishes `generator` by raising `GeneratorExit` inside it.
    ///
    /// # Errors
    /// `RuntimeError` if the generator yields instead of exiting, or any other
    /// exception it raises while handling `GeneratorExit`.
    pub fn close(&mut self, generator: &Generator) -> Result<(), VmError> {
        match generator.state() {
            GeneratorState::Created => {
                generator.finish();
                return Ok(());
            }
            GeneratorState::Finished => return Ok(()),
            GeneratorState::Running => return Err(FatalError::GeneratorAlreadyRunning.into()),
            GeneratorState::Suspended => {}
        }
        match self.throw(generator, Exception::new(ExcType::GeneratorExit, Vec::new())) {
            Ok(Resumed::Yielded(_)) => Err(RunError::from(Exception::with_message(
                ExcType::RuntimeError,
                "generator ignored GeneratorExit",
            ))
            .into()),
            Ok(Resumed::Completed(_)) => Ok(()),
            Err(VmError::Unhandled(exc)) if exc.exc_type() == ExcType::GeneratorExit => Ok(()),
            Err(err) => Err(err),
        }
    }
}

fn into_resumed(exit: FrameExit) -> Resumed {
    match exit {
        FrameExit::Yield(value) => Resumed::Yielded(value),
        FrameExit::Return(value) => Resumed::Completed(value),
    }
}
