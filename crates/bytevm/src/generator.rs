//! Generator objects.
//!
//! A generator owns its frame only while the frame is off the call stack. Resuming
//! moves the frame onto the VM's call stack and leaves the generator `Running`;
//! a yield moves it back. The frame points back at its generator (`Frame::owner`)
//! only while it is on the call stack, so no reference cycle outlives a resume.

use std::{cell::RefCell, fmt, rc::Rc};

use crate::{bytecode::Frame, value::Value};

/// Value produced by resuming a generator.
#[derive(Debug, Clone)]
pub enum Resumed {
    /// The generator yielded and can be resumed again.
    Yielded(Value),
    /// The generator returned; it is now exhausted.
    Completed(Value),
}

impl Resumed {
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Yielded(v) | Self::Completed(v) => v,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Execution state of a generator, as reported by [`Generator::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum GeneratorState {
    /// Created by a call but never resumed.
    Created,
    /// Paused at a yield.
    Suspended,
    /// Its frame is on the call stack.
    Running,
    Finished,
}

#[derive(Debug)]
pub(crate) enum GenState {
    Created(Box<Frame>),
    Suspended(Box<Frame>),
    Running,
    Finished,
}

#[derive(Debug)]
struct GeneratorInner {
    name: Rc<str>,
    state: GenState,
}

/// A suspendable computation, shared by every value that refers to it.
#[derive(Clone)]
pub struct Generator(Rc<RefCell<GeneratorInner>>);

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.0.borrow();
        f.debug_struct("Generator")
            .field("name", &inner.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Generator {
    /// Wraps a frame that has not started executing.
    pub(crate) fn new(frame: Frame) -> Self {
        Self(Rc::new(RefCell::new(GeneratorInner {
            name: frame.name.clone(),
            state: GenState::Created(Box::new(frame)),
        })))
    }

    #[must_use]
    pub fn name(&self) -> Rc<str> {
        self.0.borrow().name.clone()
    }

    #[must_use]
    pub fn state(&self) -> GeneratorState {
        match self.0.borrow().state {
            GenState::Created(_) => GeneratorState::Created,
            GenState::Suspended(_) => GeneratorState::Suspended,
            GenState::Running => GeneratorState::Running,
            GenState::Finished => GeneratorState::Finished,
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.0.borrow().state, GenState::Finished)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Takes the frame out for resumption, leaving the generator `Running`.
    ///
    /// `Running` and `Finished` generators are left untouched and their state returned.
    pub(crate) fn start(&self) -> GenState {
        let mut inner = self.0.borrow_mut();
        match inner.state {
            GenState::Created(_) | GenState::Suspended(_) => std::mem::replace(&mut inner.state, GenState::Running),
            GenState::Running => GenState::Running,
            GenState::Finished => GenState::Finished,
        }
    }

    /// Stores the frame of a generator that yielded.
    pub(crate) fn suspend(&self, frame: Box<Frame>) {
        self.0.borrow_mut().state = GenState::Suspended(frame);
    }

    /// Marks the generator exhausted, dropping any frame it held.
    pub(crate) fn finish(&self) {
        self.0.borrow_mut().state = GenState::Finished;
    }
}
