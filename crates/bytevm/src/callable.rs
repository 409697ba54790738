//! Native (Rust) functions callable from bytecode.

use std::{fmt, rc::Rc};

use crate::{args::ArgValues, exception::RunResult, value::Value};

/// Handle through which native functions re-enter the VM.
///
/// Each method runs the VM to completion of the requested operation on the same
/// call stack, so a native can call back into bytecode or drive a generator.
pub trait Interpreter {
    /// Calls any callable value.
    fn call(&mut self, callable: &Value, args: ArgValues) -> RunResult<Value>;

    /// Returns an iterator over `value`, like the builtin `iter()`.
    fn iter(&mut self, value: &Value) -> RunResult<Value>;

    /// Advances an iterator or generator; `Ok(None)` when it is exhausted.
    fn next(&mut self, iterator: &Value) -> RunResult<Option<Value>>;

    /// Drains an iterable into a vector.
    fn collect(&mut self, iterable: &Value) -> RunResult<Vec<Value>> {
        let iterator = self.iter(iterable)?;
        let mut items = Vec::new();
        while let Some(item) = self.next(&iterator)? {
            items.push(item);
        }
        Ok(items)
    }
}

type NativeFn = dyn Fn(&mut dyn Interpreter, ArgValues) -> RunResult<Value>;

/// A function implemented in Rust.
#[derive(Clone)]
pub struct NativeFunction {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<Rc<str>>,
        func: impl Fn(&mut dyn Interpreter, ArgValues) -> RunResult<Value> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            func: Rc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, interp: &mut dyn Interpreter, args: ArgValues) -> RunResult<Value> {
        (self.func)(interp, args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}
