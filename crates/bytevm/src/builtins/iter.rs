//! Implementation of the iter() and next() builtin functions.

use crate::{
    args::ArgValues,
    callable::Interpreter,
    exception::{ExcType, Exception, RunResult},
    value::Value,
};

pub fn builtin_iter(interp: &mut dyn Interpreter, args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("iter")?;
    interp.iter(&value)
}

/// `next(iterator[, default])`.
///
/// An exhausted iterator returns `default` when given, otherwise raises `StopIteration`.
pub fn builtin_next(interp: &mut dyn Interpreter, args: ArgValues) -> RunResult<Value> {
    let (iterator, default) = args.get_one_two_args("next")?;
    match interp.next(&iterator)? {
        Some(value) => Ok(value),
        None => default.ok_or_else(|| Exception::new(ExcType::StopIteration, Vec::new()).into()),
    }
}
