//! Implementation of the list() and tuple() constructors.

use crate::{args::ArgValues, callable::Interpreter, exception::RunResult, value::Value};

pub fn builtin_list(interp: &mut dyn Interpreter, args: ArgValues) -> RunResult<Value> {
    let items = match args.get_zero_one_arg("list")? {
        Some(iterable) => interp.collect(&iterable)?,
        None => Vec::new(),
    };
    Ok(Value::list(items))
}

/// `tuple(iterable)`; a tuple argument is returned as is.
pub fn builtin_tuple(interp: &mut dyn Interpreter, args: ArgValues) -> RunResult<Value> {
    match args.get_zero_one_arg("tuple")? {
        Some(value @ Value::Tuple(_)) => Ok(value),
        Some(iterable) => Ok(Value::tuple(interp.collect(&iterable)?)),
        None => Ok(Value::tuple(Vec::new())),
    }
}
