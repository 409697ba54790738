//! Implementation of the abs() builtin function.

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    value::Value,
};

/// Implementation of the abs() builtin function.
///
/// Returns the absolute value of a number. `abs(i64::MIN)` does not fit and
/// raises `OverflowError`.
pub fn builtin_abs(args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("abs")?;
    match value {
        Value::Int(n) => n.checked_abs().map(Value::Int).ok_or_else(ExcType::overflow),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        other => Err(ExcType::type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        ))),
    }
}
