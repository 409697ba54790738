//! Implementation of the len() builtin function.

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    value::Value,
};

pub fn builtin_len(args: ArgValues) -> RunResult<Value> {
    let value = args.get_one_arg("len")?;
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::Tuple(items) => items.len(),
        Value::List(items) => items.borrow().len(),
        Value::Dict(dict) => dict.len(),
        Value::Range(range) => range.len(),
        other => {
            return Err(ExcType::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )));
        }
    };
    i64::try_from(len).map(Value::Int).map_err(|_| ExcType::overflow())
}
