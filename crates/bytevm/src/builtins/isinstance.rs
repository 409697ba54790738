//! Implementation of the isinstance() builtin function.

use crate::{
    args::ArgValues,
    exception::{ExcType, RunResult},
    value::Value,
};

/// Implementation of the isinstance() builtin function.
///
/// Exception classes are the only classes values can be tested against, so the
/// check follows the exception hierarchy: `isinstance(KeyError(), LookupError)`.
pub fn builtin_isinstance(args: ArgValues) -> RunResult<Value> {
    let (obj, classinfo) = args.get_two_args("isinstance")?;
    let obj_type = match &obj {
        Value::Exception(exc) => Some(exc.exc_type()),
        _ => None,
    };
    isinstance_check(obj_type, &classinfo)
        .map(Value::Bool)
        .map_err(|()| ExcType::type_error("isinstance() arg 2 must be a type or tuple of types"))
}

/// Checks `obj_type` against a class or a (possibly nested) tuple of classes.
///
/// `Err(())` means `classinfo` is neither.
fn isinstance_check(obj_type: Option<ExcType>, classinfo: &Value) -> Result<bool, ()> {
    match classinfo {
        Value::ExcType(handler_type) => Ok(obj_type.is_some_and(|t| t.is_subclass_of(*handler_type))),
        Value::Tuple(items) => {
            for item in items.iter() {
                if isinstance_check(obj_type, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(()),
    }
}
