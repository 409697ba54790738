//! Built-in functions and the default builtins namespace.
//!
//! Every frame falls back to the builtins namespace after its globals. The
//! default namespace holds one native function per [`BuiltinsFunctions`]
//! variant and every exception class under its own name.

mod abs;
mod isinstance;
mod iter;
mod len;
mod sequence;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    args::ArgValues,
    callable::{Interpreter, NativeFunction},
    exception::{ExcType, RunResult},
    namespace::Namespace,
    types::Range,
    value::Value,
};

/// Enumerates the native functions installed by [`default_builtins`].
///
/// Uses strum derives for `Display`, `FromStr` and iteration; all variants
/// serialize to lowercase (e.g. `IsInstance` -> "isinstance").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinsFunctions {
    Abs,
    IsInstance,
    Iter,
    Len,
    List,
    Next,
    Range,
    Tuple,
}

impl BuiltinsFunctions {
    /// Executes the builtin.
    ///
    /// `interp` lets `iter`, `next`, `list` and `tuple` drive generators.
    pub fn call(self, interp: &mut dyn Interpreter, args: ArgValues) -> RunResult<Value> {
        match self {
            Self::Abs => abs::builtin_abs(args),
            Self::IsInstance => isinstance::builtin_isinstance(args),
            Self::Iter => iter::builtin_iter(interp, args),
            Self::Len => len::builtin_len(args),
            Self::List => sequence::builtin_list(interp, args),
            Self::Next => iter::builtin_next(interp, args),
            Self::Range => Range::init(args),
            Self::Tuple => sequence::builtin_tuple(interp, args),
        }
    }

    /// Wraps the builtin as a value that bytecode can call.
    #[must_use]
    pub fn to_native(self) -> NativeFunction {
        let name: &'static str = self.into();
        NativeFunction::new(name, move |interp, args| self.call(interp, args))
    }
}

/// Creates a namespace with every builtin function and exception class.
#[must_use]
pub fn default_builtins() -> Namespace {
    let builtins = Namespace::new();
    for function in BuiltinsFunctions::iter() {
        builtins.set(function.to_string(), Value::Native(function.to_native()));
    }
    for exc_type in ExcType::iter() {
        builtins.set(exc_type.to_string(), Value::ExcType(exc_type));
    }
    builtins
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn names_are_lowercase() {
        assert_eq!(BuiltinsFunctions::IsInstance.to_string(), "isinstance");
        assert_eq!(BuiltinsFunctions::from_str("len"), Ok(BuiltinsFunctions::Len));
        assert!(BuiltinsFunctions::from_str("print").is_err());
    }

    #[test]
    fn default_namespace_has_functions_and_classes() {
        let builtins = default_builtins();
        assert!(matches!(builtins.get("range"), Some(Value::Native(_))));
        assert!(matches!(builtins.get("ValueError"), Some(Value::ExcType(ExcType::ValueError))));
        assert!(matches!(
            builtins.get("BaseException"),
            Some(Value::ExcType(ExcType::BaseException))
        ));
        assert!(builtins.get("print").is_none());
    }
}
