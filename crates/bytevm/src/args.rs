use std::rc::Rc;

use crate::{
    exception::{ExcType, RunResult},
    value::Value,
};

/// Arguments of a single call: positional values followed by keyword pairs.
///
/// Keyword order is the order of the call site, which matters for error messages
/// and for the `**kwargs` dict of the callee.
#[derive(Debug, Clone, Default)]
pub struct ArgValues {
    positional: Vec<Value>,
    keywords: Vec<(Rc<str>, Value)>,
}

impl ArgValues {
    #[must_use]
    pub fn new(positional: Vec<Value>, keywords: Vec<(Rc<str>, Value)>) -> Self {
        Self { positional, keywords }
    }

    #[must_use]
    pub fn positional_only(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    #[must_use]
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    #[must_use]
    pub fn keywords(&self) -> &[(Rc<str>, Value)] {
        &self.keywords
    }

    pub fn into_parts(self) -> (Vec<Value>, Vec<(Rc<str>, Value)>) {
        (self.positional, self.keywords)
    }

    /// Total number of arguments, positional and keyword.
    #[must_use]
    pub fn count(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    /// Raises `TypeError` if any keyword argument was passed.
    pub fn check_no_kwargs(&self, name: &str) -> RunResult<()> {
        if self.keywords.is_empty() {
            Ok(())
        } else {
            Err(ExcType::type_error(format!("{name}() takes no keyword arguments")))
        }
    }

    /// Checks that exactly one positional argument was passed, returning it.
    pub fn get_one_arg(self, name: &str) -> RunResult<Value> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        match <[Value; 1]>::try_from(self.positional) {
            Ok([value]) => Ok(value),
            Err(_) => Err(ExcType::arg_count_error(name, 1, count)),
        }
    }

    /// Checks that exactly two positional arguments were passed, returning them.
    pub fn get_two_args(self, name: &str) -> RunResult<(Value, Value)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        match <[Value; 2]>::try_from(self.positional) {
            Ok([a, b]) => Ok((a, b)),
            Err(_) => Err(ExcType::arg_count_error(name, 2, count)),
        }
    }

    /// Checks that one or two positional arguments were passed.
    pub fn get_one_two_args(self, name: &str) -> RunResult<(Value, Option<Value>)> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next(), iter.next()) {
            (Some(a), b, None) => Ok((a, b)),
            (None, ..) => Err(ExcType::type_error(format!("{name} expected at least 1 argument, got 0"))),
            _ => Err(ExcType::type_error(format!(
                "{name} expected at most 2 arguments, got {count}"
            ))),
        }
    }

    /// Accepts zero or one positional argument.
    pub fn get_zero_one_arg(self, name: &str) -> RunResult<Option<Value>> {
        self.check_no_kwargs(name)?;
        let count = self.positional.len();
        let mut iter = self.positional.into_iter();
        match (iter.next(), iter.next()) {
            (a, None) => Ok(a),
            _ => Err(ExcType::type_error(format!(
                "{name} expected at most 1 argument, got {count}"
            ))),
        }
    }
}

impl From<Vec<Value>> for ArgValues {
    fn from(positional: Vec<Value>) -> Self {
        Self::positional_only(positional)
    }
}
