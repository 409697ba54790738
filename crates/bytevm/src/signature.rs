//! Argument binding against a code object's parameter layout.
//!
//! Parameters occupy the first fast-local slots of a frame in this order:
//! ```text
//! [positional-or-keyword][keyword-only][*args?][**kwargs?]
//! ```
//! which is the layout the reference compiler emits in `co_varnames`.

use std::rc::Rc;

use crate::{
    args::ArgValues,
    bytecode::{CodeFlags, CodeObject},
    exception::{ExcType, RunError, RunResult},
    types::Dict,
    value::Value,
};

/// A view of the parameters declared by a code object.
#[derive(Debug, Clone, Copy)]
pub struct Signature<'a> {
    /// Positional-or-keyword parameter names.
    args: &'a [Rc<str>],
    /// Keyword-only parameter names.
    kwonly: &'a [Rc<str>],
    var_args: bool,
    var_kwargs: bool,
}

impl<'a> Signature<'a> {
    /// Reads the parameter layout of `code`.
    ///
    /// Counts that disagree with `varnames` are rejected by `CodeObject::verify`,
    /// so slicing here is clamped rather than checked.
    #[must_use]
    pub fn of(code: &'a CodeObject) -> Self {
        let argcount = (code.argcount as usize).min(code.varnames.len());
        let kwonly_end = (argcount + code.kwonlyargcount as usize).min(code.varnames.len());
        Self {
            args: &code.varnames[..argcount],
            kwonly: &code.varnames[argcount..kwonly_end],
            var_args: code.flags.contains(CodeFlags::VARARGS),
            var_kwargs: code.flags.contains(CodeFlags::VARKEYWORDS),
        }
    }

    /// Number of fast-local slots taken by parameters.
    #[must_use]
    pub fn total_slots(&self) -> usize {
        self.args.len() + self.kwonly.len() + usize::from(self.var_args) + usize::from(self.var_kwargs)
    }

    /// Returns true if binding can skip keyword and default handling.
    fn is_simple(&self) -> bool {
        self.kwonly.is_empty() && !self.var_args && !self.var_kwargs
    }

    /// Binds call arguments to parameter slots.
    ///
    /// Implements the reference calling convention:
    /// 1. Bind positional args to parameters in order
    /// 2. Collect excess positional args into the `*args` tuple
    /// 3. Bind keyword args by name, excess ones into the `**kwargs` dict
    /// 4. Apply `defaults` (for the trailing positional parameters) and `kwdefaults`
    ///
    /// Returns `nlocals` slots with the parameters filled in and every other slot empty.
    ///
    /// # Errors
    /// `TypeError` if too few or too many positional arguments are given, a required
    /// keyword-only argument is missing, a keyword is unexpected, or the same argument
    /// is passed twice.
    pub fn bind(
        &self,
        func_name: &str,
        args: ArgValues,
        defaults: &[Value],
        kwdefaults: Option<&Dict>,
        nlocals: usize,
    ) -> RunResult<Vec<Option<Value>>> {
        let mut slots: Vec<Option<Value>> = vec![None; nlocals.max(self.total_slots())];
        let (positional, keywords) = args.into_parts();

        // fast path: exact positional call without defaults in play
        if self.is_simple() && keywords.is_empty() && positional.len() == self.args.len() {
            for (slot, value) in slots.iter_mut().zip(positional) {
                *slot = Some(value);
            }
            return Ok(slots);
        }

        let n_args = self.args.len();
        let positional_count = positional.len();
        if !self.var_args && positional_count > n_args {
            let kwonly_given = keywords
                .iter()
                .filter(|(name, _)| self.kwonly.iter().any(|p| p == name))
                .count();
            return Err(self.too_many_positional(func_name, defaults.len(), positional_count, kwonly_given));
        }

        let mut positional = positional.into_iter();
        for slot in slots.iter_mut().take(n_args) {
            match positional.next() {
                Some(value) => *slot = Some(value),
                None => break,
            }
        }
        let excess: Vec<Value> = positional.collect();
        let var_args_slot = n_args + self.kwonly.len();
        if self.var_args {
            slots[var_args_slot] = Some(Value::tuple(excess));
        }

        let excess_kwargs = Dict::new();
        for (name, value) in keywords {
            let index = self
                .args
                .iter()
                .position(|p| *p == name)
                .or_else(|| self.kwonly.iter().position(|p| *p == name).map(|i| n_args + i));
            match index {
                Some(index) => {
                    if slots[index].is_some() {
                        return Err(ExcType::type_error(format!(
                            "{func_name}() got multiple values for argument '{name}'"
                        )));
                    }
                    slots[index] = Some(value);
                }
                None if self.var_kwargs => {
                    if excess_kwargs.contains(&Value::Str(name.clone()))? {
                        return Err(ExcType::type_error(format!(
                            "{func_name}() got multiple values for keyword argument '{name}'"
                        )));
                    }
                    excess_kwargs.set(Value::Str(name), value)?;
                }
                None => {
                    return Err(ExcType::type_error(format!(
                        "{func_name}() got an unexpected keyword argument '{name}'"
                    )));
                }
            }
        }

        // defaults cover the last `defaults.len()` positional parameters
        let first_default = n_args.saturating_sub(defaults.len());
        let mut missing: Vec<&str> = Vec::new();
        for (i, name) in self.args.iter().enumerate() {
            if slots[i].is_some() {
                continue;
            }
            if i >= first_default {
                slots[i] = defaults.get(i + defaults.len() - n_args).cloned();
            } else {
                missing.push(name);
            }
        }
        if !missing.is_empty() {
            return Err(missing_error(func_name, "positional", &missing));
        }

        for (i, name) in self.kwonly.iter().enumerate() {
            let index = n_args + i;
            if slots[index].is_some() {
                continue;
            }
            match kwdefaults.map(|d| d.get(&Value::Str(name.clone()))).transpose()?.flatten() {
                Some(value) => slots[index] = Some(value),
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(missing_error(func_name, "keyword-only", &missing));
        }

        if self.var_kwargs {
            slots[var_args_slot + usize::from(self.var_args)] = Some(Value::Dict(excess_kwargs));
        }
        Ok(slots)
    }

    /// Matches CPython's format:
    /// - `f() takes 2 positional arguments but 3 were given`
    /// - `f() takes from 1 to 2 positional arguments but 3 were given`
    /// - `... but 3 positional arguments (and 1 keyword-only argument) were given`
    fn too_many_positional(&self, func_name: &str, n_defaults: usize, actual: usize, kwonly_given: usize) -> RunError {
        let max = self.args.len();
        let min = max.saturating_sub(n_defaults);
        let takes = if min == max {
            format!("{max} positional argument{}", plural(max))
        } else {
            format!("from {min} to {max} positional arguments")
        };
        let given = if kwonly_given > 0 {
            format!(
                "{actual} positional argument{} (and {kwonly_given} keyword-only argument{}) were",
                plural(actual),
                plural(kwonly_given)
            )
        } else if actual == 1 {
            "1 was".to_owned()
        } else {
            format!("{actual} were")
        };
        ExcType::type_error(format!("{func_name}() takes {takes} but {given} given"))
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

/// `f() missing 2 required positional arguments: 'a' and 'b'`
fn missing_error(func_name: &str, kind: &str, names: &[&str]) -> RunError {
    let count = names.len();
    ExcType::type_error(format!(
        "{func_name}() missing {count} required {kind} argument{}: {}",
        plural(count),
        format_param_names(names)
    ))
}

/// Formats `'a'`, `'a' and 'b'`, or `'a', 'b', and 'c'`.
fn format_param_names(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{a} and {b}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}
