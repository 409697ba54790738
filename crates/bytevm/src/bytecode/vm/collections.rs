//! Collection building, unpacking and subscript helpers for the VM.

use super::VirtualMachine;
use crate::{
    bytecode::Opcode,
    callable::Interpreter,
    exception::{ExcType, FatalError, RunResult},
    operators::OperatorHooks,
    resource::ResourceTracker,
    types::Dict,
    value::Value,
};

impl<H: OperatorHooks, T: ResourceTracker> VirtualMachine<H, T> {
    /// Builds a dict from the top `2 * count` values, pushed as key/value pairs.
    pub(super) fn build_map(&mut self, count: usize) -> RunResult<()> {
        let items = self.popn(count * 2)?;
        let mut iter = items.into_iter();
        let dict = Dict::new();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            dict.set(key, value)?;
        }
        self.push(Value::Dict(dict))?;
        Ok(())
    }

    /// `BUILD_CONST_KEY_MAP`: the keys come as a tuple on TOS, above the values.
    pub(super) fn build_const_key_map(&mut self, count: usize) -> RunResult<()> {
        let Value::Tuple(keys) = self.pop()? else {
            return Err(FatalError::invalid_code("BUILD_CONST_KEY_MAP expects a tuple of keys").into());
        };
        if keys.len() != count {
            return Err(FatalError::InvalidOperand {
                opcode: Opcode::BuildConstKeyMap,
                operand: count as u32,
            }
            .into());
        }
        let values = self.popn(count)?;
        let dict = Dict::from_pairs(keys.iter().cloned().zip(values))?;
        self.push(Value::Dict(dict))?;
        Ok(())
    }

    /// `BUILD_STRING`: concatenates `count` strings.
    pub(super) fn build_string(&mut self, count: usize) -> RunResult<()> {
        let parts = self.popn(count)?;
        let mut out = String::new();
        for part in &parts {
            match part {
                Value::Str(s) => out.push_str(s),
                other => {
                    return Err(FatalError::invalid_code(format!(
                        "BUILD_STRING expects strings, found '{}'",
                        other.type_name()
                    ))
                    .into());
                }
            }
        }
        self.push(Value::str(&out))?;
        Ok(())
    }

    /// `UNPACK_SEQUENCE`: pushes exactly `count` items so the first ends on top.
    pub(super) fn unpack_sequence(&mut self, count: usize) -> RunResult<()> {
        let value = self.pop()?;
        let items = match &value {
            Value::Tuple(items) => items.to_vec(),
            Value::List(items) => items.borrow().clone(),
            other => Interpreter::collect(self, other)?,
        };
        if items.len() < count {
            return Err(ExcType::value_error(format!(
                "not enough values to unpack (expected {count}, got {})",
                items.len()
            )));
        }
        if items.len() > count {
            return Err(ExcType::value_error(format!("too many values to unpack (expected {count})")));
        }
        let frame = self.frame_mut()?;
        frame.stack.extend(items.into_iter().rev());
        Ok(())
    }

    /// `LIST_APPEND`: appends TOS to the list `depth` slots below it, for comprehensions.
    pub(super) fn list_append(&mut self, depth: usize) -> RunResult<()> {
        let value = self.pop()?;
        match self.frame()?.peek(depth)? {
            Value::List(list) => {
                list.borrow_mut().push(value);
                Ok(())
            }
            _ => Err(FatalError::invalid_code("LIST_APPEND target is not a list").into()),
        }
    }

    /// `MAP_ADD`: `dict[TOS] = TOS1` for the dict `depth` slots below, for comprehensions.
    pub(super) fn map_add(&mut self, depth: usize) -> RunResult<()> {
        let key = self.pop()?;
        let value = self.pop()?;
        match self.frame()?.peek(depth)? {
            Value::Dict(dict) => dict.set(key, value),
            _ => Err(FatalError::invalid_code("MAP_ADD target is not a dict").into()),
        }
    }

    pub(super) fn binary_subscr(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let obj = self.pop()?;
        let value = self
            .hooks
            .getitem(&obj, &index)?
            .ok_or_else(|| ExcType::type_error(format!("'{}' object is not subscriptable", obj.type_name())))?;
        self.push(value)?;
        Ok(())
    }

    /// `STORE_SUBSCR`: `TOS1[TOS] = TOS2`.
    pub(super) fn store_subscr(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let obj = self.pop()?;
        let value = self.pop()?;
        self.hooks.setitem(&obj, &index, value)?.ok_or_else(|| {
            ExcType::type_error(format!(
                "'{}' object does not support item assignment",
                obj.type_name()
            ))
        })
    }

    pub(super) fn delete_subscr(&mut self) -> RunResult<()> {
        let index = self.pop()?;
        let obj = self.pop()?;
        self.hooks.delitem(&obj, &index)?.ok_or_else(|| {
            ExcType::type_error(format!(
                "'{}' object doesn't support item deletion",
                obj.type_name()
            ))
        })
    }
}
