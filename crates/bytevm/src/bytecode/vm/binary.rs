//! Arithmetic and comparison helpers for the VM.
//!
//! Operand types are never inspected here; [`OperatorHooks`] decides, and an
//! unsupported combination becomes the usual `TypeError`.

use super::VirtualMachine;
use crate::{
    bytecode::CompareOp,
    exception::{ExcType, RunResult},
    operators::{BinaryOp, OperatorHooks, UnaryOp},
    resource::ResourceTracker,
    value::Value,
};

impl<H: OperatorHooks, T: ResourceTracker> VirtualMachine<H, T> {
    /// `BINARY_*` and `INPLACE_*`: pops two operands and pushes the result.
    pub(super) fn binary(&mut self, op: BinaryOp, inplace: bool) -> RunResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = if inplace {
            self.hooks.inplace(op, &lhs, &rhs)?
        } else {
            self.hooks.binary(op, &lhs, &rhs)?
        };
        match result {
            Some(value) => {
                self.push(value)?;
                Ok(())
            }
            None if inplace => Err(ExcType::binary_type_error(
                &format!("{op}="),
                lhs.type_name(),
                rhs.type_name(),
            )),
            None => Err(ExcType::binary_type_error(
                op.into(),
                lhs.type_name(),
                rhs.type_name(),
            )),
        }
    }

    /// `UNARY_POSITIVE`, `UNARY_NEGATIVE` and `UNARY_INVERT`.
    pub(super) fn unary(&mut self, op: UnaryOp) -> RunResult<()> {
        let operand = self.pop()?;
        let value = self
            .hooks
            .unary(op, &operand)?
            .ok_or_else(|| ExcType::unary_type_error(op.into(), operand.type_name()))?;
        self.push(value)?;
        Ok(())
    }

    /// `COMPARE_OP`: pops the right operand, then the left, and pushes a bool.
    pub(super) fn compare(&mut self, op: CompareOp) -> RunResult<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let result = match op {
            CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => self
                .hooks
                .compare(op, &lhs, &rhs)?
                .ok_or_else(|| ExcType::compare_type_error(&op.to_string(), lhs.type_name(), rhs.type_name()))?,
            CompareOp::Eq => self.hooks.eq(&lhs, &rhs)?,
            CompareOp::Ne => !self.hooks.eq(&lhs, &rhs)?,
            CompareOp::In | CompareOp::NotIn => {
                let found = self.hooks.contains(&rhs, &lhs)?.ok_or_else(|| {
                    ExcType::type_error(format!("argument of type '{}' is not iterable", rhs.type_name()))
                })?;
                found == (op == CompareOp::In)
            }
            CompareOp::Is => lhs.is(&rhs),
            CompareOp::IsNot => !lhs.is(&rhs),
            CompareOp::ExceptionMatch => self.exception_match(&lhs, &rhs)?,
        };
        self.push(Value::Bool(result))?;
        Ok(())
    }
}
