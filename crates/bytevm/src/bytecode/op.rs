//! Opcode definitions for the bytecode VM.
//!
//! Opcode numbers follow the reference compiler's 3.7 wordcode table, so a code
//! object produced by that compiler decodes without translation. Every instruction
//! carries an operand; opcodes below [`HAVE_ARGUMENT`] ignore it.
//!
//! # Jump operands
//!
//! Jump targets are instruction indices, not byte offsets. `JUMP_FORWARD`, `FOR_ITER`
//! and the three `SETUP_*` opcodes are relative to the following instruction; all
//! other jumps are absolute.

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};

/// Opcodes at or above this value use their operand.
pub const HAVE_ARGUMENT: u8 = 90;

/// Opcode discriminant.
///
/// With `#[repr(u8)]`, each opcode is exactly 1 byte. Uses `strum::FromRepr` for
/// byte-to-opcode conversion; bytes without a variant are unknown opcodes.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    // === Stack Operations ===
    /// Discard TOS.
    PopTop = 1,
    /// Swap top two: [a, b] -> [b, a].
    RotTwo = 2,
    /// Rotate top three: [a, b, c] -> [c, a, b].
    RotThree = 3,
    DupTop = 4,
    DupTopTwo = 5,
    Nop = 9,

    // === Unary Operations ===
    UnaryPositive = 10,
    UnaryNegative = 11,
    UnaryNot = 12,
    UnaryInvert = 15,

    // === Binary Operations ===
    BinaryMatrixMultiply = 16,
    InplaceMatrixMultiply = 17,
    BinaryPower = 19,
    BinaryMultiply = 20,
    BinaryModulo = 22,
    BinaryAdd = 23,
    BinarySubtract = 24,
    /// TOS1[TOS]
    BinarySubscr = 25,
    BinaryFloorDivide = 26,
    BinaryTrueDivide = 27,
    InplaceFloorDivide = 28,
    InplaceTrueDivide = 29,
    InplaceAdd = 55,
    InplaceSubtract = 56,
    InplaceMultiply = 57,
    InplaceModulo = 59,
    /// TOS1[TOS] = TOS2
    StoreSubscr = 60,
    DeleteSubscr = 61,
    BinaryLshift = 62,
    BinaryRshift = 63,
    BinaryAnd = 64,
    BinaryXor = 65,
    BinaryOr = 66,
    InplacePower = 67,

    // === Iteration & Generators ===
    GetIter = 68,
    GetYieldFromIter = 69,
    /// Delegates to the sub-iterator at TOS1, sending TOS.
    YieldFrom = 72,

    InplaceLshift = 75,
    InplaceRshift = 76,
    InplaceAnd = 77,
    InplaceXor = 78,
    InplaceOr = 79,

    // === Blocks ===
    BreakLoop = 80,
    ReturnValue = 83,
    YieldValue = 86,
    PopBlock = 87,
    /// Finishes a `finally` body or an unmatched `except` chain.
    EndFinally = 88,
    /// Leaves an `except` body, restoring the previously handled exception.
    PopExcept = 89,

    // === Opcodes with an operand ===
    /// names[arg] = TOS
    StoreName = 90,
    DeleteName = 91,
    /// Pushes `arg` items from TOS, first item ending on top.
    UnpackSequence = 92,
    /// Relative jump taken when the iterator is exhausted.
    ForIter = 93,
    StoreAttr = 95,
    DeleteAttr = 96,
    StoreGlobal = 97,
    DeleteGlobal = 98,
    LoadConst = 100,
    LoadName = 101,
    BuildTuple = 102,
    BuildList = 103,
    /// Builds a dict from `arg` key/value pairs.
    BuildMap = 105,
    LoadAttr = 106,
    /// Operand indexes [`CompareOp`].
    CompareOp = 107,
    JumpForward = 110,
    JumpIfFalseOrPop = 111,
    JumpIfTrueOrPop = 112,
    JumpAbsolute = 113,
    PopJumpIfFalse = 114,
    PopJumpIfTrue = 115,
    LoadGlobal = 116,
    /// Continue inside a `try` body; the operand is the absolute loop start.
    ContinueLoop = 119,
    SetupLoop = 120,
    SetupExcept = 121,
    SetupFinally = 122,
    LoadFast = 124,
    StoreFast = 125,
    DeleteFast = 126,
    /// 0 = re-raise, 1 = raise TOS, 2 = raise TOS1 from TOS.
    RaiseVarargs = 130,
    CallFunction = 131,
    /// Flags: 0x08 closure, 0x04 annotations, 0x02 kwdefaults, 0x01 defaults.
    MakeFunction = 132,
    /// Pushes the cell object for cellvars/freevars slot `arg`.
    LoadClosure = 135,
    LoadDeref = 136,
    StoreDeref = 137,
    DeleteDeref = 138,
    /// TOS is a tuple of keyword names for the last arguments.
    CallFunctionKw = 141,
    /// Bit 0 of the operand: a kwargs dict is on TOS.
    CallFunctionEx = 142,
    ExtendedArg = 144,
    /// Appends TOS to the list `arg` slots below.
    ListAppend = 145,
    /// Sets dict[TOS] = TOS1 on the dict `arg` slots below.
    MapAdd = 147,
    /// Like `BUILD_MAP` with keys supplied as a tuple on TOS.
    BuildConstKeyMap = 156,
    BuildString = 157,
}

impl Opcode {
    /// Returns true if the opcode reads its operand.
    #[must_use]
    pub fn has_arg(self) -> bool {
        self as u8 >= HAVE_ARGUMENT
    }

    /// Returns true for jumps whose operand is relative to the next instruction.
    #[must_use]
    pub fn is_relative_jump(self) -> bool {
        matches!(
            self,
            Self::JumpForward | Self::ForIter | Self::SetupLoop | Self::SetupExcept | Self::SetupFinally
        )
    }

    /// Returns true for jumps whose operand is an absolute instruction index.
    #[must_use]
    pub fn is_absolute_jump(self) -> bool {
        matches!(
            self,
            Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::ContinueLoop
        )
    }

    /// Resolves the branch target of a jump, given the index of the next instruction.
    ///
    /// Returns `None` for opcodes that do not jump.
    #[must_use]
    pub fn jump_target(self, arg: u32, next: usize) -> Option<usize> {
        if self.is_relative_jump() {
            Some(next + arg as usize)
        } else if self.is_absolute_jump() {
            Some(arg as usize)
        } else {
            None
        }
    }

    /// Returns true if the opcode never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ReturnValue
                | Self::RaiseVarargs
                | Self::JumpAbsolute
                | Self::JumpForward
                | Self::BreakLoop
                | Self::ContinueLoop
        )
    }

    /// Net effect on the operand stack depth.
    ///
    /// `jump` selects the effect when the branch is taken, for opcodes whose two
    /// exits leave different depths. An exception entering a `SETUP_EXCEPT` or
    /// `SETUP_FINALLY` handler pushes six values: the previously handled exception
    /// triple and the new one.
    #[must_use]
    pub fn stack_effect(self, arg: u32, jump: bool) -> i64 {
        let arg = i64::from(arg);
        match self {
            Self::Nop | Self::ExtendedArg | Self::RotTwo | Self::RotThree => 0,
            Self::PopTop => -1,
            Self::DupTop => 1,
            Self::DupTopTwo => 2,

            Self::UnaryPositive | Self::UnaryNegative | Self::UnaryNot | Self::UnaryInvert => 0,

            Self::BinaryMatrixMultiply
            | Self::InplaceMatrixMultiply
            | Self::BinaryPower
            | Self::BinaryMultiply
            | Self::BinaryModulo
            | Self::BinaryAdd
            | Self::BinarySubtract
            | Self::BinarySubscr
            | Self::BinaryFloorDivide
            | Self::BinaryTrueDivide
            | Self::InplaceFloorDivide
            | Self::InplaceTrueDivide
            | Self::InplaceAdd
            | Self::InplaceSubtract
            | Self::InplaceMultiply
            | Self::InplaceModulo
            | Self::BinaryLshift
            | Self::BinaryRshift
            | Self::BinaryAnd
            | Self::BinaryXor
            | Self::BinaryOr
            | Self::InplacePower
            | Self::InplaceLshift
            | Self::InplaceRshift
            | Self::InplaceAnd
            | Self::InplaceXor
            | Self::InplaceOr
            | Self::CompareOp => -1,
            Self::StoreSubscr => -3,
            Self::DeleteSubscr => -2,

            Self::GetIter | Self::GetYieldFromIter => 0,
            Self::YieldFrom => -1,
            Self::YieldValue => 0,
            Self::ForIter => {
                if jump {
                    -1
                } else {
                    1
                }
            }

            Self::BreakLoop | Self::ContinueLoop | Self::PopBlock | Self::SetupLoop => 0,
            Self::ReturnValue => -1,
            Self::SetupExcept | Self::SetupFinally => {
                if jump {
                    6
                } else {
                    0
                }
            }
            Self::EndFinally => -1,
            Self::PopExcept => -3,

            Self::StoreName | Self::StoreGlobal | Self::StoreFast | Self::StoreDeref => -1,
            Self::DeleteName | Self::DeleteGlobal | Self::DeleteFast | Self::DeleteDeref => 0,
            Self::LoadConst
            | Self::LoadName
            | Self::LoadGlobal
            | Self::LoadFast
            | Self::LoadClosure
            | Self::LoadDeref => 1,
            Self::LoadAttr => 0,
            Self::StoreAttr => -2,
            Self::DeleteAttr => -1,

            Self::UnpackSequence => arg - 1,
            Self::BuildTuple | Self::BuildList | Self::BuildString => 1 - arg,
            Self::BuildMap => 1 - 2 * arg,
            Self::BuildConstKeyMap => -arg,
            Self::ListAppend => -1,
            Self::MapAdd => -2,

            Self::JumpForward | Self::JumpAbsolute => 0,
            Self::PopJumpIfFalse | Self::PopJumpIfTrue => -1,
            Self::JumpIfFalseOrPop | Self::JumpIfTrueOrPop => {
                if jump {
                    0
                } else {
                    -1
                }
            }

            Self::RaiseVarargs => -arg,
            Self::CallFunction => -arg,
            Self::CallFunctionKw => -arg - 1,
            Self::CallFunctionEx => -1 - i64::from(arg & 1 != 0),
            Self::MakeFunction => {
                -1 - i64::from(arg & 0x01 != 0)
                    - i64::from(arg & 0x02 != 0)
                    - i64::from(arg & 0x04 != 0)
                    - i64::from(arg & 0x08 != 0)
            }
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = InvalidOpcodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_repr(byte).ok_or(InvalidOpcodeError(byte))
    }
}

/// Error returned when attempting to convert an invalid byte to an Opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid opcode byte: {0}")]
pub struct InvalidOpcodeError(pub u8);

/// Operand of `COMPARE_OP`, numbered as in the reference compiler's `cmp_op` table.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, Display)]
pub enum CompareOp {
    #[strum(serialize = "<")]
    Lt = 0,
    #[strum(serialize = "<=")]
    Le = 1,
    #[strum(serialize = "==")]
    Eq = 2,
    #[strum(serialize = "!=")]
    Ne = 3,
    #[strum(serialize = ">")]
    Gt = 4,
    #[strum(serialize = ">=")]
    Ge = 5,
    #[strum(serialize = "in")]
    In = 6,
    #[strum(serialize = "not in")]
    NotIn = 7,
    #[strum(serialize = "is")]
    Is = 8,
    #[strum(serialize = "is not")]
    IsNot = 9,
    #[strum(serialize = "exception match")]
    ExceptionMatch = 10,
}
