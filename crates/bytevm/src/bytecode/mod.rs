//! Bytecode representation and the virtual machine that executes it.
//!
//! # Module Structure
//!
//! - `op` - Opcode numbering and jump/stack-effect metadata
//! - `code` - Code objects, constants, serialization and verification
//! - `builder` - `CodeBuilder` for assembling code objects with labels
//! - `frame` - Frames and the block stack
//! - `vm` - The interpreter loop

mod builder;
mod code;
mod frame;
mod op;
mod vm;

pub use builder::{CodeBuilder, Label};
pub use code::{CodeError, CodeFlags, CodeObject, Constant, Instruction, MAGIC_NUMBER, MAX_STACK_SIZE, fold_extended_arg};
pub(crate) use frame::Resumer;
pub use frame::{Block, BlockKind, Frame, Why};
pub use op::{CompareOp, HAVE_ARGUMENT, InvalidOpcodeError, Opcode};
pub use vm::VirtualMachine;
