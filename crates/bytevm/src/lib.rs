#![doc = include_str!("../../../README.md")]
mod args;
mod builtins;
pub mod bytecode;
mod callable;
mod exception;
mod for_iterator;
mod function;
mod generator;
mod namespace;
pub mod operators;
mod resource;
mod signature;
mod types;
mod value;

pub use crate::{
    args::ArgValues,
    builtins::{BuiltinsFunctions, default_builtins},
    bytecode::VirtualMachine,
    callable::{Interpreter, NativeFunction},
    exception::{ExcType, Exception, FatalError, RunError, RunResult, TraceEntry, UnhandledException, VmError},
    for_iterator::ForIterator,
    function::Function,
    generator::{Generator, GeneratorState, Resumed},
    namespace::Namespace,
    operators::{BinaryOp, DefaultOperators, OperatorHooks, UnaryOp},
    resource::{
        DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker,
    },
    types::{Dict, Range},
    value::{Cell, ConversionError, Value},
};
