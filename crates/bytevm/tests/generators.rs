/// Tests for generators: resuming from Rust, `for` loops, `yield from`,
/// `throw` and `close`.
use bytevm::{
    ExcType, Exception, FatalError, Generator, GeneratorState, Namespace, Resumed, Value, VirtualMachine, VmError,
    bytecode::{CodeBuilder, CodeObject, CompareOp, Opcode},
};

fn int(value: &Value) -> i64 {
    i64::try_from(value).expect("int value")
}

/// Calls a generator function with `args`, returning the new generator.
fn start(vm: &mut VirtualMachine, code: CodeObject, globals: &Namespace, args: Vec<Value>) -> Generator {
    let func = vm.make_function(code, globals);
    match vm.run(&func, args).unwrap() {
        Value::Generator(generator) => generator,
        other => panic!("expected a generator, got {other:?}"),
    }
}

fn yielded(resumed: Result<Resumed, VmError>) -> Value {
    match resumed.unwrap() {
        Resumed::Yielded(value) => value,
        Resumed::Completed(value) => panic!("generator completed with {value:?}"),
    }
}

/// ```python
/// def gen():
///     yield 1
///     yield 2
///     return 3
/// ```
fn one_two_three() -> CodeObject {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    b.load_const(1).op(Opcode::YieldValue).pop_top();
    b.load_const(2).op(Opcode::YieldValue).pop_top();
    b.load_const(3).return_value();
    b.build().unwrap()
}

/// ```python
/// def squares(n):
///     for i in range(n):
///         yield i * i
/// ```
fn squares() -> CodeObject {
    let mut b = CodeBuilder::new("squares");
    b.generator().arg("n");
    let end = b.new_label();
    let top = b.new_label();
    let done = b.new_label();
    b.jump(Opcode::SetupLoop, end);
    b.load_global("range").load_fast("n").call(1).op(Opcode::GetIter);
    b.mark(top).jump(Opcode::ForIter, done);
    b.store_fast("i").load_fast("i").load_fast("i").op(Opcode::BinaryMultiply);
    b.op(Opcode::YieldValue).pop_top();
    b.jump(Opcode::JumpAbsolute, top);
    b.mark(done).op(Opcode::PopBlock);
    b.mark(end).load_none().return_value();
    b.build().unwrap()
}

#[test]
fn resume_yields_then_completes() {
    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, one_two_three(), &globals, Vec::new());
    assert_eq!(generator.state(), GeneratorState::Created);

    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 1);
    assert_eq!(generator.state(), GeneratorState::Suspended);
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 2);

    let last = vm.resume(&generator, Value::None).unwrap();
    assert!(last.is_completed());
    assert_eq!(int(last.value()), 3);
    assert!(generator.is_finished());

    assert!(matches!(vm.resume(&generator, Value::None), Err(VmError::GeneratorExhausted)));
    assert_eq!(vm.frame_depth(), 0);
}

/// ```python
/// def gen():
///     x = yield 1
///     return x * 2
/// ```
#[test]
fn sent_value_becomes_yield_result() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    b.load_const(1).op(Opcode::YieldValue).store_fast("x");
    b.load_fast("x").load_const(2).op(Opcode::BinaryMultiply).return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, b.build().unwrap(), &globals, Vec::new());
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 1);
    let done = vm.resume(&generator, Value::Int(21)).unwrap();
    assert!(matches!(done, Resumed::Completed(Value::Int(42))));
}

#[test]
fn first_send_must_be_none() {
    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, one_two_three(), &globals, Vec::new());

    let err = vm.resume(&generator, Value::Int(1)).unwrap_err();
    let exc = err.as_unhandled().expect("TypeError").exception();
    assert_eq!(
        exc.to_string(),
        "TypeError: can't send non-None value to a just-started generator"
    );
    assert_eq!(generator.state(), GeneratorState::Created);
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 1);
}

/// ```python
/// total = 0
/// for v in squares(4):
///     total += v
/// ```
#[test]
fn for_loop_drives_generator() {
    let mut m = CodeBuilder::module("gen.py");
    let end = m.new_label();
    let top = m.new_label();
    let done = m.new_label();
    m.make_function(squares(), 0).store_name("squares");
    m.load_const(0).store_name("total");
    m.jump(Opcode::SetupLoop, end);
    m.load_name("squares").load_const(4).call(1).op(Opcode::GetIter);
    m.mark(top).jump(Opcode::ForIter, done);
    m.store_name("v").load_name("total").load_name("v").op(Opcode::InplaceAdd).store_name("total");
    m.jump(Opcode::JumpAbsolute, top);
    m.mark(done).op(Opcode::PopBlock);
    m.mark(end).load_name("total").return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let result = vm.run_module(m.build().unwrap(), &globals).unwrap();
    assert_eq!(int(&result), 14);
    assert_eq!(vm.frame_depth(), 0);
}

/// ```python
/// def outer():
///     r = yield from inner()   # inner yields 1, 2 and returns 10
///     yield r
/// ```
#[test]
fn yield_from_delegates_to_inner_generator() {
    let mut inner = CodeBuilder::new("inner");
    inner.generator();
    inner.load_const(1).op(Opcode::YieldValue).pop_top();
    inner.load_const(2).op(Opcode::YieldValue).pop_top();
    inner.load_const(10).return_value();

    let mut outer = CodeBuilder::new("outer");
    outer.generator();
    outer.load_global("inner").call(0).op(Opcode::GetYieldFromIter).load_none().op(Opcode::YieldFrom);
    outer.store_fast("r").load_fast("r").op(Opcode::YieldValue).pop_top();
    outer.load_none().return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let inner = vm.make_function(inner.build().unwrap(), &globals);
    globals.set("inner", Value::Function(inner.into()));
    let generator = start(&mut vm, outer.build().unwrap(), &globals, Vec::new());

    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 1);
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 2);
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 10);
    let done = vm.resume(&generator, Value::None).unwrap();
    assert!(matches!(done, Resumed::Completed(Value::None)));
    assert_eq!(vm.frame_depth(), 0);
}

/// ```python
/// def gen():
///     yield from [1, 2]
///     return 'done'
/// ```
#[test]
fn yield_from_plain_iterable() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    b.load_const(1).load_const(2).emit(Opcode::BuildList, 2);
    b.op(Opcode::GetYieldFromIter).load_none().op(Opcode::YieldFrom).pop_top();
    b.load_const("done").return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, b.build().unwrap(), &globals, Vec::new());
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 1);
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 2);
    let done = vm.resume(&generator, Value::None).unwrap();
    assert_eq!(String::try_from(done.value()).unwrap(), "done");
}

#[test]
fn stop_iteration_inside_generator_becomes_runtime_error() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    b.load_global("StopIteration").emit(Opcode::RaiseVarargs, 1);
    b.load_none().op(Opcode::YieldValue).pop_top().load_none().return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, b.build().unwrap(), &globals, Vec::new());
    let err = vm.resume(&generator, Value::None).unwrap_err();
    let exc = err.as_unhandled().expect("RuntimeError").exception();
    assert_eq!(exc.to_string(), "RuntimeError: generator raised StopIteration");
    assert_eq!(exc.cause().map(Exception::exc_type), Some(ExcType::StopIteration));
    assert!(generator.is_finished());
}

/// ```python
/// def gen():
///     try:
///         yield 1
///     except ValueError:
///         yield 2
/// ```
#[test]
fn throw_raises_at_suspended_yield() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    let handler = b.new_label();
    let reraise = b.new_label();
    let end = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_const(1).op(Opcode::YieldValue).pop_top();
    b.op(Opcode::PopBlock).jump(Opcode::JumpForward, end);
    b.mark(handler).op(Opcode::DupTop).load_global("ValueError");
    b.compare(CompareOp::ExceptionMatch).jump(Opcode::PopJumpIfFalse, reraise);
    b.pop_top().pop_top().pop_top();
    b.load_const(2).op(Opcode::YieldValue).pop_top();
    b.op(Opcode::PopExcept).jump(Opcode::JumpForward, end);
    b.mark(reraise).op(Opcode::EndFinally);
    b.mark(end).load_none().return_value();
    let code = b.build().unwrap();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, code.clone(), &globals, Vec::new());
    assert_eq!(int(&yielded(vm.resume(&generator, Value::None))), 1);
    let thrown = Exception::with_message(ExcType::ValueError, "boom");
    assert_eq!(int(&yielded(vm.throw(&generator, thrown))), 2);
    assert!(vm.resume(&generator, Value::None).unwrap().is_completed());

    // an exception the generator does not handle comes back out
    let generator = start(&mut vm, code, &globals, Vec::new());
    yielded(vm.resume(&generator, Value::None));
    let err = vm.throw(&generator, Exception::with_message(ExcType::KeyError, "k")).unwrap_err();
    assert_eq!(err.as_unhandled().map(|e| e.exc_type()), Some(ExcType::KeyError));
    assert!(generator.is_finished());
    assert_eq!(vm.frame_depth(), 0);
}

/// ```python
/// def gen():
///     try:
///         yield 1
///     finally:
///         cleaned = True   # global
/// ```
#[test]
fn close_runs_finally_block() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    let fin = b.new_label();
    b.jump(Opcode::SetupFinally, fin);
    b.load_const(1).op(Opcode::YieldValue).pop_top();
    b.op(Opcode::PopBlock).load_none();
    b.mark(fin).load_const(true).store_global("cleaned");
    b.op(Opcode::EndFinally).load_none().return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, b.build().unwrap(), &globals, Vec::new());
    yielded(vm.resume(&generator, Value::None));
    assert!(!globals.contains("cleaned"));

    vm.close(&generator).unwrap();
    assert!(matches!(globals.get("cleaned"), Some(Value::Bool(true))));
    assert!(generator.is_finished());
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn close_fails_when_generator_keeps_yielding() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    let handler = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_const(1).op(Opcode::YieldValue).pop_top();
    b.op(Opcode::PopBlock).load_none().return_value();
    b.mark(handler).pop_top().pop_top().pop_top();
    b.load_const(2).op(Opcode::YieldValue).pop_top();
    b.op(Opcode::PopExcept).load_none().return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, b.build().unwrap(), &globals, Vec::new());
    yielded(vm.resume(&generator, Value::None));
    let err = vm.close(&generator).unwrap_err();
    let exc = err.as_unhandled().expect("RuntimeError").exception();
    assert_eq!(exc.to_string(), "RuntimeError: generator ignored GeneratorExit");
}

#[test]
fn close_before_start_finishes_generator() {
    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, one_two_three(), &globals, Vec::new());
    vm.close(&generator).unwrap();
    assert_eq!(generator.state(), GeneratorState::Finished);
    assert!(matches!(vm.resume(&generator, Value::None), Err(VmError::GeneratorExhausted)));
}

/// `(next(g), next(g), next(g, 99))` for a generator yielding 1 and 2.
#[test]
fn next_builtin_with_default() {
    let mut gen = CodeBuilder::new("gen");
    gen.generator();
    gen.load_const(1).op(Opcode::YieldValue).pop_top();
    gen.load_const(2).op(Opcode::YieldValue).pop_top();
    gen.load_none().return_value();

    let mut m = CodeBuilder::module("gen.py");
    m.make_function(gen.build().unwrap(), 0).call(0).store_name("g");
    m.load_name("next").load_name("g").call(1);
    m.load_name("next").load_name("g").call(1);
    m.load_name("next").load_name("g").load_const(99).call(2);
    m.emit(Opcode::BuildTuple, 3).return_value();

    let mut vm = VirtualMachine::default();
    let result = vm.run_module(m.build().unwrap(), &vm.new_globals()).unwrap();
    assert_eq!(result.py_repr(), "(1, 2, 99)");

    let mut m = CodeBuilder::module("gen.py");
    m.make_function(one_two_three(), 0).call(0).store_name("g");
    for _ in 0..3 {
        m.load_name("next").load_name("g").call(1).pop_top();
    }
    m.load_none().return_value();
    let err = vm.run_module(m.build().unwrap(), &vm.new_globals()).unwrap_err();
    assert_eq!(err.as_unhandled().map(|e| e.exc_type()), Some(ExcType::StopIteration));
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn list_collects_generator() {
    let mut m = CodeBuilder::module("gen.py");
    m.load_name("list").make_function(squares(), 0).load_const(3).call(1).call(1).return_value();
    let mut vm = VirtualMachine::default();
    let result = vm.run_module(m.build().unwrap(), &vm.new_globals()).unwrap();
    assert_eq!(result.py_repr(), "[0, 1, 4]");
}

/// A generator that advances itself is a fatal error, not an exception.
#[test]
fn reentering_running_generator_is_fatal() {
    let mut b = CodeBuilder::new("gen");
    b.generator();
    b.load_global("next").load_global("me").call(1).op(Opcode::YieldValue).pop_top();
    b.load_none().return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let generator = start(&mut vm, b.build().unwrap(), &globals, Vec::new());
    globals.set("me", Value::Generator(generator.clone()));

    let err = vm.resume(&generator, Value::None).unwrap_err();
    assert!(matches!(err, VmError::Fatal(FatalError::GeneratorAlreadyRunning)));
    assert!(generator.is_finished());
    assert_eq!(vm.frame_depth(), 0);
}
