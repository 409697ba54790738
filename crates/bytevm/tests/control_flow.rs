/// Tests for loops, `finally` blocks and fatal VM errors.
use bytevm::{
    FatalError, Value, VirtualMachine, VmError,
    bytecode::{CodeBuilder, CodeObject, CompareOp, Opcode},
};

fn run(code: CodeObject) -> (VirtualMachine, Result<Value, VmError>) {
    let mut vm = VirtualMachine::default();
    let func = vm.make_function(code, &vm.new_globals());
    let result = vm.run(&func, Vec::<Value>::new());
    (vm, result)
}

fn int(value: &Value) -> i64 {
    i64::try_from(value).expect("int result")
}

fn fatal(result: Result<Value, VmError>) -> FatalError {
    match result {
        Err(VmError::Fatal(err)) => err,
        other => panic!("expected a fatal error, got {other:?}"),
    }
}

/// ```python
/// n = 0
/// while True:
///     for j in range(10):
///         if j == 4:
///             break
///         n += 1
///     break
/// return n
/// ```
#[test]
fn break_leaves_only_the_innermost_loop() {
    let mut b = CodeBuilder::new("f");
    let outer_end = b.new_label();
    let inner_end = b.new_label();
    let top = b.new_label();
    let done = b.new_label();
    let body = b.new_label();
    b.load_const(0).store_fast("n");
    b.jump(Opcode::SetupLoop, outer_end);
    b.jump(Opcode::SetupLoop, inner_end);
    b.load_global("range").load_const(10).call(1).op(Opcode::GetIter);
    b.mark(top).jump(Opcode::ForIter, done);
    b.store_fast("j");
    b.load_fast("j").load_const(4).compare(CompareOp::Eq).jump(Opcode::PopJumpIfFalse, body);
    b.op(Opcode::BreakLoop);
    b.mark(body).load_fast("n").load_const(1).op(Opcode::InplaceAdd).store_fast("n");
    b.jump(Opcode::JumpAbsolute, top);
    b.mark(done).op(Opcode::PopBlock);
    b.mark(inner_end).op(Opcode::BreakLoop);
    b.mark(outer_end).load_fast("n").return_value();

    let (vm, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 4);
    assert_eq!(vm.frame_depth(), 0);
}

/// ```python
/// total = 0
/// for i in range(4):
///     try:
///         if i == 2:
///             continue
///         total += i
///     finally:
///         total += 10
/// return total
/// ```
#[test]
fn continue_runs_enclosing_finally() {
    let mut b = CodeBuilder::new("f");
    let end = b.new_label();
    let top = b.new_label();
    let done = b.new_label();
    let fin = b.new_label();
    let add = b.new_label();
    b.load_const(0).store_fast("total");
    b.jump(Opcode::SetupLoop, end);
    b.load_global("range").load_const(4).call(1).op(Opcode::GetIter);
    b.mark(top).jump(Opcode::ForIter, done);
    b.store_fast("i");
    b.jump(Opcode::SetupFinally, fin);
    b.load_fast("i").load_const(2).compare(CompareOp::Eq).jump(Opcode::PopJumpIfFalse, add);
    b.jump(Opcode::ContinueLoop, top);
    b.mark(add).load_fast("total").load_fast("i").op(Opcode::InplaceAdd).store_fast("total");
    b.op(Opcode::PopBlock).load_none();
    b.mark(fin).load_fast("total").load_const(10).op(Opcode::InplaceAdd).store_fast("total");
    b.op(Opcode::EndFinally);
    b.jump(Opcode::JumpAbsolute, top);
    b.mark(done).op(Opcode::PopBlock);
    b.mark(end).load_fast("total").return_value();

    let (_, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 44);
}

/// ```python
/// try:
///     return 1
/// finally:
///     return 2
/// ```
#[test]
fn return_in_finally_overrides_pending_return() {
    let mut b = CodeBuilder::new("f");
    let fin = b.new_label();
    b.jump(Opcode::SetupFinally, fin);
    b.load_const(1).return_value();
    b.op(Opcode::PopBlock).load_none();
    b.mark(fin).load_const(2).return_value();
    b.op(Opcode::EndFinally).load_none().return_value();

    let (_, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 2);
}

/// ```python
/// try:
///     return 1
/// finally:
///     x = 3
/// ```
#[test]
fn pending_return_resumes_after_finally() {
    let mut b = CodeBuilder::new("f");
    let fin = b.new_label();
    b.jump(Opcode::SetupFinally, fin);
    b.load_const(1).return_value();
    b.op(Opcode::PopBlock).load_none();
    b.mark(fin).load_const(3).store_fast("x");
    b.op(Opcode::EndFinally).load_none().return_value();

    let (_, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 1);
}

/// ```python
/// try:
///     raise ValueError
/// finally:
///     return 5
/// ```
#[test]
fn return_in_finally_discards_exception() {
    let mut b = CodeBuilder::new("f");
    let fin = b.new_label();
    b.jump(Opcode::SetupFinally, fin);
    b.load_global("ValueError").emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).load_none();
    b.mark(fin).load_const(5).return_value();
    b.op(Opcode::EndFinally).load_none().return_value();

    let (vm, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 5);
    assert_eq!(vm.frame_depth(), 0);
}

/// ```python
/// x = 0
/// while x < 5:
///     x = x + 1
/// return x
/// ```
#[test]
fn while_loop_with_conditional_jump() {
    let mut b = CodeBuilder::new("f");
    let end = b.new_label();
    let top = b.new_label();
    let done = b.new_label();
    b.load_const(0).store_fast("x");
    b.jump(Opcode::SetupLoop, end);
    b.mark(top).load_fast("x").load_const(5).compare(CompareOp::Lt).jump(Opcode::PopJumpIfFalse, done);
    b.load_fast("x").load_const(1).op(Opcode::BinaryAdd).store_fast("x");
    b.jump(Opcode::JumpAbsolute, top);
    b.mark(done).op(Opcode::PopBlock);
    b.mark(end).load_fast("x").return_value();

    let (_, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 5);
}

/// `return a and b` and `return a or b` with short-circuit jumps.
#[test]
fn short_circuit_keeps_deciding_operand() {
    let build = |op: Opcode| {
        let mut b = CodeBuilder::new("f");
        b.arg("a").arg("b");
        let end = b.new_label();
        b.load_fast("a").jump(op, end).load_fast("b");
        b.mark(end).return_value();
        b.build().unwrap()
    };
    let mut vm = VirtualMachine::default();
    let and = vm.make_function(build(Opcode::JumpIfFalseOrPop), &vm.new_globals());
    let or = vm.make_function(build(Opcode::JumpIfTrueOrPop), &vm.new_globals());

    let result = vm.run(&and, vec![Value::Int(0), Value::Int(7)]).unwrap();
    assert_eq!(int(&result), 0);
    let result = vm.run(&and, vec![Value::Int(3), Value::Int(7)]).unwrap();
    assert_eq!(int(&result), 7);
    let result = vm.run(&or, vec![Value::str(""), Value::Int(7)]).unwrap();
    assert_eq!(int(&result), 7);
    let result = vm.run(&or, vec![Value::Int(3), Value::Int(7)]).unwrap();
    assert_eq!(int(&result), 3);
}

#[test]
fn stack_rotations() {
    // (1, 2, 3) -> ROT_THREE -> (3, 1, 2) -> ROT_TWO -> (3, 2, 1)
    let mut b = CodeBuilder::new("f");
    b.load_const(1).load_const(2).load_const(3);
    b.op(Opcode::RotThree).op(Opcode::RotTwo);
    b.emit(Opcode::BuildTuple, 3).return_value();
    let (_, result) = run(b.build().unwrap());
    assert_eq!(result.unwrap().py_repr(), "(3, 2, 1)");

    let mut b = CodeBuilder::new("f");
    b.load_const(1).load_const(2).op(Opcode::DupTopTwo).op(Opcode::DupTop);
    b.emit(Opcode::BuildTuple, 5).return_value();
    let (_, result) = run(b.build().unwrap());
    assert_eq!(result.unwrap().py_repr(), "(1, 2, 1, 2, 2)");
}

#[test]
fn extended_arg_widens_operand() {
    let mut b = CodeBuilder::new("f");
    for i in 0..300 {
        b.constant(i);
    }
    // LOAD_CONST 299 needs a prefix
    b.emit(Opcode::ExtendedArg, 1).emit(Opcode::LoadConst, 43).return_value();
    let (_, result) = run(b.build().unwrap());
    assert_eq!(int(&result.unwrap()), 299);
}

#[test]
fn unknown_opcode_is_fatal() {
    let mut b = CodeBuilder::new("f");
    b.load_const(1).emit_raw(255, 0).return_value();
    let (vm, result) = run(b.build().unwrap());
    assert_eq!(fatal(result), FatalError::UnknownOpcode { opcode: 255, offset: 1 });
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn stack_underflow_is_fatal() {
    let mut b = CodeBuilder::new("f");
    b.pop_top().load_none().return_value();
    let (vm, result) = run(b.build().unwrap());
    assert_eq!(fatal(result), FatalError::StackUnderflow);
    assert_eq!(vm.frame_depth(), 0);
}

#[test]
fn pop_except_over_loop_block_is_fatal() {
    let mut b = CodeBuilder::new("f");
    let end = b.new_label();
    b.jump(Opcode::SetupLoop, end).op(Opcode::PopExcept);
    b.mark(end).load_none().return_value();
    let (_, result) = run(b.build().unwrap());
    assert!(matches!(fatal(result), FatalError::CorruptBlockStack(_)));
}

#[test]
fn running_off_the_end_is_fatal() {
    let mut b = CodeBuilder::new("f");
    b.load_none().pop_top();
    let (_, result) = run(b.build_unchecked());
    assert_eq!(fatal(result), FatalError::InstructionOutOfRange(2));
}

#[test]
fn fatal_error_in_nested_call_empties_call_stack() {
    let mut broken = CodeBuilder::new("broken");
    broken.pop_top().load_none().return_value();

    let mut outer = CodeBuilder::new("outer");
    let handler = outer.new_label();
    outer.jump(Opcode::SetupExcept, handler);
    outer.make_function(broken.build().unwrap(), 0).call(0).return_value();
    outer.mark(handler).op(Opcode::PopExcept).load_const("caught").return_value();

    let mut vm = VirtualMachine::default();
    let func = vm.make_function(outer.build().unwrap(), &vm.new_globals());
    let err = vm.run(&func, Vec::<Value>::new()).unwrap_err();
    assert!(err.is_fatal(), "fatal errors bypass handlers: {err}");
    assert_eq!(vm.frame_depth(), 0);

    // the VM stays usable
    let mut ok = CodeBuilder::new("ok");
    ok.load_const(9).return_value();
    let func = vm.make_function(ok.build().unwrap(), &vm.new_globals());
    assert_eq!(int(&vm.run(&func, Vec::<Value>::new()).unwrap()), 9);
}

#[test]
fn fatal_error_below_native_frame_unwinds_everything() {
    let mut broken = CodeBuilder::new("broken");
    broken.emit_raw(254, 0);

    let mut vm = VirtualMachine::default();
    vm.register_native("call0", |interp, args| {
        let func = args.get_one_arg("call0")?;
        interp.call(&func, Vec::<Value>::new().into())
    });
    let mut m = CodeBuilder::module("native.py");
    m.load_name("call0").make_function(broken.build_unchecked(), 0).call(1).return_value();
    let result = vm.run_module(m.build().unwrap(), &vm.new_globals());
    assert!(matches!(fatal(result), FatalError::UnknownOpcode { opcode: 254, .. }));
    assert_eq!(vm.frame_depth(), 0);
}
