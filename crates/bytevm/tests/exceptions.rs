/// Tests for raising, catching and re-raising exceptions, and for tracebacks.
use bytevm::{
    ExcType, Exception, Value, VirtualMachine, VmError,
    bytecode::{CodeBuilder, CompareOp, Label, Opcode},
};

fn run(b: &CodeBuilder) -> Result<Value, VmError> {
    let mut vm = VirtualMachine::default();
    let func = vm.make_function(b.build().unwrap(), &vm.new_globals());
    let result = vm.run(&func, Vec::<Value>::new());
    assert_eq!(vm.frame_depth(), 0);
    result
}

fn unhandled(result: Result<Value, VmError>) -> Exception {
    match result {
        Err(VmError::Unhandled(exc)) => exc.into_exception(),
        other => panic!("expected an unhandled exception, got {other:?}"),
    }
}

/// Emits the head of `except <class_name>:` and returns the label of the
/// re-raising `END_FINALLY`.
fn except_clause(b: &mut CodeBuilder, handler: Label, class_name: &str) -> Label {
    let reraise = b.new_label();
    b.mark(handler).op(Opcode::DupTop).load_global(class_name);
    b.compare(CompareOp::ExceptionMatch).jump(Opcode::PopJumpIfFalse, reraise);
    b.pop_top().pop_top().pop_top();
    reraise
}

/// ```python
/// try:
///     {}['k']
/// except LookupError:
///     return 'caught'
/// ```
#[test]
fn base_class_handler_catches_subclass() {
    let mut b = CodeBuilder::new("f");
    let handler = b.new_label();
    let end = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.emit(Opcode::BuildMap, 0).load_const("k").op(Opcode::BinarySubscr).pop_top();
    b.op(Opcode::PopBlock).jump(Opcode::JumpForward, end);
    let reraise = except_clause(&mut b, handler, "LookupError");
    b.op(Opcode::PopExcept).load_const("caught").return_value();
    b.mark(reraise).op(Opcode::EndFinally);
    b.mark(end).load_none().return_value();

    let result = run(&b).unwrap();
    assert_eq!(String::try_from(&result).unwrap(), "caught");
}

/// ```python
/// try:
///     1 / 0
/// except (ValueError, ArithmeticError):
///     x = 'handled'
/// return x
/// ```
#[test]
fn handler_body_completes_and_execution_continues() {
    let mut b = CodeBuilder::new("f");
    let handler = b.new_label();
    let end = b.new_label();
    let reraise = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_const(1).load_const(0).op(Opcode::BinaryTrueDivide).pop_top();
    b.op(Opcode::PopBlock).jump(Opcode::JumpForward, end);
    b.mark(handler).op(Opcode::DupTop);
    b.load_global("ValueError").load_global("ArithmeticError").emit(Opcode::BuildTuple, 2);
    b.compare(CompareOp::ExceptionMatch).jump(Opcode::PopJumpIfFalse, reraise);
    b.pop_top().pop_top().pop_top();
    b.load_const("handled").store_fast("x");
    b.op(Opcode::PopExcept).jump(Opcode::JumpForward, end);
    b.mark(reraise).op(Opcode::EndFinally);
    b.mark(end).load_fast("x").return_value();

    let result = run(&b).unwrap();
    assert_eq!(String::try_from(&result).unwrap(), "handled");
}

/// ```python
/// x = 0
/// try:
///     try:
///         raise ValueError('e')
///     finally:
///         x = 7
/// except ValueError:
///     return x
/// ```
#[test]
fn finally_runs_before_outer_handler() {
    let mut b = CodeBuilder::new("f");
    let handler = b.new_label();
    let fin = b.new_label();
    let end = b.new_label();
    b.load_const(0).store_fast("x");
    b.jump(Opcode::SetupExcept, handler);
    b.jump(Opcode::SetupFinally, fin);
    b.load_global("ValueError").load_const("e").call(1).emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).load_none();
    b.mark(fin).load_const(7).store_fast("x").op(Opcode::EndFinally);
    b.op(Opcode::PopBlock).jump(Opcode::JumpForward, end);
    let reraise = except_clause(&mut b, handler, "ValueError");
    b.op(Opcode::PopExcept).load_fast("x").return_value();
    b.mark(reraise).op(Opcode::EndFinally);
    b.mark(end).load_none().return_value();

    let result = run(&b).unwrap();
    assert_eq!(i64::try_from(&result).unwrap(), 7);
}

/// ```python
/// try:
///     raise ValueError('e')
/// except ValueError as e:
///     return e
/// ```
#[test]
fn handler_receives_exception_instance() {
    let mut b = CodeBuilder::new("f");
    let handler = b.new_label();
    let reraise = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_global("ValueError").load_const("e").call(1).emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).load_none().return_value();
    b.mark(handler).op(Opcode::DupTop).load_global("ValueError");
    b.compare(CompareOp::ExceptionMatch).jump(Opcode::PopJumpIfFalse, reraise);
    b.pop_top().store_fast("e").pop_top();
    b.op(Opcode::PopExcept).load_fast("e").return_value();
    b.mark(reraise).op(Opcode::EndFinally).load_none().return_value();

    let Value::Exception(exc) = run(&b).unwrap() else {
        panic!("expected an exception instance");
    };
    assert_eq!(exc.to_string(), "ValueError: e");
    assert_eq!(exc.traceback().len(), 1);
}

/// An unmatched handler re-raises, and the traceback lists every frame passed.
#[test]
fn unmatched_handler_reraises_with_full_traceback() {
    let mut inner = CodeBuilder::new("inner");
    inner.filename("app.py").line(2);
    inner.load_global("ValueError").load_const("bad").call(1).emit(Opcode::RaiseVarargs, 1);

    let mut outer = CodeBuilder::new("outer");
    outer.filename("app.py").line(5);
    let handler = outer.new_label();
    outer.jump(Opcode::SetupExcept, handler);
    outer.line(6).load_global("inner").call(0).pop_top();
    outer.op(Opcode::PopBlock).load_none().return_value();
    let reraise = except_clause(&mut outer, handler, "KeyError");
    outer.op(Opcode::PopExcept).load_none().return_value();
    outer.mark(reraise).op(Opcode::EndFinally).load_none().return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let inner = vm.make_function(inner.build().unwrap(), &globals);
    globals.set("inner", Value::Function(inner.into()));
    let outer = vm.make_function(outer.build().unwrap(), &globals);

    let err = vm.run(&outer, Vec::<Value>::new()).unwrap_err();
    let VmError::Unhandled(unhandled) = &err else {
        panic!("expected unhandled exception, got {err:?}");
    };
    let exc = unhandled.exception();
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    let frames: Vec<&str> = exc.traceback().iter().map(|e| &*e.function).collect();
    assert_eq!(frames, ["inner", "outer"]);
    assert_eq!(exc.traceback()[0].line, Some(2));
    assert_eq!(exc.traceback()[1].line, Some(6));

    let rendered = err.to_string();
    assert!(rendered.starts_with("Traceback (most recent call last):\n"), "{rendered}");
    assert!(rendered.contains("  File \"app.py\", line 6, in outer\n"), "{rendered}");
    assert!(rendered.ends_with("ValueError: bad"), "{rendered}");
    assert_eq!(vm.frame_depth(), 0);
}

/// `raise ValueError('x') from KeyError('k')`
#[test]
fn raise_from_sets_cause() {
    let mut b = CodeBuilder::new("f");
    b.load_global("ValueError").load_const("x").call(1);
    b.load_global("KeyError").load_const("k").call(1);
    b.emit(Opcode::RaiseVarargs, 2);

    let err = run(&b).unwrap_err();
    let rendered = err.to_string();
    let exc = unhandled(Err(err));
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    let cause = exc.cause().expect("cause");
    assert_eq!(cause.exc_type(), ExcType::KeyError);
    assert_eq!(cause.to_string(), "KeyError: 'k'");
    assert!(rendered.contains("The above exception was the direct cause of the following exception:"));
}

#[test]
fn bare_raise_without_active_exception() {
    let mut b = CodeBuilder::new("f");
    b.emit(Opcode::RaiseVarargs, 0);
    let exc = unhandled(run(&b));
    assert_eq!(exc.to_string(), "RuntimeError: No active exception to reraise");
}

/// ```python
/// try:
///     raise ValueError
/// except:
///     raise
/// ```
#[test]
fn bare_raise_reraises_handled_exception_unchanged() {
    let mut b = CodeBuilder::new("f");
    let handler = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_global("ValueError").emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).load_none().return_value();
    b.mark(handler).pop_top().pop_top().pop_top();
    b.emit(Opcode::RaiseVarargs, 0);

    let exc = unhandled(run(&b));
    assert_eq!(exc.exc_type(), ExcType::ValueError);
    assert_eq!(exc.traceback().len(), 1);
}

#[test]
fn matching_against_non_class_is_type_error() {
    let mut b = CodeBuilder::new("f");
    let handler = b.new_label();
    b.jump(Opcode::SetupExcept, handler);
    b.load_global("ValueError").emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).load_none().return_value();
    b.mark(handler).op(Opcode::DupTop).load_const(5).compare(CompareOp::ExceptionMatch);
    b.return_value();

    let exc = unhandled(run(&b));
    assert_eq!(
        exc.to_string(),
        "TypeError: catching classes that do not inherit from BaseException is not allowed"
    );
}

#[test]
fn raising_a_non_exception_is_type_error() {
    let mut b = CodeBuilder::new("f");
    b.load_const(5).emit(Opcode::RaiseVarargs, 1);
    let exc = unhandled(run(&b));
    assert_eq!(exc.to_string(), "TypeError: exceptions must derive from BaseException");
}

#[test]
fn undefined_names() {
    let mut b = CodeBuilder::new("f");
    b.load_global("missing").return_value();
    let exc = unhandled(run(&b));
    assert_eq!(exc.exc_type(), ExcType::NameError);
    assert_eq!(exc.to_string(), "NameError: name 'missing' is not defined");

    let mut b = CodeBuilder::new("f");
    b.load_fast("x").return_value();
    let exc = unhandled(run(&b));
    assert_eq!(exc.exc_type(), ExcType::UnboundLocalError);
    assert!(exc.matches(ExcType::NameError));
    assert_eq!(
        exc.to_string(),
        "UnboundLocalError: local variable 'x' referenced before assignment"
    );
}

#[test]
fn operator_errors_are_catchable_exceptions() {
    let mut b = CodeBuilder::new("f");
    b.load_const(1).load_const("a").op(Opcode::BinaryAdd).return_value();
    let exc = unhandled(run(&b));
    assert_eq!(
        exc.to_string(),
        "TypeError: unsupported operand type(s) for +: 'int' and 'str'"
    );

    let mut b = CodeBuilder::new("f");
    b.emit(Opcode::BuildList, 0).load_const(3).op(Opcode::BinarySubscr).return_value();
    let exc = unhandled(run(&b));
    assert_eq!(exc.exc_type(), ExcType::IndexError);
}

/// The exception being handled is restored when a nested handler finishes.
///
/// ```python
/// try:
///     raise KeyError('outer')
/// except KeyError:
///     try:
///         raise ValueError('inner')
///     except ValueError:
///         pass
///     raise
/// ```
#[test]
fn nested_handler_restores_outer_exception() {
    let mut b = CodeBuilder::new("f");
    let outer = b.new_label();
    let inner = b.new_label();
    let after_inner = b.new_label();
    b.jump(Opcode::SetupExcept, outer);
    b.load_global("KeyError").load_const("outer").call(1).emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).load_none().return_value();

    let outer_reraise = except_clause(&mut b, outer, "KeyError");
    b.jump(Opcode::SetupExcept, inner);
    b.load_global("ValueError").load_const("inner").call(1).emit(Opcode::RaiseVarargs, 1);
    b.op(Opcode::PopBlock).jump(Opcode::JumpForward, after_inner);
    let inner_reraise = except_clause(&mut b, inner, "ValueError");
    b.op(Opcode::PopExcept).jump(Opcode::JumpForward, after_inner);
    b.mark(inner_reraise).op(Opcode::EndFinally);
    b.mark(after_inner).emit(Opcode::RaiseVarargs, 0);
    b.mark(outer_reraise).op(Opcode::EndFinally).load_none().return_value();

    let exc = unhandled(run(&b));
    assert_eq!(exc.exc_type(), ExcType::KeyError);
    assert_eq!(exc.message().as_deref(), Some("'outer'"));
}
