/// Tests for serializing, loading and verifying code objects.
use bytevm::{
    FatalError, Value, VirtualMachine,
    bytecode::{CodeBuilder, CodeError, CodeObject, Instruction, MAGIC_NUMBER, Opcode},
};
use serde::Serialize;

/// ```python
/// def greet(name):
///     def inner():
///         return 'hello ' + name
///     return inner()
/// ```
fn greet() -> CodeObject {
    let mut inner = CodeBuilder::new("inner");
    inner.load_const("hello ").load_deref("name").op(Opcode::BinaryAdd).return_value();

    let mut b = CodeBuilder::new("greet");
    b.filename("greet.py").line(1);
    b.arg("name");
    b.cellvar("name");
    b.load_closure("name").emit(Opcode::BuildTuple, 1);
    b.make_function(inner.build().unwrap(), 0x08).call(0).return_value();
    b.build().unwrap()
}

#[test]
fn dumped_code_loads_and_runs() {
    let code = greet();
    let bytes = code.dump().unwrap();
    let loaded = CodeObject::load(&bytes).unwrap();
    assert_eq!(loaded, code);

    let mut vm = VirtualMachine::default();
    let func = vm.make_function(loaded, &vm.new_globals());
    let result = vm.run(&func, vec![Value::str("world")]).unwrap();
    assert_eq!(String::try_from(&result).unwrap(), "hello world");
}

#[test]
fn wrong_magic_number_is_rejected() {
    #[derive(Serialize)]
    struct Stale<'a> {
        magic: u16,
        code: &'a CodeObject,
    }

    let code = greet();
    let bytes = postcard::to_allocvec(&Stale {
        magic: MAGIC_NUMBER - 1,
        code: &code,
    })
    .unwrap();
    match CodeObject::load(&bytes) {
        Err(CodeError::Invalid(FatalError::UnsupportedVersion { found, expected })) => {
            assert_eq!(found, MAGIC_NUMBER - 1);
            assert_eq!(expected, MAGIC_NUMBER);
        }
        other => panic!("expected a version error, got {other:?}"),
    }
}

#[test]
fn truncated_bytes_fail_to_decode() {
    let bytes = greet().dump().unwrap();
    let err = CodeObject::load(&bytes[..bytes.len() / 2]).unwrap_err();
    assert!(matches!(err, CodeError::Decode(_)), "{err}");
}

#[test]
fn loading_verifies_operands() {
    let mut code = greet();
    code.instructions.push(Instruction::new(Opcode::LoadConst, 99));
    code.lines.push(1);
    let bytes = code.dump().unwrap();
    let err = CodeObject::load(&bytes).unwrap_err();
    let CodeError::Invalid(FatalError::InvalidCode(msg)) = &err else {
        panic!("expected invalid code, got {err:?}");
    };
    assert!(msg.contains("out of range for constants"), "{msg}");
}

#[test]
fn loading_verifies_nested_code() {
    let mut inner = CodeBuilder::new("inner");
    inner.load_global("x").return_value();
    let mut inner = inner.build().unwrap();
    inner.instructions[0] = Instruction::new(Opcode::LoadGlobal, 7);

    let mut b = CodeBuilder::new("outer");
    b.make_function(inner, 0).return_value();
    let bytes = b.build_unchecked().dump().unwrap();
    let err = CodeObject::load(&bytes).unwrap_err();
    assert!(err.to_string().contains("inner"), "{err}");
}

#[test]
fn jumps_past_the_end_are_rejected() {
    let mut code = greet();
    let last = code.instructions.len() - 1;
    code.instructions[last] = Instruction::new(Opcode::JumpAbsolute, 500);
    let err = code.verify().unwrap_err();
    assert!(err.to_string().contains("past the end"), "{err}");
}

#[test]
fn oversized_stack_is_rejected() {
    let mut code = greet();
    code.stacksize = u32::MAX;
    let err = CodeObject::load(&code.dump().unwrap()).unwrap_err();
    let CodeError::Invalid(FatalError::InvalidCode(msg)) = &err else {
        panic!("expected invalid code, got {err:?}");
    };
    assert!(msg.contains("stack size"), "{msg}");

    // unverified code still runs, with the stack grown on demand
    let mut vm = VirtualMachine::default();
    let func = vm.make_function(code, &vm.new_globals());
    let result = vm.run(&func, vec![Value::str("there")]).unwrap();
    assert_eq!(String::try_from(&result).unwrap(), "hello there");
}
