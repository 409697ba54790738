/// Tests for `TryFrom` conversions from VM values to Rust types.
///
/// Values are produced by running small code objects, so the conversions are
/// exercised on what the VM actually returns.
use bytevm::{
    ConversionError, Value, VirtualMachine,
    bytecode::{CodeBuilder, Constant, Opcode},
};

fn eval(constant: impl Into<Constant>) -> Value {
    let mut b = CodeBuilder::new("f");
    b.load_const(constant).return_value();
    let mut vm = VirtualMachine::default();
    let func = vm.make_function(b.build().unwrap(), &vm.new_globals());
    vm.run(&func, Vec::<Value>::new()).unwrap()
}

#[test]
fn try_from_ok_int_to_i64() {
    let value: i64 = (&eval(42)).try_into().expect("conversion should succeed");
    assert_eq!(value, 42);
}

#[test]
fn try_from_ok_bool_to_i64() {
    let value: i64 = (&eval(true)).try_into().expect("conversion should succeed");
    assert_eq!(value, 1);
}

#[test]
fn try_from_ok_float_to_f64() {
    let value: f64 = (&eval(2.5)).try_into().expect("conversion should succeed");
    assert_eq!(value, 2.5);
}

#[test]
fn try_from_ok_int_to_f64() {
    let value: f64 = (&eval(42)).try_into().expect("conversion should succeed");
    assert_eq!(value, 42.0);
}

#[test]
fn try_from_ok_str_to_string() {
    let value: String = (&eval("hello")).try_into().expect("conversion should succeed");
    assert_eq!(value, "hello");
}

#[test]
fn try_from_ok_computed_string() {
    let mut b = CodeBuilder::new("f");
    b.load_const("ab").load_const(3).op(Opcode::BinaryMultiply).return_value();
    let mut vm = VirtualMachine::default();
    let func = vm.make_function(b.build().unwrap(), &vm.new_globals());
    let result = vm.run(&func, Vec::<Value>::new()).unwrap();
    assert_eq!(String::try_from(&result).unwrap(), "ababab");
}

#[test]
fn try_from_err_str_to_i64() {
    let err = i64::try_from(&eval("42")).unwrap_err();
    assert_eq!(
        err,
        ConversionError {
            expected: "int",
            actual: "str"
        }
    );
    assert_eq!(err.to_string(), "expected int, got str");
}

#[test]
fn try_from_err_int_to_bool() {
    let err = bool::try_from(&eval(1)).unwrap_err();
    assert_eq!(err.to_string(), "expected bool, got int");
}

#[test]
fn try_from_err_none_to_string() {
    let err = String::try_from(&eval(Constant::None)).unwrap_err();
    assert_eq!(err.to_string(), "expected str, got NoneType");
}

#[test]
fn try_from_err_tuple_to_f64() {
    let err = f64::try_from(&eval(Constant::Tuple(vec![Constant::Int(1)]))).unwrap_err();
    assert_eq!(err.to_string(), "expected float, got tuple");
}
