/// Tests for the default builtins namespace.
use bytevm::{
    BuiltinsFunctions, ExcType, Exception, Value, VirtualMachine, VmError,
    bytecode::{CodeBuilder, Opcode},
};

fn call(vm: &mut VirtualMachine, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
    let func = vm.builtins().get(name).unwrap_or_else(|| panic!("no builtin {name}"));
    vm.call(&func, args)
}

fn message(result: Result<Value, VmError>) -> String {
    result.unwrap_err().as_unhandled().expect("exception").exception().to_string()
}

#[test]
fn every_builtin_function_is_installed() {
    let vm = VirtualMachine::default();
    for function in [
        BuiltinsFunctions::Abs,
        BuiltinsFunctions::IsInstance,
        BuiltinsFunctions::Iter,
        BuiltinsFunctions::Len,
        BuiltinsFunctions::List,
        BuiltinsFunctions::Next,
        BuiltinsFunctions::Range,
        BuiltinsFunctions::Tuple,
    ] {
        let name = function.to_string();
        assert!(
            matches!(vm.builtins().get(&name), Some(Value::Native(native)) if native.name() == name),
            "missing {name}"
        );
    }
}

#[test]
fn len_of_containers() {
    let mut vm = VirtualMachine::default();
    let len = |vm: &mut VirtualMachine, v: Value| i64::try_from(&call(vm, "len", vec![v]).unwrap()).unwrap();
    assert_eq!(len(&mut vm, Value::str("héllo")), 5);
    assert_eq!(len(&mut vm, Value::tuple(vec![Value::None; 3])), 3);
    assert_eq!(len(&mut vm, Value::list(Vec::new())), 0);

    let range = call(&mut vm, "range", vec![Value::Int(0), Value::Int(10), Value::Int(3)]).unwrap();
    assert_eq!(range.py_repr(), "range(0, 10, 3)");
    assert_eq!(len(&mut vm, range), 4);

    assert_eq!(
        message(call(&mut vm, "len", vec![Value::Int(1)])),
        "TypeError: object of type 'int' has no len()"
    );
    assert_eq!(
        message(call(&mut vm, "len", Vec::new())),
        "TypeError: len() takes exactly one argument (0 given)"
    );
}

#[test]
fn abs_of_numbers() {
    let mut vm = VirtualMachine::default();
    let result = call(&mut vm, "abs", vec![Value::Int(-4)]).unwrap();
    assert!(matches!(result, Value::Int(4)));
    let result = call(&mut vm, "abs", vec![Value::Float(-1.5)]).unwrap();
    assert!((f64::try_from(&result).unwrap() - 1.5).abs() < f64::EPSILON);

    let err = call(&mut vm, "abs", vec![Value::Int(i64::MIN)]).unwrap_err();
    assert_eq!(err.as_unhandled().map(|e| e.exc_type()), Some(ExcType::OverflowError));
    assert_eq!(
        message(call(&mut vm, "abs", vec![Value::str("x")])),
        "TypeError: bad operand type for abs(): 'str'"
    );
}

#[test]
fn isinstance_follows_exception_hierarchy() {
    let mut vm = VirtualMachine::default();
    let key_error = Value::exception(Exception::with_message(ExcType::KeyError, "k"));

    let result = call(&mut vm, "isinstance", vec![key_error.clone(), Value::ExcType(ExcType::LookupError)]);
    assert!(matches!(result.unwrap(), Value::Bool(true)));

    let classes = Value::tuple(vec![Value::ExcType(ExcType::ValueError), Value::ExcType(ExcType::TypeError)]);
    let result = call(&mut vm, "isinstance", vec![key_error.clone(), classes]);
    assert!(matches!(result.unwrap(), Value::Bool(false)));

    let result = call(&mut vm, "isinstance", vec![Value::Int(1), Value::ExcType(ExcType::Exception)]);
    assert!(matches!(result.unwrap(), Value::Bool(false)));

    assert_eq!(
        message(call(&mut vm, "isinstance", vec![key_error, Value::Int(1)])),
        "TypeError: isinstance() arg 2 must be a type or tuple of types"
    );
}

#[test]
fn list_and_tuple_constructors() {
    let mut vm = VirtualMachine::default();
    let range = call(&mut vm, "range", vec![Value::Int(3)]).unwrap();
    let list = call(&mut vm, "list", vec![range]).unwrap();
    assert_eq!(list.py_repr(), "[0, 1, 2]");

    let tuple = call(&mut vm, "tuple", vec![Value::str("ab")]).unwrap();
    assert_eq!(tuple.py_repr(), "('a', 'b')");
    assert_eq!(call(&mut vm, "tuple", Vec::new()).unwrap().py_repr(), "()");

    assert_eq!(
        message(call(&mut vm, "list", vec![Value::Int(3)])),
        "TypeError: 'int' object is not iterable"
    );
}

#[test]
fn iter_and_next_over_list() {
    let mut vm = VirtualMachine::default();
    let it = call(&mut vm, "iter", vec![Value::list(vec![Value::Int(1)])]).unwrap();
    assert!(matches!(call(&mut vm, "next", vec![it.clone()]).unwrap(), Value::Int(1)));
    assert!(matches!(call(&mut vm, "next", vec![it.clone(), Value::None]).unwrap(), Value::None));

    let err = call(&mut vm, "next", vec![it]).unwrap_err();
    assert_eq!(err.as_unhandled().map(|e| e.exc_type()), Some(ExcType::StopIteration));

    assert_eq!(
        message(call(&mut vm, "next", vec![Value::list(Vec::new())])),
        "TypeError: 'list' object is not an iterator"
    );
}

#[test]
fn builtins_can_be_shadowed_by_globals() {
    let mut m = CodeBuilder::module("shadow.py");
    m.load_const(5).store_name("len");
    m.load_name("len").return_value();

    let mut vm = VirtualMachine::default();
    let globals = vm.new_globals();
    let result = vm.run_module(m.build().unwrap(), &globals).unwrap();
    assert!(matches!(result, Value::Int(5)));
    // the builtins namespace itself is untouched
    assert!(matches!(vm.builtins().get("len"), Some(Value::Native(_))));
}

#[test]
fn replaced_builtins_apply_to_new_frames() {
    let mut vm = VirtualMachine::default();
    let builtins = bytevm::Namespace::new();
    builtins.set("answer", Value::Int(42));
    vm.set_builtins(builtins);

    let mut b = CodeBuilder::new("f");
    b.load_global("answer").load_global("len").emit(Opcode::BuildTuple, 2).return_value();
    let func = vm.make_function(b.build().unwrap(), &vm.new_globals());
    let err = vm.run(&func, Vec::<Value>::new()).unwrap_err();
    assert_eq!(
        err.as_unhandled().map(|e| e.exception().to_string()).as_deref(),
        Some("NameError: name 'len' is not defined")
    );
}
