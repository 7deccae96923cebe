use tern_vm::{ConstExprEvaluator, Linker, Module, Store, Trap, Val, ValType};

fn invoke_i32(store: &mut Store, instance: tern_vm::Instance, name: &str, args: &[Val]) -> i32 {
    let mut results = [Val::I32(0)];
    instance.invoke(store, name, args, &mut results).unwrap();
    match results[0] {
        Val::I32(v) => v,
        other => panic!("expected i32, got {other:?}"),
    }
}

#[test_log::test]
fn two_module_function_chain() {
    let mut store = Store::new();
    let mut linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    let math = Module::from_wat(
        r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            (i32.add (local.get 0) (local.get 1)))
          (func (export "mul") (param i32 i32) (result i32)
            (i32.mul (local.get 0) (local.get 1))))
        "#,
    )
    .unwrap();
    let math_instance = linker.instantiate(&mut store, &mut const_eval, &math).unwrap();
    linker
        .define_instance(&mut store, "math", math_instance)
        .unwrap();

    let app = Module::from_wat(
        r#"
        (module
          (import "math" "add" (func $add (param i32 i32) (result i32)))
          (import "math" "mul" (func $mul (param i32 i32) (result i32)))
          (func (export "add_and_mul") (param i32 i32 i32) (result i32)
            (call $mul (call $add (local.get 0) (local.get 1)) (local.get 2))))
        "#,
    )
    .unwrap();
    let app_instance = linker.instantiate(&mut store, &mut const_eval, &app).unwrap();

    assert_eq!(
        invoke_i32(
            &mut store,
            app_instance,
            "add_and_mul",
            &[Val::I32(3), Val::I32(4), Val::I32(5)],
        ),
        35
    );
}

#[test_log::test]
fn imported_memory_is_shared_between_instances() {
    let mut store = Store::new();
    let mut linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    let exporter = Module::from_wat(
        r#"
        (module
          (memory (export "memory") 1)
          (func (export "read") (param i32) (result i32)
            (i32.load (local.get 0)))
          (func (export "grow") (result i32)
            (memory.grow (i32.const 1))))
        "#,
    )
    .unwrap();
    let exporter_instance = linker
        .instantiate(&mut store, &mut const_eval, &exporter)
        .unwrap();
    linker
        .define_instance(&mut store, "env", exporter_instance)
        .unwrap();

    let importer = Module::from_wat(
        r#"
        (module
          (import "env" "memory" (memory 1))
          (func (export "write") (param i32 i32)
            (i32.store (local.get 0) (local.get 1)))
          (func (export "size") (result i32)
            (memory.size)))
        "#,
    )
    .unwrap();
    let importer_instance = linker
        .instantiate(&mut store, &mut const_eval, &importer)
        .unwrap();

    // A write through one instance is visible to the other.
    importer_instance
        .invoke(&mut store, "write", &[Val::I32(12), Val::I32(99)], &mut [])
        .unwrap();
    assert_eq!(
        invoke_i32(&mut store, exporter_instance, "read", &[Val::I32(12)]),
        99
    );

    // A grow through the exporter is visible to the importer.
    assert_eq!(invoke_i32(&mut store, importer_instance, "size", &[]), 1);
    assert_eq!(invoke_i32(&mut store, exporter_instance, "grow", &[]), 1);
    assert_eq!(invoke_i32(&mut store, importer_instance, "size", &[]), 2);
}

#[test_log::test]
fn host_functions_push_and_pop_typed_values() {
    let mut store = Store::new();
    let mut linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    linker
        .define_host_func(
            &mut store,
            "host",
            "mul3",
            vec![ValType::I32],
            vec![ValType::I32],
            |caller| {
                let x = caller.pop_i32()?;
                caller.push_i32(x * 3)
            },
        )
        .unwrap();

    let module = Module::from_wat(
        r#"
        (module
          (import "host" "mul3" (func $mul3 (param i32) (result i32)))
          (func (export "run") (param i32) (result i32)
            (call $mul3 (local.get 0))))
        "#,
    )
    .unwrap();
    let instance = linker.instantiate(&mut store, &mut const_eval, &module).unwrap();

    assert_eq!(invoke_i32(&mut store, instance, "run", &[Val::I32(7)]), 21);
}

#[test_log::test]
fn host_function_can_trap() {
    let mut store = Store::new();
    let mut linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    linker
        .define_host_func(&mut store, "host", "fail", vec![], vec![], |_caller| {
            Err(Trap::HostTrap)
        })
        .unwrap();

    let module = Module::from_wat(
        r#"
        (module
          (import "host" "fail" (func $fail))
          (func (export "run") (call $fail)))
        "#,
    )
    .unwrap();
    let instance = linker.instantiate(&mut store, &mut const_eval, &module).unwrap();

    let err = instance.invoke(&mut store, "run", &[], &mut []).unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::HostTrap));
}

#[test_log::test]
fn missing_and_mismatched_imports() {
    let mut store = Store::new();
    let mut linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    let module = Module::from_wat(
        r#"(module (import "nowhere" "f" (func (param i32))))"#,
    )
    .unwrap();
    let err = linker
        .instantiate(&mut store, &mut const_eval, &module)
        .unwrap_err();
    assert!(matches!(err, tern_vm::Error::ImportNotFound { .. }));

    // Same name, wrong signature.
    linker
        .define_host_func(&mut store, "nowhere", "f", vec![], vec![], |_| Ok(()))
        .unwrap();
    let err = linker
        .instantiate(&mut store, &mut const_eval, &module)
        .unwrap_err();
    assert!(matches!(err, tern_vm::Error::ImportTypeMismatch { .. }));
}

#[test_log::test]
fn instantiating_twice_yields_equivalent_instances() {
    let mut store = Store::new();
    let linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    let module = Module::from_wat(
        r#"
        (module
          (memory 1)
          (global $count (mut i32) (i32.const 0))
          (func (export "bump") (result i32)
            (global.set $count (i32.add (global.get $count) (i32.const 1)))
            (global.get $count)))
        "#,
    )
    .unwrap();

    let a = linker.instantiate(&mut store, &mut const_eval, &module).unwrap();
    let b = linker.instantiate(&mut store, &mut const_eval, &module).unwrap();

    // Same behavior, separate state.
    assert_eq!(invoke_i32(&mut store, a, "bump", &[]), 1);
    assert_eq!(invoke_i32(&mut store, a, "bump", &[]), 2);
    assert_eq!(invoke_i32(&mut store, b, "bump", &[]), 1);
}

#[test_log::test]
fn start_function_runs_and_its_trap_aborts_instantiation() {
    let mut store = Store::new();
    let linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    let module = Module::from_wat(
        r#"
        (module
          (memory 1)
          (func $init (i32.store (i32.const 0) (i32.const 7)))
          (start $init)
          (func (export "load") (result i32) (i32.load (i32.const 0))))
        "#,
    )
    .unwrap();
    let instance = linker.instantiate(&mut store, &mut const_eval, &module).unwrap();
    assert_eq!(invoke_i32(&mut store, instance, "load", &[]), 7);

    let module = Module::from_wat(
        r#"
        (module
          (func $boom unreachable)
          (start $boom))
        "#,
    )
    .unwrap();
    let err = linker
        .instantiate(&mut store, &mut const_eval, &module)
        .unwrap_err();
    assert!(matches!(
        err,
        tern_vm::Error::StartTrap(Trap::UnreachableCodeReached)
    ));
}
