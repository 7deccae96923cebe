use tern_vm::{ConstExprEvaluator, Linker, Module, Store, Trap, Val};

fn instantiate(wat: &str) -> (Store, tern_vm::Instance) {
    let module = Module::from_wat(wat).unwrap();
    let mut store = Store::new();
    let linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();
    let instance = linker
        .instantiate(&mut store, &mut const_eval, &module)
        .unwrap();
    (store, instance)
}

fn invoke_i32(store: &mut Store, instance: tern_vm::Instance, name: &str, args: &[Val]) -> i32 {
    let mut results = [Val::I32(0)];
    instance.invoke(store, name, args, &mut results).unwrap();
    match results[0] {
        Val::I32(v) => v,
        other => panic!("expected i32, got {other:?}"),
    }
}

#[test_log::test]
fn fibonacci_by_recursion() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func $fib (export "fib") (param i32) (result i32)
            (if (result i32) (i32.lt_s (local.get 0) (i32.const 2))
              (then (local.get 0))
              (else
                (i32.add
                  (call $fib (i32.sub (local.get 0) (i32.const 1)))
                  (call $fib (i32.sub (local.get 0) (i32.const 2))))))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "fib", &[Val::I32(10)]), 55);
    assert_eq!(
        invoke_i32(&mut store, instance, "fib", &[Val::I32(20)]),
        6765
    );
}

#[test_log::test]
fn loops_and_branches() {
    // Sum 1..=n with a loop and br_if.
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "sum") (param i32) (result i32)
            (local $acc i32)
            (block $done
              (loop $next
                (br_if $done (i32.eqz (local.get 0)))
                (local.set $acc (i32.add (local.get $acc) (local.get 0)))
                (local.set 0 (i32.sub (local.get 0) (i32.const 1)))
                (br $next)))
            (local.get $acc)))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "sum", &[Val::I32(100)]),
        5050
    );
    assert_eq!(invoke_i32(&mut store, instance, "sum", &[Val::I32(0)]), 0);
}

#[test_log::test]
fn br_table_saturates_to_default() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "select") (param i32) (result i32)
            (block $default
              (block $two
                (block $one
                  (block $zero
                    (br_table $zero $one $two $default (local.get 0)))
                  (return (i32.const 100)))
                (return (i32.const 101)))
              (return (i32.const 102)))
            (i32.const 103)))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "select", &[Val::I32(0)]),
        100
    );
    assert_eq!(
        invoke_i32(&mut store, instance, "select", &[Val::I32(2)]),
        102
    );
    assert_eq!(
        invoke_i32(&mut store, instance, "select", &[Val::I32(3)]),
        103
    );
    // Out of range saturates to the default.
    assert_eq!(
        invoke_i32(&mut store, instance, "select", &[Val::I32(250)]),
        103
    );
}

#[test_log::test]
fn unreachable_is_a_trap() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "boom") unreachable))
        "#,
    );

    let err = instance
        .invoke(&mut store, "boom", &[], &mut [])
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::UnreachableCodeReached));

    // The store stays valid and may be invoked again.
    let err = instance
        .invoke(&mut store, "boom", &[], &mut [])
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::UnreachableCodeReached));
}

#[test_log::test]
fn runaway_recursion_traps_instead_of_aborting() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func $loop (export "loop") (result i32)
            (i32.add (i32.const 1) (call $loop))))
        "#,
    );

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "loop", &[], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::StackOverflow));
}

#[test_log::test]
fn multi_value_blocks() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "swap") (param i32 i32) (result i32 i32)
            local.get 1
            local.get 0))
        "#,
    );

    let mut results = [Val::I32(0), Val::I32(0)];
    instance
        .invoke(&mut store, "swap", &[Val::I32(1), Val::I32(2)], &mut results)
        .unwrap();
    assert!(matches!(results, [Val::I32(2), Val::I32(1)]));
}

#[test_log::test]
fn export_lookup_failures() {
    let (mut store, instance) = instantiate(r#"(module (func (export "f")))"#);

    let err = instance
        .invoke(&mut store, "missing", &[], &mut [])
        .unwrap_err();
    assert!(matches!(err, tern_vm::Error::ExportNotFound(_)));

    let err = instance
        .invoke(&mut store, "f", &[Val::I32(1)], &mut [])
        .unwrap_err();
    assert!(matches!(err, tern_vm::Error::ArityMismatch(_)));
}
