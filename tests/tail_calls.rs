use tern_vm::{ConstExprEvaluator, Linker, Module, Store, Val};

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

const EVEN_ODD: &str = r#"
    (module
      (func $even (export "even") (param i32) (result i32)
        (if (result i32) (i32.eqz (local.get 0))
          (then (i32.const 1))
          (else (return_call $odd (i32.sub (local.get 0) (i32.const 1))))))
      (func $odd (export "odd") (param i32) (result i32)
        (if (result i32) (i32.eqz (local.get 0))
          (then (i32.const 0))
          (else (return_call $even (i32.sub (local.get 0) (i32.const 1)))))))
"#;

#[test_log::test]
fn mutual_tail_recursion() {
    let (mut store, instance) = instantiate(EVEN_ODD);

    assert_eq!(invoke_i32(&mut store, instance, "even", &[Val::I32(4)]), 1);
    assert_eq!(invoke_i32(&mut store, instance, "even", &[Val::I32(5)]), 0);
    assert_eq!(invoke_i32(&mut store, instance, "odd", &[Val::I32(5)]), 1);
}

#[test_log::test]
fn stack_usage_stays_flat() {
    let (mut store, instance) = instantiate(EVEN_ODD);

    // Two million alternating tail calls: far past any frame limit, so this
    // only passes if each call reuses the caller's frame.
    assert_eq!(
        invoke_i32(&mut store, instance, "even", &[Val::I32(2_000_000)]),
        1
    );
}

#[test_log::test]
fn return_call_indirect_through_a_table() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $t (func (param i32) (result i32)))
          (table 2 funcref)
          (elem (i32.const 0) $dec $done)
          (func $done (param i32) (result i32) (i32.const 77))
          (func $dec (param i32) (result i32)
            (if (result i32) (i32.eqz (local.get 0))
              (then (return_call_indirect (type $t) (i32.const 0) (i32.const 1)))
              (else (return_call_indirect (type $t)
                      (i32.sub (local.get 0) (i32.const 1))
                      (i32.const 0)))))
          (func (export "run") (param i32) (result i32)
            (return_call $dec (local.get 0))))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "run", &[Val::I32(100_000)]),
        77
    );
}
