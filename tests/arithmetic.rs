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

fn invoke1(store: &mut Store, instance: tern_vm::Instance, name: &str, args: &[Val]) -> Val {
    let mut results = [Val::I32(0)];
    instance.invoke(store, name, args, &mut results).unwrap();
    results[0]
}

#[test_log::test]
fn add_two_numbers() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "add") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.add))
        "#,
    );

    let result = invoke1(&mut store, instance, "add", &[Val::I32(3), Val::I32(4)]);
    assert!(matches!(result, Val::I32(7)));

    // Wraparound, no trap.
    let result = invoke1(
        &mut store,
        instance,
        "add",
        &[Val::I32(i32::MIN), Val::I32(-1)],
    );
    assert!(matches!(result, Val::I32(i32::MAX)));
}

#[test_log::test]
fn division_traps_by_kind() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "div_s") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_s))
        "#,
    );

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "div_s", &[Val::I32(1), Val::I32(0)], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::IntegerDivisionByZero));

    let err = instance
        .invoke(
            &mut store,
            "div_s",
            &[Val::I32(i32::MIN), Val::I32(-1)],
            &mut results,
        )
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::IntegerOverflow));

    // MIN % -1 is 0, not a trap.
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "rem_s") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.rem_s))
        "#,
    );
    let result = invoke1(
        &mut store,
        instance,
        "rem_s",
        &[Val::I32(i32::MIN), Val::I32(-1)],
    );
    assert!(matches!(result, Val::I32(0)));
}

#[test_log::test]
fn float_to_int_conversions() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "trunc") (param f64) (result i32)
            local.get 0
            i32.trunc_f64_s)
          (func (export "trunc_sat") (param f64) (result i32)
            local.get 0
            i32.trunc_sat_f64_s))
        "#,
    );

    let result = invoke1(&mut store, instance, "trunc", &[Val::from(-3.7)]);
    assert!(matches!(result, Val::I32(-3)));

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "trunc", &[Val::from(f64::NAN)], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::BadConversionToInteger));

    let err = instance
        .invoke(&mut store, "trunc", &[Val::from(1e18)], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::IntegerOverflow));

    // The saturating variant clamps instead.
    let result = invoke1(&mut store, instance, "trunc_sat", &[Val::from(1e18)]);
    assert!(matches!(result, Val::I32(i32::MAX)));
    let result = invoke1(&mut store, instance, "trunc_sat", &[Val::from(f64::NAN)]);
    assert!(matches!(result, Val::I32(0)));
}

#[test_log::test]
fn shifts_are_taken_modulo_width() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "shl") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.shl))
        "#,
    );

    let result = invoke1(&mut store, instance, "shl", &[Val::I32(1), Val::I32(33)]);
    assert!(matches!(result, Val::I32(2)));
}

#[test_log::test]
fn float_min_max_and_nearest() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "min") (param f64 f64) (result f64)
            local.get 0
            local.get 1
            f64.min)
          (func (export "nearest") (param f64) (result f64)
            local.get 0
            f64.nearest))
        "#,
    );

    let result = invoke1(
        &mut store,
        instance,
        "min",
        &[Val::from(-0.0f64), Val::from(0.0f64)],
    );
    let Val::F64(bits) = result else { panic!() };
    assert_eq!(bits, (-0.0f64).to_bits());

    let result = invoke1(
        &mut store,
        instance,
        "min",
        &[Val::from(f64::NAN), Val::from(1.0f64)],
    );
    let Val::F64(bits) = result else { panic!() };
    assert!(f64::from_bits(bits).is_nan());

    // Round half to even.
    let result = invoke1(&mut store, instance, "nearest", &[Val::from(2.5f64)]);
    let Val::F64(bits) = result else { panic!() };
    assert_eq!(f64::from_bits(bits), 2.0);
}
