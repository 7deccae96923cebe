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
fn struct_fields_read_and_write() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $point (struct (field $x i32) (field $y (mut i32))))
          (func (export "run") (result i32)
            (local $p (ref $point))
            (local.set $p (struct.new $point (i32.const 3) (i32.const 4)))
            (struct.set $point $y (local.get $p) (i32.const 40))
            (i32.add
              (struct.get $point $x (local.get $p))
              (struct.get $point $y (local.get $p)))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "run", &[]), 43);
}

#[test_log::test]
fn packed_struct_fields_extend_correctly() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $small (struct (field (mut i8))))
          (func (export "run") (result i32)
            (local $s (ref $small))
            (local.set $s (struct.new_default $small))
            (struct.set $small 0 (local.get $s) (i32.const -1))
            (i32.sub
              (struct.get_u $small 0 (local.get $s))
              (struct.get_s $small 0 (local.get $s)))))
        "#,
    );

    // get_u yields 255, get_s yields -1.
    assert_eq!(invoke_i32(&mut store, instance, "run", &[]), 256);
}

#[test_log::test]
fn arrays_allocate_fill_and_bounds_check() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $vec (array (mut i32)))
          (func (export "run") (result i32)
            (local $a (ref $vec))
            (local.set $a (array.new $vec (i32.const 7) (i32.const 5)))
            (array.set $vec (local.get $a) (i32.const 2) (i32.const 100))
            (i32.add
              (i32.add
                (array.get $vec (local.get $a) (i32.const 0))
                (array.get $vec (local.get $a) (i32.const 2)))
              (array.len (local.get $a))))
          (func (export "oob") (result i32)
            (array.get $vec
              (array.new_default $vec (i32.const 2))
              (i32.const 2))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "run", &[]), 112);

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "oob", &[], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::ArrayOutOfBounds));
}

#[test_log::test]
fn array_new_fixed_and_copy() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $vec (array (mut i32)))
          (func (export "run") (result i32)
            (local $a (ref $vec))
            (local $b (ref $vec))
            (local.set $a (array.new_fixed $vec 3 (i32.const 1) (i32.const 2) (i32.const 3)))
            (local.set $b (array.new_default $vec (i32.const 3)))
            (array.copy $vec $vec
              (local.get $b) (i32.const 1)
              (local.get $a) (i32.const 1)
              (i32.const 2))
            (i32.add
              (array.get $vec (local.get $b) (i32.const 1))
              (array.get $vec (local.get $b) (i32.const 2)))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "run", &[]), 5);
}

#[test_log::test]
fn i31_round_trips_with_sign() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "get_s") (param i32) (result i32)
            (i31.get_s (ref.i31 (local.get 0))))
          (func (export "get_u") (param i32) (result i32)
            (i31.get_u (ref.i31 (local.get 0)))))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "get_s", &[Val::I32(-1)]),
        -1
    );
    assert_eq!(
        invoke_i32(&mut store, instance, "get_u", &[Val::I32(-1)]),
        0x7fff_ffff
    );
    assert_eq!(
        invoke_i32(&mut store, instance, "get_s", &[Val::I32(12345)]),
        12345
    );
}

#[test_log::test]
fn null_dereferences_trap() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $point (struct (field i32)))
          (func (export "run") (result i32)
            (struct.get $point 0 (ref.null $point))))
        "#,
    );

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "run", &[], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::NullReference));
}

#[test_log::test]
fn ref_test_and_cast_follow_the_hierarchy() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $point (struct (field i32)))
          (type $vec (array (mut i32)))
          (func (export "test_struct") (result i32)
            (ref.test (ref struct) (struct.new $point (i32.const 1))))
          (func (export "test_i31_is_eq") (result i32)
            (ref.test (ref eq) (ref.i31 (i32.const 5))))
          (func (export "test_array_not_struct") (result i32)
            (ref.test (ref struct) (array.new_default $vec (i32.const 1))))
          (func (export "cast_fails") (result i32)
            (drop (ref.cast (ref $vec)
              (select (result (ref null eq))
                (struct.new $point (i32.const 1))
                (ref.null eq)
                (i32.const 1))))
            (i32.const 0)))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "test_struct", &[]), 1);
    assert_eq!(invoke_i32(&mut store, instance, "test_i31_is_eq", &[]), 1);
    assert_eq!(
        invoke_i32(&mut store, instance, "test_array_not_struct", &[]),
        0
    );

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "cast_fails", &[], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::CastFailure));
}

#[test_log::test]
fn br_on_cast_branches_by_runtime_type() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $point (struct (field i32)))
          (func $classify (param $r (ref null eq)) (result i32)
            (block $is_point (result (ref $point))
              (br_on_cast $is_point (ref null eq) (ref $point) (local.get $r))
              (drop)
              (return (i32.const 0)))
            (struct.get $point 0))
          (func (export "with_point") (result i32)
            (call $classify (struct.new $point (i32.const 11))))
          (func (export "with_i31") (result i32)
            (call $classify (ref.i31 (i32.const 3)))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "with_point", &[]), 11);
    assert_eq!(invoke_i32(&mut store, instance, "with_i31", &[]), 0);
}

#[test_log::test]
fn subtyping_between_declared_types() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (type $base (sub (struct (field i32))))
          (type $derived (sub $base (struct (field i32) (field i32))))
          (func (export "run") (result i32)
            ;; An upcast value still tests as its concrete subtype.
            (ref.test (ref $derived)
              (struct.new $derived (i32.const 1) (i32.const 2)))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "run", &[]), 1);
}
