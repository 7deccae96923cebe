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
fn lane_arithmetic_and_extraction() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "add_lane2") (result i32)
            (i32x4.extract_lane 2
              (i32x4.add
                (v128.const i32x4 1 2 3 4)
                (v128.const i32x4 10 20 30 40))))
          (func (export "splat_sum") (param i32) (result i32)
            (i32.add
              (i32x4.extract_lane 0 (i32x4.splat (local.get 0)))
              (i32x4.extract_lane 3 (i32x4.splat (local.get 0))))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "add_lane2", &[]), 33);
    assert_eq!(
        invoke_i32(&mut store, instance, "splat_sum", &[Val::I32(21)]),
        42
    );
}

#[test_log::test]
fn saturating_lanes_and_masks() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "sat") (result i32)
            (i8x16.extract_lane_s 0
              (i8x16.add_sat_s
                (i8x16.splat (i32.const 100))
                (i8x16.splat (i32.const 100)))))
          (func (export "bitmask") (result i32)
            (i8x16.bitmask (i8x16.splat (i32.const -1))))
          (func (export "any") (result i32)
            (v128.any_true (v128.const i64x2 0 0)))
          (func (export "all") (result i32)
            (i32x4.all_true (v128.const i32x4 1 2 3 4))))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "sat", &[]), 127);
    assert_eq!(invoke_i32(&mut store, instance, "bitmask", &[]), 0xffff);
    assert_eq!(invoke_i32(&mut store, instance, "any", &[]), 0);
    assert_eq!(invoke_i32(&mut store, instance, "all", &[]), 1);
}

#[test_log::test]
fn shuffle_swizzle_and_memory() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (func (export "reverse_first") (result i32)
            (v128.store (i32.const 0) (v128.const i8x16 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15))
            (i8x16.extract_lane_u 0
              (i8x16.shuffle 15 14 13 12 11 10 9 8 7 6 5 4 3 2 1 0
                (v128.load (i32.const 0))
                (v128.load (i32.const 0))))))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "reverse_first", &[]),
        15
    );
}

#[test_log::test]
fn float_lanes_canonicalize_nan() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (func (export "nan_bits") (result i32)
            (i32x4.extract_lane 0
              (i32x4.splat
                (i32.reinterpret_f32
                  (f32x4.extract_lane 0
                    (f32x4.div
                      (f32x4.splat (f32.const 0))
                      (f32x4.splat (f32.const 0)))))))))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "nan_bits", &[]) as u32,
        0x7fc0_0000
    );
}

#[test_log::test]
fn atomic_rmw_and_cmpxchg() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1 1 shared)
          (func (export "add") (param i32 i32) (result i32)
            (i32.atomic.rmw.add (local.get 0) (local.get 1)))
          (func (export "cmpxchg") (param i32 i32 i32) (result i32)
            (i32.atomic.rmw.cmpxchg (local.get 0) (local.get 1) (local.get 2)))
          (func (export "load") (param i32) (result i32)
            (i32.atomic.load (local.get 0))))
        "#,
    );

    // rmw.add returns the old value.
    assert_eq!(
        invoke_i32(&mut store, instance, "add", &[Val::I32(0), Val::I32(5)]),
        0
    );
    assert_eq!(
        invoke_i32(&mut store, instance, "add", &[Val::I32(0), Val::I32(3)]),
        5
    );
    assert_eq!(invoke_i32(&mut store, instance, "load", &[Val::I32(0)]), 8);

    // cmpxchg only writes on a match.
    assert_eq!(
        invoke_i32(
            &mut store,
            instance,
            "cmpxchg",
            &[Val::I32(0), Val::I32(8), Val::I32(100)],
        ),
        8
    );
    assert_eq!(invoke_i32(&mut store, instance, "load", &[Val::I32(0)]), 100);
    assert_eq!(
        invoke_i32(
            &mut store,
            instance,
            "cmpxchg",
            &[Val::I32(0), Val::I32(8), Val::I32(0)],
        ),
        100
    );
    assert_eq!(invoke_i32(&mut store, instance, "load", &[Val::I32(0)]), 100);
}

#[test_log::test]
fn misaligned_atomics_trap() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1 1 shared)
          (func (export "load") (param i32) (result i32)
            (i32.atomic.load (local.get 0))))
        "#,
    );

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "load", &[Val::I32(1)], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::HeapMisaligned));
}

#[test_log::test]
fn wait_and_notify_degenerate_single_threaded() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1 1 shared)
          (func (export "notify") (param i32) (result i32)
            (memory.atomic.notify (local.get 0) (i32.const 1)))
          (func (export "wait") (param i32 i32) (result i32)
            (memory.atomic.wait32 (local.get 0) (local.get 1) (i64.const 0))))
        "#,
    );

    // Nobody is waiting, and nobody can ever notify.
    assert_eq!(
        invoke_i32(&mut store, instance, "notify", &[Val::I32(0)]),
        0
    );
    // Value mismatch: "not-equal".
    assert_eq!(
        invoke_i32(&mut store, instance, "wait", &[Val::I32(0), Val::I32(7)]),
        1
    );
    // Value matches: immediate "timed out" instead of a deadlock.
    assert_eq!(
        invoke_i32(&mut store, instance, "wait", &[Val::I32(0), Val::I32(0)]),
        2
    );
}

#[test_log::test]
fn atomic_wait_on_unshared_memory_traps() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (func (export "wait") (result i32)
            (memory.atomic.wait32 (i32.const 0) (i32.const 0) (i64.const 0))))
        "#,
    );

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "wait", &[], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::AtomicWaitNonSharedMemory));
}
