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

const STORE_LOAD: &str = r#"
    (module
      (memory (export "memory") 1)
      (func (export "store") (param i32 i32)
        (i32.store (local.get 0) (local.get 1)))
      (func (export "load") (param i32) (result i32)
        (i32.load (local.get 0))))
"#;

#[test_log::test]
fn store_then_load_then_trap() {
    let (mut store, instance) = instantiate(STORE_LOAD);

    instance
        .invoke(&mut store, "store", &[Val::I32(0), Val::I32(42)], &mut [])
        .unwrap();
    assert_eq!(invoke_i32(&mut store, instance, "load", &[Val::I32(0)]), 42);

    // One page is 65536 bytes; a 4-byte load at the boundary is out.
    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(&mut store, "load", &[Val::I32(65536)], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::MemoryOutOfBounds));
    let err = instance
        .invoke(&mut store, "load", &[Val::I32(65533)], &mut results)
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::MemoryOutOfBounds));
}

#[test_log::test]
fn host_access_is_bounds_checked() {
    let (mut store, instance) = instantiate(STORE_LOAD);
    let memory = instance.get_export_memory(&store, "memory").unwrap();

    memory.write(&mut store, 16, b"hello").unwrap();
    let mut buf = [0u8; 5];
    memory.read(&store, 16, &mut buf).unwrap();
    assert_eq!(&buf, b"hello");

    assert!(memory.read(&store, 65534, &mut buf).is_err());
    assert_eq!(memory.byte_size(&store), 65536);
}

#[test_log::test]
fn grow_returns_old_size_or_sentinel() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1 2)
          (func (export "grow") (param i32) (result i32)
            (memory.grow (local.get 0)))
          (func (export "size") (result i32)
            (memory.size)))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "size", &[]), 1);
    assert_eq!(invoke_i32(&mut store, instance, "grow", &[Val::I32(1)]), 1);
    assert_eq!(invoke_i32(&mut store, instance, "size", &[]), 2);
    // Past the declared maximum: the conventional -1.
    assert_eq!(invoke_i32(&mut store, instance, "grow", &[Val::I32(1)]), -1);
    assert_eq!(invoke_i32(&mut store, instance, "size", &[]), 2);
}

#[test_log::test]
fn active_data_segments_apply_and_drop() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (data (i32.const 8) "wasm")
          (func (export "load8") (param i32) (result i32)
            (i32.load8_u (local.get 0))))
        "#,
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "load8", &[Val::I32(8)]),
        i32::from(b'w')
    );
    assert_eq!(
        invoke_i32(&mut store, instance, "load8", &[Val::I32(11)]),
        i32::from(b'm')
    );
}

#[test_log::test]
fn active_segment_out_of_bounds_fails_instantiation() {
    let module = Module::from_wat(
        r#"
        (module
          (memory 1)
          (data (i32.const 65534) "wasm"))
        "#,
    )
    .unwrap();
    let mut store = Store::new();
    let linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();
    let err = linker
        .instantiate(&mut store, &mut const_eval, &module)
        .unwrap_err();
    assert!(matches!(err, tern_vm::Error::DataSegmentDoesNotFit));
}

#[test_log::test]
fn passive_data_init_and_drop() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory 1)
          (data $seg "abcd")
          (func (export "init") (param i32 i32 i32)
            (memory.init $seg (local.get 0) (local.get 1) (local.get 2)))
          (func (export "drop") (data.drop $seg))
          (func (export "load8") (param i32) (result i32)
            (i32.load8_u (local.get 0))))
        "#,
    );

    instance
        .invoke(
            &mut store,
            "init",
            &[Val::I32(0), Val::I32(1), Val::I32(2)],
            &mut [],
        )
        .unwrap();
    assert_eq!(
        invoke_i32(&mut store, instance, "load8", &[Val::I32(0)]),
        i32::from(b'b')
    );

    // Dropping is idempotent with a zero-length init, and a non-zero init
    // from a dropped segment traps.
    instance.invoke(&mut store, "drop", &[], &mut []).unwrap();
    instance.invoke(&mut store, "drop", &[], &mut []).unwrap();
    instance
        .invoke(
            &mut store,
            "init",
            &[Val::I32(0), Val::I32(0), Val::I32(0)],
            &mut [],
        )
        .unwrap();
    let err = instance
        .invoke(
            &mut store,
            "init",
            &[Val::I32(0), Val::I32(0), Val::I32(1)],
            &mut [],
        )
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::MemoryOutOfBounds));
}

#[test_log::test]
fn bulk_fill_and_overlapping_copy() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory (export "memory") 1)
          (func (export "fill") (param i32 i32 i32)
            (memory.fill (local.get 0) (local.get 1) (local.get 2)))
          (func (export "copy") (param i32 i32 i32)
            (memory.copy (local.get 0) (local.get 1) (local.get 2))))
        "#,
    );
    let memory = instance.get_export_memory(&store, "memory").unwrap();

    instance
        .invoke(
            &mut store,
            "fill",
            &[Val::I32(0), Val::I32(7), Val::I32(4)],
            &mut [],
        )
        .unwrap();
    // Overlapping forward copy must behave like memmove.
    instance
        .invoke(
            &mut store,
            "copy",
            &[Val::I32(2), Val::I32(0), Val::I32(4)],
            &mut [],
        )
        .unwrap();

    let mut buf = [0u8; 6];
    memory.read(&store, 0, &mut buf).unwrap();
    assert_eq!(buf, [7, 7, 7, 7, 7, 7]);

    // A zero-length copy at the very end is fine; one byte past traps.
    instance
        .invoke(
            &mut store,
            "copy",
            &[Val::I32(65536), Val::I32(0), Val::I32(0)],
            &mut [],
        )
        .unwrap();
    let err = instance
        .invoke(
            &mut store,
            "copy",
            &[Val::I32(65536), Val::I32(0), Val::I32(1)],
            &mut [],
        )
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::MemoryOutOfBounds));
}

#[test_log::test]
fn memory64_uses_wide_addresses() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (memory i64 1)
          (func (export "store") (param i64 i32)
            (i32.store (local.get 0) (local.get 1)))
          (func (export "load") (param i64) (result i32)
            (i32.load (local.get 0))))
        "#,
    );

    instance
        .invoke(&mut store, "store", &[Val::I64(64), Val::I32(7)], &mut [])
        .unwrap();
    assert_eq!(invoke_i32(&mut store, instance, "load", &[Val::I64(64)]), 7);

    let mut results = [Val::I32(0)];
    let err = instance
        .invoke(
            &mut store,
            "load",
            &[Val::I64(i64::MAX)],
            &mut results,
        )
        .unwrap_err();
    assert_eq!(err.as_trap(), Some(Trap::MemoryOutOfBounds));
}

#[test_log::test]
fn extended_const_global_initializers() {
    let (mut store, instance) = instantiate(
        r#"
        (module
          (global $g i32 (i32.mul (i32.add (i32.const 2) (i32.const 3)) (i32.const 7)))
          (func (export "get") (result i32) (global.get $g)))
        "#,
    );

    assert_eq!(invoke_i32(&mut store, instance, "get", &[]), 35);
}
