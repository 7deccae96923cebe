use tern_vm::wasi::{self, Caps, WasiCtx};
use tern_vm::{ConstExprEvaluator, Linker, Module, Store, Val};

fn invoke_i32(store: &mut Store, instance: tern_vm::Instance, name: &str, args: &[Val]) -> i32 {
    let mut results = [Val::I32(0)];
    instance.invoke(store, name, args, &mut results).unwrap();
    match results[0] {
        Val::I32(v) => v,
        other => panic!("expected i32, got {other:?}"),
    }
}

fn instantiate_with_wasi(
    wat: &str,
    ctx: WasiCtx,
) -> (Store, tern_vm::Instance, wasi::WasiCtxHandle) {
    let mut store = Store::new();
    let mut linker = Linker::new();
    let mut const_eval = ConstExprEvaluator::default();

    let handle = wasi::register_host_functions(&mut linker, &mut store, ctx).unwrap();

    let module = Module::from_wat(wat).unwrap();
    let instance = linker
        .instantiate(&mut store, &mut const_eval, &module)
        .unwrap();
    (store, instance, handle)
}

#[test_log::test]
fn args_are_exposed_with_sizes() {
    let (mut store, instance, _ctx) = instantiate_with_wasi(
        r#"
        (module
          (import "wasi_snapshot_preview1" "args_sizes_get"
            (func $args_sizes_get (param i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "args_get"
            (func $args_get (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "argc") (result i32)
            (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
            (i32.load (i32.const 0)))
          (func (export "argv_buf_size") (result i32)
            (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
            (i32.load (i32.const 4)))
          (func (export "first_byte") (result i32)
            (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
            (drop (call $args_get (i32.const 16) (i32.const 64)))
            (i32.load8_u (i32.load (i32.const 16)))))
        "#,
        WasiCtx::new(Caps::ALL).arg("prog").arg("-v"),
    );

    assert_eq!(invoke_i32(&mut store, instance, "argc", &[]), 2);
    // "prog\0" + "-v\0"
    assert_eq!(invoke_i32(&mut store, instance, "argv_buf_size", &[]), 8);
    assert_eq!(
        invoke_i32(&mut store, instance, "first_byte", &[]),
        i32::from(b'p')
    );
}

#[test_log::test]
fn capability_refusal_is_errno_not_a_trap() {
    let (mut store, instance, _ctx) = instantiate_with_wasi(
        r#"
        (module
          (import "wasi_snapshot_preview1" "random_get"
            (func $random_get (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "run") (result i32)
            (call $random_get (i32.const 0) (i32.const 8))))
        "#,
        WasiCtx::new(Caps::NONE),
    );

    // 76 = ERRNO_NOTCAPABLE
    assert_eq!(invoke_i32(&mut store, instance, "run", &[]), 76);
}

#[test_log::test]
fn random_get_fills_the_buffer() {
    let (mut store, instance, _ctx) = instantiate_with_wasi(
        r#"
        (module
          (import "wasi_snapshot_preview1" "random_get"
            (func $random_get (param i32 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "run") (result i32)
            (drop (call $random_get (i32.const 0) (i32.const 16)))
            ;; OR all 16 bytes together; all-zero would be suspicious.
            (i32.or
              (i32.or (i32.load (i32.const 0)) (i32.load (i32.const 4)))
              (i32.or (i32.load (i32.const 8)) (i32.load (i32.const 12))))))
        "#,
        WasiCtx::new(Caps::ALL),
    );

    assert_ne!(invoke_i32(&mut store, instance, "run", &[]), 0);
}

#[test_log::test]
fn clock_time_advances() {
    let (mut store, instance, _ctx) = instantiate_with_wasi(
        r#"
        (module
          (import "wasi_snapshot_preview1" "clock_time_get"
            (func $clock_time_get (param i32 i64 i32) (result i32)))
          (memory (export "memory") 1)
          (func (export "realtime_nonzero") (result i32)
            (drop (call $clock_time_get (i32.const 0) (i64.const 1) (i32.const 0)))
            (i64.ne (i64.load (i32.const 0)) (i64.const 0))))
        "#,
        WasiCtx::new(Caps::ALL),
    );

    assert_eq!(
        invoke_i32(&mut store, instance, "realtime_nonzero", &[]),
        1
    );
}

#[test_log::test]
fn proc_exit_records_the_code_and_traps() {
    let (mut store, instance, ctx) = instantiate_with_wasi(
        r#"
        (module
          (import "wasi_snapshot_preview1" "proc_exit"
            (func $proc_exit (param i32)))
          (memory (export "memory") 1)
          (func (export "run")
            (call $proc_exit (i32.const 3))))
        "#,
        WasiCtx::new(Caps::ALL),
    );

    let err = instance.invoke(&mut store, "run", &[], &mut []).unwrap_err();
    assert!(err.as_trap().is_some());
    assert_eq!(ctx.borrow().exit_code(), Some(3));
}

#[test_log::test]
fn file_round_trip_through_a_preopen() {
    let dir = std::env::temp_dir().join(format!("tern-vm-wasi-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let (mut store, instance, _ctx) = instantiate_with_wasi(
        r#"
        (module
          (import "wasi_snapshot_preview1" "path_open"
            (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_seek"
            (func $fd_seek (param i32 i64 i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_read"
            (func $fd_read (param i32 i32 i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_close"
            (func $fd_close (param i32) (result i32)))
          (memory (export "memory") 1)
          ;; The file name lives at 256.
          (data (i32.const 256) "out.txt")
          ;; The payload lives at 272.
          (data (i32.const 272) "ping")
          (func (export "run") (result i32)
            (local $fd i32)
            ;; open "out.txt" under preopen fd 3, creating it, with the
            ;; fd_write right requested.
            (drop (call $path_open
              (i32.const 3) (i32.const 0)
              (i32.const 256) (i32.const 7)
              (i32.const 1)                 ;; oflags: creat
              (i64.const 0x40) (i64.const 0)
              (i32.const 0) (i32.const 0)))
            (local.set $fd (i32.load (i32.const 0)))
            ;; iovec at 16: base 272, len 4
            (i32.store (i32.const 16) (i32.const 272))
            (i32.store (i32.const 20) (i32.const 4))
            (drop (call $fd_write (local.get $fd) (i32.const 16) (i32.const 1) (i32.const 8)))
            ;; rewind, read back into 512
            (drop (call $fd_seek (local.get $fd) (i64.const 0) (i32.const 0) (i32.const 8)))
            (i32.store (i32.const 16) (i32.const 512))
            (i32.store (i32.const 20) (i32.const 4))
            (drop (call $fd_read (local.get $fd) (i32.const 16) (i32.const 1) (i32.const 8)))
            (drop (call $fd_close (local.get $fd)))
            (i32.load (i32.const 512))))
        "#,
        WasiCtx::new(Caps::ALL).preopen_dir(&dir, "/"),
    );

    let got = invoke_i32(&mut store, instance, "run", &[]);
    assert_eq!(got.to_le_bytes(), *b"ping");

    std::fs::remove_dir_all(&dir).ok();
}
