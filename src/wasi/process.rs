//! Process-level syscalls: arguments, environment, randomness, exit, and
//! yielding.

use super::{write_u32, Caps, WasiCtxHandle, ERRNO_NOTCAPABLE, ERRNO_SUCCESS, MODULE};
use crate::linker::Linker;
use crate::store::Store;
use crate::trap::Trap;
use crate::types::ValType;
use crate::Caller;
use std::rc::Rc;

pub(super) fn register(
    linker: &mut Linker,
    store: &mut Store,
    ctx: &WasiCtxHandle,
) -> crate::Result<()> {
    let i32s = |n: usize| vec![ValType::I32; n];

    // args_sizes_get
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "args_sizes_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let buf_size_ptr = caller.pop_u32()?;
            let count_ptr = caller.pop_u32()?;

            if !cx.borrow().caps.contains(Caps::ENV_ARGS) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let (count, size) = {
                let cx = cx.borrow();
                (
                    cx.args.len() as u32,
                    cx.args.iter().map(|a| a.len() as u32 + 1).sum::<u32>(),
                )
            };
            write_u32(caller, count_ptr, count)?;
            write_u32(caller, buf_size_ptr, size)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // args_get - pointers into a packed NUL-terminated buffer.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "args_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let buf_ptr = caller.pop_u32()?;
            let argv_ptr = caller.pop_u32()?;

            if !cx.borrow().caps.contains(Caps::ENV_ARGS) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let args = cx.borrow().args.clone();
            write_string_table(caller, argv_ptr, buf_ptr, &args)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // environ_sizes_get
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "environ_sizes_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let buf_size_ptr = caller.pop_u32()?;
            let count_ptr = caller.pop_u32()?;

            if !cx.borrow().caps.contains(Caps::ENV_ARGS) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let (count, size) = {
                let cx = cx.borrow();
                (
                    cx.envs.len() as u32,
                    cx.envs
                        .iter()
                        .map(|(k, v)| (k.len() + v.len() + 2) as u32)
                        .sum::<u32>(),
                )
            };
            write_u32(caller, count_ptr, count)?;
            write_u32(caller, buf_size_ptr, size)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // environ_get
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "environ_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let buf_ptr = caller.pop_u32()?;
            let environ_ptr = caller.pop_u32()?;

            if !cx.borrow().caps.contains(Caps::ENV_ARGS) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let entries: Vec<String> = cx
                .borrow()
                .envs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write_string_table(caller, environ_ptr, buf_ptr, &entries)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // random_get - xorshift mixed from the system clock. Not cryptographic;
    // embedders with stronger needs register their own.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "random_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let len = caller.pop_u32()?;
            let ptr = caller.pop_u32()?;

            if !cx.borrow().caps.contains(Caps::RANDOM) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }

            let mut state = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0x9e37_79b9_7f4a_7c15)
                | 1;
            let mut buf = vec![0u8; len as usize];
            for chunk in buf.chunks_mut(8) {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let bytes = state.to_le_bytes();
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            caller.write_memory(u64::from(ptr), &buf)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // proc_exit - never returns; the recorded exit code is readable from the
    // context, and the invocation surfaces a host trap.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "proc_exit",
        i32s(1),
        vec![],
        move |caller: &mut Caller<'_>| {
            let code = caller.pop_u32()?;
            if !cx.borrow().caps.contains(Caps::EXIT) {
                return Err(Trap::HostTrap);
            }
            cx.borrow_mut().exit_code = Some(code);
            tracing::debug!("guest called proc_exit({code})");
            Err(Trap::HostTrap)
        },
    )?;

    // sched_yield - single-threaded: nothing to yield to.
    linker.define_host_func(
        store,
        MODULE,
        "sched_yield",
        vec![],
        i32s(1),
        move |caller: &mut Caller<'_>| caller.push_i32(ERRNO_SUCCESS),
    )?;

    Ok(())
}

/// Lay out `entries` as a NUL-terminated string pool at `buf_ptr` with a
/// pointer vector at `table_ptr`, the layout both `args_get` and
/// `environ_get` share.
fn write_string_table(
    caller: &mut Caller<'_>,
    table_ptr: u32,
    buf_ptr: u32,
    entries: &[String],
) -> Result<(), Trap> {
    let mut cursor = buf_ptr;
    for (i, entry) in entries.iter().enumerate() {
        write_u32(caller, table_ptr + (i as u32) * 4, cursor)?;
        caller.write_memory(u64::from(cursor), entry.as_bytes())?;
        caller.write_memory(u64::from(cursor) + entry.len() as u64, &[0])?;
        cursor += entry.len() as u32 + 1;
    }
    Ok(())
}
