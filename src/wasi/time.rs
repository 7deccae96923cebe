//! Clock syscalls: `clock_time_get` and `clock_res_get`.

use super::{write_u64, Caps, WasiCtxHandle, ERRNO_INVAL, ERRNO_NOTCAPABLE, ERRNO_SUCCESS, MODULE};
use crate::linker::Linker;
use crate::store::Store;
use crate::types::ValType;
use crate::Caller;
use std::rc::Rc;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const CLOCKID_REALTIME: i32 = 0;
const CLOCKID_MONOTONIC: i32 = 1;

/// The monotonic clock's zero point is the first time anyone asks.
fn monotonic_base() -> Instant {
    static BASE: OnceLock<Instant> = OnceLock::new();
    *BASE.get_or_init(Instant::now)
}

pub(super) fn register(
    linker: &mut Linker,
    store: &mut Store,
    ctx: &WasiCtxHandle,
) -> crate::Result<()> {
    // clock_time_get(id, precision, time_ptr)
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "clock_time_get",
        vec![ValType::I32, ValType::I64, ValType::I32],
        vec![ValType::I32],
        move |caller: &mut Caller<'_>| {
            let time_ptr = caller.pop_u32()?;
            let _precision = caller.pop_i64()?;
            let id = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::CLOCK) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }

            let now_ns = match id {
                CLOCKID_REALTIME => SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos() as u64)
                    .unwrap_or(0),
                CLOCKID_MONOTONIC => monotonic_base().elapsed().as_nanos() as u64,
                _ => return caller.push_i32(ERRNO_INVAL),
            };
            write_u64(caller, time_ptr, now_ns)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // clock_res_get(id, resolution_ptr)
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "clock_res_get",
        vec![ValType::I32, ValType::I32],
        vec![ValType::I32],
        move |caller: &mut Caller<'_>| {
            let res_ptr = caller.pop_u32()?;
            let id = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::CLOCK) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            if id != CLOCKID_REALTIME && id != CLOCKID_MONOTONIC {
                return caller.push_i32(ERRNO_INVAL);
            }
            // One nanosecond is what the std clocks nominally offer.
            write_u64(caller, res_ptr, 1)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    Ok(())
}
