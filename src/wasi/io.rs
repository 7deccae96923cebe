//! File-descriptor I/O: `fd_read`, `fd_write`, `fd_seek`, `fd_close`,
//! `fd_fdstat_get`, and the prestat pair used for preopen discovery.

use super::{
    read_bytes, read_u32, write_u32, write_u64, Caps, FdEntry, WasiCtxHandle, ERRNO_BADF,
    ERRNO_INVAL, ERRNO_IO, ERRNO_NOTCAPABLE, ERRNO_SUCCESS, MODULE,
};
use crate::linker::Linker;
use crate::store::Store;
use crate::types::ValType;
use crate::Caller;
use std::io::{Read, Seek, SeekFrom, Write};
use std::rc::Rc;

const FILETYPE_CHARACTER_DEVICE: u8 = 2;
const FILETYPE_DIRECTORY: u8 = 3;
const FILETYPE_REGULAR_FILE: u8 = 4;

const WHENCE_SET: i32 = 0;
const WHENCE_CUR: i32 = 1;
const WHENCE_END: i32 = 2;

pub(super) fn register(
    linker: &mut Linker,
    store: &mut Store,
    ctx: &WasiCtxHandle,
) -> crate::Result<()> {
    let i32s = |n: usize| vec![ValType::I32; n];

    // fd_write - gather the iovec list out of guest memory and write it to
    // the descriptor.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_write",
        i32s(4),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let nwritten_ptr = caller.pop_u32()?;
            let iovs_len = caller.pop_u32()?;
            let iovs_ptr = caller.pop_u32()?;
            let fd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::WRITE) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }

            let mut data = Vec::new();
            for i in 0..iovs_len {
                let base = read_u32(caller, iovs_ptr + i * 8)?;
                let len = read_u32(caller, iovs_ptr + i * 8 + 4)?;
                data.extend_from_slice(&read_bytes(caller, base, len)?);
            }

            let written = {
                let mut guard = cx.borrow_mut();
                match usize::try_from(fd).ok().and_then(|i| guard.fds.get_mut(i)) {
                    Some(Some(FdEntry::Stdout)) => {
                        let mut out = std::io::stdout();
                        Some(out.write_all(&data).and_then(|()| out.flush()).map(|()| data.len()))
                    }
                    Some(Some(FdEntry::Stderr)) => {
                        let mut err = std::io::stderr();
                        Some(err.write_all(&data).and_then(|()| err.flush()).map(|()| data.len()))
                    }
                    Some(Some(FdEntry::File(file))) => Some(file.write(&data)),
                    _ => None,
                }
            };

            match written {
                Some(Ok(n)) => {
                    write_u32(caller, nwritten_ptr, n as u32)?;
                    caller.push_i32(ERRNO_SUCCESS)
                }
                Some(Err(_)) => caller.push_i32(ERRNO_IO),
                None => caller.push_i32(ERRNO_BADF),
            }
        },
    )?;

    // fd_read - scatter into the iovec list.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_read",
        i32s(4),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let nread_ptr = caller.pop_u32()?;
            let iovs_len = caller.pop_u32()?;
            let iovs_ptr = caller.pop_u32()?;
            let fd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::READ) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }

            let mut total = 0u32;
            for i in 0..iovs_len {
                let base = read_u32(caller, iovs_ptr + i * 8)?;
                let len = read_u32(caller, iovs_ptr + i * 8 + 4)?;
                let mut buf = vec![0u8; len as usize];

                let read = {
                    let mut guard = cx.borrow_mut();
                    match usize::try_from(fd).ok().and_then(|i| guard.fds.get_mut(i)) {
                        Some(Some(FdEntry::Stdin)) => Some(std::io::stdin().read(&mut buf)),
                        Some(Some(FdEntry::File(file))) => Some(file.read(&mut buf)),
                        _ => None,
                    }
                };

                match read {
                    Some(Ok(n)) => {
                        caller.write_memory(u64::from(base), &buf[..n])?;
                        total += n as u32;
                        if n < len as usize {
                            break;
                        }
                    }
                    Some(Err(_)) => return caller.push_i32(ERRNO_IO),
                    None => return caller.push_i32(ERRNO_BADF),
                }
            }

            write_u32(caller, nread_ptr, total)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // fd_seek
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_seek",
        vec![ValType::I32, ValType::I64, ValType::I32, ValType::I32],
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let newoffset_ptr = caller.pop_u32()?;
            let whence = caller.pop_i32()?;
            let offset = caller.pop_i64()?;
            let fd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::FD_SEEK) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }

            let pos = match whence {
                WHENCE_SET => {
                    if offset < 0 {
                        return caller.push_i32(ERRNO_INVAL);
                    }
                    SeekFrom::Start(offset as u64)
                }
                WHENCE_CUR => SeekFrom::Current(offset),
                WHENCE_END => SeekFrom::End(offset),
                _ => return caller.push_i32(ERRNO_INVAL),
            };

            let sought = {
                let mut guard = cx.borrow_mut();
                match usize::try_from(fd).ok().and_then(|i| guard.fds.get_mut(i)) {
                    Some(Some(FdEntry::File(file))) => Some(file.seek(pos)),
                    _ => None,
                }
            };

            match sought {
                Some(Ok(new)) => {
                    write_u64(caller, newoffset_ptr, new)?;
                    caller.push_i32(ERRNO_SUCCESS)
                }
                Some(Err(_)) => caller.push_i32(ERRNO_IO),
                None => caller.push_i32(ERRNO_BADF),
            }
        },
    )?;

    // fd_close
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_close",
        i32s(1),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let fd = caller.pop_i32()?;

            let closed = {
                let mut guard = cx.borrow_mut();
                match usize::try_from(fd).ok().and_then(|i| guard.fds.get_mut(i)) {
                    Some(slot) if matches!(slot, Some(FdEntry::File(_))) => {
                        *slot = None;
                        true
                    }
                    _ => false,
                }
            };
            caller.push_i32(if closed { ERRNO_SUCCESS } else { ERRNO_BADF })
        },
    )?;

    // fd_fdstat_get - a 24-byte fdstat: filetype, flags, rights.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_fdstat_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let buf_ptr = caller.pop_u32()?;
            let fd = caller.pop_i32()?;

            let filetype = match cx.borrow().entry(fd) {
                Some(FdEntry::Stdin | FdEntry::Stdout | FdEntry::Stderr) => {
                    Some(FILETYPE_CHARACTER_DEVICE)
                }
                Some(FdEntry::File(_)) => Some(FILETYPE_REGULAR_FILE),
                Some(FdEntry::PreopenDir { .. }) => Some(FILETYPE_DIRECTORY),
                None => None,
            };
            let Some(filetype) = filetype else {
                return caller.push_i32(ERRNO_BADF);
            };

            let mut stat = [0u8; 24];
            stat[0] = filetype;
            // Rights are reported wide open; enforcement happens through the
            // capability mask, not per-descriptor rights.
            stat[8..16].copy_from_slice(&u64::MAX.to_le_bytes());
            stat[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
            caller.write_memory(u64::from(buf_ptr), &stat)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // fd_prestat_get - an 8-byte prestat: tag 0 (dir) + name length.
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_prestat_get",
        i32s(2),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let buf_ptr = caller.pop_u32()?;
            let fd = caller.pop_i32()?;

            let name_len = match cx.borrow().entry(fd) {
                Some(FdEntry::PreopenDir { guest_path, .. }) => Some(guest_path.len() as u32),
                _ => None,
            };
            let Some(name_len) = name_len else {
                return caller.push_i32(ERRNO_BADF);
            };

            let mut prestat = [0u8; 8];
            prestat[4..8].copy_from_slice(&name_len.to_le_bytes());
            caller.write_memory(u64::from(buf_ptr), &prestat)?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    // fd_prestat_dir_name
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "fd_prestat_dir_name",
        i32s(3),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let path_len = caller.pop_u32()?;
            let path_ptr = caller.pop_u32()?;
            let fd = caller.pop_i32()?;

            let name = match cx.borrow().entry(fd) {
                Some(FdEntry::PreopenDir { guest_path, .. }) => Some(guest_path.clone()),
                _ => None,
            };
            let Some(name) = name else {
                return caller.push_i32(ERRNO_BADF);
            };
            if (path_len as usize) < name.len() {
                return caller.push_i32(ERRNO_INVAL);
            }

            caller.write_memory(u64::from(path_ptr), name.as_bytes())?;
            caller.push_i32(ERRNO_SUCCESS)
        },
    )?;

    Ok(())
}
