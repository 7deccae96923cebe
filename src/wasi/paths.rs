//! Path operations: `path_open`, `path_create_directory`, `path_rename`,
//! `path_unlink_file`.
//!
//! Paths resolve relative to a preopened directory descriptor. Anything
//! beyond the capability check (symlink policy, escape prevention) is the
//! embedder's concern.

use super::{
    read_guest_path, write_u32, Caps, FdEntry, WasiCtxHandle, ERRNO_ACCES, ERRNO_BADF,
    ERRNO_EXIST, ERRNO_INVAL, ERRNO_NOENT, ERRNO_NOTCAPABLE, ERRNO_NOTDIR, ERRNO_SUCCESS, MODULE,
};
use crate::linker::Linker;
use crate::store::Store;
use crate::types::ValType;
use crate::Caller;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

const OFLAGS_CREAT: u32 = 1 << 0;
const OFLAGS_DIRECTORY: u32 = 1 << 1;
const OFLAGS_EXCL: u32 = 1 << 2;
const OFLAGS_TRUNC: u32 = 1 << 3;

/// The rights bits that imply write access when requested in
/// `fs_rights_base`.
const RIGHTS_FD_WRITE: u64 = 1 << 6;

fn resolve(ctx: &WasiCtxHandle, dirfd: i32, path: &str) -> Result<PathBuf, i32> {
    match ctx.borrow().entry(dirfd) {
        Some(FdEntry::PreopenDir { path: base, .. }) => {
            Ok(base.join(path.trim_start_matches('/')))
        }
        Some(_) => Err(ERRNO_NOTDIR),
        None => Err(ERRNO_BADF),
    }
}

pub(super) fn register(
    linker: &mut Linker,
    store: &mut Store,
    ctx: &WasiCtxHandle,
) -> crate::Result<()> {
    let i32s = |n: usize| vec![ValType::I32; n];

    // path_open
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "path_open",
        vec![
            ValType::I32, // dirfd
            ValType::I32, // dirflags
            ValType::I32, // path_ptr
            ValType::I32, // path_len
            ValType::I32, // oflags
            ValType::I64, // fs_rights_base
            ValType::I64, // fs_rights_inheriting
            ValType::I32, // fdflags
            ValType::I32, // opened_fd_ptr
        ],
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let opened_fd_ptr = caller.pop_u32()?;
            let _fdflags = caller.pop_i32()?;
            let _rights_inheriting = caller.pop_i64()?;
            let rights_base = caller.pop_i64()? as u64;
            let oflags = caller.pop_u32()?;
            let path_len = caller.pop_u32()?;
            let path_ptr = caller.pop_u32()?;
            let _dirflags = caller.pop_i32()?;
            let dirfd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::PATH_OPEN) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let wants_write = rights_base & RIGHTS_FD_WRITE != 0;
            if wants_write && !cx.borrow().caps.contains(Caps::WRITE) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }

            let Some(path) = read_guest_path(caller, path_ptr, path_len)? else {
                return caller.push_i32(ERRNO_INVAL);
            };
            let full = match resolve(&cx, dirfd, &path) {
                Ok(full) => full,
                Err(errno) => return caller.push_i32(errno),
            };

            if oflags & OFLAGS_DIRECTORY != 0 {
                if !full.is_dir() {
                    return caller.push_i32(ERRNO_NOTDIR);
                }
                let fd = cx.borrow_mut().push_fd(FdEntry::PreopenDir {
                    path: full,
                    guest_path: path,
                });
                write_u32(caller, opened_fd_ptr, fd as u32)?;
                return caller.push_i32(ERRNO_SUCCESS);
            }

            let mut options = fs::OpenOptions::new();
            options.read(true).write(wants_write);
            if oflags & OFLAGS_CREAT != 0 {
                options.create(true);
                if oflags & OFLAGS_EXCL != 0 {
                    options.create_new(true);
                }
            }
            if oflags & OFLAGS_TRUNC != 0 {
                options.truncate(true);
            }

            match options.open(&full) {
                Ok(file) => {
                    let fd = cx.borrow_mut().push_fd(FdEntry::File(file));
                    write_u32(caller, opened_fd_ptr, fd as u32)?;
                    caller.push_i32(ERRNO_SUCCESS)
                }
                Err(e) => caller.push_i32(errno_from_io(&e)),
            }
        },
    )?;

    // path_create_directory
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "path_create_directory",
        i32s(3),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let path_len = caller.pop_u32()?;
            let path_ptr = caller.pop_u32()?;
            let dirfd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::PATH_CREATE) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let Some(path) = read_guest_path(caller, path_ptr, path_len)? else {
                return caller.push_i32(ERRNO_INVAL);
            };
            match resolve(&cx, dirfd, &path) {
                Ok(full) => match fs::create_dir(&full) {
                    Ok(()) => caller.push_i32(ERRNO_SUCCESS),
                    Err(e) => caller.push_i32(errno_from_io(&e)),
                },
                Err(errno) => caller.push_i32(errno),
            }
        },
    )?;

    // path_rename
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "path_rename",
        i32s(6),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let new_len = caller.pop_u32()?;
            let new_ptr = caller.pop_u32()?;
            let new_dirfd = caller.pop_i32()?;
            let old_len = caller.pop_u32()?;
            let old_ptr = caller.pop_u32()?;
            let old_dirfd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::PATH_RENAME) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let (Some(old), Some(new)) = (
                read_guest_path(caller, old_ptr, old_len)?,
                read_guest_path(caller, new_ptr, new_len)?,
            ) else {
                return caller.push_i32(ERRNO_INVAL);
            };

            match (resolve(&cx, old_dirfd, &old), resolve(&cx, new_dirfd, &new)) {
                (Ok(from), Ok(to)) => match fs::rename(&from, &to) {
                    Ok(()) => caller.push_i32(ERRNO_SUCCESS),
                    Err(e) => caller.push_i32(errno_from_io(&e)),
                },
                (Err(errno), _) | (_, Err(errno)) => caller.push_i32(errno),
            }
        },
    )?;

    // path_unlink_file
    let cx = Rc::clone(ctx);
    linker.define_host_func(
        store,
        MODULE,
        "path_unlink_file",
        i32s(3),
        i32s(1),
        move |caller: &mut Caller<'_>| {
            let path_len = caller.pop_u32()?;
            let path_ptr = caller.pop_u32()?;
            let dirfd = caller.pop_i32()?;

            if !cx.borrow().caps.contains(Caps::PATH_UNLINK) {
                return caller.push_i32(ERRNO_NOTCAPABLE);
            }
            let Some(path) = read_guest_path(caller, path_ptr, path_len)? else {
                return caller.push_i32(ERRNO_INVAL);
            };
            match resolve(&cx, dirfd, &path) {
                Ok(full) => match fs::remove_file(&full) {
                    Ok(()) => caller.push_i32(ERRNO_SUCCESS),
                    Err(e) => caller.push_i32(errno_from_io(&e)),
                },
                Err(errno) => caller.push_i32(errno),
            }
        },
    )?;

    Ok(())
}

fn errno_from_io(e: &std::io::Error) -> i32 {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::NotFound => ERRNO_NOENT,
        ErrorKind::PermissionDenied => ERRNO_ACCES,
        ErrorKind::AlreadyExists => ERRNO_EXIST,
        _ => super::ERRNO_IO,
    }
}
