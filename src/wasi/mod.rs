//! WASI preview-1 host functions.
//!
//! This module is a consumer of the runtime's host-function registration
//! interface, nothing more: every syscall is an ordinary callback registered
//! under the module name `wasi_snapshot_preview1`, reading and writing guest
//! memory through the caller's exported `memory`.
//!
//! A [`WasiCtx`] owns the arguments, environment, capability mask, and the
//! file-descriptor table (stdio plus preopened directories). Every syscall
//! checks its capability first and refuses with `ERRNO_NOTCAPABLE`.

mod io;
mod paths;
mod process;
mod time;

use crate::linker::Linker;
use crate::store::Store;
use crate::trap::Trap;
use crate::Caller;
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

/// The module name WASI programs import from.
pub const MODULE: &str = "wasi_snapshot_preview1";

// The errno subset the suite reports.
pub const ERRNO_SUCCESS: i32 = 0;
pub const ERRNO_ACCES: i32 = 2;
pub const ERRNO_BADF: i32 = 8;
pub const ERRNO_EXIST: i32 = 20;
pub const ERRNO_FAULT: i32 = 21;
pub const ERRNO_INVAL: i32 = 28;
pub const ERRNO_IO: i32 = 29;
pub const ERRNO_NOENT: i32 = 44;
pub const ERRNO_NOSYS: i32 = 52;
pub const ERRNO_NOTDIR: i32 = 54;
pub const ERRNO_NOTCAPABLE: i32 = 76;

/// The capability set. Coarser than preview-1 rights: one flag per syscall
/// family, checked before anything touches the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps(u64);

impl Caps {
    pub const READ: Caps = Caps(1 << 0);
    pub const WRITE: Caps = Caps(1 << 1);
    pub const PATH_CREATE: Caps = Caps(1 << 2);
    pub const PATH_OPEN: Caps = Caps(1 << 3);
    pub const PATH_RENAME: Caps = Caps(1 << 4);
    pub const PATH_UNLINK: Caps = Caps(1 << 5);
    pub const FD_SEEK: Caps = Caps(1 << 6);
    pub const CLOCK: Caps = Caps(1 << 7);
    pub const RANDOM: Caps = Caps(1 << 8);
    pub const EXIT: Caps = Caps(1 << 9);
    pub const ENV_ARGS: Caps = Caps(1 << 10);

    pub const NONE: Caps = Caps(0);
    pub const ALL: Caps = Caps(u64::MAX);

    #[must_use]
    pub fn union(self, other: Caps) -> Caps {
        Caps(self.0 | other.0)
    }

    pub fn contains(&self, other: Caps) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for Caps {
    type Output = Caps;

    fn bitor(self, rhs: Caps) -> Caps {
        self.union(rhs)
    }
}

#[derive(Debug)]
pub(crate) enum FdEntry {
    Stdin,
    Stdout,
    Stderr,
    File(fs::File),
    /// A preopened directory and the name the guest sees it under.
    PreopenDir { path: PathBuf, guest_path: String },
}

/// Per-instance WASI state: arguments, environment, capabilities, and the
/// file-descriptor table.
#[derive(Debug)]
pub struct WasiCtx {
    pub(crate) args: Vec<String>,
    pub(crate) envs: Vec<(String, String)>,
    pub(crate) caps: Caps,
    pub(crate) fds: Vec<Option<FdEntry>>,
    /// Set by `proc_exit`; the invocation that called it traps.
    pub(crate) exit_code: Option<u32>,
}

impl WasiCtx {
    pub fn new(caps: Caps) -> Self {
        Self {
            args: Vec::new(),
            envs: Vec::new(),
            caps,
            fds: vec![
                Some(FdEntry::Stdin),
                Some(FdEntry::Stdout),
                Some(FdEntry::Stderr),
            ],
            exit_code: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Preopen a host directory under a guest-visible name. Preopens occupy
    /// descriptors from 3 upward, in registration order.
    #[must_use]
    pub fn preopen_dir(mut self, path: impl Into<PathBuf>, guest_path: &str) -> Self {
        self.fds.push(Some(FdEntry::PreopenDir {
            path: path.into(),
            guest_path: guest_path.to_string(),
        }));
        self
    }

    /// The exit code passed to `proc_exit`, if the guest called it.
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    pub(crate) fn entry(&self, fd: i32) -> Option<&FdEntry> {
        usize::try_from(fd).ok().and_then(|i| self.fds.get(i)?.as_ref())
    }

    pub(crate) fn push_fd(&mut self, entry: FdEntry) -> i32 {
        for (i, slot) in self.fds.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(entry);
                return i as i32;
            }
        }
        self.fds.push(Some(entry));
        (self.fds.len() - 1) as i32
    }
}

/// A shared handle to the context, cloned into every syscall closure.
pub type WasiCtxHandle = Rc<RefCell<WasiCtx>>;

/// Register the whole preview-1 function suite with the provided linker.
pub fn register_host_functions(
    linker: &mut Linker,
    store: &mut Store,
    ctx: WasiCtx,
) -> crate::Result<WasiCtxHandle> {
    let ctx = Rc::new(RefCell::new(ctx));

    io::register(linker, store, &ctx)?;
    paths::register(linker, store, &ctx)?;
    process::register(linker, store, &ctx)?;
    time::register(linker, store, &ctx)?;

    Ok(ctx)
}

// Guest-memory helpers shared by the syscall modules.

pub(crate) fn read_u32(caller: &Caller<'_>, ptr: u32) -> Result<u32, Trap> {
    let mut buf = [0u8; 4];
    caller.read_memory(u64::from(ptr), &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn write_u32(caller: &mut Caller<'_>, ptr: u32, value: u32) -> Result<(), Trap> {
    caller.write_memory(u64::from(ptr), &value.to_le_bytes())
}

pub(crate) fn write_u64(caller: &mut Caller<'_>, ptr: u32, value: u64) -> Result<(), Trap> {
    caller.write_memory(u64::from(ptr), &value.to_le_bytes())
}

pub(crate) fn read_bytes(caller: &Caller<'_>, ptr: u32, len: u32) -> Result<Vec<u8>, Trap> {
    let mut buf = vec![0u8; len as usize];
    caller.read_memory(u64::from(ptr), &mut buf)?;
    Ok(buf)
}

pub(crate) fn read_guest_path(
    caller: &Caller<'_>,
    ptr: u32,
    len: u32,
) -> Result<Option<String>, Trap> {
    let bytes = read_bytes(caller, ptr, len)?;
    Ok(String::from_utf8(bytes).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_compose_and_contain() {
        let caps = Caps::READ | Caps::WRITE | Caps::CLOCK;
        assert!(caps.contains(Caps::READ));
        assert!(caps.contains(Caps::READ | Caps::CLOCK));
        assert!(!caps.contains(Caps::EXIT));
        assert!(Caps::ALL.contains(caps));
        assert!(!Caps::NONE.contains(Caps::READ));
    }

    #[test]
    fn fd_table_starts_with_stdio_and_reuses_slots() {
        let mut ctx = WasiCtx::new(Caps::ALL);
        assert!(matches!(ctx.entry(0), Some(FdEntry::Stdin)));
        assert!(matches!(ctx.entry(2), Some(FdEntry::Stderr)));
        assert!(ctx.entry(3).is_none());

        let fd = ctx.push_fd(FdEntry::PreopenDir {
            path: PathBuf::from("."),
            guest_path: "/".to_string(),
        });
        assert_eq!(fd, 3);
        ctx.fds[3] = None;
        let fd = ctx.push_fd(FdEntry::PreopenDir {
            path: PathBuf::from("."),
            guest_path: "/".to_string(),
        });
        assert_eq!(fd, 3);
    }
}
