//! The 0xFE prefix: atomic loads/stores, read-modify-writes, compare-and-
//! exchange, and the wait/notify pair.
//!
//! Execution is single-threaded and cooperative, so sequentially consistent
//! atomics degenerate to plain accesses. The API contract is still enforced
//! in full: atomic width, and a trap for any not-naturally-aligned address.
//! A wait can never be woken (there is no second thread to notify), so a
//! mismatching expected value reports "not-equal" and a matching one reports
//! "timed out" immediately rather than deadlocking the embedder; notify
//! reports zero woken waiters.

use super::code::{CodeReader, MemArg};
use super::Vm;
use crate::indices::{InstanceHandle, MemAddr, MemoryIndex};
use crate::store::Store;
use crate::trap::Trap;
use crate::values::VMVal;

#[derive(Debug, Clone, Copy)]
enum Rmw {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}

impl Vm {
    pub(super) fn step_atomic(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
    ) -> Result<(), Trap> {
        let sub = r.var_u32();

        if sub == 0x03 {
            // atomic.fence: its reserved byte, then nothing to reorder.
            let _ = r.u8();
            return Ok(());
        }

        let arg = r.memarg();
        match sub {
            0x00 => {
                // memory.atomic.notify
                let _count = self.pop().get_u32();
                let (mem, ea) = self.atomic_ea(store, instance, &arg, 4)?;
                store.memory(mem).check_range(ea, 4)?;
                self.push(VMVal::i32(0))?;
            }
            0x01 => {
                // memory.atomic.wait32
                let _timeout = self.pop().get_i64();
                let expected = self.pop().get_i32();
                let (mem, ea) = self.atomic_ea(store, instance, &arg, 4)?;
                let memory = store.memory(mem);
                let start = memory.check_range(ea, 4)?;
                if !memory.shared {
                    return Err(Trap::AtomicWaitNonSharedMemory);
                }
                let current =
                    i32::from_le_bytes(memory.data()[start..start + 4].try_into().unwrap());
                self.push(VMVal::i32(if current != expected { 1 } else { 2 }))?;
            }
            0x02 => {
                // memory.atomic.wait64
                let _timeout = self.pop().get_i64();
                let expected = self.pop().get_i64();
                let (mem, ea) = self.atomic_ea(store, instance, &arg, 8)?;
                let memory = store.memory(mem);
                let start = memory.check_range(ea, 8)?;
                if !memory.shared {
                    return Err(Trap::AtomicWaitNonSharedMemory);
                }
                let current =
                    i64::from_le_bytes(memory.data()[start..start + 8].try_into().unwrap());
                self.push(VMVal::i32(if current != expected { 1 } else { 2 }))?;
            }

            // Loads: i32/i64 full width, then the zero-extending narrow forms.
            0x10 => {
                let v = self.atomic_load::<4>(store, instance, &arg)?;
                self.push(VMVal::i32(i32::from_le_bytes(v)))?;
            }
            0x11 => {
                let v = self.atomic_load::<8>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from_le_bytes(v)))?;
            }
            0x12 => {
                let v = self.atomic_load::<1>(store, instance, &arg)?;
                self.push(VMVal::u32(u32::from(v[0])))?;
            }
            0x13 => {
                let v = self.atomic_load::<2>(store, instance, &arg)?;
                self.push(VMVal::u32(u32::from(u16::from_le_bytes(v))))?;
            }
            0x14 => {
                let v = self.atomic_load::<1>(store, instance, &arg)?;
                self.push(VMVal::u64(u64::from(v[0])))?;
            }
            0x15 => {
                let v = self.atomic_load::<2>(store, instance, &arg)?;
                self.push(VMVal::u64(u64::from(u16::from_le_bytes(v))))?;
            }
            0x16 => {
                let v = self.atomic_load::<4>(store, instance, &arg)?;
                self.push(VMVal::u64(u64::from(u32::from_le_bytes(v))))?;
            }

            // Stores.
            0x17 => {
                let v = self.pop().get_i32().to_le_bytes();
                self.atomic_store(store, instance, &arg, &v)?;
            }
            0x18 => {
                let v = self.pop().get_i64().to_le_bytes();
                self.atomic_store(store, instance, &arg, &v)?;
            }
            0x19 => {
                let v = [self.pop().get_i32() as u8];
                self.atomic_store(store, instance, &arg, &v)?;
            }
            0x1a => {
                let v = (self.pop().get_i32() as u16).to_le_bytes();
                self.atomic_store(store, instance, &arg, &v)?;
            }
            0x1b => {
                let v = [self.pop().get_i64() as u8];
                self.atomic_store(store, instance, &arg, &v)?;
            }
            0x1c => {
                let v = (self.pop().get_i64() as u16).to_le_bytes();
                self.atomic_store(store, instance, &arg, &v)?;
            }
            0x1d => {
                let v = (self.pop().get_i64() as u32).to_le_bytes();
                self.atomic_store(store, instance, &arg, &v)?;
            }

            // Read-modify-write: seven encodings per operator, in the fixed
            // order (i32, i64, i32 narrow 8/16, i64 narrow 8/16/32).
            0x1e..=0x24 => self.atomic_rmw(store, instance, &arg, sub - 0x1e, Rmw::Add)?,
            0x25..=0x2b => self.atomic_rmw(store, instance, &arg, sub - 0x25, Rmw::Sub)?,
            0x2c..=0x32 => self.atomic_rmw(store, instance, &arg, sub - 0x2c, Rmw::And)?,
            0x33..=0x39 => self.atomic_rmw(store, instance, &arg, sub - 0x33, Rmw::Or)?,
            0x3a..=0x40 => self.atomic_rmw(store, instance, &arg, sub - 0x3a, Rmw::Xor)?,
            0x41..=0x47 => self.atomic_rmw(store, instance, &arg, sub - 0x41, Rmw::Xchg)?,
            0x48..=0x4e => self.atomic_cmpxchg(store, instance, &arg, sub - 0x48)?,

            other => unreachable!("validated atomic opcode {other:#x}"),
        }
        Ok(())
    }

    /// Pop the address and compute the effective address, trapping on a
    /// misaligned access. Alignment is mandatory for atomics, not advisory.
    fn atomic_ea(
        &mut self,
        store: &Store,
        instance: InstanceHandle,
        arg: &MemArg,
        width: u64,
    ) -> Result<(MemAddr, u64), Trap> {
        let mem = store.instance_data(instance).memories[MemoryIndex::from_u32(arg.memory)];
        let base = if store.memory(mem).memory64 {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let ea = base.checked_add(arg.offset).ok_or(Trap::MemoryOutOfBounds)?;
        if ea % width != 0 {
            return Err(Trap::HeapMisaligned);
        }
        Ok((mem, ea))
    }

    fn atomic_load<const N: usize>(
        &mut self,
        store: &Store,
        instance: InstanceHandle,
        arg: &MemArg,
    ) -> Result<[u8; N], Trap> {
        let (mem, ea) = self.atomic_ea(store, instance, arg, N as u64)?;
        let memory = store.memory(mem);
        let start = memory.check_range(ea, N as u64)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&memory.data()[start..start + N]);
        Ok(buf)
    }

    fn atomic_store(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        arg: &MemArg,
        value: &[u8],
    ) -> Result<(), Trap> {
        let (mem, ea) = self.atomic_ea(store, instance, arg, value.len() as u64)?;
        let memory = store.memory_mut(mem);
        let start = memory.check_range(ea, value.len() as u64)?;
        memory.data_mut()[start..start + value.len()].copy_from_slice(value);
        Ok(())
    }

    /// One atomic read-modify-write. `form` selects width and result type:
    /// 0 = i32, 1 = i64, 2/3 = i32 narrow, 4/5/6 = i64 narrow.
    fn atomic_rmw(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        arg: &MemArg,
        form: u32,
        op: Rmw,
    ) -> Result<(), Trap> {
        let (width, is_64) = match form {
            0 => (4, false),
            1 => (8, true),
            2 => (1, false),
            3 => (2, false),
            4 => (1, true),
            5 => (2, true),
            _ => (4, true),
        };

        let operand = if is_64 {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let (mem, ea) = self.atomic_ea(store, instance, arg, width)?;
        let memory = store.memory_mut(mem);
        let start = memory.check_range(ea, width)?;

        let old = read_narrow(memory.data(), start, width as usize);
        let operand = operand & width_mask(width as usize);
        let new = match op {
            Rmw::Add => old.wrapping_add(operand),
            Rmw::Sub => old.wrapping_sub(operand),
            Rmw::And => old & operand,
            Rmw::Or => old | operand,
            Rmw::Xor => old ^ operand,
            Rmw::Xchg => operand,
        } & width_mask(width as usize);
        write_narrow(memory.data_mut(), start, width as usize, new);

        if is_64 {
            self.push(VMVal::u64(old))?;
        } else {
            self.push(VMVal::u32(old as u32))?;
        }
        Ok(())
    }

    fn atomic_cmpxchg(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        arg: &MemArg,
        form: u32,
    ) -> Result<(), Trap> {
        let (width, is_64) = match form {
            0 => (4, false),
            1 => (8, true),
            2 => (1, false),
            3 => (2, false),
            4 => (1, true),
            5 => (2, true),
            _ => (4, true),
        };

        let (replacement, expected) = if is_64 {
            let replacement = self.pop().get_u64();
            let expected = self.pop().get_u64();
            (replacement, expected)
        } else {
            let replacement = u64::from(self.pop().get_u32());
            let expected = u64::from(self.pop().get_u32());
            (replacement, expected)
        };
        let (mem, ea) = self.atomic_ea(store, instance, arg, width)?;
        let memory = store.memory_mut(mem);
        let start = memory.check_range(ea, width)?;

        let mask = width_mask(width as usize);
        let old = read_narrow(memory.data(), start, width as usize);
        if old == expected & mask {
            write_narrow(memory.data_mut(), start, width as usize, replacement & mask);
        }

        if is_64 {
            self.push(VMVal::u64(old))?;
        } else {
            self.push(VMVal::u32(old as u32))?;
        }
        Ok(())
    }
}

fn width_mask(width: usize) -> u64 {
    match width {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

fn read_narrow(data: &[u8], start: usize, width: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(&data[start..start + width]);
    u64::from_le_bytes(buf)
}

fn write_narrow(data: &mut [u8], start: usize, width: usize, value: u64) {
    data[start..start + width].copy_from_slice(&value.to_le_bytes()[..width]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_accessors_mask_to_width() {
        let mut data = vec![0u8; 8];
        write_narrow(&mut data, 0, 2, 0xabcd);
        assert_eq!(read_narrow(&data, 0, 2), 0xabcd);
        assert_eq!(read_narrow(&data, 0, 4), 0xabcd);
        assert_eq!(width_mask(1), 0xff);
        assert_eq!(width_mask(8), u64::MAX);
    }
}
