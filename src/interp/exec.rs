//! The dispatch loop and the core (unprefixed + 0xFC) instruction set.
//!
//! One opcode byte is read per step; 0xFB/0xFC/0xFD/0xFE select the GC,
//! misc, SIMD, and atomic handler groups. Each handler decodes its own
//! immediates and advances the reader; branches overwrite the reader
//! position with a side-table target.

use super::code::{BlockType, CodeReader, MemArg};
use super::{Label, ResolvedCatch, Vm};
use crate::func::FuncKind;
use crate::gc::{ExnObj, GcObject};
use crate::indices::{
    DataIndex, ElemIndex, FuncAddr, FuncIndex, GlobalIndex, InstanceHandle, MemoryIndex,
    TableIndex, TagIndex, TypeIndex,
};
use crate::module::Module;
use crate::store::Store;
use crate::trap::Trap;
use crate::values::{refs, VMVal};
use smallvec::SmallVec;
use std::rc::Rc;
use std::sync::Arc;

/// What a handler asks the frame loop to do next.
pub(super) enum Flow {
    /// Keep dispatching in the current frame.
    Next,
    /// The frame set changed (call, return past a frame, exception landed
    /// in an outer frame): reload the activation context.
    Switch,
    /// The invocation's root frame returned.
    Done,
}

macro_rules! binop {
    ($vm:ident, $get:ident, $mk:ident, $f:expr) => {{
        let b = $vm.pop().$get();
        let a = $vm.pop().$get();
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::$mk(($f)(a, b)))?;
    }};
}

macro_rules! binop_trap {
    ($vm:ident, $get:ident, $mk:ident, $f:expr) => {{
        let b = $vm.pop().$get();
        let a = $vm.pop().$get();
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::$mk(($f)(a, b)?))?;
    }};
}

macro_rules! unop {
    ($vm:ident, $get:ident, $mk:ident, $f:expr) => {{
        let a = $vm.pop().$get();
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::$mk(($f)(a)))?;
    }};
}

macro_rules! cmp {
    ($vm:ident, $get:ident, $f:expr) => {{
        let b = $vm.pop().$get();
        let a = $vm.pop().$get();
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::i32(i32::from(($f)(a, b))))?;
    }};
}

impl Vm {
    /// Execute until the activation rooted at `frames_base` returns.
    pub(super) fn run(&mut self, store: &mut Store, frames_base: usize) -> Result<(), Trap> {
        'frames: loop {
            // Load the current frame's context. The module clone keeps the
            // code bytes alive independently of any store borrow.
            let (module, instance, pc, code_end) = {
                let frame = self.frames.last().expect("no active frame");
                (
                    frame.module.clone(),
                    frame.instance,
                    frame.pc,
                    frame.code_end,
                )
            };
            let image: &[u8] = module.image();
            let mut r = CodeReader::new(image, pc);

            loop {
                debug_assert!(r.pos < code_end as usize);
                match self.step(store, &module, instance, &mut r, frames_base)? {
                    Flow::Next => {}
                    Flow::Switch => continue 'frames,
                    Flow::Done => return Ok(()),
                }
            }
        }
    }

    /// Decode and execute one instruction.
    fn step(
        &mut self,
        store: &mut Store,
        module: &Module,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
        frames_base: usize,
    ) -> Result<Flow, Trap> {
        let opcode_pc = r.pos as u32;
        let op = r.u8();
        match op {
            0x00 => return Err(Trap::UnreachableCodeReached),
            0x01 => {}

            0x02 => {
                // block
                let (nparams, nresults) = self.block_arity(module, r.block_type());
                let end = self.frame_side().targets(opcode_pc).end;
                self.push_label(nresults, nparams, end, false, SmallVec::new());
            }
            0x03 => {
                // loop: branches re-enter the body with the params.
                let (nparams, _) = self.block_arity(module, r.block_type());
                let body = r.pos as u32;
                self.push_label(nparams, nparams, body, true, SmallVec::new());
            }
            0x04 => {
                // if
                let (nparams, nresults) = self.block_arity(module, r.block_type());
                let targets = self.frame_side().targets(opcode_pc);
                let cond = self.pop().get_i32();
                if cond != 0 {
                    self.push_label(nresults, nparams, targets.end, false, SmallVec::new());
                } else if let Some(else_pc) = targets.else_pc() {
                    self.push_label(nresults, nparams, targets.end, false, SmallVec::new());
                    r.pos = else_pc as usize;
                } else {
                    // No else arm: params flow through as results.
                    r.pos = targets.end as usize;
                }
            }
            0x05 => {
                // else: the true arm finished, skip the false arm.
                let label = self.labels.pop().expect("else outside block");
                r.pos = label.target as usize;
            }
            0x0b => {
                // end: either closes a block or, at the implicit function
                // label, returns from the function.
                let labels_base = self.frames.last().expect("no frame").labels_base;
                if self.labels.len() > labels_base + 1 {
                    self.labels.pop();
                } else {
                    return self.do_return(r, frames_base);
                }
            }

            0x08 => {
                // throw: capture the tag's arguments into an exception
                // object, then unwind to a matching handler.
                let tag_index = TagIndex::from_u32(r.var_u32());
                let tag_addr = store.instance_data(instance).tags[tag_index];
                let tag = *store.tag(tag_addr);
                let nargs = store.types().func_type(tag.ty).params.len();

                let start = self.stack.len() - nargs;
                let payload: Box<[VMVal]> = self.stack.drain(start..).collect();
                let exn = store.gc.alloc(GcObject::Exn(ExnObj {
                    tag: tag_addr,
                    identity: tag.identity,
                    payload,
                }));
                return self.dispatch_exception(store, exn, r, frames_base);
            }
            0x0a => {
                // throw_ref
                let exn = self.pop().get_ref();
                if refs::is_null(exn) {
                    return Err(Trap::NullReference);
                }
                return self.dispatch_exception(store, exn, r, frames_base);
            }
            0x1f => {
                // try_table: a block whose label carries catch clauses.
                let (nparams, nresults) = self.block_arity(module, r.block_type());
                let catches = r.catch_clauses();
                let resolved = catches
                    .iter()
                    .map(|c| ResolvedCatch {
                        kind: c.kind,
                        identity: match c.kind {
                            super::code::CatchKind::Catch | super::code::CatchKind::CatchRef => {
                                let addr =
                                    store.instance_data(instance).tags[TagIndex::from_u32(c.tag)];
                                store.tag(addr).identity
                            }
                            _ => 0,
                        },
                        label: c.label,
                    })
                    .collect();
                let end = self.frame_side().targets(opcode_pc).end;
                self.push_label(nresults, nparams, end, false, resolved);
            }

            0x0c => {
                let depth = r.var_u32();
                self.branch(depth, r);
            }
            0x0d => {
                let depth = r.var_u32();
                if self.pop().get_i32() != 0 {
                    self.branch(depth, r);
                }
            }
            0x0e => {
                // br_table: saturate to the default target.
                let count = r.var_u32();
                let index = self.pop().get_u32().min(count);
                let mut depth = 0;
                for i in 0..=count {
                    let d = r.var_u32();
                    if i == index {
                        depth = d;
                    }
                }
                self.branch(depth, r);
            }
            0x0f => return self.do_return(r, frames_base),

            0x10 => {
                let index = FuncIndex::from_u32(r.var_u32());
                let callee = store.instance_data(instance).funcs[index];
                return self.do_call(store, callee, instance, r, false, frames_base);
            }
            0x11 => {
                let callee = self.indirect_callee(store, instance, r)?;
                return self.do_call(store, callee, instance, r, false, frames_base);
            }
            0x12 => {
                let index = FuncIndex::from_u32(r.var_u32());
                let callee = store.instance_data(instance).funcs[index];
                return self.do_call(store, callee, instance, r, true, frames_base);
            }
            0x13 => {
                let callee = self.indirect_callee(store, instance, r)?;
                return self.do_call(store, callee, instance, r, true, frames_base);
            }
            0x14 => {
                let _type_index = r.var_u32();
                let callee = self.ref_callee()?;
                return self.do_call(store, callee, instance, r, false, frames_base);
            }
            0x15 => {
                let _type_index = r.var_u32();
                let callee = self.ref_callee()?;
                return self.do_call(store, callee, instance, r, true, frames_base);
            }

            0x1a => {
                self.pop();
            }
            0x1b | 0x1c => {
                if op == 0x1c {
                    // Typed select: the types were only for validation.
                    for _ in 0..r.var_u32() {
                        let b = r.u8();
                        if b == 0x63 || b == 0x64 {
                            let _ = r.var_s33();
                        }
                    }
                }
                let cond = self.pop().get_i32();
                let b = self.pop();
                let a = self.pop();
                self.push(if cond != 0 { a } else { b })?;
            }

            0x20 => {
                let index = r.var_u32() as usize;
                let base = self.frame_base();
                let value = self.stack[base + index];
                self.push(value)?;
            }
            0x21 => {
                let index = r.var_u32() as usize;
                let base = self.frame_base();
                let value = self.pop();
                self.stack[base + index] = value;
            }
            0x22 => {
                let index = r.var_u32() as usize;
                let base = self.frame_base();
                let value = self.peek();
                self.stack[base + index] = value;
            }
            0x23 => {
                let index = GlobalIndex::from_u32(r.var_u32());
                let addr = store.instance_data(instance).globals[index];
                let value = store.global(addr).value;
                self.push(value)?;
            }
            0x24 => {
                let index = GlobalIndex::from_u32(r.var_u32());
                let addr = store.instance_data(instance).globals[index];
                let value = self.pop();
                store.global_mut(addr).value = value;
            }

            0x25 => {
                let table = self.table_addr(store, instance, r.var_u32());
                let index = self.pop_table_index(store, table);
                let value = store.table(table).get(index)?;
                self.push(VMVal::ref_(value))?;
            }
            0x26 => {
                let table = self.table_addr(store, instance, r.var_u32());
                let value = self.pop().get_ref();
                let index = self.pop_table_index(store, table);
                store.table_mut(table).set(index, value)?;
            }

            // Loads.
            0x28 => {
                let arg = r.memarg();
                let v = self.load_bytes::<4>(store, instance, &arg)?;
                self.push(VMVal::i32(i32::from_le_bytes(v)))?;
            }
            0x29 => {
                let arg = r.memarg();
                let v = self.load_bytes::<8>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from_le_bytes(v)))?;
            }
            0x2a => {
                let arg = r.memarg();
                let v = self.load_bytes::<4>(store, instance, &arg)?;
                self.push(VMVal::f32(u32::from_le_bytes(v)))?;
            }
            0x2b => {
                let arg = r.memarg();
                let v = self.load_bytes::<8>(store, instance, &arg)?;
                self.push(VMVal::f64(u64::from_le_bytes(v)))?;
            }
            0x2c => {
                let arg = r.memarg();
                let v = self.load_bytes::<1>(store, instance, &arg)?;
                self.push(VMVal::i32(i32::from(v[0] as i8)))?;
            }
            0x2d => {
                let arg = r.memarg();
                let v = self.load_bytes::<1>(store, instance, &arg)?;
                self.push(VMVal::i32(i32::from(v[0])))?;
            }
            0x2e => {
                let arg = r.memarg();
                let v = self.load_bytes::<2>(store, instance, &arg)?;
                self.push(VMVal::i32(i32::from(i16::from_le_bytes(v))))?;
            }
            0x2f => {
                let arg = r.memarg();
                let v = self.load_bytes::<2>(store, instance, &arg)?;
                self.push(VMVal::i32(i32::from(u16::from_le_bytes(v))))?;
            }
            0x30 => {
                let arg = r.memarg();
                let v = self.load_bytes::<1>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from(v[0] as i8)))?;
            }
            0x31 => {
                let arg = r.memarg();
                let v = self.load_bytes::<1>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from(v[0])))?;
            }
            0x32 => {
                let arg = r.memarg();
                let v = self.load_bytes::<2>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from(i16::from_le_bytes(v))))?;
            }
            0x33 => {
                let arg = r.memarg();
                let v = self.load_bytes::<2>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from(u16::from_le_bytes(v))))?;
            }
            0x34 => {
                let arg = r.memarg();
                let v = self.load_bytes::<4>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from(i32::from_le_bytes(v))))?;
            }
            0x35 => {
                let arg = r.memarg();
                let v = self.load_bytes::<4>(store, instance, &arg)?;
                self.push(VMVal::i64(i64::from(u32::from_le_bytes(v))))?;
            }

            // Stores.
            0x36 => {
                let arg = r.memarg();
                let v = self.pop().get_i32().to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x37 => {
                let arg = r.memarg();
                let v = self.pop().get_i64().to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x38 => {
                let arg = r.memarg();
                let v = self.pop().get_f32_bits().to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x39 => {
                let arg = r.memarg();
                let v = self.pop().get_f64_bits().to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x3a => {
                let arg = r.memarg();
                let v = [self.pop().get_i32() as u8];
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x3b => {
                let arg = r.memarg();
                let v = (self.pop().get_i32() as u16).to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x3c => {
                let arg = r.memarg();
                let v = [self.pop().get_i64() as u8];
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x3d => {
                let arg = r.memarg();
                let v = (self.pop().get_i64() as u16).to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            0x3e => {
                let arg = r.memarg();
                let v = (self.pop().get_i64() as u32).to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }

            0x3f => {
                let mem = self.memory_addr(store, instance, r.var_u32());
                let memory = store.memory(mem);
                let pages = memory.size_pages();
                if memory.memory64 {
                    self.push(VMVal::u64(pages))?;
                } else {
                    self.push(VMVal::u32(pages as u32))?;
                }
            }
            0x40 => {
                let mem = self.memory_addr(store, instance, r.var_u32());
                let memory64 = store.memory(mem).memory64;
                let delta = if memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };
                // -1 is the conventional failure sentinel.
                match store.memory_mut(mem).grow(delta) {
                    Some(old) if memory64 => self.push(VMVal::u64(old))?,
                    Some(old) => self.push(VMVal::u32(old as u32))?,
                    None if memory64 => self.push(VMVal::i64(-1))?,
                    None => self.push(VMVal::i32(-1))?,
                }
            }

            0x41 => {
                let v = r.var_i32();
                self.push(VMVal::i32(v))?;
            }
            0x42 => {
                let v = r.var_i64();
                self.push(VMVal::i64(v))?;
            }
            0x43 => {
                let v = r.f32_bits();
                self.push(VMVal::f32(v))?;
            }
            0x44 => {
                let v = r.f64_bits();
                self.push(VMVal::f64(v))?;
            }

            // i32 comparisons.
            0x45 => unop!(self, get_i32, i32, |a: i32| i32::from(a == 0)),
            0x46 => cmp!(self, get_i32, |a, b| a == b),
            0x47 => cmp!(self, get_i32, |a, b| a != b),
            0x48 => cmp!(self, get_i32, |a, b| a < b),
            0x49 => cmp!(self, get_u32, |a, b| a < b),
            0x4a => cmp!(self, get_i32, |a, b| a > b),
            0x4b => cmp!(self, get_u32, |a, b| a > b),
            0x4c => cmp!(self, get_i32, |a, b| a <= b),
            0x4d => cmp!(self, get_u32, |a, b| a <= b),
            0x4e => cmp!(self, get_i32, |a, b| a >= b),
            0x4f => cmp!(self, get_u32, |a, b| a >= b),

            // i64 comparisons.
            0x50 => unop!(self, get_i64, i32, |a: i64| i32::from(a == 0)),
            0x51 => cmp!(self, get_i64, |a, b| a == b),
            0x52 => cmp!(self, get_i64, |a, b| a != b),
            0x53 => cmp!(self, get_i64, |a, b| a < b),
            0x54 => cmp!(self, get_u64, |a, b| a < b),
            0x55 => cmp!(self, get_i64, |a, b| a > b),
            0x56 => cmp!(self, get_u64, |a, b| a > b),
            0x57 => cmp!(self, get_i64, |a, b| a <= b),
            0x58 => cmp!(self, get_u64, |a, b| a <= b),
            0x59 => cmp!(self, get_i64, |a, b| a >= b),
            0x5a => cmp!(self, get_u64, |a, b| a >= b),

            // Float comparisons.
            0x5b => cmp!(self, get_f32, |a, b| a == b),
            0x5c => cmp!(self, get_f32, |a, b| a != b),
            0x5d => cmp!(self, get_f32, |a, b| a < b),
            0x5e => cmp!(self, get_f32, |a, b| a > b),
            0x5f => cmp!(self, get_f32, |a, b| a <= b),
            0x60 => cmp!(self, get_f32, |a, b| a >= b),
            0x61 => cmp!(self, get_f64, |a, b| a == b),
            0x62 => cmp!(self, get_f64, |a, b| a != b),
            0x63 => cmp!(self, get_f64, |a, b| a < b),
            0x64 => cmp!(self, get_f64, |a, b| a > b),
            0x65 => cmp!(self, get_f64, |a, b| a <= b),
            0x66 => cmp!(self, get_f64, |a, b| a >= b),

            // i32 arithmetic.
            0x67 => unop!(self, get_u32, u32, |a: u32| a.leading_zeros()),
            0x68 => unop!(self, get_u32, u32, |a: u32| a.trailing_zeros()),
            0x69 => unop!(self, get_u32, u32, |a: u32| a.count_ones()),
            0x6a => binop!(self, get_i32, i32, |a: i32, b: i32| a.wrapping_add(b)),
            0x6b => binop!(self, get_i32, i32, |a: i32, b: i32| a.wrapping_sub(b)),
            0x6c => binop!(self, get_i32, i32, |a: i32, b: i32| a.wrapping_mul(b)),
            0x6d => binop_trap!(self, get_i32, i32, div_s_32),
            0x6e => binop_trap!(self, get_u32, u32, div_u_32),
            0x6f => binop_trap!(self, get_i32, i32, rem_s_32),
            0x70 => binop_trap!(self, get_u32, u32, rem_u_32),
            0x71 => binop!(self, get_i32, i32, |a: i32, b: i32| a & b),
            0x72 => binop!(self, get_i32, i32, |a: i32, b: i32| a | b),
            0x73 => binop!(self, get_i32, i32, |a: i32, b: i32| a ^ b),
            0x74 => binop!(self, get_i32, i32, |a: i32, b: i32| a.wrapping_shl(b as u32)),
            0x75 => binop!(self, get_i32, i32, |a: i32, b: i32| a.wrapping_shr(b as u32)),
            0x76 => binop!(self, get_u32, u32, |a: u32, b: u32| a.wrapping_shr(b)),
            0x77 => binop!(self, get_u32, u32, |a: u32, b: u32| a.rotate_left(b & 31)),
            0x78 => binop!(self, get_u32, u32, |a: u32, b: u32| a.rotate_right(b & 31)),

            // i64 arithmetic.
            0x79 => unop!(self, get_u64, u64, |a: u64| u64::from(a.leading_zeros())),
            0x7a => unop!(self, get_u64, u64, |a: u64| u64::from(a.trailing_zeros())),
            0x7b => unop!(self, get_u64, u64, |a: u64| u64::from(a.count_ones())),
            0x7c => binop!(self, get_i64, i64, |a: i64, b: i64| a.wrapping_add(b)),
            0x7d => binop!(self, get_i64, i64, |a: i64, b: i64| a.wrapping_sub(b)),
            0x7e => binop!(self, get_i64, i64, |a: i64, b: i64| a.wrapping_mul(b)),
            0x7f => binop_trap!(self, get_i64, i64, div_s_64),
            0x80 => binop_trap!(self, get_u64, u64, div_u_64),
            0x81 => binop_trap!(self, get_i64, i64, rem_s_64),
            0x82 => binop_trap!(self, get_u64, u64, rem_u_64),
            0x83 => binop!(self, get_i64, i64, |a: i64, b: i64| a & b),
            0x84 => binop!(self, get_i64, i64, |a: i64, b: i64| a | b),
            0x85 => binop!(self, get_i64, i64, |a: i64, b: i64| a ^ b),
            0x86 => binop!(self, get_i64, i64, |a: i64, b: i64| a.wrapping_shl(b as u32)),
            0x87 => binop!(self, get_i64, i64, |a: i64, b: i64| a.wrapping_shr(b as u32)),
            0x88 => binop!(self, get_u64, u64, |a: u64, b: u64| a.wrapping_shr(b as u32)),
            0x89 => binop!(self, get_u64, u64, |a: u64, b: u64| a
                .rotate_left((b & 63) as u32)),
            0x8a => binop!(self, get_u64, u64, |a: u64, b: u64| a
                .rotate_right((b & 63) as u32)),

            // f32 arithmetic.
            0x8b => unop!(self, get_f32, f32, |a: f32| a.abs().to_bits()),
            0x8c => unop!(self, get_f32, f32, |a: f32| (-a).to_bits()),
            0x8d => unop!(self, get_f32, f32, |a: f32| canon32(a.ceil())),
            0x8e => unop!(self, get_f32, f32, |a: f32| canon32(a.floor())),
            0x8f => unop!(self, get_f32, f32, |a: f32| canon32(a.trunc())),
            0x90 => unop!(self, get_f32, f32, |a: f32| canon32(a.round_ties_even())),
            0x91 => unop!(self, get_f32, f32, |a: f32| canon32(a.sqrt())),
            0x92 => binop!(self, get_f32, f32, |a: f32, b: f32| canon32(a + b)),
            0x93 => binop!(self, get_f32, f32, |a: f32, b: f32| canon32(a - b)),
            0x94 => binop!(self, get_f32, f32, |a: f32, b: f32| canon32(a * b)),
            0x95 => binop!(self, get_f32, f32, |a: f32, b: f32| canon32(a / b)),
            0x96 => binop!(self, get_f32, f32, |a: f32, b: f32| fmin32(a, b).to_bits()),
            0x97 => binop!(self, get_f32, f32, |a: f32, b: f32| fmax32(a, b).to_bits()),
            0x98 => binop!(self, get_f32, f32, |a: f32, b: f32| a.copysign(b).to_bits()),

            // f64 arithmetic.
            0x99 => unop!(self, get_f64, f64, |a: f64| a.abs().to_bits()),
            0x9a => unop!(self, get_f64, f64, |a: f64| (-a).to_bits()),
            0x9b => unop!(self, get_f64, f64, |a: f64| canon64(a.ceil())),
            0x9c => unop!(self, get_f64, f64, |a: f64| canon64(a.floor())),
            0x9d => unop!(self, get_f64, f64, |a: f64| canon64(a.trunc())),
            0x9e => unop!(self, get_f64, f64, |a: f64| canon64(a.round_ties_even())),
            0x9f => unop!(self, get_f64, f64, |a: f64| canon64(a.sqrt())),
            0xa0 => binop!(self, get_f64, f64, |a: f64, b: f64| canon64(a + b)),
            0xa1 => binop!(self, get_f64, f64, |a: f64, b: f64| canon64(a - b)),
            0xa2 => binop!(self, get_f64, f64, |a: f64, b: f64| canon64(a * b)),
            0xa3 => binop!(self, get_f64, f64, |a: f64, b: f64| canon64(a / b)),
            0xa4 => binop!(self, get_f64, f64, |a: f64, b: f64| fmin64(a, b).to_bits()),
            0xa5 => binop!(self, get_f64, f64, |a: f64, b: f64| fmax64(a, b).to_bits()),
            0xa6 => binop!(self, get_f64, f64, |a: f64, b: f64| a.copysign(b).to_bits()),

            // Conversions. The non-saturating float-to-int family traps on
            // NaN and out-of-range; f32 sources widen losslessly to f64
            // first so one set of exact integer bounds covers both.
            0xa7 => unop!(self, get_i64, i32, |a: i64| a as i32),
            0xa8 => {
                let a = f64::from(self.pop().get_f32());
                self.push(VMVal::i32(trunc_to_i32(a)?))?;
            }
            0xa9 => {
                let a = f64::from(self.pop().get_f32());
                self.push(VMVal::u32(trunc_to_u32(a)?))?;
            }
            0xaa => {
                let a = self.pop().get_f64();
                self.push(VMVal::i32(trunc_to_i32(a)?))?;
            }
            0xab => {
                let a = self.pop().get_f64();
                self.push(VMVal::u32(trunc_to_u32(a)?))?;
            }
            0xac => unop!(self, get_i32, i64, |a: i32| i64::from(a)),
            0xad => unop!(self, get_u32, i64, |a: u32| i64::from(a)),
            0xae => {
                let a = f64::from(self.pop().get_f32());
                self.push(VMVal::i64(trunc_to_i64(a)?))?;
            }
            0xaf => {
                let a = f64::from(self.pop().get_f32());
                self.push(VMVal::u64(trunc_to_u64(a)?))?;
            }
            0xb0 => {
                let a = self.pop().get_f64();
                self.push(VMVal::i64(trunc_to_i64(a)?))?;
            }
            0xb1 => {
                let a = self.pop().get_f64();
                self.push(VMVal::u64(trunc_to_u64(a)?))?;
            }
            0xb2 => unop!(self, get_i32, f32, |a: i32| (a as f32).to_bits()),
            0xb3 => unop!(self, get_u32, f32, |a: u32| (a as f32).to_bits()),
            0xb4 => unop!(self, get_i64, f32, |a: i64| (a as f32).to_bits()),
            0xb5 => unop!(self, get_u64, f32, |a: u64| (a as f32).to_bits()),
            0xb6 => unop!(self, get_f64, f32, |a: f64| canon32(a as f32)),
            0xb7 => unop!(self, get_i32, f64, |a: i32| f64::from(a).to_bits()),
            0xb8 => unop!(self, get_u32, f64, |a: u32| f64::from(a).to_bits()),
            0xb9 => unop!(self, get_i64, f64, |a: i64| (a as f64).to_bits()),
            0xba => unop!(self, get_u64, f64, |a: u64| (a as f64).to_bits()),
            0xbb => unop!(self, get_f32, f64, |a: f32| canon64(f64::from(a))),
            0xbc | 0xbd | 0xbe | 0xbf => {
                // Reinterprets: the slot already holds the bits.
            }

            // Sign extension.
            0xc0 => unop!(self, get_i32, i32, |a: i32| i32::from(a as i8)),
            0xc1 => unop!(self, get_i32, i32, |a: i32| i32::from(a as i16)),
            0xc2 => unop!(self, get_i64, i64, |a: i64| i64::from(a as i8)),
            0xc3 => unop!(self, get_i64, i64, |a: i64| i64::from(a as i16)),
            0xc4 => unop!(self, get_i64, i64, |a: i64| i64::from(a as i32)),

            // References.
            0xd0 => {
                let _ = r.var_s33();
                self.push(VMVal::ref_(refs::NULL))?;
            }
            0xd1 => {
                let v = self.pop().get_ref();
                self.push(VMVal::i32(i32::from(refs::is_null(v))))?;
            }
            0xd2 => {
                let index = FuncIndex::from_u32(r.var_u32());
                let addr = store.instance_data(instance).funcs[index];
                self.push(VMVal::ref_(refs::from_handle(addr.as_u32())))?;
            }
            0xd3 => cmp!(self, get_ref, |a, b| a == b),
            0xd4 => {
                let v = self.peek().get_ref();
                if refs::is_null(v) {
                    return Err(Trap::NullReference);
                }
            }
            0xd5 => {
                // br_on_null: branch consuming the null, else keep the ref.
                let depth = r.var_u32();
                let v = self.pop().get_ref();
                if refs::is_null(v) {
                    self.branch(depth, r);
                } else {
                    self.push(VMVal::ref_(v))?;
                }
            }
            0xd6 => {
                // br_on_non_null: branch with the ref, else consume the null.
                let depth = r.var_u32();
                let v = self.pop().get_ref();
                if !refs::is_null(v) {
                    self.push(VMVal::ref_(v))?;
                    self.branch(depth, r);
                }
            }

            0xfb => self.step_gc(store, module, instance, r)?,
            0xfc => self.step_misc(store, instance, r)?,
            0xfd => self.step_simd(store, instance, r)?,
            0xfe => self.step_atomic(store, instance, r)?,

            other => unreachable!("validated opcode {other:#x}"),
        }

        Ok(Flow::Next)
    }
}

impl Vm {
    #[inline]
    fn frame_base(&self) -> usize {
        self.frames.last().expect("no active frame").base
    }

    #[inline]
    fn frame_side(&self) -> Arc<super::SideTable> {
        Arc::clone(&self.frames.last().expect("no active frame").side)
    }

    fn block_arity(&self, module: &Module, bt: BlockType) -> (usize, usize) {
        match bt {
            BlockType::Empty => (0, 0),
            BlockType::Result => (0, 1),
            BlockType::Func(index) => {
                let ty = module.translated().types.types[TypeIndex::from_u32(index)].unwrap_func();
                (ty.params.len(), ty.results.len())
            }
        }
    }

    pub(super) fn push_label(
        &mut self,
        arity: usize,
        nparams: usize,
        target: u32,
        is_loop: bool,
        catches: SmallVec<[ResolvedCatch; 2]>,
    ) {
        // Branches reset the operand stack to the entry height; block
        // parameters stay on the stack, so they are excluded from it.
        let height = (self.stack.len() - nparams) as u32;
        self.labels.push(Label {
            arity: arity as u32,
            height,
            target,
            is_loop,
            catches,
        });
    }

    /// Take the branch at `depth`: restore the operand stack to the target
    /// label's entry height plus its arity, drop the intervening labels, and
    /// redirect the program counter.
    pub(super) fn branch(&mut self, depth: u32, r: &mut CodeReader<'_>) {
        let index = self.labels.len() - 1 - depth as usize;
        let (arity, height, target, is_loop) = {
            let label = &self.labels[index];
            (
                label.arity as usize,
                label.height as usize,
                label.target as usize,
                label.is_loop,
            )
        };

        let carried_start = self.stack.len() - arity;
        self.stack.drain(height..carried_start);
        // A loop label survives its own branch; a block label does not.
        self.labels.truncate(if is_loop { index + 1 } else { index });
        r.pos = target;
    }

    fn do_return(&mut self, _r: &mut CodeReader<'_>, frames_base: usize) -> Result<Flow, Trap> {
        let frame = self.frames.pop().expect("return without frame");
        let results_start = self.stack.len() - frame.num_results;
        // Slide the results down over the frame's locals and scratch.
        self.stack.drain(frame.base..results_start);
        self.labels.truncate(frame.labels_base);

        if self.frames.len() == frames_base {
            Ok(Flow::Done)
        } else {
            Ok(Flow::Switch)
        }
    }

    /// Call `callee` whose arguments are on the operand stack. With `tail`
    /// the current frame is deallocated first, reusing its stack space, so
    /// stack usage stays flat across mutual tail recursion.
    fn do_call(
        &mut self,
        store: &mut Store,
        callee: FuncAddr,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
        tail: bool,
        frames_base: usize,
    ) -> Result<Flow, Trap> {
        let ty = store.func(callee).ty;
        let nparams = store.types().func_type(ty).params.len();

        if tail {
            let frame = self.frames.pop().expect("tail call without frame");
            let args_start = self.stack.len() - nparams;
            self.stack.drain(frame.base..args_start);
            self.labels.truncate(frame.labels_base);
        } else {
            self.frames.last_mut().expect("call without frame").pc = r.pos;
        }

        if let FuncKind::Host(host) = &store.func(callee).kind {
            let callback = Rc::clone(&host.callback);
            self.call_host(
                store,
                &callback,
                ty,
                Some(crate::instance::Instance(instance)),
            )?;
            if tail {
                // The tail-caller's frame is gone; its results stand in for
                // ours and control goes straight back to the caller.
                if self.frames.len() == frames_base {
                    return Ok(Flow::Done);
                }
                return Ok(Flow::Switch);
            }
            return Ok(Flow::Next);
        }

        self.push_wasm_frame(store, callee, nparams)?;
        Ok(Flow::Switch)
    }

    /// Resolve a `call_indirect` target: index into the table, require a
    /// non-null entry, and check the callee's canonical type against the
    /// declared one.
    fn indirect_callee(
        &mut self,
        store: &Store,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
    ) -> Result<FuncAddr, Trap> {
        let type_index = TypeIndex::from_u32(r.var_u32());
        let table = self.table_addr(store, instance, r.var_u32());
        let index = self.pop_table_index(store, table);

        let entry = store.table(table).get(index)?;
        if refs::is_null(entry) {
            return Err(Trap::IndirectCallToNull);
        }
        let callee = FuncAddr::from_u32(refs::to_handle(entry));

        let expected = store.instance_data(instance).type_ids[type_index];
        let actual = store.func(callee).ty;
        if actual != expected && !store.types().is_subtype(actual, expected) {
            return Err(Trap::BadSignature);
        }
        Ok(callee)
    }

    /// Resolve a `call_ref` target from the funcref on the stack. The type
    /// was checked statically; only nullness is a runtime question.
    fn ref_callee(&mut self) -> Result<FuncAddr, Trap> {
        let bits = self.pop().get_ref();
        if refs::is_null(bits) {
            return Err(Trap::NullReference);
        }
        Ok(FuncAddr::from_u32(refs::to_handle(bits)))
    }

    /// Unwind to the innermost `try_table` whose catch list matches the
    /// exception's tag identity (or catches all). The catch branches like a
    /// `br` taken from inside the try_table's block, carrying the payload
    /// and, for the `_ref` kinds, the exception reference.
    fn dispatch_exception(
        &mut self,
        store: &mut Store,
        exn: u64,
        r: &mut CodeReader<'_>,
        frames_base: usize,
    ) -> Result<Flow, Trap> {
        self.frames.last_mut().expect("throw without frame").pc = r.pos;

        let identity = match store.gc.get(exn) {
            Some(GcObject::Exn(e)) => e.identity,
            _ => return Err(Trap::NullReference),
        };

        let mut frame_index = self.frames.len();
        while frame_index > frames_base {
            frame_index -= 1;
            let labels_base = self.frames[frame_index].labels_base;
            let labels_top = if frame_index + 1 == self.frames.len() {
                self.labels.len()
            } else {
                self.frames[frame_index + 1].labels_base
            };

            let mut label_index = labels_top;
            while label_index > labels_base {
                label_index -= 1;
                let matched = self.labels[label_index].catches.iter().copied().find(|c| {
                    match c.kind {
                        super::code::CatchKind::Catch | super::code::CatchKind::CatchRef => {
                            c.identity == identity
                        }
                        super::code::CatchKind::CatchAll
                        | super::code::CatchKind::CatchAllRef => true,
                    }
                });
                let Some(catch) = matched else { continue };

                // Unwind the frames above the handler.
                self.frames.truncate(frame_index + 1);

                // Catch label depths are relative to the context enclosing
                // the try_table: the handler branch happens as if the
                // try_table's own label were already popped.
                let target_index = label_index - 1 - catch.label as usize;
                let (height, target, is_loop) = {
                    let label = &self.labels[target_index];
                    (label.height as usize, label.target as usize, label.is_loop)
                };
                self.stack.truncate(height);

                use super::code::CatchKind;
                if matches!(catch.kind, CatchKind::Catch | CatchKind::CatchRef) {
                    let payload: SmallVec<[VMVal; 4]> = match store.gc.get(exn) {
                        Some(GcObject::Exn(e)) => e.payload.iter().copied().collect(),
                        _ => unreachable!(),
                    };
                    for value in payload {
                        self.push(value)?;
                    }
                }
                if matches!(catch.kind, CatchKind::CatchRef | CatchKind::CatchAllRef) {
                    self.push(VMVal::ref_(exn))?;
                }

                self.labels
                    .truncate(if is_loop { target_index + 1 } else { target_index });
                self.frames.last_mut().expect("handler frame").pc = target;
                return Ok(Flow::Switch);
            }
        }

        // No handler anywhere in this invocation.
        Err(Trap::UncaughtException)
    }

    // Address-space plumbing.

    #[inline]
    fn table_addr(
        &self,
        store: &Store,
        instance: InstanceHandle,
        index: u32,
    ) -> crate::indices::TableAddr {
        store.instance_data(instance).tables[TableIndex::from_u32(index)]
    }

    #[inline]
    fn memory_addr(
        &self,
        store: &Store,
        instance: InstanceHandle,
        index: u32,
    ) -> crate::indices::MemAddr {
        store.instance_data(instance).memories[MemoryIndex::from_u32(index)]
    }

    #[inline]
    fn pop_table_index(&mut self, store: &Store, table: crate::indices::TableAddr) -> u64 {
        if store.table(table).table64 {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        }
    }

    /// Pop a memory address and load `N` bytes at `address + offset`, with
    /// the whole effective range bounds-checked first.
    pub(super) fn load_bytes<const N: usize>(
        &mut self,
        store: &Store,
        instance: InstanceHandle,
        arg: &MemArg,
    ) -> Result<[u8; N], Trap> {
        let addr = self.memory_addr(store, instance, arg.memory);
        let memory = store.memory(addr);
        let base = if memory.memory64 {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let ea = base.checked_add(arg.offset).ok_or(Trap::MemoryOutOfBounds)?;
        let start = memory.check_range(ea, N as u64)?;

        let mut buf = [0u8; N];
        buf.copy_from_slice(&memory.data()[start..start + N]);
        Ok(buf)
    }

    /// Pop a memory address and store `value` at `address + offset`.
    /// The value itself was popped by the caller, so the address is on top.
    pub(super) fn store_bytes(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        arg: &MemArg,
        value: &[u8],
    ) -> Result<(), Trap> {
        let addr = self.memory_addr(store, instance, arg.memory);
        let base = if store.memory(addr).memory64 {
            self.pop().get_u64()
        } else {
            u64::from(self.pop().get_u32())
        };
        let ea = base.checked_add(arg.offset).ok_or(Trap::MemoryOutOfBounds)?;

        let memory = store.memory_mut(addr);
        let start = memory.check_range(ea, value.len() as u64)?;
        memory.data_mut()[start..start + value.len()].copy_from_slice(value);
        Ok(())
    }

    /// The 0xFC prefix: saturating truncations, bulk memory, and the table
    /// operation group.
    fn step_misc(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
    ) -> Result<(), Trap> {
        match r.var_u32() {
            // trunc_sat: `as` casts saturate and map NaN to zero, which is
            // exactly the wasm semantics.
            0 => unop!(self, get_f32, i32, |a: f32| a as i32),
            1 => unop!(self, get_f32, u32, |a: f32| a as u32),
            2 => unop!(self, get_f64, i32, |a: f64| a as i32),
            3 => unop!(self, get_f64, u32, |a: f64| a as u32),
            4 => unop!(self, get_f32, i64, |a: f32| a as i64),
            5 => unop!(self, get_f32, u64, |a: f32| a as u64),
            6 => unop!(self, get_f64, i64, |a: f64| a as i64),
            7 => unop!(self, get_f64, u64, |a: f64| a as u64),

            8 => {
                // memory.init
                let data_index = DataIndex::from_u32(r.var_u32());
                let mem = self.memory_addr(store, instance, r.var_u32());
                let data_addr = store.instance_data(instance).datas[data_index];

                let len = u64::from(self.pop().get_u32());
                let src = u64::from(self.pop().get_u32());
                let dst = if store.memory(mem).memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };

                let segment = store.data(data_addr).data();
                let src_end = src.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
                if src_end > segment.len() as u64 {
                    return Err(Trap::MemoryOutOfBounds);
                }
                let bytes = segment[src as usize..src_end as usize].to_vec();

                let memory = store.memory_mut(mem);
                let start = memory.check_range(dst, len)?;
                memory.data_mut()[start..start + bytes.len()].copy_from_slice(&bytes);
            }
            9 => {
                // data.drop
                let data_index = DataIndex::from_u32(r.var_u32());
                let addr = store.instance_data(instance).datas[data_index];
                store.data_mut(addr).dropped = true;
            }
            10 => {
                // memory.copy, overlap-safe in either direction.
                let dst_mem = self.memory_addr(store, instance, r.var_u32());
                let src_mem = self.memory_addr(store, instance, r.var_u32());

                let len = if store.memory(dst_mem).memory64 && store.memory(src_mem).memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };
                let src = if store.memory(src_mem).memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };
                let dst = if store.memory(dst_mem).memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };

                if dst_mem == src_mem {
                    let memory = store.memory_mut(dst_mem);
                    let s = memory.check_range(src, len)?;
                    let d = memory.check_range(dst, len)?;
                    memory.data_mut().copy_within(s..s + len as usize, d);
                } else {
                    let s = store.memory(src_mem).check_range(src, len)?;
                    let bytes =
                        store.memory(src_mem).data()[s..s + len as usize].to_vec();
                    let memory = store.memory_mut(dst_mem);
                    let d = memory.check_range(dst, len)?;
                    memory.data_mut()[d..d + bytes.len()].copy_from_slice(&bytes);
                }
            }
            11 => {
                // memory.fill
                let mem = self.memory_addr(store, instance, r.var_u32());
                let len = if store.memory(mem).memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };
                let value = self.pop().get_i32() as u8;
                let dst = if store.memory(mem).memory64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };

                let memory = store.memory_mut(mem);
                let start = memory.check_range(dst, len)?;
                memory.data_mut()[start..start + len as usize].fill(value);
            }

            12 => {
                // table.init
                let elem_index = ElemIndex::from_u32(r.var_u32());
                let table = self.table_addr(store, instance, r.var_u32());
                let elem_addr = store.instance_data(instance).elems[elem_index];

                let len = u64::from(self.pop().get_u32());
                let src = u64::from(self.pop().get_u32());
                let dst = self.pop_table_index(store, table);

                let elem = store.elem(elem_addr);
                let entries: &[u64] = if elem.dropped { &[] } else { &elem.entries };
                let src_end = src.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
                if src_end > entries.len() as u64 {
                    return Err(Trap::TableOutOfBounds);
                }
                let slice = entries[src as usize..src_end as usize].to_vec();
                store.table_mut(table).init(dst, &slice)?;
            }
            13 => {
                // elem.drop
                let elem_index = ElemIndex::from_u32(r.var_u32());
                let addr = store.instance_data(instance).elems[elem_index];
                store.elem_mut(addr).dropped = true;
            }
            14 => {
                // table.copy
                let dst_table = self.table_addr(store, instance, r.var_u32());
                let src_table = self.table_addr(store, instance, r.var_u32());

                let len = u64::from(self.pop().get_u32());
                let src = self.pop_table_index(store, src_table);
                let dst = self.pop_table_index(store, dst_table);

                if dst_table == src_table {
                    store.table_mut(dst_table).copy_within(dst, src, len)?;
                } else {
                    let (s, n) = store.table(src_table).check_range(src, len)?;
                    let entries = store.table(src_table).elements()[s..s + n].to_vec();
                    store.table_mut(dst_table).init(dst, &entries)?;
                }
            }
            15 => {
                // table.grow
                let table = self.table_addr(store, instance, r.var_u32());
                let table64 = store.table(table).table64;
                let delta = if table64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };
                let init = self.pop().get_ref();
                match store.table_mut(table).grow(delta, init) {
                    Some(old) if table64 => self.push(VMVal::u64(old))?,
                    Some(old) => self.push(VMVal::u32(old as u32))?,
                    None if table64 => self.push(VMVal::i64(-1))?,
                    None => self.push(VMVal::i32(-1))?,
                }
            }
            16 => {
                // table.size
                let table = self.table_addr(store, instance, r.var_u32());
                let size = store.table(table).size();
                if store.table(table).table64 {
                    self.push(VMVal::u64(size))?;
                } else {
                    self.push(VMVal::u32(size as u32))?;
                }
            }
            17 => {
                // table.fill
                let table = self.table_addr(store, instance, r.var_u32());
                let len = if store.table(table).table64 {
                    self.pop().get_u64()
                } else {
                    u64::from(self.pop().get_u32())
                };
                let value = self.pop().get_ref();
                let dst = self.pop_table_index(store, table);
                store.table_mut(table).fill(dst, value, len)?;
            }

            other => unreachable!("validated misc opcode {other}"),
        }
        Ok(())
    }
}

// Integer division: division by zero traps, and the lone
// signed-overflow case (MIN / -1) traps; MIN % -1 is 0.

fn div_s_32(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        Err(Trap::IntegerDivisionByZero)
    } else if a == i32::MIN && b == -1 {
        Err(Trap::IntegerOverflow)
    } else {
        Ok(a.wrapping_div(b))
    }
}

fn div_u_32(a: u32, b: u32) -> Result<u32, Trap> {
    a.checked_div(b).ok_or(Trap::IntegerDivisionByZero)
}

fn rem_s_32(a: i32, b: i32) -> Result<i32, Trap> {
    if b == 0 {
        Err(Trap::IntegerDivisionByZero)
    } else {
        Ok(a.wrapping_rem(b))
    }
}

fn rem_u_32(a: u32, b: u32) -> Result<u32, Trap> {
    a.checked_rem(b).ok_or(Trap::IntegerDivisionByZero)
}

fn div_s_64(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        Err(Trap::IntegerDivisionByZero)
    } else if a == i64::MIN && b == -1 {
        Err(Trap::IntegerOverflow)
    } else {
        Ok(a.wrapping_div(b))
    }
}

fn div_u_64(a: u64, b: u64) -> Result<u64, Trap> {
    a.checked_div(b).ok_or(Trap::IntegerDivisionByZero)
}

fn rem_s_64(a: i64, b: i64) -> Result<i64, Trap> {
    if b == 0 {
        Err(Trap::IntegerDivisionByZero)
    } else {
        Ok(a.wrapping_rem(b))
    }
}

fn rem_u_64(a: u64, b: u64) -> Result<u64, Trap> {
    a.checked_rem(b).ok_or(Trap::IntegerDivisionByZero)
}

// Non-saturating float-to-int conversions. The truncated value must lie in
// the target range; every bound below is exactly representable in f64.

fn trunc_to_i32(x: f64) -> Result<i32, Trap> {
    if x.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let t = x.trunc();
    if (-2_147_483_648.0..=2_147_483_647.0).contains(&t) {
        Ok(t as i32)
    } else {
        Err(Trap::IntegerOverflow)
    }
}

fn trunc_to_u32(x: f64) -> Result<u32, Trap> {
    if x.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let t = x.trunc();
    if (0.0..=4_294_967_295.0).contains(&t) {
        Ok(t as u32)
    } else {
        Err(Trap::IntegerOverflow)
    }
}

fn trunc_to_i64(x: f64) -> Result<i64, Trap> {
    if x.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let t = x.trunc();
    // 2^63 - 1 is not representable in f64, so the upper bound is exclusive
    // at exactly 2^63.
    if t >= -9_223_372_036_854_775_808.0 && t < 9_223_372_036_854_775_808.0 {
        Ok(t as i64)
    } else {
        Err(Trap::IntegerOverflow)
    }
}

fn trunc_to_u64(x: f64) -> Result<u64, Trap> {
    if x.is_nan() {
        return Err(Trap::BadConversionToInteger);
    }
    let t = x.trunc();
    if t >= 0.0 && t < 18_446_744_073_709_551_616.0 {
        Ok(t as u64)
    } else {
        Err(Trap::IntegerOverflow)
    }
}

// Floats. Results that are NaN are canonicalized to the quiet pattern, one
// implementation-wide choice.

pub(super) fn canon32(x: f32) -> u32 {
    if x.is_nan() {
        0x7fc0_0000
    } else {
        x.to_bits()
    }
}

pub(super) fn canon64(x: f64) -> u64 {
    if x.is_nan() {
        0x7ff8_0000_0000_0000
    } else {
        x.to_bits()
    }
}

// min/max follow IEEE 754 minimum/maximum: NaN wins, and -0 is less than +0.

pub(super) fn fmin32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::from_bits(0x7fc0_0000)
    } else if a < b {
        a
    } else if b < a {
        b
    } else if a.to_bits() != b.to_bits() {
        -0.0
    } else {
        a
    }
}

pub(super) fn fmax32(a: f32, b: f32) -> f32 {
    if a.is_nan() || b.is_nan() {
        f32::from_bits(0x7fc0_0000)
    } else if a < b {
        b
    } else if b < a {
        a
    } else if a.to_bits() != b.to_bits() {
        0.0
    } else {
        a
    }
}

pub(super) fn fmin64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::from_bits(0x7ff8_0000_0000_0000)
    } else if a < b {
        a
    } else if b < a {
        b
    } else if a.to_bits() != b.to_bits() {
        -0.0
    } else {
        a
    }
}

pub(super) fn fmax64(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::from_bits(0x7ff8_0000_0000_0000)
    } else if a < b {
        b
    } else if b < a {
        a
    } else if a.to_bits() != b.to_bits() {
        0.0
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_division_edge_cases() {
        assert_eq!(div_s_32(i32::MIN, -1), Err(Trap::IntegerOverflow));
        assert_eq!(div_s_32(7, 0), Err(Trap::IntegerDivisionByZero));
        assert_eq!(rem_s_32(i32::MIN, -1), Ok(0));
        assert_eq!(div_s_64(i64::MIN, -1), Err(Trap::IntegerOverflow));
        assert_eq!(rem_s_64(i64::MIN, -1), Ok(0));
    }

    #[test]
    fn trunc_traps_on_nan_and_range() {
        assert_eq!(trunc_to_i32(f64::NAN), Err(Trap::BadConversionToInteger));
        assert_eq!(
            trunc_to_i32(f64::INFINITY),
            Err(Trap::IntegerOverflow)
        );
        assert_eq!(trunc_to_i32(2_147_483_648.0), Err(Trap::IntegerOverflow));
        assert_eq!(trunc_to_i32(-2_147_483_648.9), Ok(i32::MIN));
        assert_eq!(trunc_to_u64(-0.9), Ok(0));
        assert_eq!(trunc_to_i64(9.3e18), Err(Trap::IntegerOverflow));
    }

    #[test]
    fn min_max_handle_nan_and_signed_zero() {
        assert!(fmin64(f64::NAN, 1.0).is_nan());
        assert_eq!(fmin64(-0.0, 0.0).to_bits(), (-0.0f64).to_bits());
        assert_eq!(fmax64(-0.0, 0.0).to_bits(), 0.0f64.to_bits());
        assert_eq!(fmin32(1.0, 2.0), 1.0);
        assert_eq!(fmax32(1.0, 2.0), 2.0);
    }
}
