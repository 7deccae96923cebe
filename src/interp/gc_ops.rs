//! The 0xFB prefix: struct/array allocation and access, reference casts,
//! and the inline `i31` form.
//!
//! Runtime type tests work on the reference bits alone: null and `i31` are
//! distinguished by the encoding, everything else resolves through the GC
//! heap (structs, arrays, exceptions) or the function arena (funcrefs, whose
//! hierarchy is known statically). Concrete-type tests walk the registry's
//! declared-supertype chains.

use super::code::CodeReader;
use super::Vm;
use crate::gc::{ArrayObj, GcObject, StructObj};
use crate::indices::{DataIndex, ElemIndex, FuncAddr, InstanceHandle, SharedTypeIndex, TypeIndex};
use crate::module::Module;
use crate::store::Store;
use crate::trap::Trap;
use crate::types::{CompositeInnerType, StorageType, ValType};
use crate::values::{refs, VMVal};

/// The heap-type immediate of a cast or test, decoded.
#[derive(Debug, Clone, Copy)]
enum HeapTarget {
    Concrete(SharedTypeIndex),
    Abstract(i64),
}

// Abstract heap type codes as they appear in the s33 immediate.
const HT_NOFUNC: i64 = -0x0d;
const HT_NOEXTERN: i64 = -0x0e;
const HT_NONE: i64 = -0x0f;
const HT_FUNC: i64 = -0x10;
const HT_EXTERN: i64 = -0x11;
const HT_ANY: i64 = -0x12;
const HT_EQ: i64 = -0x13;
const HT_I31: i64 = -0x14;
const HT_STRUCT: i64 = -0x15;
const HT_ARRAY: i64 = -0x16;
const HT_EXN: i64 = -0x17;
const HT_NOEXN: i64 = -0x0c;

impl Vm {
    pub(super) fn step_gc(
        &mut self,
        store: &mut Store,
        _module: &Module,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
    ) -> Result<(), Trap> {
        match r.var_u32() {
            0 => {
                // struct.new
                let ty = self.shared_type(store, instance, r.var_u32());
                let count = self.struct_field_count(store, ty);
                let fields_ty = self.struct_storage_types(store, ty);
                let start = self.stack.len() - count;
                let mut fields: Box<[VMVal]> = self.stack.drain(start..).collect();
                for (slot, storage) in fields.iter_mut().zip(fields_ty.iter()) {
                    *slot = pack_storage(*slot, *storage);
                }
                let bits = store.gc.alloc(GcObject::Struct(StructObj { ty, fields }));
                self.push(VMVal::ref_(bits))?;
            }
            1 => {
                // struct.new_default
                let ty = self.shared_type(store, instance, r.var_u32());
                let count = self.struct_field_count(store, ty);
                let bits = store.gc.alloc(GcObject::Struct(StructObj {
                    ty,
                    fields: vec![VMVal::ZERO; count].into_boxed_slice(),
                }));
                self.push(VMVal::ref_(bits))?;
            }
            sub @ (2 | 3 | 4) => {
                // struct.get / struct.get_s / struct.get_u
                let ty = self.shared_type(store, instance, r.var_u32());
                let field = r.var_u32() as usize;
                let storage = self.struct_storage_types(store, ty)[field];
                let target = self.pop_non_null()?;
                let value = match store.gc.get(target) {
                    Some(GcObject::Struct(s)) => s.fields[field],
                    _ => return Err(Trap::NullReference),
                };
                self.push(unpack_storage(value, storage, sub == 3))?;
            }
            5 => {
                // struct.set
                let ty = self.shared_type(store, instance, r.var_u32());
                let field = r.var_u32() as usize;
                let storage = self.struct_storage_types(store, ty)[field];
                let value = pack_storage(self.pop(), storage);
                let target = self.pop_non_null()?;
                match store.gc.get_mut(target) {
                    Some(GcObject::Struct(s)) => s.fields[field] = value,
                    _ => return Err(Trap::NullReference),
                }
            }

            6 => {
                // array.new
                let ty = self.shared_type(store, instance, r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let len = self.pop().get_u32() as usize;
                let value = pack_storage(self.pop(), storage);
                let bits = store.gc.alloc(GcObject::Array(ArrayObj {
                    ty,
                    elems: vec![value; len],
                }));
                self.push(VMVal::ref_(bits))?;
            }
            7 => {
                // array.new_default
                let ty = self.shared_type(store, instance, r.var_u32());
                let len = self.pop().get_u32() as usize;
                let bits = store.gc.alloc(GcObject::Array(ArrayObj {
                    ty,
                    elems: vec![VMVal::ZERO; len],
                }));
                self.push(VMVal::ref_(bits))?;
            }
            8 => {
                // array.new_fixed
                let ty = self.shared_type(store, instance, r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let len = r.var_u32() as usize;
                let start = self.stack.len() - len;
                let mut elems: Vec<VMVal> = self.stack.drain(start..).collect();
                for slot in &mut elems {
                    *slot = pack_storage(*slot, storage);
                }
                let bits = store.gc.alloc(GcObject::Array(ArrayObj { ty, elems }));
                self.push(VMVal::ref_(bits))?;
            }
            9 => {
                // array.new_data
                let ty = self.shared_type(store, instance, r.var_u32());
                let data_index = DataIndex::from_u32(r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let width = storage_width(storage);

                let len = self.pop().get_u32() as usize;
                let offset = self.pop().get_u32() as usize;

                let data_addr = store.instance_data(instance).datas[data_index];
                let segment = store.data(data_addr).data();
                let byte_len = len.checked_mul(width).ok_or(Trap::MemoryOutOfBounds)?;
                let end = offset.checked_add(byte_len).ok_or(Trap::MemoryOutOfBounds)?;
                if end > segment.len() {
                    return Err(Trap::MemoryOutOfBounds);
                }

                let elems: Vec<VMVal> = (0..len)
                    .map(|i| load_storage(&segment[offset + i * width..], storage))
                    .collect();
                let bits = store.gc.alloc(GcObject::Array(ArrayObj { ty, elems }));
                self.push(VMVal::ref_(bits))?;
            }
            10 => {
                // array.new_elem
                let ty = self.shared_type(store, instance, r.var_u32());
                let elem_index = ElemIndex::from_u32(r.var_u32());

                let len = self.pop().get_u32() as usize;
                let offset = self.pop().get_u32() as usize;

                let elem_addr = store.instance_data(instance).elems[elem_index];
                let elem = store.elem(elem_addr);
                let entries: &[u64] = if elem.dropped { &[] } else { &elem.entries };
                let end = offset.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
                if end > entries.len() {
                    return Err(Trap::TableOutOfBounds);
                }

                let elems: Vec<VMVal> =
                    entries[offset..end].iter().map(|&e| VMVal::ref_(e)).collect();
                let bits = store.gc.alloc(GcObject::Array(ArrayObj { ty, elems }));
                self.push(VMVal::ref_(bits))?;
            }

            sub @ (11 | 12 | 13) => {
                // array.get / array.get_s / array.get_u
                let ty = self.shared_type(store, instance, r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let index = self.pop().get_u32() as usize;
                let target = self.pop_non_null()?;
                let value = match store.gc.get(target) {
                    Some(GcObject::Array(a)) => {
                        *a.elems.get(index).ok_or(Trap::ArrayOutOfBounds)?
                    }
                    _ => return Err(Trap::NullReference),
                };
                self.push(unpack_storage(value, storage, sub == 12))?;
            }
            14 => {
                // array.set
                let ty = self.shared_type(store, instance, r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let value = pack_storage(self.pop(), storage);
                let index = self.pop().get_u32() as usize;
                let target = self.pop_non_null()?;
                match store.gc.get_mut(target) {
                    Some(GcObject::Array(a)) => {
                        *a.elems.get_mut(index).ok_or(Trap::ArrayOutOfBounds)? = value;
                    }
                    _ => return Err(Trap::NullReference),
                }
            }
            15 => {
                // array.len
                let target = self.pop_non_null()?;
                let len = match store.gc.get(target) {
                    Some(GcObject::Array(a)) => a.elems.len(),
                    _ => return Err(Trap::NullReference),
                };
                self.push(VMVal::u32(len as u32))?;
            }
            16 => {
                // array.fill
                let ty = self.shared_type(store, instance, r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let len = self.pop().get_u32() as usize;
                let value = pack_storage(self.pop(), storage);
                let offset = self.pop().get_u32() as usize;
                let target = self.pop_non_null()?;
                match store.gc.get_mut(target) {
                    Some(GcObject::Array(a)) => {
                        let end = offset.checked_add(len).ok_or(Trap::ArrayOutOfBounds)?;
                        if end > a.elems.len() {
                            return Err(Trap::ArrayOutOfBounds);
                        }
                        a.elems[offset..end].fill(value);
                    }
                    _ => return Err(Trap::NullReference),
                }
            }
            17 => {
                // array.copy
                let _dst_ty = r.var_u32();
                let _src_ty = r.var_u32();
                let len = self.pop().get_u32() as usize;
                let src_off = self.pop().get_u32() as usize;
                let src = self.pop_non_null()?;
                let dst_off = self.pop().get_u32() as usize;
                let dst = self.pop_non_null()?;

                let slice = {
                    let src_arr = match store.gc.get(src) {
                        Some(GcObject::Array(a)) => a,
                        _ => return Err(Trap::NullReference),
                    };
                    let end = src_off.checked_add(len).ok_or(Trap::ArrayOutOfBounds)?;
                    if end > src_arr.elems.len() {
                        return Err(Trap::ArrayOutOfBounds);
                    }
                    src_arr.elems[src_off..end].to_vec()
                };
                match store.gc.get_mut(dst) {
                    Some(GcObject::Array(a)) => {
                        let end = dst_off.checked_add(len).ok_or(Trap::ArrayOutOfBounds)?;
                        if end > a.elems.len() {
                            return Err(Trap::ArrayOutOfBounds);
                        }
                        a.elems[dst_off..end].copy_from_slice(&slice);
                    }
                    _ => return Err(Trap::NullReference),
                }
            }
            18 => {
                // array.init_data
                let ty = self.shared_type(store, instance, r.var_u32());
                let data_index = DataIndex::from_u32(r.var_u32());
                let storage = self.array_storage_type(store, ty);
                let width = storage_width(storage);

                let len = self.pop().get_u32() as usize;
                let src_off = self.pop().get_u32() as usize;
                let dst_off = self.pop().get_u32() as usize;
                let target = self.pop_non_null()?;

                let data_addr = store.instance_data(instance).datas[data_index];
                let segment = store.data(data_addr).data();
                let byte_len = len.checked_mul(width).ok_or(Trap::MemoryOutOfBounds)?;
                let src_end = src_off
                    .checked_add(byte_len)
                    .ok_or(Trap::MemoryOutOfBounds)?;
                if src_end > segment.len() {
                    return Err(Trap::MemoryOutOfBounds);
                }
                let values: Vec<VMVal> = (0..len)
                    .map(|i| load_storage(&segment[src_off + i * width..], storage))
                    .collect();

                match store.gc.get_mut(target) {
                    Some(GcObject::Array(a)) => {
                        let end = dst_off.checked_add(len).ok_or(Trap::ArrayOutOfBounds)?;
                        if end > a.elems.len() {
                            return Err(Trap::ArrayOutOfBounds);
                        }
                        a.elems[dst_off..end].copy_from_slice(&values);
                    }
                    _ => return Err(Trap::NullReference),
                }
            }
            19 => {
                // array.init_elem
                let _ty = r.var_u32();
                let elem_index = ElemIndex::from_u32(r.var_u32());

                let len = self.pop().get_u32() as usize;
                let src_off = self.pop().get_u32() as usize;
                let dst_off = self.pop().get_u32() as usize;
                let target = self.pop_non_null()?;

                let elem_addr = store.instance_data(instance).elems[elem_index];
                let elem = store.elem(elem_addr);
                let entries: &[u64] = if elem.dropped { &[] } else { &elem.entries };
                let src_end = src_off.checked_add(len).ok_or(Trap::TableOutOfBounds)?;
                if src_end > entries.len() {
                    return Err(Trap::TableOutOfBounds);
                }
                let values: Vec<VMVal> = entries[src_off..src_end]
                    .iter()
                    .map(|&e| VMVal::ref_(e))
                    .collect();

                match store.gc.get_mut(target) {
                    Some(GcObject::Array(a)) => {
                        let end = dst_off.checked_add(len).ok_or(Trap::ArrayOutOfBounds)?;
                        if end > a.elems.len() {
                            return Err(Trap::ArrayOutOfBounds);
                        }
                        a.elems[dst_off..end].copy_from_slice(&values);
                    }
                    _ => return Err(Trap::NullReference),
                }
            }

            sub @ (20 | 21) => {
                // ref.test (null)?
                let allow_null = sub == 21;
                let target = self.heap_target(store, instance, r)?;
                let bits = self.pop().get_ref();
                let ok = self.ref_matches(store, bits, allow_null, target);
                self.push(VMVal::i32(i32::from(ok)))?;
            }
            sub @ (22 | 23) => {
                // ref.cast (null)?: same test, but failure traps and the
                // value stays.
                let allow_null = sub == 23;
                let target = self.heap_target(store, instance, r)?;
                let bits = self.peek().get_ref();
                if !self.ref_matches(store, bits, allow_null, target) {
                    return Err(Trap::CastFailure);
                }
            }
            sub @ (24 | 25) => {
                // br_on_cast / br_on_cast_fail
                let flags = r.u8();
                let depth = r.var_u32();
                let _source = self.heap_target(store, instance, r)?;
                let target = self.heap_target(store, instance, r)?;
                let target_nullable = flags & 0x02 != 0;

                let bits = self.peek().get_ref();
                let matches = self.ref_matches(store, bits, target_nullable, target);
                let take = if sub == 24 { matches } else { !matches };
                if take {
                    self.branch(depth, r);
                }
            }

            // The conversions preserve the encoded bits; only the static
            // view changes.
            26 | 27 => {}

            28 => {
                // ref.i31
                let value = self.pop().get_i32();
                self.push(VMVal::ref_(refs::from_i31(value)))?;
            }
            29 => {
                // i31.get_s
                let bits = self.pop().get_ref();
                if refs::is_null(bits) {
                    return Err(Trap::NullI31Ref);
                }
                self.push(VMVal::i32(refs::i31_get_s(bits)))?;
            }
            30 => {
                // i31.get_u
                let bits = self.pop().get_ref();
                if refs::is_null(bits) {
                    return Err(Trap::NullI31Ref);
                }
                self.push(VMVal::i32(refs::i31_get_u(bits)))?;
            }

            other => unreachable!("validated gc opcode {other}"),
        }
        Ok(())
    }

    fn pop_non_null(&mut self) -> Result<u64, Trap> {
        let bits = self.pop().get_ref();
        if refs::is_null(bits) {
            return Err(Trap::NullReference);
        }
        Ok(bits)
    }

    fn shared_type(
        &self,
        store: &Store,
        instance: InstanceHandle,
        index: u32,
    ) -> SharedTypeIndex {
        store.instance_data(instance).type_ids[TypeIndex::from_u32(index)]
    }

    fn struct_field_count(&self, store: &Store, ty: SharedTypeIndex) -> usize {
        match &store.types().get(ty).composite.inner {
            CompositeInnerType::Struct(s) => s.fields.len(),
            _ => unreachable!("struct op on non-struct type"),
        }
    }

    fn struct_storage_types(
        &self,
        store: &Store,
        ty: SharedTypeIndex,
    ) -> Vec<StorageType> {
        match &store.types().get(ty).composite.inner {
            CompositeInnerType::Struct(s) => s.fields.iter().map(|f| f.storage).collect(),
            _ => unreachable!("struct op on non-struct type"),
        }
    }

    fn array_storage_type(&self, store: &Store, ty: SharedTypeIndex) -> StorageType {
        match &store.types().get(ty).composite.inner {
            CompositeInnerType::Array(a) => a.0.storage,
            _ => unreachable!("array op on non-array type"),
        }
    }

    fn heap_target(
        &self,
        store: &Store,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
    ) -> Result<HeapTarget, Trap> {
        Ok(match r.heap_type() {
            Ok(index) => HeapTarget::Concrete(self.shared_type(store, instance, index)),
            Err(code) => HeapTarget::Abstract(code),
        })
    }

    /// Does the reference `bits` inhabit the target heap type?
    fn ref_matches(
        &self,
        store: &Store,
        bits: u64,
        allow_null: bool,
        target: HeapTarget,
    ) -> bool {
        if refs::is_null(bits) {
            return allow_null;
        }

        match target {
            HeapTarget::Abstract(code) => match code {
                HT_ANY | HT_EXTERN | HT_FUNC | HT_EXN => true,
                HT_EQ => {
                    refs::is_i31(bits)
                        || matches!(
                            store.gc.get(bits),
                            Some(GcObject::Struct(_) | GcObject::Array(_))
                        )
                }
                HT_I31 => refs::is_i31(bits),
                HT_STRUCT => {
                    !refs::is_i31(bits)
                        && matches!(store.gc.get(bits), Some(GcObject::Struct(_)))
                }
                HT_ARRAY => {
                    !refs::is_i31(bits) && matches!(store.gc.get(bits), Some(GcObject::Array(_)))
                }
                // The bottom types have no non-null inhabitants.
                HT_NONE | HT_NOFUNC | HT_NOEXTERN | HT_NOEXN => false,
                other => unreachable!("validated abstract heap type {other}"),
            },
            HeapTarget::Concrete(expected) => {
                if refs::is_i31(bits) {
                    return false;
                }
                let actual = match store.types().get(expected).composite.inner {
                    CompositeInnerType::Func(_) => {
                        let addr = FuncAddr::from_u32(refs::to_handle(bits));
                        store.func(addr).ty
                    }
                    _ => match store.gc.get(bits).and_then(|o| o.type_index()) {
                        Some(ty) => ty,
                        None => return false,
                    },
                };
                store.types().is_subtype(actual, expected)
            }
        }
    }
}

fn storage_width(storage: StorageType) -> usize {
    match storage {
        StorageType::I8 => 1,
        StorageType::I16 => 2,
        StorageType::Val(ValType::I32 | ValType::F32) => 4,
        StorageType::Val(ValType::I64 | ValType::F64) => 8,
        StorageType::Val(ValType::V128) => 16,
        StorageType::Val(ValType::Ref(_)) => unreachable!("data-backed array of refs"),
    }
}

/// Read one array element out of a data segment, little-endian.
fn load_storage(bytes: &[u8], storage: StorageType) -> VMVal {
    match storage {
        StorageType::I8 => VMVal::u32(u32::from(bytes[0])),
        StorageType::I16 => VMVal::u32(u32::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
        StorageType::Val(ValType::I32 | ValType::F32) => {
            VMVal::u32(u32::from_le_bytes(bytes[..4].try_into().unwrap()))
        }
        StorageType::Val(ValType::I64 | ValType::F64) => {
            VMVal::u64(u64::from_le_bytes(bytes[..8].try_into().unwrap()))
        }
        StorageType::Val(ValType::V128) => {
            VMVal::v128(u128::from_le_bytes(bytes[..16].try_into().unwrap()))
        }
        StorageType::Val(ValType::Ref(_)) => unreachable!("data-backed array of refs"),
    }
}

/// Truncate a value to its packed storage width on write.
fn pack_storage(value: VMVal, storage: StorageType) -> VMVal {
    match storage {
        StorageType::I8 => VMVal::u32(value.get_u32() & 0xff),
        StorageType::I16 => VMVal::u32(value.get_u32() & 0xffff),
        StorageType::Val(_) => value,
    }
}

/// Widen a packed field back onto the operand stack.
fn unpack_storage(value: VMVal, storage: StorageType, signed: bool) -> VMVal {
    match storage {
        StorageType::I8 if signed => VMVal::i32(i32::from(value.get_u32() as u8 as i8)),
        StorageType::I16 if signed => VMVal::i32(i32::from(value.get_u32() as u16 as i16)),
        StorageType::I8 | StorageType::I16 => value,
        StorageType::Val(_) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_fields_mask_on_write_and_extend_on_read() {
        let packed = pack_storage(VMVal::i32(-1), StorageType::I8);
        assert_eq!(packed.get_u32(), 0xff);
        assert_eq!(
            unpack_storage(packed, StorageType::I8, true).get_i32(),
            -1
        );
        assert_eq!(
            unpack_storage(packed, StorageType::I8, false).get_i32(),
            0xff
        );

        let packed = pack_storage(VMVal::i32(0x1_8000), StorageType::I16);
        assert_eq!(
            unpack_storage(packed, StorageType::I16, true).get_i32(),
            -32768
        );
    }
}
