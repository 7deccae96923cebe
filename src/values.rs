//! Value representations.
//!
//! [`VMVal`] is the interpreter's uniform 128-bit operand slot: narrower
//! values live in the low bytes, little-endian. [`Val`] is the typed value an
//! embedder passes across the call boundary.
//!
//! References are encoded into 64 bits: zero is null, `handle + 1` is a valid
//! reference, and the high bit marks an `i31` whose payload sits in the low
//! 31 bits. Every reader masks consistently through the helpers in [`refs`].

use crate::func::Func;
use crate::indices::FuncAddr;
use crate::store::Store;
use crate::types::{HeapType, ValType};
use core::fmt;

/// A uniform operand slot. Wide enough for a `v128`; everything narrower
/// occupies the low bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct VMVal {
    bytes: [u8; 16],
}

impl fmt::Debug for VMVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VMVal").field(&self.get_v128()).finish()
    }
}

impl VMVal {
    pub const ZERO: VMVal = VMVal { bytes: [0; 16] };

    #[inline]
    pub fn i32(value: i32) -> Self {
        Self::i64(i64::from(value))
    }

    #[inline]
    pub fn i64(value: i64) -> Self {
        Self::u64(value as u64)
    }

    #[inline]
    pub fn u32(value: u32) -> Self {
        Self::u64(u64::from(value))
    }

    #[inline]
    pub fn u64(value: u64) -> Self {
        let mut bytes = [0; 16];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self { bytes }
    }

    /// A 32-bit float, from its raw bits.
    #[inline]
    pub fn f32(bits: u32) -> Self {
        Self::u32(bits)
    }

    /// A 64-bit float, from its raw bits.
    #[inline]
    pub fn f64(bits: u64) -> Self {
        Self::u64(bits)
    }

    #[inline]
    pub fn v128(value: u128) -> Self {
        Self {
            bytes: value.to_le_bytes(),
        }
    }

    /// An encoded reference (see [`refs`]).
    #[inline]
    pub fn ref_(bits: u64) -> Self {
        Self::u64(bits)
    }

    #[inline]
    pub fn get_i32(&self) -> i32 {
        self.get_u32() as i32
    }

    #[inline]
    pub fn get_u32(&self) -> u32 {
        u32::from_le_bytes(self.bytes[..4].try_into().unwrap())
    }

    #[inline]
    pub fn get_i64(&self) -> i64 {
        self.get_u64() as i64
    }

    #[inline]
    pub fn get_u64(&self) -> u64 {
        u64::from_le_bytes(self.bytes[..8].try_into().unwrap())
    }

    #[inline]
    pub fn get_f32_bits(&self) -> u32 {
        self.get_u32()
    }

    #[inline]
    pub fn get_f64_bits(&self) -> u64 {
        self.get_u64()
    }

    #[inline]
    pub fn get_f32(&self) -> f32 {
        f32::from_bits(self.get_u32())
    }

    #[inline]
    pub fn get_f64(&self) -> f64 {
        f64::from_bits(self.get_u64())
    }

    #[inline]
    pub fn get_v128(&self) -> u128 {
        u128::from_le_bytes(self.bytes)
    }

    #[inline]
    pub fn get_ref(&self) -> u64 {
        self.get_u64()
    }
}

/// The 64-bit reference encoding.
pub(crate) mod refs {
    /// The null reference.
    pub const NULL: u64 = 0;
    /// High bit: the value is an inline `i31`, payload in the low 31 bits.
    pub const I31_TAG: u64 = 1 << 63;

    #[inline]
    pub fn is_null(bits: u64) -> bool {
        bits == NULL
    }

    #[inline]
    pub fn is_i31(bits: u64) -> bool {
        bits & I31_TAG != 0
    }

    /// Encode a store handle (function address, GC slot, host token).
    #[inline]
    pub fn from_handle(raw: u32) -> u64 {
        u64::from(raw) + 1
    }

    /// Decode a non-null, non-i31 reference back to its handle.
    #[inline]
    pub fn to_handle(bits: u64) -> u32 {
        debug_assert!(!is_null(bits) && !is_i31(bits));
        u32::try_from(bits - 1).expect("reference handle out of range")
    }

    /// Pack the low 31 bits of `value` into an inline i31 reference.
    #[inline]
    pub fn from_i31(value: i32) -> u64 {
        I31_TAG | u64::from(value as u32 & 0x7fff_ffff)
    }

    /// Unpack an i31, sign-extending from bit 30.
    #[inline]
    pub fn i31_get_s(bits: u64) -> i32 {
        debug_assert!(is_i31(bits));
        let raw = (bits & 0x7fff_ffff) as u32;
        (raw << 1) as i32 >> 1
    }

    /// Unpack an i31, zero-extending.
    #[inline]
    pub fn i31_get_u(bits: u64) -> i32 {
        debug_assert!(is_i31(bits));
        (bits & 0x7fff_ffff) as u32 as i32
    }
}

/// A value that a WebAssembly module can consume or produce.
#[derive(Debug, Clone, Copy)]
pub enum Val {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
    /// A 32-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f32::from_bits` to create an `f32` value.
    F32(u32),
    /// A 64-bit float.
    ///
    /// Note that the raw bits of the float are stored here, and you can use
    /// `f64::from_bits` to create an `f64` value.
    F64(u64),
    /// A 128-bit vector.
    V128(u128),
    /// A function reference.
    FuncRef(Option<Func>),
    /// A host reference, identified by an embedder-chosen token.
    ExternRef(Option<u32>),
    /// An opaque reference into a store's heap (GC object, exception
    /// object, or an externalized value that does not fit a token). Only
    /// meaningful within the store that produced it.
    HeapRef(Option<u64>),
}

impl Val {
    /// The zero/null value of the given type.
    pub fn default_for(ty: &ValType) -> Self {
        match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0),
            ValType::F64 => Val::F64(0),
            ValType::V128 => Val::V128(0),
            ValType::Ref(rt) => match rt.heap {
                HeapType::Func | HeapType::NoFunc => Val::FuncRef(None),
                HeapType::Extern | HeapType::NoExtern => Val::ExternRef(None),
                _ => Val::HeapRef(None),
            },
        }
    }

    /// Does this value inhabit `ty`?
    ///
    /// Opaque [`Val::HeapRef`]s are accepted for any reference type; they
    /// carry no type information, so responsibility stays with the embedder
    /// that produced them.
    pub(crate) fn matches(&self, ty: &ValType) -> bool {
        match (self, ty) {
            (Val::I32(_), ValType::I32)
            | (Val::I64(_), ValType::I64)
            | (Val::F32(_), ValType::F32)
            | (Val::F64(_), ValType::F64)
            | (Val::V128(_), ValType::V128)
            | (Val::HeapRef(_), ValType::Ref(_)) => true,
            (Val::FuncRef(f), ValType::Ref(rt)) => {
                matches!(rt.heap, HeapType::Func | HeapType::NoFunc | HeapType::Concrete(_))
                    && (f.is_some() || rt.nullable)
            }
            (Val::ExternRef(e), ValType::Ref(rt)) => {
                matches!(rt.heap, HeapType::Extern | HeapType::NoExtern)
                    && (e.is_some() || rt.nullable)
            }
            _ => false,
        }
    }

    pub(crate) fn to_vmval(self) -> VMVal {
        match self {
            Val::I32(v) => VMVal::i32(v),
            Val::I64(v) => VMVal::i64(v),
            Val::F32(bits) => VMVal::f32(bits),
            Val::F64(bits) => VMVal::f64(bits),
            Val::V128(v) => VMVal::v128(v),
            Val::FuncRef(None) | Val::ExternRef(None) | Val::HeapRef(None) => {
                VMVal::ref_(refs::NULL)
            }
            Val::FuncRef(Some(f)) => VMVal::ref_(refs::from_handle(f.addr().as_u32())),
            Val::ExternRef(Some(token)) => VMVal::ref_(refs::from_handle(token)),
            Val::HeapRef(Some(bits)) => VMVal::ref_(bits),
        }
    }

    pub(crate) fn from_vmval(store: &Store, raw: VMVal, ty: &ValType) -> Self {
        match ty {
            ValType::I32 => Val::I32(raw.get_i32()),
            ValType::I64 => Val::I64(raw.get_i64()),
            ValType::F32 => Val::F32(raw.get_f32_bits()),
            ValType::F64 => Val::F64(raw.get_f64_bits()),
            ValType::V128 => Val::V128(raw.get_v128()),
            ValType::Ref(rt) => {
                let bits = raw.get_ref();
                if refs::is_null(bits) {
                    return Val::default_for(ty);
                }
                match rt.heap {
                    HeapType::Func | HeapType::NoFunc => Val::FuncRef(Some(Func::from_addr(
                        FuncAddr::from_u32(refs::to_handle(bits)),
                    ))),
                    HeapType::Extern | HeapType::NoExtern if !refs::is_i31(bits) => {
                        Val::ExternRef(Some(refs::to_handle(bits)))
                    }
                    // A concrete function type also surfaces as `FuncRef`;
                    // concrete struct/array types stay opaque.
                    HeapType::Concrete(idx)
                        if !refs::is_i31(bits)
                            && idx
                                .shared()
                                .is_some_and(|s| store.types().get(s).composite.inner.is_func()) =>
                    {
                        Val::FuncRef(Some(Func::from_addr(FuncAddr::from_u32(refs::to_handle(
                            bits,
                        )))))
                    }
                    _ => Val::HeapRef(Some(bits)),
                }
            }
        }
    }
}

impl From<i32> for Val {
    #[inline]
    fn from(val: i32) -> Val {
        Val::I32(val)
    }
}

impl From<i64> for Val {
    #[inline]
    fn from(val: i64) -> Val {
        Val::I64(val)
    }
}

impl From<f32> for Val {
    #[inline]
    fn from(val: f32) -> Val {
        Val::F32(val.to_bits())
    }
}

impl From<f64> for Val {
    #[inline]
    fn from(val: f64) -> Val {
        Val::F64(val.to_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_little_endian_in_the_low_bytes() {
        assert_eq!(VMVal::i32(-1).get_i32(), -1);
        assert_eq!(VMVal::i32(-1).get_u64(), 0xffff_ffff_ffff_ffff);
        assert_eq!(VMVal::u32(0xdead_beef).get_u64(), 0xdead_beef);
        assert_eq!(VMVal::v128(u128::MAX).get_v128(), u128::MAX);
    }

    #[test]
    fn i31_packing_round_trips() {
        for v in [0, 1, -1, 0x3fff_ffff, -0x4000_0000] {
            let bits = refs::from_i31(v);
            assert!(refs::is_i31(bits));
            assert!(!refs::is_null(bits));
            assert_eq!(refs::i31_get_s(bits), v);
        }
        assert_eq!(refs::i31_get_u(refs::from_i31(-1)), 0x7fff_ffff);
    }

    #[test]
    fn handles_shift_off_null() {
        let bits = refs::from_handle(0);
        assert!(!refs::is_null(bits));
        assert_eq!(refs::to_handle(bits), 0);
    }
}
