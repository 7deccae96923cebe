//! The 0xFD prefix: the full v128 instruction set.
//!
//! Vectors are carried as `u128` and split into lane arrays per shape at
//! each operation. Float lanes canonicalize NaN results the same way the
//! scalar ops do, one quiet pattern per width.

use super::code::CodeReader;
use super::exec::{canon32, canon64, fmax32, fmax64, fmin32, fmin64};
use super::Vm;
use crate::indices::InstanceHandle;
use crate::store::Store;
use crate::trap::Trap;
use crate::values::VMVal;

macro_rules! lanes {
    ($split:ident, $join:ident, $ty:ty, $n:expr, $w:expr) => {
        #[inline]
        fn $split(v: u128) -> [$ty; $n] {
            let bytes = v.to_le_bytes();
            core::array::from_fn(|i| {
                <$ty>::from_le_bytes(bytes[i * $w..(i + 1) * $w].try_into().unwrap())
            })
        }
        #[inline]
        fn $join(lanes: [$ty; $n]) -> u128 {
            let mut bytes = [0u8; 16];
            for (i, lane) in lanes.iter().enumerate() {
                bytes[i * $w..(i + 1) * $w].copy_from_slice(&lane.to_le_bytes());
            }
            u128::from_le_bytes(bytes)
        }
    };
}

lanes!(i8x16, from_i8x16, i8, 16, 1);
lanes!(u8x16, from_u8x16, u8, 16, 1);
lanes!(i16x8, from_i16x8, i16, 8, 2);
lanes!(u16x8, from_u16x8, u16, 8, 2);
lanes!(i32x4, from_i32x4, i32, 4, 4);
lanes!(u32x4, from_u32x4, u32, 4, 4);
lanes!(i64x2, from_i64x2, i64, 2, 8);
lanes!(u64x2, from_u64x2, u64, 2, 8);
lanes!(f32x4, from_f32x4, f32, 4, 4);
lanes!(f64x2, from_f64x2, f64, 2, 8);

macro_rules! vmap {
    ($vm:ident, $split:ident, $join:ident, $f:expr) => {{
        let a = $split($vm.pop().get_v128());
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::v128($join(core::array::from_fn(|i| ($f)(a[i])))))?;
    }};
}

macro_rules! vzip {
    ($vm:ident, $split:ident, $join:ident, $f:expr) => {{
        let b = $split($vm.pop().get_v128());
        let a = $split($vm.pop().get_v128());
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::v128($join(core::array::from_fn(|i| {
            ($f)(a[i], b[i])
        }))))?;
    }};
}

macro_rules! vcmp {
    ($vm:ident, $split:ident, $join:ident, $mty:ty, $f:expr) => {{
        let b = $split($vm.pop().get_v128());
        let a = $split($vm.pop().get_v128());
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::v128($join(core::array::from_fn(|i| {
            if ($f)(a[i], b[i]) {
                <$mty>::MAX
            } else {
                0
            }
        }))))?;
    }};
}

macro_rules! vshift {
    ($vm:ident, $split:ident, $join:ident, $bits:expr, $f:expr) => {{
        let count = $vm.pop().get_u32() % $bits;
        let a = $split($vm.pop().get_v128());
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::v128($join(core::array::from_fn(|i| {
            ($f)(a[i], count)
        }))))?;
    }};
}

macro_rules! vsplat {
    ($vm:ident, $join:ident, $get:ident, $cvt:expr) => {{
        let x = $vm.pop().$get();
        #[allow(clippy::redundant_closure_call)]
        let lane = ($cvt)(x);
        $vm.push(VMVal::v128($join(core::array::from_fn(|_| lane))))?;
    }};
}

macro_rules! extract {
    ($vm:ident, $r:ident, $split:ident, $mk:ident, $cvt:expr) => {{
        let lane = $r.u8() as usize;
        let a = $split($vm.pop().get_v128());
        #[allow(clippy::redundant_closure_call)]
        $vm.push(VMVal::$mk(($cvt)(a[lane])))?;
    }};
}

macro_rules! replace {
    ($vm:ident, $r:ident, $split:ident, $join:ident, $get:ident, $cvt:expr) => {{
        let lane = $r.u8() as usize;
        let x = $vm.pop().$get();
        let mut a = $split($vm.pop().get_v128());
        #[allow(clippy::redundant_closure_call)]
        {
            a[lane] = ($cvt)(x);
        }
        $vm.push(VMVal::v128($join(a)))?;
    }};
}

impl Vm {
    pub(super) fn step_simd(
        &mut self,
        store: &mut Store,
        instance: InstanceHandle,
        r: &mut CodeReader<'_>,
    ) -> Result<(), Trap> {
        match r.var_u32() {
            0 => {
                // v128.load
                let arg = r.memarg();
                let v = self.load_bytes::<16>(store, instance, &arg)?;
                self.push(VMVal::v128(u128::from_le_bytes(v)))?;
            }
            sub @ 1..=6 => {
                // v128.load8x8 / 16x4 / 32x2, signed and unsigned: load 8
                // bytes, widen each half-width lane.
                let arg = r.memarg();
                let v = self.load_bytes::<8>(store, instance, &arg)?;
                let out = match sub {
                    1 => from_i16x8(core::array::from_fn(|i| i16::from(v[i] as i8))),
                    2 => from_u16x8(core::array::from_fn(|i| u16::from(v[i]))),
                    3 => from_i32x4(core::array::from_fn(|i| {
                        i32::from(i16::from_le_bytes([v[2 * i], v[2 * i + 1]]))
                    })),
                    4 => from_u32x4(core::array::from_fn(|i| {
                        u32::from(u16::from_le_bytes([v[2 * i], v[2 * i + 1]]))
                    })),
                    5 => from_i64x2(core::array::from_fn(|i| {
                        i64::from(i32::from_le_bytes(v[4 * i..4 * i + 4].try_into().unwrap()))
                    })),
                    _ => from_u64x2(core::array::from_fn(|i| {
                        u64::from(u32::from_le_bytes(v[4 * i..4 * i + 4].try_into().unwrap()))
                    })),
                };
                self.push(VMVal::v128(out))?;
            }
            7 => {
                let arg = r.memarg();
                let v = self.load_bytes::<1>(store, instance, &arg)?;
                self.push(VMVal::v128(from_u8x16([v[0]; 16])))?;
            }
            8 => {
                let arg = r.memarg();
                let v = self.load_bytes::<2>(store, instance, &arg)?;
                self.push(VMVal::v128(from_u16x8([u16::from_le_bytes(v); 8])))?;
            }
            9 => {
                let arg = r.memarg();
                let v = self.load_bytes::<4>(store, instance, &arg)?;
                self.push(VMVal::v128(from_u32x4([u32::from_le_bytes(v); 4])))?;
            }
            10 => {
                let arg = r.memarg();
                let v = self.load_bytes::<8>(store, instance, &arg)?;
                self.push(VMVal::v128(from_u64x2([u64::from_le_bytes(v); 2])))?;
            }
            11 => {
                // v128.store
                let arg = r.memarg();
                let v = self.pop().get_v128().to_le_bytes();
                self.store_bytes(store, instance, &arg, &v)?;
            }
            12 => {
                let v = r.bytes16();
                self.push(VMVal::v128(u128::from_le_bytes(v)))?;
            }
            13 => {
                // i8x16.shuffle: pick from the 32 concatenated source bytes.
                let imm = r.bytes16();
                let b = u8x16(self.pop().get_v128());
                let a = u8x16(self.pop().get_v128());
                let out: [u8; 16] = core::array::from_fn(|i| {
                    let j = imm[i] as usize;
                    if j < 16 {
                        a[j]
                    } else {
                        b[j - 16]
                    }
                });
                self.push(VMVal::v128(from_u8x16(out)))?;
            }
            14 => {
                // i8x16.swizzle: out-of-range selectors produce zero.
                let s = u8x16(self.pop().get_v128());
                let a = u8x16(self.pop().get_v128());
                let out: [u8; 16] =
                    core::array::from_fn(|i| a.get(s[i] as usize).copied().unwrap_or(0));
                self.push(VMVal::v128(from_u8x16(out)))?;
            }

            15 => vsplat!(self, from_u8x16, get_u32, |x: u32| x as u8),
            16 => vsplat!(self, from_u16x8, get_u32, |x: u32| x as u16),
            17 => vsplat!(self, from_u32x4, get_u32, |x: u32| x),
            18 => vsplat!(self, from_u64x2, get_u64, |x: u64| x),
            19 => vsplat!(self, from_f32x4, get_f32, |x: f32| x),
            20 => vsplat!(self, from_f64x2, get_f64, |x: f64| x),

            21 => extract!(self, r, i8x16, i32, |x: i8| i32::from(x)),
            22 => extract!(self, r, u8x16, u32, |x: u8| u32::from(x)),
            23 => replace!(self, r, u8x16, from_u8x16, get_u32, |x: u32| x as u8),
            24 => extract!(self, r, i16x8, i32, |x: i16| i32::from(x)),
            25 => extract!(self, r, u16x8, u32, |x: u16| u32::from(x)),
            26 => replace!(self, r, u16x8, from_u16x8, get_u32, |x: u32| x as u16),
            27 => extract!(self, r, i32x4, i32, |x: i32| x),
            28 => replace!(self, r, i32x4, from_i32x4, get_i32, |x: i32| x),
            29 => extract!(self, r, i64x2, i64, |x: i64| x),
            30 => replace!(self, r, i64x2, from_i64x2, get_i64, |x: i64| x),
            31 => extract!(self, r, f32x4, f32, |x: f32| x.to_bits()),
            32 => replace!(self, r, f32x4, from_f32x4, get_f32, |x: f32| x),
            33 => extract!(self, r, f64x2, f64, |x: f64| x.to_bits()),
            34 => replace!(self, r, f64x2, from_f64x2, get_f64, |x: f64| x),

            // i8x16 comparisons.
            35 => vcmp!(self, i8x16, from_u8x16, u8, |a, b| a == b),
            36 => vcmp!(self, i8x16, from_u8x16, u8, |a, b| a != b),
            37 => vcmp!(self, i8x16, from_u8x16, u8, |a, b| a < b),
            38 => vcmp!(self, u8x16, from_u8x16, u8, |a, b| a < b),
            39 => vcmp!(self, i8x16, from_u8x16, u8, |a, b| a > b),
            40 => vcmp!(self, u8x16, from_u8x16, u8, |a, b| a > b),
            41 => vcmp!(self, i8x16, from_u8x16, u8, |a, b| a <= b),
            42 => vcmp!(self, u8x16, from_u8x16, u8, |a, b| a <= b),
            43 => vcmp!(self, i8x16, from_u8x16, u8, |a, b| a >= b),
            44 => vcmp!(self, u8x16, from_u8x16, u8, |a, b| a >= b),

            // i16x8 comparisons.
            45 => vcmp!(self, i16x8, from_u16x8, u16, |a, b| a == b),
            46 => vcmp!(self, i16x8, from_u16x8, u16, |a, b| a != b),
            47 => vcmp!(self, i16x8, from_u16x8, u16, |a, b| a < b),
            48 => vcmp!(self, u16x8, from_u16x8, u16, |a, b| a < b),
            49 => vcmp!(self, i16x8, from_u16x8, u16, |a, b| a > b),
            50 => vcmp!(self, u16x8, from_u16x8, u16, |a, b| a > b),
            51 => vcmp!(self, i16x8, from_u16x8, u16, |a, b| a <= b),
            52 => vcmp!(self, u16x8, from_u16x8, u16, |a, b| a <= b),
            53 => vcmp!(self, i16x8, from_u16x8, u16, |a, b| a >= b),
            54 => vcmp!(self, u16x8, from_u16x8, u16, |a, b| a >= b),

            // i32x4 comparisons.
            55 => vcmp!(self, i32x4, from_u32x4, u32, |a, b| a == b),
            56 => vcmp!(self, i32x4, from_u32x4, u32, |a, b| a != b),
            57 => vcmp!(self, i32x4, from_u32x4, u32, |a, b| a < b),
            58 => vcmp!(self, u32x4, from_u32x4, u32, |a, b| a < b),
            59 => vcmp!(self, i32x4, from_u32x4, u32, |a, b| a > b),
            60 => vcmp!(self, u32x4, from_u32x4, u32, |a, b| a > b),
            61 => vcmp!(self, i32x4, from_u32x4, u32, |a, b| a <= b),
            62 => vcmp!(self, u32x4, from_u32x4, u32, |a, b| a <= b),
            63 => vcmp!(self, i32x4, from_u32x4, u32, |a, b| a >= b),
            64 => vcmp!(self, u32x4, from_u32x4, u32, |a, b| a >= b),

            // Float comparisons.
            65 => vcmp!(self, f32x4, from_u32x4, u32, |a, b| a == b),
            66 => vcmp!(self, f32x4, from_u32x4, u32, |a, b| a != b),
            67 => vcmp!(self, f32x4, from_u32x4, u32, |a, b| a < b),
            68 => vcmp!(self, f32x4, from_u32x4, u32, |a, b| a > b),
            69 => vcmp!(self, f32x4, from_u32x4, u32, |a, b| a <= b),
            70 => vcmp!(self, f32x4, from_u32x4, u32, |a, b| a >= b),
            71 => vcmp!(self, f64x2, from_u64x2, u64, |a, b| a == b),
            72 => vcmp!(self, f64x2, from_u64x2, u64, |a, b| a != b),
            73 => vcmp!(self, f64x2, from_u64x2, u64, |a, b| a < b),
            74 => vcmp!(self, f64x2, from_u64x2, u64, |a, b| a > b),
            75 => vcmp!(self, f64x2, from_u64x2, u64, |a, b| a <= b),
            76 => vcmp!(self, f64x2, from_u64x2, u64, |a, b| a >= b),

            // Bitwise.
            77 => {
                let a = self.pop().get_v128();
                self.push(VMVal::v128(!a))?;
            }
            78 => {
                let b = self.pop().get_v128();
                let a = self.pop().get_v128();
                self.push(VMVal::v128(a & b))?;
            }
            79 => {
                let b = self.pop().get_v128();
                let a = self.pop().get_v128();
                self.push(VMVal::v128(a & !b))?;
            }
            80 => {
                let b = self.pop().get_v128();
                let a = self.pop().get_v128();
                self.push(VMVal::v128(a | b))?;
            }
            81 => {
                let b = self.pop().get_v128();
                let a = self.pop().get_v128();
                self.push(VMVal::v128(a ^ b))?;
            }
            82 => {
                // bitselect
                let c = self.pop().get_v128();
                let b = self.pop().get_v128();
                let a = self.pop().get_v128();
                self.push(VMVal::v128((a & c) | (b & !c)))?;
            }
            83 => {
                let a = self.pop().get_v128();
                self.push(VMVal::i32(i32::from(a != 0)))?;
            }

            // Lane-wise loads and stores. The vector rides on top of the
            // address, so it comes off first.
            sub @ 84..=87 => {
                let arg = r.memarg();
                let lane = r.u8() as usize;
                let vec = self.pop().get_v128();
                match sub {
                    84 => {
                        let v = self.load_bytes::<1>(store, instance, &arg)?;
                        let mut a = u8x16(vec);
                        a[lane] = v[0];
                        self.push(VMVal::v128(from_u8x16(a)))?;
                    }
                    85 => {
                        let v = self.load_bytes::<2>(store, instance, &arg)?;
                        let mut a = u16x8(vec);
                        a[lane] = u16::from_le_bytes(v);
                        self.push(VMVal::v128(from_u16x8(a)))?;
                    }
                    86 => {
                        let v = self.load_bytes::<4>(store, instance, &arg)?;
                        let mut a = u32x4(vec);
                        a[lane] = u32::from_le_bytes(v);
                        self.push(VMVal::v128(from_u32x4(a)))?;
                    }
                    _ => {
                        let v = self.load_bytes::<8>(store, instance, &arg)?;
                        let mut a = u64x2(vec);
                        a[lane] = u64::from_le_bytes(v);
                        self.push(VMVal::v128(from_u64x2(a)))?;
                    }
                }
            }
            sub @ 88..=91 => {
                let arg = r.memarg();
                let vec = self.pop().get_v128();
                let lane = r.u8() as usize;
                match sub {
                    88 => {
                        self.store_bytes(store, instance, &arg, &[u8x16(vec)[lane]])?;
                    }
                    89 => self.store_bytes(
                        store,
                        instance,
                        &arg,
                        &u16x8(vec)[lane].to_le_bytes(),
                    )?,
                    90 => self.store_bytes(
                        store,
                        instance,
                        &arg,
                        &u32x4(vec)[lane].to_le_bytes(),
                    )?,
                    _ => self.store_bytes(
                        store,
                        instance,
                        &arg,
                        &u64x2(vec)[lane].to_le_bytes(),
                    )?,
                }
            }
            92 => {
                let arg = r.memarg();
                let v = self.load_bytes::<4>(store, instance, &arg)?;
                self.push(VMVal::v128(u128::from(u32::from_le_bytes(v))))?;
            }
            93 => {
                let arg = r.memarg();
                let v = self.load_bytes::<8>(store, instance, &arg)?;
                self.push(VMVal::v128(u128::from(u64::from_le_bytes(v))))?;
            }

            94 => {
                // f32x4.demote_f64x2_zero
                let a = f64x2(self.pop().get_v128());
                let out = [
                    f32::from_bits(canon32(a[0] as f32)),
                    f32::from_bits(canon32(a[1] as f32)),
                    0.0,
                    0.0,
                ];
                self.push(VMVal::v128(from_f32x4(out)))?;
            }
            95 => {
                // f64x2.promote_low_f32x4
                let a = f32x4(self.pop().get_v128());
                let out = [
                    f64::from_bits(canon64(f64::from(a[0]))),
                    f64::from_bits(canon64(f64::from(a[1]))),
                ];
                self.push(VMVal::v128(from_f64x2(out)))?;
            }

            // i8x16 unary and arithmetic.
            96 => vmap!(self, i8x16, from_i8x16, |a: i8| a.wrapping_abs()),
            97 => vmap!(self, i8x16, from_i8x16, |a: i8| a.wrapping_neg()),
            98 => vmap!(self, u8x16, from_u8x16, |a: u8| a.count_ones() as u8),
            99 => {
                let a = u8x16(self.pop().get_v128());
                self.push(VMVal::i32(i32::from(a.iter().all(|&x| x != 0))))?;
            }
            100 => {
                let a = i8x16(self.pop().get_v128());
                let mut mask = 0u32;
                for (i, lane) in a.iter().enumerate() {
                    mask |= u32::from(*lane < 0) << i;
                }
                self.push(VMVal::u32(mask))?;
            }
            101 => {
                // i8x16.narrow_i16x8_s
                let b = i16x8(self.pop().get_v128());
                let a = i16x8(self.pop().get_v128());
                let out: [i8; 16] = core::array::from_fn(|i| {
                    let x = if i < 8 { a[i] } else { b[i - 8] };
                    x.clamp(-128, 127) as i8
                });
                self.push(VMVal::v128(from_i8x16(out)))?;
            }
            102 => {
                let b = i16x8(self.pop().get_v128());
                let a = i16x8(self.pop().get_v128());
                let out: [u8; 16] = core::array::from_fn(|i| {
                    let x = if i < 8 { a[i] } else { b[i - 8] };
                    x.clamp(0, 255) as u8
                });
                self.push(VMVal::v128(from_u8x16(out)))?;
            }

            103 => vmap!(self, f32x4, from_f32x4, |a: f32| f32::from_bits(canon32(
                a.ceil()
            ))),
            104 => vmap!(self, f32x4, from_f32x4, |a: f32| f32::from_bits(canon32(
                a.floor()
            ))),
            105 => vmap!(self, f32x4, from_f32x4, |a: f32| f32::from_bits(canon32(
                a.trunc()
            ))),
            106 => vmap!(self, f32x4, from_f32x4, |a: f32| f32::from_bits(canon32(
                a.round_ties_even()
            ))),

            107 => vshift!(self, u8x16, from_u8x16, 8, |a: u8, c| a.wrapping_shl(c)),
            108 => vshift!(self, i8x16, from_i8x16, 8, |a: i8, c| a.wrapping_shr(c)),
            109 => vshift!(self, u8x16, from_u8x16, 8, |a: u8, c| a.wrapping_shr(c)),
            110 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| a.wrapping_add(b)),
            111 => vzip!(self, i8x16, from_i8x16, |a: i8, b: i8| a.saturating_add(b)),
            112 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| a.saturating_add(b)),
            113 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| a.wrapping_sub(b)),
            114 => vzip!(self, i8x16, from_i8x16, |a: i8, b: i8| a.saturating_sub(b)),
            115 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| a.saturating_sub(b)),

            116 => vmap!(self, f64x2, from_f64x2, |a: f64| f64::from_bits(canon64(
                a.ceil()
            ))),
            117 => vmap!(self, f64x2, from_f64x2, |a: f64| f64::from_bits(canon64(
                a.floor()
            ))),

            118 => vzip!(self, i8x16, from_i8x16, |a: i8, b: i8| a.min(b)),
            119 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| a.min(b)),
            120 => vzip!(self, i8x16, from_i8x16, |a: i8, b: i8| a.max(b)),
            121 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| a.max(b)),

            122 => vmap!(self, f64x2, from_f64x2, |a: f64| f64::from_bits(canon64(
                a.trunc()
            ))),

            123 => vzip!(self, u8x16, from_u8x16, |a: u8, b: u8| {
                ((u16::from(a) + u16::from(b) + 1) / 2) as u8
            }),

            124 => {
                // i16x8.extadd_pairwise_i8x16_s
                let a = i8x16(self.pop().get_v128());
                let out: [i16; 8] =
                    core::array::from_fn(|i| i16::from(a[2 * i]) + i16::from(a[2 * i + 1]));
                self.push(VMVal::v128(from_i16x8(out)))?;
            }
            125 => {
                let a = u8x16(self.pop().get_v128());
                let out: [u16; 8] =
                    core::array::from_fn(|i| u16::from(a[2 * i]) + u16::from(a[2 * i + 1]));
                self.push(VMVal::v128(from_u16x8(out)))?;
            }
            126 => {
                let a = i16x8(self.pop().get_v128());
                let out: [i32; 4] =
                    core::array::from_fn(|i| i32::from(a[2 * i]) + i32::from(a[2 * i + 1]));
                self.push(VMVal::v128(from_i32x4(out)))?;
            }
            127 => {
                let a = u16x8(self.pop().get_v128());
                let out: [u32; 4] =
                    core::array::from_fn(|i| u32::from(a[2 * i]) + u32::from(a[2 * i + 1]));
                self.push(VMVal::v128(from_u32x4(out)))?;
            }

            // i16x8.
            128 => vmap!(self, i16x8, from_i16x8, |a: i16| a.wrapping_abs()),
            129 => vmap!(self, i16x8, from_i16x8, |a: i16| a.wrapping_neg()),
            130 => vzip!(self, i16x8, from_i16x8, |a: i16, b: i16| {
                // q15mulr_sat_s
                let product = (i32::from(a) * i32::from(b) + 0x4000) >> 15;
                product.clamp(-32768, 32767) as i16
            }),
            131 => {
                let a = u16x8(self.pop().get_v128());
                self.push(VMVal::i32(i32::from(a.iter().all(|&x| x != 0))))?;
            }
            132 => {
                let a = i16x8(self.pop().get_v128());
                let mut mask = 0u32;
                for (i, lane) in a.iter().enumerate() {
                    mask |= u32::from(*lane < 0) << i;
                }
                self.push(VMVal::u32(mask))?;
            }
            133 => {
                let b = i32x4(self.pop().get_v128());
                let a = i32x4(self.pop().get_v128());
                let out: [i16; 8] = core::array::from_fn(|i| {
                    let x = if i < 4 { a[i] } else { b[i - 4] };
                    x.clamp(-32768, 32767) as i16
                });
                self.push(VMVal::v128(from_i16x8(out)))?;
            }
            134 => {
                let b = i32x4(self.pop().get_v128());
                let a = i32x4(self.pop().get_v128());
                let out: [u16; 8] = core::array::from_fn(|i| {
                    let x = if i < 4 { a[i] } else { b[i - 4] };
                    x.clamp(0, 65535) as u16
                });
                self.push(VMVal::v128(from_u16x8(out)))?;
            }
            135 => {
                let a = i8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_i16x8(core::array::from_fn(|i| {
                    i16::from(a[i])
                }))))?;
            }
            136 => {
                let a = i8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_i16x8(core::array::from_fn(|i| {
                    i16::from(a[i + 8])
                }))))?;
            }
            137 => {
                let a = u8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_u16x8(core::array::from_fn(|i| {
                    u16::from(a[i])
                }))))?;
            }
            138 => {
                let a = u8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_u16x8(core::array::from_fn(|i| {
                    u16::from(a[i + 8])
                }))))?;
            }
            139 => vshift!(self, u16x8, from_u16x8, 16, |a: u16, c| a.wrapping_shl(c)),
            140 => vshift!(self, i16x8, from_i16x8, 16, |a: i16, c| a.wrapping_shr(c)),
            141 => vshift!(self, u16x8, from_u16x8, 16, |a: u16, c| a.wrapping_shr(c)),
            142 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| a.wrapping_add(b)),
            143 => vzip!(self, i16x8, from_i16x8, |a: i16, b: i16| a.saturating_add(b)),
            144 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| a.saturating_add(b)),
            145 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| a.wrapping_sub(b)),
            146 => vzip!(self, i16x8, from_i16x8, |a: i16, b: i16| a.saturating_sub(b)),
            147 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| a.saturating_sub(b)),
            148 => vmap!(self, f64x2, from_f64x2, |a: f64| f64::from_bits(canon64(
                a.round_ties_even()
            ))),
            149 => vzip!(self, i16x8, from_i16x8, |a: i16, b: i16| a.wrapping_mul(b)),
            150 => vzip!(self, i16x8, from_i16x8, |a: i16, b: i16| a.min(b)),
            151 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| a.min(b)),
            152 => vzip!(self, i16x8, from_i16x8, |a: i16, b: i16| a.max(b)),
            153 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| a.max(b)),
            155 => vzip!(self, u16x8, from_u16x8, |a: u16, b: u16| {
                ((u32::from(a) + u32::from(b) + 1) / 2) as u16
            }),
            156 => {
                let b = i8x16(self.pop().get_v128());
                let a = i8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_i16x8(core::array::from_fn(|i| {
                    i16::from(a[i]) * i16::from(b[i])
                }))))?;
            }
            157 => {
                let b = i8x16(self.pop().get_v128());
                let a = i8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_i16x8(core::array::from_fn(|i| {
                    i16::from(a[i + 8]) * i16::from(b[i + 8])
                }))))?;
            }
            158 => {
                let b = u8x16(self.pop().get_v128());
                let a = u8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_u16x8(core::array::from_fn(|i| {
                    u16::from(a[i]) * u16::from(b[i])
                }))))?;
            }
            159 => {
                let b = u8x16(self.pop().get_v128());
                let a = u8x16(self.pop().get_v128());
                self.push(VMVal::v128(from_u16x8(core::array::from_fn(|i| {
                    u16::from(a[i + 8]) * u16::from(b[i + 8])
                }))))?;
            }

            // i32x4.
            160 => vmap!(self, i32x4, from_i32x4, |a: i32| a.wrapping_abs()),
            161 => vmap!(self, i32x4, from_i32x4, |a: i32| a.wrapping_neg()),
            163 => {
                let a = u32x4(self.pop().get_v128());
                self.push(VMVal::i32(i32::from(a.iter().all(|&x| x != 0))))?;
            }
            164 => {
                let a = i32x4(self.pop().get_v128());
                let mut mask = 0u32;
                for (i, lane) in a.iter().enumerate() {
                    mask |= u32::from(*lane < 0) << i;
                }
                self.push(VMVal::u32(mask))?;
            }
            167 => {
                let a = i16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_i32x4(core::array::from_fn(|i| {
                    i32::from(a[i])
                }))))?;
            }
            168 => {
                let a = i16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_i32x4(core::array::from_fn(|i| {
                    i32::from(a[i + 4])
                }))))?;
            }
            169 => {
                let a = u16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_u32x4(core::array::from_fn(|i| {
                    u32::from(a[i])
                }))))?;
            }
            170 => {
                let a = u16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_u32x4(core::array::from_fn(|i| {
                    u32::from(a[i + 4])
                }))))?;
            }
            171 => vshift!(self, u32x4, from_u32x4, 32, |a: u32, c| a.wrapping_shl(c)),
            172 => vshift!(self, i32x4, from_i32x4, 32, |a: i32, c| a.wrapping_shr(c)),
            173 => vshift!(self, u32x4, from_u32x4, 32, |a: u32, c| a.wrapping_shr(c)),
            174 => vzip!(self, u32x4, from_u32x4, |a: u32, b: u32| a.wrapping_add(b)),
            177 => vzip!(self, u32x4, from_u32x4, |a: u32, b: u32| a.wrapping_sub(b)),
            181 => vzip!(self, i32x4, from_i32x4, |a: i32, b: i32| a.wrapping_mul(b)),
            182 => vzip!(self, i32x4, from_i32x4, |a: i32, b: i32| a.min(b)),
            183 => vzip!(self, u32x4, from_u32x4, |a: u32, b: u32| a.min(b)),
            184 => vzip!(self, i32x4, from_i32x4, |a: i32, b: i32| a.max(b)),
            185 => vzip!(self, u32x4, from_u32x4, |a: u32, b: u32| a.max(b)),
            186 => {
                // i32x4.dot_i16x8_s
                let b = i16x8(self.pop().get_v128());
                let a = i16x8(self.pop().get_v128());
                let out: [i32; 4] = core::array::from_fn(|i| {
                    i32::from(a[2 * i]) * i32::from(b[2 * i])
                        + i32::from(a[2 * i + 1]) * i32::from(b[2 * i + 1])
                });
                self.push(VMVal::v128(from_i32x4(out)))?;
            }
            188 => {
                let b = i16x8(self.pop().get_v128());
                let a = i16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_i32x4(core::array::from_fn(|i| {
                    i32::from(a[i]) * i32::from(b[i])
                }))))?;
            }
            189 => {
                let b = i16x8(self.pop().get_v128());
                let a = i16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_i32x4(core::array::from_fn(|i| {
                    i32::from(a[i + 4]) * i32::from(b[i + 4])
                }))))?;
            }
            190 => {
                let b = u16x8(self.pop().get_v128());
                let a = u16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_u32x4(core::array::from_fn(|i| {
                    u32::from(a[i]) * u32::from(b[i])
                }))))?;
            }
            191 => {
                let b = u16x8(self.pop().get_v128());
                let a = u16x8(self.pop().get_v128());
                self.push(VMVal::v128(from_u32x4(core::array::from_fn(|i| {
                    u32::from(a[i + 4]) * u32::from(b[i + 4])
                }))))?;
            }

            // i64x2.
            192 => vmap!(self, i64x2, from_i64x2, |a: i64| a.wrapping_abs()),
            193 => vmap!(self, i64x2, from_i64x2, |a: i64| a.wrapping_neg()),
            195 => {
                let a = u64x2(self.pop().get_v128());
                self.push(VMVal::i32(i32::from(a.iter().all(|&x| x != 0))))?;
            }
            196 => {
                let a = i64x2(self.pop().get_v128());
                let mut mask = 0u32;
                for (i, lane) in a.iter().enumerate() {
                    mask |= u32::from(*lane < 0) << i;
                }
                self.push(VMVal::u32(mask))?;
            }
            199 => {
                let a = i32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_i64x2([
                    i64::from(a[0]),
                    i64::from(a[1]),
                ])))?;
            }
            200 => {
                let a = i32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_i64x2([
                    i64::from(a[2]),
                    i64::from(a[3]),
                ])))?;
            }
            201 => {
                let a = u32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_u64x2([
                    u64::from(a[0]),
                    u64::from(a[1]),
                ])))?;
            }
            202 => {
                let a = u32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_u64x2([
                    u64::from(a[2]),
                    u64::from(a[3]),
                ])))?;
            }
            203 => vshift!(self, u64x2, from_u64x2, 64, |a: u64, c| a.wrapping_shl(c)),
            204 => vshift!(self, i64x2, from_i64x2, 64, |a: i64, c| a.wrapping_shr(c)),
            205 => vshift!(self, u64x2, from_u64x2, 64, |a: u64, c| a.wrapping_shr(c)),
            206 => vzip!(self, u64x2, from_u64x2, |a: u64, b: u64| a.wrapping_add(b)),
            209 => vzip!(self, u64x2, from_u64x2, |a: u64, b: u64| a.wrapping_sub(b)),
            213 => vzip!(self, i64x2, from_i64x2, |a: i64, b: i64| a.wrapping_mul(b)),
            214 => vcmp!(self, i64x2, from_u64x2, u64, |a, b| a == b),
            215 => vcmp!(self, i64x2, from_u64x2, u64, |a, b| a != b),
            216 => vcmp!(self, i64x2, from_u64x2, u64, |a, b| a < b),
            217 => vcmp!(self, i64x2, from_u64x2, u64, |a, b| a > b),
            218 => vcmp!(self, i64x2, from_u64x2, u64, |a, b| a <= b),
            219 => vcmp!(self, i64x2, from_u64x2, u64, |a, b| a >= b),
            220 => {
                let b = i32x4(self.pop().get_v128());
                let a = i32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_i64x2([
                    i64::from(a[0]) * i64::from(b[0]),
                    i64::from(a[1]) * i64::from(b[1]),
                ])))?;
            }
            221 => {
                let b = i32x4(self.pop().get_v128());
                let a = i32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_i64x2([
                    i64::from(a[2]) * i64::from(b[2]),
                    i64::from(a[3]) * i64::from(b[3]),
                ])))?;
            }
            222 => {
                let b = u32x4(self.pop().get_v128());
                let a = u32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_u64x2([
                    u64::from(a[0]) * u64::from(b[0]),
                    u64::from(a[1]) * u64::from(b[1]),
                ])))?;
            }
            223 => {
                let b = u32x4(self.pop().get_v128());
                let a = u32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_u64x2([
                    u64::from(a[2]) * u64::from(b[2]),
                    u64::from(a[3]) * u64::from(b[3]),
                ])))?;
            }

            // f32x4.
            224 => vmap!(self, f32x4, from_f32x4, |a: f32| a.abs()),
            225 => vmap!(self, f32x4, from_f32x4, |a: f32| -a),
            227 => vmap!(self, f32x4, from_f32x4, |a: f32| f32::from_bits(canon32(
                a.sqrt()
            ))),
            228 => vzip!(self, f32x4, from_f32x4, |a: f32, b: f32| f32::from_bits(
                canon32(a + b)
            )),
            229 => vzip!(self, f32x4, from_f32x4, |a: f32, b: f32| f32::from_bits(
                canon32(a - b)
            )),
            230 => vzip!(self, f32x4, from_f32x4, |a: f32, b: f32| f32::from_bits(
                canon32(a * b)
            )),
            231 => vzip!(self, f32x4, from_f32x4, |a: f32, b: f32| f32::from_bits(
                canon32(a / b)
            )),
            232 => vzip!(self, f32x4, from_f32x4, fmin32),
            233 => vzip!(self, f32x4, from_f32x4, fmax32),
            234 => vzip!(self, f32x4, from_f32x4, |a: f32, b: f32| if b < a {
                b
            } else {
                a
            }),
            235 => vzip!(self, f32x4, from_f32x4, |a: f32, b: f32| if a < b {
                b
            } else {
                a
            }),

            // f64x2.
            236 => vmap!(self, f64x2, from_f64x2, |a: f64| a.abs()),
            237 => vmap!(self, f64x2, from_f64x2, |a: f64| -a),
            239 => vmap!(self, f64x2, from_f64x2, |a: f64| f64::from_bits(canon64(
                a.sqrt()
            ))),
            240 => vzip!(self, f64x2, from_f64x2, |a: f64, b: f64| f64::from_bits(
                canon64(a + b)
            )),
            241 => vzip!(self, f64x2, from_f64x2, |a: f64, b: f64| f64::from_bits(
                canon64(a - b)
            )),
            242 => vzip!(self, f64x2, from_f64x2, |a: f64, b: f64| f64::from_bits(
                canon64(a * b)
            )),
            243 => vzip!(self, f64x2, from_f64x2, |a: f64, b: f64| f64::from_bits(
                canon64(a / b)
            )),
            244 => vzip!(self, f64x2, from_f64x2, fmin64),
            245 => vzip!(self, f64x2, from_f64x2, fmax64),
            246 => vzip!(self, f64x2, from_f64x2, |a: f64, b: f64| if b < a {
                b
            } else {
                a
            }),
            247 => vzip!(self, f64x2, from_f64x2, |a: f64, b: f64| if a < b {
                b
            } else {
                a
            }),

            // Conversions. `as` saturates and maps NaN to zero.
            248 => vmap!(self, f32x4, from_i32x4, |a: f32| a as i32),
            249 => vmap!(self, f32x4, from_u32x4, |a: f32| a as u32),
            250 => vmap!(self, i32x4, from_f32x4, |a: i32| a as f32),
            251 => vmap!(self, u32x4, from_f32x4, |a: u32| a as f32),
            252 => {
                let a = f64x2(self.pop().get_v128());
                self.push(VMVal::v128(from_i32x4([
                    a[0] as i32,
                    a[1] as i32,
                    0,
                    0,
                ])))?;
            }
            253 => {
                let a = f64x2(self.pop().get_v128());
                self.push(VMVal::v128(from_u32x4([
                    a[0] as u32,
                    a[1] as u32,
                    0,
                    0,
                ])))?;
            }
            254 => {
                let a = i32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_f64x2([
                    f64::from(a[0]),
                    f64::from(a[1]),
                ])))?;
            }
            255 => {
                let a = u32x4(self.pop().get_v128());
                self.push(VMVal::v128(from_f64x2([
                    f64::from(a[0]),
                    f64::from(a[1]),
                ])))?;
            }

            other => unreachable!("validated simd opcode {other}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_splits_round_trip() {
        let v = 0x0f0e_0d0c_0b0a_0908_0706_0504_0302_0100u128;
        assert_eq!(from_u8x16(u8x16(v)), v);
        assert_eq!(from_i16x8(i16x8(v)), v);
        assert_eq!(from_u32x4(u32x4(v)), v);
        assert_eq!(from_i64x2(i64x2(v)), v);
        assert_eq!(from_f32x4(f32x4(v)), v);
        assert_eq!(from_f64x2(f64x2(v)), v);
        assert_eq!(u8x16(v)[0], 0x00);
        assert_eq!(u8x16(v)[15], 0x0f);
    }
}
