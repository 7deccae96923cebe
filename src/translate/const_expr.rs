use crate::indices::{FuncIndex, GlobalIndex, TypeIndex};
use crate::wasm_unsupported;
use smallvec::SmallVec;

/// A WebAssembly constant expression.
///
/// This is the subset of instructions used to initialize globals, tables,
/// element segments and data segment offsets. Constant expressions are pure:
/// they may read imported immutable globals and allocate GC objects, but
/// nothing else.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ConstExpr {
    ops: SmallVec<[ConstOp; 2]>,
}

impl ConstExpr {
    /// Converts a `wasmparser::ConstExpr` into a `ConstExpr`.
    pub fn from_wasmparser(expr: wasmparser::ConstExpr<'_>) -> crate::Result<Self> {
        let mut iter = expr
            .get_operators_reader()
            .into_iter_with_offsets()
            .peekable();

        let mut ops = SmallVec::<[ConstOp; 2]>::new();
        while let Some(res) = iter.next() {
            let (op, offset) = res?;

            // A const expression is terminated by a single trailing `end`.
            if matches!(op, wasmparser::Operator::End) && iter.peek().is_none() {
                break;
            }

            ops.push(ConstOp::from_wasmparser(op, offset)?);
        }

        Ok(Self { ops })
    }

    pub(crate) fn ops(&self) -> impl ExactSizeIterator<Item = ConstOp> + '_ {
        self.ops.iter().copied()
    }

    /// All functions referenced by `ref.func` ops in this expression.
    pub(crate) fn referenced_funcs(&self) -> impl Iterator<Item = FuncIndex> + '_ {
        self.ops.iter().filter_map(|op| match op {
            ConstOp::RefFunc(f) => Some(*f),
            _ => None,
        })
    }
}

/// A constant operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ConstOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    V128Const([u8; 16]),
    RefI31,
    RefNull,
    RefFunc(FuncIndex),
    GlobalGet(GlobalIndex),
    // Defined by the extended const proposal.
    I32Add,
    I32Sub,
    I32Mul,
    I64Add,
    I64Sub,
    I64Mul,
    // GC constructors.
    StructNew(TypeIndex),
    StructNewDefault(TypeIndex),
    ArrayNew(TypeIndex),
    ArrayNewDefault(TypeIndex),
    ArrayNewFixed { type_index: TypeIndex, len: u32 },
    AnyConvertExtern,
    ExternConvertAny,
}

impl ConstOp {
    /// Converts a `wasmparser::Operator` into a `ConstOp`.
    fn from_wasmparser(op: wasmparser::Operator, offset: usize) -> crate::Result<Self> {
        use wasmparser::Operator;
        match op {
            Operator::I32Const { value } => Ok(Self::I32Const(value)),
            Operator::I64Const { value } => Ok(Self::I64Const(value)),
            Operator::F32Const { value } => Ok(Self::F32Const(value.bits())),
            Operator::F64Const { value } => Ok(Self::F64Const(value.bits())),
            Operator::V128Const { value } => Ok(Self::V128Const(*value.bytes())),
            Operator::RefI31 => Ok(Self::RefI31),
            Operator::RefNull { .. } => Ok(Self::RefNull),
            Operator::RefFunc { function_index } => {
                Ok(Self::RefFunc(FuncIndex::from_u32(function_index)))
            }
            Operator::GlobalGet { global_index } => {
                Ok(Self::GlobalGet(GlobalIndex::from_u32(global_index)))
            }
            Operator::I32Add => Ok(Self::I32Add),
            Operator::I32Sub => Ok(Self::I32Sub),
            Operator::I32Mul => Ok(Self::I32Mul),
            Operator::I64Add => Ok(Self::I64Add),
            Operator::I64Sub => Ok(Self::I64Sub),
            Operator::I64Mul => Ok(Self::I64Mul),
            Operator::StructNew { struct_type_index } => {
                Ok(Self::StructNew(TypeIndex::from_u32(struct_type_index)))
            }
            Operator::StructNewDefault { struct_type_index } => Ok(Self::StructNewDefault(
                TypeIndex::from_u32(struct_type_index),
            )),
            Operator::ArrayNew { array_type_index } => {
                Ok(Self::ArrayNew(TypeIndex::from_u32(array_type_index)))
            }
            Operator::ArrayNewDefault { array_type_index } => {
                Ok(Self::ArrayNewDefault(TypeIndex::from_u32(array_type_index)))
            }
            Operator::ArrayNewFixed {
                array_type_index,
                array_size,
            } => Ok(Self::ArrayNewFixed {
                type_index: TypeIndex::from_u32(array_type_index),
                len: array_size,
            }),
            Operator::AnyConvertExtern => Ok(Self::AnyConvertExtern),
            Operator::ExternConvertAny => Ok(Self::ExternConvertAny),
            _ => Err(wasm_unsupported!(
                "unsupported opcode in const expression at offset {offset:#x}: {op:?}",
            )),
        }
    }
}
