//! Conversions from `wasmparser`'s type grammar into the runtime's own.
//!
//! Concrete heap-type references come out of the parser as module-local
//! indices and stay module-local here ([`CanonicalIndex::Module`]); they are
//! canonicalized into shared indices when the module's types are registered
//! with a store.

use crate::indices::TypeIndex;
use crate::types::{
    ArrayType, CanonicalIndex, CompositeInnerType, CompositeType, FieldType, FuncType, HeapType,
    RefType, StorageType, StructType, SubType, ValType,
};
use crate::wasm_unsupported;

pub(crate) fn convert_valtype(ty: wasmparser::ValType) -> ValType {
    match ty {
        wasmparser::ValType::I32 => ValType::I32,
        wasmparser::ValType::I64 => ValType::I64,
        wasmparser::ValType::F32 => ValType::F32,
        wasmparser::ValType::F64 => ValType::F64,
        wasmparser::ValType::V128 => ValType::V128,
        wasmparser::ValType::Ref(rt) => ValType::Ref(convert_reftype(rt)),
    }
}

pub(crate) fn convert_reftype(ty: wasmparser::RefType) -> RefType {
    RefType {
        nullable: ty.is_nullable(),
        heap: convert_heaptype(ty.heap_type()),
    }
}

pub(crate) fn convert_heaptype(ty: wasmparser::HeapType) -> HeapType {
    use wasmparser::AbstractHeapType;
    match ty {
        wasmparser::HeapType::Abstract { ty, .. } => match ty {
            AbstractHeapType::Func => HeapType::Func,
            AbstractHeapType::NoFunc => HeapType::NoFunc,
            AbstractHeapType::Extern => HeapType::Extern,
            AbstractHeapType::NoExtern => HeapType::NoExtern,
            AbstractHeapType::Any => HeapType::Any,
            AbstractHeapType::Eq => HeapType::Eq,
            AbstractHeapType::I31 => HeapType::I31,
            AbstractHeapType::Struct => HeapType::Struct,
            AbstractHeapType::Array => HeapType::Array,
            AbstractHeapType::None => HeapType::None,
            AbstractHeapType::Exn => HeapType::Exn,
            AbstractHeapType::NoExn => HeapType::NoExn,
            AbstractHeapType::Cont | AbstractHeapType::NoCont => {
                unreachable!("continuations are never enabled")
            }
        },
        wasmparser::HeapType::Concrete(index) => HeapType::Concrete(CanonicalIndex::Module(
            TypeIndex::from_u32(index.as_module_index().expect("unresolved type index")),
        )),
    }
}

pub(crate) fn convert_func_type(ty: &wasmparser::FuncType) -> FuncType {
    FuncType {
        params: ty.params().iter().copied().map(convert_valtype).collect(),
        results: ty.results().iter().copied().map(convert_valtype).collect(),
    }
}

fn convert_storage_type(ty: wasmparser::StorageType) -> StorageType {
    match ty {
        wasmparser::StorageType::I8 => StorageType::I8,
        wasmparser::StorageType::I16 => StorageType::I16,
        wasmparser::StorageType::Val(v) => StorageType::Val(convert_valtype(v)),
    }
}

fn convert_field_type(ty: wasmparser::FieldType) -> FieldType {
    FieldType {
        mutable: ty.mutable,
        storage: convert_storage_type(ty.element_type),
    }
}

pub(crate) fn convert_subtype(ty: &wasmparser::SubType) -> crate::Result<SubType> {
    let inner = match &ty.composite_type.inner {
        wasmparser::CompositeInnerType::Func(f) => CompositeInnerType::Func(convert_func_type(f)),
        wasmparser::CompositeInnerType::Array(a) => {
            CompositeInnerType::Array(ArrayType(convert_field_type(a.0)))
        }
        wasmparser::CompositeInnerType::Struct(s) => CompositeInnerType::Struct(StructType {
            fields: s.fields.iter().copied().map(convert_field_type).collect(),
        }),
        wasmparser::CompositeInnerType::Cont(_) => {
            return Err(wasm_unsupported!("continuation types"))
        }
    };

    Ok(SubType {
        is_final: ty.is_final,
        supertype: ty.supertype_idx.map(|idx| {
            CanonicalIndex::Module(TypeIndex::from_u32(
                idx.as_module_index().expect("unresolved supertype index"),
            ))
        }),
        composite: CompositeType {
            shared: ty.composite_type.shared,
            inner,
        },
    })
}
