//! The runtime's view of WebAssembly types.
//!
//! Composite types (functions, structs, arrays) are declared in recursion
//! groups and may reference each other by module-local index. For runtime use
//! every group is canonicalized into the store-wide [`TypeRegistry`]:
//! intra-group references are relativized, the group is hash-consed, and each
//! member receives a process-wide [`SharedTypeIndex`]. Signature checks
//! (`call_indirect`, import linking) and GC subtype tests all operate on
//! shared indices, so structurally equal types compare equal across modules.

use crate::enum_accessors;
use crate::indices::{SharedTypeIndex, TypeIndex};
use core::fmt;
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;
use smallvec::SmallVec;

/// The type of a WebAssembly value.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ValType {
    /// A 32-bit integer.
    I32,
    /// A 64-bit integer.
    I64,
    /// A 32-bit float.
    F32,
    /// A 64-bit float.
    F64,
    /// A 128-bit vector.
    V128,
    /// A reference.
    Ref(RefType),
}

impl ValType {
    /// Does this type hold a reference at runtime?
    #[inline]
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_))
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValType::I32 => write!(f, "i32"),
            ValType::I64 => write!(f, "i64"),
            ValType::F32 => write!(f, "f32"),
            ValType::F64 => write!(f, "f64"),
            ValType::V128 => write!(f, "v128"),
            ValType::Ref(rt) => write!(f, "{rt}"),
        }
    }
}

/// A reference type: a heap type plus nullability.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct RefType {
    pub nullable: bool,
    pub heap: HeapType,
}

impl RefType {
    pub const FUNCREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Func,
    };
    pub const EXTERNREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Extern,
    };
    pub const EXNREF: RefType = RefType {
        nullable: true,
        heap: HeapType::Exn,
    };
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::FUNCREF => write!(f, "funcref"),
            Self::EXTERNREF => write!(f, "externref"),
            _ if self.nullable => write!(f, "(ref null {})", self.heap),
            _ => write!(f, "(ref {})", self.heap),
        }
    }
}

/// A heap type, either abstract or a concrete composite type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum HeapType {
    // External types.
    Extern,
    NoExtern,

    // Function types.
    Func,
    NoFunc,

    // Internal types.
    Any,
    Eq,
    I31,
    Struct,
    Array,
    None,

    // Exception types.
    Exn,
    NoExn,

    /// A user-declared function, struct, or array type.
    Concrete(CanonicalIndex),
}

impl fmt::Display for HeapType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeapType::Extern => write!(f, "extern"),
            HeapType::NoExtern => write!(f, "noextern"),
            HeapType::Func => write!(f, "func"),
            HeapType::NoFunc => write!(f, "nofunc"),
            HeapType::Any => write!(f, "any"),
            HeapType::Eq => write!(f, "eq"),
            HeapType::I31 => write!(f, "i31"),
            HeapType::Struct => write!(f, "struct"),
            HeapType::Array => write!(f, "array"),
            HeapType::None => write!(f, "none"),
            HeapType::Exn => write!(f, "exn"),
            HeapType::NoExn => write!(f, "noexn"),
            HeapType::Concrete(idx) => write!(f, "{idx:?}"),
        }
    }
}

/// A reference to another composite type, in one of three progressively more
/// resolved spellings.
///
/// Fresh out of the decoder every reference is `Module` (an index into the
/// module's own type table). For hash-consing, references into the same rec
/// group become `RecLocal` offsets; everything a runtime ever sees is
/// `Shared`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum CanonicalIndex {
    Module(TypeIndex),
    RecLocal(u32),
    Shared(SharedTypeIndex),
}

impl CanonicalIndex {
    enum_accessors! {
        e
        (Module(TypeIndex) is_module module unwrap_module *e)
        (RecLocal(u32) is_rec_local rec_local unwrap_rec_local *e)
        (Shared(SharedTypeIndex) is_shared shared unwrap_shared *e)
    }
}

/// A concrete, user-declared type: its finality, supertype, and definition.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct SubType {
    /// Whether this type is forbidden from being the supertype of any other
    /// type.
    pub is_final: bool,
    /// This type's declared supertype, if any.
    pub supertype: Option<CanonicalIndex>,
    /// The function, array, or struct that is defined.
    pub composite: CompositeType,
}

impl SubType {
    /// Rewrite every type reference in `self` through `f`.
    pub(crate) fn remap(&mut self, f: &mut impl FnMut(&mut CanonicalIndex)) {
        if let Some(sup) = &mut self.supertype {
            f(sup);
        }
        self.composite.remap(f);
    }

    #[inline]
    pub fn unwrap_func(&self) -> &FuncType {
        self.composite.inner.unwrap_func()
    }

    #[inline]
    pub fn unwrap_array(&self) -> &ArrayType {
        self.composite.inner.unwrap_array()
    }

    #[inline]
    pub fn unwrap_struct(&self) -> &StructType {
        self.composite.inner.unwrap_struct()
    }
}

/// A function, array, or struct type.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct CompositeType {
    pub shared: bool,
    pub inner: CompositeInnerType,
}

impl CompositeType {
    fn remap(&mut self, f: &mut impl FnMut(&mut CanonicalIndex)) {
        match &mut self.inner {
            CompositeInnerType::Func(ty) => {
                for p in ty.params.iter_mut().chain(ty.results.iter_mut()) {
                    remap_valtype(p, f);
                }
            }
            CompositeInnerType::Array(ty) => remap_storage(&mut ty.0.storage, f),
            CompositeInnerType::Struct(ty) => {
                for field in ty.fields.iter_mut() {
                    remap_storage(&mut field.storage, f);
                }
            }
        }
    }
}

fn remap_valtype(ty: &mut ValType, f: &mut impl FnMut(&mut CanonicalIndex)) {
    if let ValType::Ref(rt) = ty {
        if let HeapType::Concrete(idx) = &mut rt.heap {
            f(idx);
        }
    }
}

fn remap_storage(ty: &mut StorageType, f: &mut impl FnMut(&mut CanonicalIndex)) {
    if let StorageType::Val(v) = ty {
        remap_valtype(v, f);
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum CompositeInnerType {
    Func(FuncType),
    Array(ArrayType),
    Struct(StructType),
}

impl CompositeInnerType {
    enum_accessors! {
        c
        (Func(&FuncType) is_func as_func unwrap_func c)
        (Array(&ArrayType) is_array as_array unwrap_array c)
        (Struct(&StructType) is_struct as_struct unwrap_struct c)
    }
}

/// A WebAssembly function signature. Two signatures are equal iff their
/// parameter and result sequences are elementwise equal.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FuncType {
    pub params: Box<[ValType]>,
    pub results: Box<[ValType]>,
}

/// A GC array type.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ArrayType(pub FieldType);

/// A GC struct type.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct StructType {
    pub fields: Box<[FieldType]>,
}

/// The type of a struct field or array element.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct FieldType {
    /// Whether this field can be mutated.
    pub mutable: bool,
    pub storage: StorageType,
}

/// A storage type: a value type, or one of the packed 8/16-bit forms.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StorageType {
    I8,
    I16,
    Val(ValType),
}

impl StorageType {
    /// The value type this storage widens to on the operand stack.
    pub fn unpacked(&self) -> ValType {
        match self {
            StorageType::I8 | StorageType::I16 => ValType::I32,
            StorageType::Val(v) => *v,
        }
    }
}

/// The types declared by one module: a table of [`SubType`]s plus the rec
/// group boundaries needed for canonicalization. All `Concrete` references in
/// here are `CanonicalIndex::Module`.
#[derive(Debug, Default, Clone)]
pub struct ModuleTypes {
    pub types: PrimaryMap<TypeIndex, SubType>,
    /// Half-open `[start, end)` index ranges, one per rec group, covering the
    /// type table in order.
    pub rec_groups: Vec<(u32, u32)>,
}

/// The store-wide table of canonicalized types.
///
/// Append-only: shared indices stay valid for the lifetime of the store,
/// matching the store's own arena discipline.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: PrimaryMap<SharedTypeIndex, RegisteredType>,
    hash_consed: HashMap<Box<[SubType]>, SmallVec<[SharedTypeIndex; 4]>>,
}

#[derive(Debug)]
struct RegisteredType {
    ty: SubType,
    /// Resolved supertype, for subtype chain walks.
    supertype: Option<SharedTypeIndex>,
}

impl TypeRegistry {
    /// Canonicalize and intern all of a module's rec groups, returning the
    /// module-to-shared index map.
    pub fn register_module_types(
        &mut self,
        module_types: &ModuleTypes,
    ) -> PrimaryMap<TypeIndex, SharedTypeIndex> {
        let mut map = PrimaryMap::with_capacity(module_types.types.len());

        for &(start, end) in &module_types.rec_groups {
            let group_len = (end - start) as usize;

            // Relativize intra-group references so that structurally equal
            // groups hash equal no matter which module declared them.
            let key: Box<[SubType]> = (start..end)
                .map(|i| {
                    let mut ty = module_types.types[TypeIndex::from_u32(i)].clone();
                    ty.remap(&mut |idx| {
                        let module_index = idx.unwrap_module();
                        *idx = if module_index.as_u32() >= start {
                            debug_assert!(module_index.as_u32() < end);
                            CanonicalIndex::RecLocal(module_index.as_u32() - start)
                        } else {
                            CanonicalIndex::Shared(map[module_index])
                        };
                    });
                    ty
                })
                .collect();

            if let Some(shared) = self.hash_consed.get(&key) {
                tracing::trace!("type registry hit: reusing {shared:?}");
                for idx in shared {
                    map.push(*idx);
                }
                continue;
            }

            // New group: indices are assigned contiguously so forward
            // references within the group can be precomputed.
            let first = self.types.len() as u32;
            let shared: SmallVec<[SharedTypeIndex; 4]> = (0..group_len)
                .map(|k| SharedTypeIndex::from_u32(first + k as u32))
                .collect();

            for (k, key_ty) in key.iter().enumerate() {
                let mut ty = key_ty.clone();
                ty.remap(&mut |idx| {
                    if let CanonicalIndex::RecLocal(rel) = *idx {
                        *idx = CanonicalIndex::Shared(shared[rel as usize]);
                    }
                });
                let supertype = ty.supertype.map(|s| s.unwrap_shared());
                let id = self.types.push(RegisteredType { ty, supertype });
                debug_assert_eq!(id, shared[k]);
            }

            for idx in &shared {
                map.push(*idx);
            }
            self.hash_consed.insert(key, shared);
        }

        map
    }

    /// Intern a bare function signature (host functions have no module).
    pub fn register_func_type(&mut self, ty: FuncType) -> SharedTypeIndex {
        let module_types = ModuleTypes {
            types: core::iter::once(SubType {
                is_final: true,
                supertype: None,
                composite: CompositeType {
                    shared: false,
                    inner: CompositeInnerType::Func(ty),
                },
            })
            .collect(),
            rec_groups: vec![(0, 1)],
        };
        let map = self.register_module_types(&module_types);
        map[TypeIndex::from_u32(0)]
    }

    pub fn get(&self, index: SharedTypeIndex) -> &SubType {
        &self.types[index].ty
    }

    /// The signature of a registered function type.
    pub fn func_type(&self, index: SharedTypeIndex) -> &FuncType {
        self.types[index].ty.unwrap_func()
    }

    /// Is `sub` a (reflexive, transitive) subtype of `sup`?
    ///
    /// Declared-supertype chains are short, so a plain walk beats keeping
    /// per-type supertype arrays up to date.
    pub fn is_subtype(&self, sub: SharedTypeIndex, sup: SharedTypeIndex) -> bool {
        let mut cur = sub;
        loop {
            if cur == sup {
                return true;
            }
            match self.types[cur].supertype {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }
}

/// Resolve a module-local value type to its runtime form, rewriting concrete
/// heap references through the instance's type map.
pub(crate) fn canon_valtype(
    ty: &ValType,
    type_ids: &PrimaryMap<TypeIndex, SharedTypeIndex>,
) -> ValType {
    match ty {
        ValType::Ref(rt) => ValType::Ref(canon_reftype(rt, type_ids)),
        other => *other,
    }
}

pub(crate) fn canon_reftype(
    ty: &RefType,
    type_ids: &PrimaryMap<TypeIndex, SharedTypeIndex>,
) -> RefType {
    match ty.heap {
        HeapType::Concrete(CanonicalIndex::Module(index)) => RefType {
            nullable: ty.nullable,
            heap: HeapType::Concrete(CanonicalIndex::Shared(type_ids[index])),
        },
        _ => *ty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func(params: &[ValType], results: &[ValType]) -> SubType {
        SubType {
            is_final: true,
            supertype: None,
            composite: CompositeType {
                shared: false,
                inner: CompositeInnerType::Func(FuncType {
                    params: params.into(),
                    results: results.into(),
                }),
            },
        }
    }

    #[test]
    fn structurally_equal_types_share_an_index() {
        let mut registry = TypeRegistry::default();
        let a = registry.register_func_type(FuncType {
            params: Box::new([ValType::I32, ValType::I32]),
            results: Box::new([ValType::I32]),
        });
        let b = registry.register_func_type(FuncType {
            params: Box::new([ValType::I32, ValType::I32]),
            results: Box::new([ValType::I32]),
        });
        let c = registry.register_func_type(FuncType {
            params: Box::new([ValType::I64]),
            results: Box::new([]),
        });
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn rec_groups_are_canonicalized_across_modules() {
        // Two modules declare the same self-referential pair; both must
        // resolve to the same shared indices.
        let mut ty0 = func(&[], &[]);
        ty0.composite.inner = CompositeInnerType::Struct(StructType {
            fields: Box::new([FieldType {
                mutable: true,
                storage: StorageType::Val(ValType::Ref(RefType {
                    nullable: true,
                    heap: HeapType::Concrete(CanonicalIndex::Module(TypeIndex::from_u32(1))),
                })),
            }]),
        });
        let ty1 = func(
            &[ValType::Ref(RefType {
                nullable: true,
                heap: HeapType::Concrete(CanonicalIndex::Module(TypeIndex::from_u32(0))),
            })],
            &[],
        );

        let module_types = ModuleTypes {
            types: [ty0, ty1].into_iter().collect(),
            rec_groups: vec![(0, 2)],
        };

        let mut registry = TypeRegistry::default();
        let map_a = registry.register_module_types(&module_types);
        let map_b = registry.register_module_types(&module_types);
        assert_eq!(
            map_a[TypeIndex::from_u32(0)],
            map_b[TypeIndex::from_u32(0)]
        );
        assert_eq!(
            map_a[TypeIndex::from_u32(1)],
            map_b[TypeIndex::from_u32(1)]
        );
    }

    #[test]
    fn subtype_chains_walk_to_the_root() {
        let base = func(&[], &[]);
        let mut mid = func(&[], &[]);
        mid.is_final = false;
        mid.supertype = Some(CanonicalIndex::Module(TypeIndex::from_u32(0)));
        let mut leaf = func(&[], &[]);
        leaf.supertype = Some(CanonicalIndex::Module(TypeIndex::from_u32(1)));

        let mut root = base.clone();
        root.is_final = false;

        let module_types = ModuleTypes {
            types: [root, mid, leaf].into_iter().collect(),
            rec_groups: vec![(0, 1), (1, 2), (2, 3)],
        };
        let mut registry = TypeRegistry::default();
        let map = registry.register_module_types(&module_types);

        let root_id = map[TypeIndex::from_u32(0)];
        let mid_id = map[TypeIndex::from_u32(1)];
        let leaf_id = map[TypeIndex::from_u32(2)];
        assert!(registry.is_subtype(leaf_id, root_id));
        assert!(registry.is_subtype(leaf_id, mid_id));
        assert!(registry.is_subtype(mid_id, root_id));
        assert!(!registry.is_subtype(root_id, leaf_id));
    }
}
