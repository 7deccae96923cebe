//! The store's heap for struct, array, and exception objects.
//!
//! Allocation hands out slots in a slab; the slot index becomes the payload
//! of an encoded reference (see [`crate::values::refs`]). The heap is an
//! arena: objects live until the store itself is dropped. `i31` references
//! never touch the heap, their payload rides inline in the reference bits.

use crate::indices::{SharedTypeIndex, TagAddr};
use crate::values::{refs, VMVal};
use wasmtime_slab::{Id, Slab};

#[derive(Debug)]
pub(crate) enum GcObject {
    Struct(StructObj),
    Array(ArrayObj),
    Exn(ExnObj),
}

impl GcObject {
    pub fn type_index(&self) -> Option<SharedTypeIndex> {
        match self {
            GcObject::Struct(s) => Some(s.ty),
            GcObject::Array(a) => Some(a.ty),
            GcObject::Exn(_) => None,
        }
    }
}

/// An allocated `struct.new` result. Packed i8/i16 fields are stored widened;
/// accessors mask on read.
#[derive(Debug)]
pub(crate) struct StructObj {
    pub ty: SharedTypeIndex,
    pub fields: Box<[VMVal]>,
}

#[derive(Debug)]
pub(crate) struct ArrayObj {
    pub ty: SharedTypeIndex,
    pub elems: Vec<VMVal>,
}

/// A thrown exception: the tag it was created from, the tag's process-wide
/// identity (what catch clauses match on), and the captured arguments.
#[derive(Debug)]
pub(crate) struct ExnObj {
    pub tag: TagAddr,
    pub identity: u64,
    pub payload: Box<[VMVal]>,
}

#[derive(Debug, Default)]
pub(crate) struct GcHeap {
    slab: Slab<GcObject>,
}

impl GcHeap {
    /// Allocate an object, returning its encoded reference bits.
    pub fn alloc(&mut self, obj: GcObject) -> u64 {
        let id = self.slab.alloc(obj);
        refs::from_handle(id.into_raw())
    }

    /// Resolve non-null, non-i31 reference bits to the object.
    pub fn get(&self, bits: u64) -> Option<&GcObject> {
        self.slab.get(Id::from_raw(refs::to_handle(bits)))
    }

    pub fn get_mut(&mut self, bits: u64) -> Option<&mut GcObject> {
        self.slab.get_mut(Id::from_raw(refs::to_handle(bits)))
    }
}
