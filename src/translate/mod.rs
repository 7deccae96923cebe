//! Translation of the binary format into the runtime's module model.
//!
//! The section walk leans on `wasmparser` for the grammar and validation;
//! what comes out the other side is a [`TranslatedModule`]: plain descriptor
//! tables keyed by typed indices, with function bodies left as raw byte
//! ranges into the module image for the interpreter to decode lazily.

mod const_expr;
mod module_translator;
mod types;

use crate::indices::{
    DataIndex, DefinedFuncIndex, DefinedGlobalIndex, DefinedTableIndex,
    ElemIndex, EntityIndex, FieldIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex,
    MemoryIndex, TableIndex, TagIndex, TypeIndex,
};
use crate::types::{ModuleTypes, RefType, ValType};
use crate::{enum_accessors, WASM32_MAX_SIZE};
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;

pub use const_expr::{ConstExpr, ConstOp};
pub(crate) use module_translator::features;
pub use module_translator::ModuleTranslator;

#[derive(Debug, Default)]
pub struct TranslatedModule {
    pub types: ModuleTypes,

    /// Declared signature of every function, imports first.
    pub functions: PrimaryMap<FuncIndex, TypeIndex>,
    pub table_plans: PrimaryMap<TableIndex, TablePlan>,
    pub memory_plans: PrimaryMap<MemoryIndex, MemoryPlan>,
    pub globals: PrimaryMap<GlobalIndex, GlobalPlan>,
    pub tags: PrimaryMap<TagIndex, TypeIndex>,

    pub global_initializers: PrimaryMap<DefinedGlobalIndex, ConstExpr>,
    pub table_initializers: PrimaryMap<DefinedTableIndex, TableInitialValue>,

    pub elements: PrimaryMap<ElemIndex, ElementSegment>,
    pub datas: PrimaryMap<DataIndex, DataSegment>,

    /// Locals layout and instruction bytes of every defined function.
    pub func_bodies: PrimaryMap<DefinedFuncIndex, FunctionBody>,

    pub start: Option<FuncIndex>,
    pub imports: Vec<Import>,
    pub exports: HashMap<String, EntityIndex>,
    /// Export names in section order, for iteration.
    pub export_order: Vec<String>,

    /// Custom sections other than `name`, kept as opaque payload ranges.
    pub custom_sections: Vec<(String, CodeRange)>,
    pub names: Names,

    pub num_imported_functions: u32,
    pub num_imported_tables: u32,
    pub num_imported_memories: u32,
    pub num_imported_globals: u32,
    pub num_imported_tags: u32,
}

impl TranslatedModule {
    #[inline]
    pub fn defined_func_index(&self, index: FuncIndex) -> Option<DefinedFuncIndex> {
        if self.is_imported_func(index) {
            None
        } else {
            Some(DefinedFuncIndex::from_u32(
                index.as_u32() - self.num_imported_functions,
            ))
        }
    }

    #[inline]
    pub fn is_imported_func(&self, index: FuncIndex) -> bool {
        index.as_u32() < self.num_imported_functions
    }
}

/// A byte range into the module image.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeRange {
    pub start: u32,
    pub end: u32,
}

impl CodeRange {
    pub fn new(range: core::ops::Range<usize>) -> Self {
        Self {
            start: u32::try_from(range.start).unwrap(),
            end: u32::try_from(range.end).unwrap(),
        }
    }

    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.start as usize..self.end as usize]
    }
}

/// The executable part of one defined function.
#[derive(Debug)]
pub struct FunctionBody {
    /// Declared locals, flattened, parameters excluded.
    pub locals: Box<[ValType]>,
    /// Instruction bytes (the locals vector has already been stepped over).
    pub code: CodeRange,
}

#[derive(Debug)]
pub enum EntityType {
    /// A function with the specified signature.
    Function(FuncIndex),
    /// A table with the specified element type and limits.
    Table(TableIndex),
    /// A linear memory with the specified limits.
    Memory(MemoryIndex),
    /// A global variable with the specified content type.
    Global(GlobalIndex),
    /// An exception tag.
    Tag(TagIndex),
}

impl EntityType {
    enum_accessors! {
        e
        (Function(FuncIndex) is_func func unwrap_func *e)
        (Table(TableIndex) is_table table unwrap_table *e)
        (Memory(MemoryIndex) is_memory memory unwrap_memory *e)
        (Global(GlobalIndex) is_global global unwrap_global *e)
        (Tag(TagIndex) is_tag tag unwrap_tag *e)
    }
}

#[derive(Debug)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub ty: EntityType,
}

/// A pre-processed version of `wasmparser::MemoryType` describing how the
/// runtime will implement the memory.
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    /// The minimum number of pages in the memory.
    pub minimum: u64,
    /// The maximum number of pages in the memory.
    pub maximum: Option<u64>,
    /// Whether the memory may be shared between multiple threads.
    pub shared: bool,
    /// Whether this is a 64-bit memory.
    pub memory64: bool,
    /// The log2 of this memory's page size, in bytes.
    ///
    /// By default, the page size is 64KiB (2**16) but the custom-page-sizes
    /// proposal allows opting into a page size of `1`.
    pub page_size_log2: u8,
}

impl MemoryPlan {
    pub fn for_memory(ty: wasmparser::MemoryType) -> Self {
        Self {
            minimum: ty.initial,
            maximum: ty.maximum,
            shared: ty.shared,
            memory64: ty.memory64,
            page_size_log2: ty
                .page_size_log2
                .map(|log2| u8::try_from(log2).unwrap())
                .unwrap_or(Self::DEFAULT_PAGE_SIZE_LOG2),
        }
    }

    /// WebAssembly page sizes are 64KiB (or `2**16`) by default.
    pub const DEFAULT_PAGE_SIZE_LOG2: u8 = 16;

    /// Get the size of this memory's pages, in bytes.
    pub fn page_size(&self) -> u64 {
        debug_assert!(
            self.page_size_log2 == 16 || self.page_size_log2 == 0,
            "invalid page_size_log2: {}; must be 16 or 0",
            self.page_size_log2
        );
        1 << self.page_size_log2
    }

    /// Returns the maximum size this memory is allowed to be, in its own
    /// pages, based only on the index type.
    pub fn max_pages_based_on_index_type(&self) -> u64 {
        if self.memory64 {
            u64::MAX >> self.page_size_log2
        } else {
            WASM32_MAX_SIZE >> self.page_size_log2
        }
    }
}

#[derive(Debug, Clone)]
pub struct TablePlan {
    /// The type of entries this table holds.
    pub element_type: RefType,
    /// The minimum number of entries.
    pub minimum: u64,
    /// The maximum number of entries.
    pub maximum: Option<u64>,
    /// Whether this is a 64-bit table.
    pub table64: bool,
    pub shared: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GlobalPlan {
    pub content_type: ValType,
    pub mutable: bool,
    pub shared: bool,
}

/// The value defined tables start out filled with.
#[derive(Debug)]
pub enum TableInitialValue {
    RefNull,
    ConstExpr(ConstExpr),
}

#[derive(Debug)]
pub struct ElementSegment {
    pub element_type: RefType,
    pub mode: ElementMode,
    pub items: ElementItems,
}

#[derive(Debug)]
pub enum ElementMode {
    Active {
        table_index: TableIndex,
        offset: ConstExpr,
    },
    Passive,
    Declarative,
}

#[derive(Debug)]
pub enum ElementItems {
    Functions(Box<[FuncIndex]>),
    Expressions(Box<[ConstExpr]>),
}

#[derive(Debug)]
pub struct DataSegment {
    pub mode: DataMode,
    /// Payload bytes within the module image.
    pub range: CodeRange,
}

#[derive(Debug)]
pub enum DataMode {
    Active {
        memory_index: MemoryIndex,
        offset: ConstExpr,
    },
    Passive,
}

#[derive(Debug, Default)]
pub struct Names {
    pub module_name: Option<String>,
    pub func_names: HashMap<FuncIndex, String>,
    pub locals_names: HashMap<FuncIndex, HashMap<LocalIndex, String>>,
    pub global_names: HashMap<GlobalIndex, String>,
    pub data_names: HashMap<DataIndex, String>,
    pub labels_names: HashMap<FuncIndex, HashMap<LabelIndex, String>>,
    pub type_names: HashMap<TypeIndex, String>,
    pub table_names: HashMap<TableIndex, String>,
    pub memory_names: HashMap<MemoryIndex, String>,
    pub element_names: HashMap<ElemIndex, String>,
    pub fields_names: HashMap<TypeIndex, HashMap<FieldIndex, String>>,
    pub tag_names: HashMap<TagIndex, String>,
}

impl Names {
    pub fn func_name(&self, func_index: FuncIndex) -> Option<&str> {
        self.func_names.get(&func_index).map(String::as_str)
    }
}
