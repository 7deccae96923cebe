//! A standalone WebAssembly runtime.
//!
//! The crate decodes binary (or textual) modules, validates them, links them
//! against host functions and other modules, and executes their exports on a
//! stack-based interpreter. Reference types, bulk memory, SIMD, atomics,
//! multiple memories, exception handling, tail calls, and GC struct/array
//! objects are all supported.
//!
//! The pieces fit together like this: a [`Module`] is the immutable decoded
//! form of a program, a [`Store`] owns every runtime allocation, and an
//! [`Instance`] is a module linked into a store with its imports resolved.
//! The [`Linker`] resolves imports by `(module, name)` pairs and can chain
//! one instance's exports into the next instance's imports.

mod const_eval;
mod errors;
mod func;
mod gc;
mod global;
mod indices;
mod instance;
mod interp;
mod linker;
mod memory;
mod module;
mod store;
mod table;
mod tag;
mod translate;
mod trap;
mod types;
mod values;
pub mod wasi;

pub use const_eval::ConstExprEvaluator;
pub use errors::Error;
pub use func::Func;
pub use global::Global;
pub use instance::{Extern, Instance};
pub use interp::Caller;
pub use linker::Linker;
pub use memory::Memory;
pub use module::Module;
pub use store::Store;
pub use table::Table;
pub use tag::Tag;
pub use trap::Trap;
pub use types::{FuncType, HeapType, RefType, ValType};
pub use values::Val;

pub type Result<T> = core::result::Result<T, Error>;

/// WebAssembly page sizes are defined to be 64KiB unless a module opts in to
/// the custom-page-sizes proposal.
pub const WASM_PAGE_SIZE: u32 = 0x10000;

/// The number of pages (for 32-bit memories) we can have before we run out of
/// byte index space.
pub const WASM32_MAX_PAGES: u64 = 1 << 16;
/// Maximum size, in bytes, of 32-bit memories (4G)
pub const WASM32_MAX_SIZE: u64 = 1 << 32;

/// The maximum depth of the interpreter's call-frame stack.
pub const MAX_CALL_DEPTH: usize = 1024;
/// The maximum number of 128-bit operand slots across all live frames.
pub const MAX_OPERAND_SLOTS: usize = 128 * 1024;

/// The absolute maximum size of a memory in bytes
pub const MEMORY_MAX: usize = 1 << 32;
/// The absolute maximum size of a table in elements
pub const TABLE_MAX: usize = 1 << 28;

#[macro_export]
macro_rules! enum_accessors {
    ($bind:ident $(($variant:ident($ty:ty) $is:ident $get:ident $unwrap:ident $cvt:expr))*) => ($(
        #[inline]
        pub fn $is(&self) -> bool {
            matches!(self, Self::$variant(..))
        }

        /// Attempt to access the underlying value, returning `None` if it is
        /// not the correct variant.
        #[inline]
        pub fn $get(&self) -> Option<$ty> {
            if let Self::$variant($bind) = self {
                Some($cvt)
            } else {
                None
            }
        }

        /// Returns the underlying value, panicking if it's the wrong variant.
        ///
        /// # Panics
        ///
        /// Panics if `self` is not of the right variant.
        #[inline]
        pub fn $unwrap(&self) -> $ty {
            self.$get().expect(concat!("expected ", stringify!($ty)))
        }
    )*)
}
