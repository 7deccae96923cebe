/// A recoverable runtime error.
///
/// Traps abort the current invocation and are reported to the embedder at the
/// `call`/`invoke` boundary; the store and its instances stay valid and may
/// be invoked again.
#[derive(Clone, Copy, PartialEq, Eq, Debug, onlyerror::Error)]
pub enum Trap {
    /// The current stack space was exhausted.
    #[error("call stack exhausted")]
    StackOverflow,
    /// An out-of-bounds memory access.
    #[error("out of bounds memory access")]
    MemoryOutOfBounds,
    /// A wasm atomic operation was presented with a not-naturally-aligned linear-memory address.
    #[error("unaligned atomic operation")]
    HeapMisaligned,
    /// Out-of-bounds access to a table.
    #[error("out of bounds table access")]
    TableOutOfBounds,
    /// Indirect call to a null table entry.
    #[error("accessed uninitialized table element")]
    IndirectCallToNull,
    /// Signature mismatch on indirect call.
    #[error("indirect call signature mismatch")]
    BadSignature,
    /// An integer arithmetic operation caused an overflow.
    #[error("integer overflow")]
    IntegerOverflow,
    /// An integer division by zero.
    #[error("integer division by zero")]
    IntegerDivisionByZero,
    /// Failed float-to-int conversion.
    #[error("invalid conversion to integer")]
    BadConversionToInteger,
    /// Code that was supposed to have been unreachable was reached.
    #[error("unreachable code executed")]
    UnreachableCodeReached,
    /// A trap raised by atomic wait operations on non shared memory.
    #[error("atomic wait on non-shared memory")]
    AtomicWaitNonSharedMemory,
    /// A null reference was dereferenced.
    #[error("null reference")]
    NullReference,
    /// Attempt to get the bits of a null `i31ref`.
    #[error("null i31 reference")]
    NullI31Ref,
    /// Out-of-bounds access to a GC array.
    #[error("out of bounds array access")]
    ArrayOutOfBounds,
    /// A `ref.cast` to a type the operand does not belong to.
    #[error("cast failure")]
    CastFailure,
    /// An exception unwound past the root frame of the invocation.
    #[error("uncaught exception")]
    UncaughtException,
    /// A host function explicitly trapped.
    #[error("host function trapped")]
    HostTrap,
}
