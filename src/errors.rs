use crate::trap::Trap;

/// Any error the runtime can surface to an embedder.
#[derive(Debug, onlyerror::Error)]
pub enum Error {
    /// The input bytes are not a well-formed WebAssembly binary.
    #[error("malformed WebAssembly binary at {offset}: {message}")]
    Malformed {
        /// A string describing the decode error.
        message: String,
        /// The bytecode offset where the error occurred.
        offset: usize,
    },
    /// The module is well-formed but fails validation.
    #[error("invalid WebAssembly module at {offset}: {message}")]
    Invalid {
        /// A string describing the validation error.
        message: String,
        /// The bytecode offset where the error occurred.
        offset: usize,
    },
    /// A feature used by the module is not supported.
    #[error("unsupported WebAssembly feature: {0}")]
    Unsupported(String),
    /// An import could not be resolved by the linker or store registry.
    #[error("unknown import: {module}::{name}")]
    ImportNotFound { module: String, name: String },
    /// An import resolved to an entity of an incompatible type.
    #[error("incompatible import type for {module}::{name}")]
    ImportTypeMismatch { module: String, name: String },
    /// An active element segment does not fit its target table.
    #[error("element segment does not fit table")]
    ElementSegmentDoesNotFit,
    /// An active data segment does not fit its target memory.
    #[error("data segment does not fit memory")]
    DataSegmentDoesNotFit,
    /// The module's start function trapped during instantiation.
    #[error("start function trapped: {0}")]
    StartTrap(Trap),
    /// The requested export does not exist or has the wrong kind.
    #[error("export not found: {0}")]
    ExportNotFound(String),
    /// The argument or result buffer does not match the function signature.
    #[error("argument/result arity mismatch: {0}")]
    ArityMismatch(String),
    /// An argument value's type does not match the declared parameter type.
    #[error("argument type mismatch: {0}")]
    ArgumentTypeMismatch(String),
    /// Execution trapped.
    #[error("wasm trap: {0}")]
    Trap(#[from] Trap),
    /// The store failed to allocate a runtime object.
    #[error("out of memory allocating {0}")]
    OutOfMemory(&'static str),
    /// A linker name was defined twice.
    #[error("import {module}::{name} defined twice")]
    DuplicateDefinition { module: String, name: String },
}

impl Error {
    pub(crate) fn import_not_found(module: &str, name: &str) -> Self {
        Self::ImportNotFound {
            module: module.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn import_type_mismatch(module: &str, name: &str) -> Self {
        Self::ImportTypeMismatch {
            module: module.to_string(),
            name: name.to_string(),
        }
    }

    /// Wrap an error reported by the validator phase, as opposed to the
    /// section readers whose errors mean the binary itself is malformed.
    pub(crate) fn validation(e: wasmparser::BinaryReaderError) -> Self {
        Self::Invalid {
            message: e.message().to_string(),
            offset: e.offset(),
        }
    }

    /// Did this operation trap, and if so with which kind?
    pub fn as_trap(&self) -> Option<Trap> {
        match self {
            Self::Trap(trap) | Self::StartTrap(trap) => Some(*trap),
            _ => None,
        }
    }
}

impl From<wasmparser::BinaryReaderError> for Error {
    fn from(e: wasmparser::BinaryReaderError) -> Self {
        Self::Malformed {
            message: e.message().to_string(),
            offset: e.offset(),
        }
    }
}

impl From<wat::Error> for Error {
    fn from(e: wat::Error) -> Self {
        Self::Malformed {
            message: e.to_string(),
            offset: 0,
        }
    }
}

#[macro_export]
macro_rules! wasm_unsupported {
    ($($arg:tt)*) => { $crate::Error::Unsupported(format!($($arg)*)) }
}
