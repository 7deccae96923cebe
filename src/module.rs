use crate::indices::EntityIndex;
use crate::translate::{features, Import, ModuleTranslator, TranslatedModule};
use std::sync::Arc;
use wasmparser::Validator;

/// The immutable, decoded-and-validated form of a WebAssembly program.
///
/// A module owns its byte image; function bodies and data payloads are
/// ranges into it. Decoding happens once, after which the module can back
/// any number of instances, in any number of stores.
#[derive(Debug, Clone)]
pub struct Module(Arc<ModuleInner>);

#[derive(Debug)]
struct ModuleInner {
    translated: TranslatedModule,
    bytes: Box<[u8]>,
}

impl Module {
    /// Decode and validate a binary module.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] when the bytes are not a well-formed binary,
    /// [`Error::Invalid`] when validation rejects the module.
    ///
    /// [`Error::Malformed`]: crate::Error::Malformed
    /// [`Error::Invalid`]: crate::Error::Invalid
    pub fn new(bytes: &[u8]) -> crate::Result<Self> {
        let mut validator = Validator::new_with_features(features());
        let translated = ModuleTranslator::new(&mut validator).translate(bytes)?;

        tracing::trace!(
            functions = translated.functions.len(),
            memories = translated.memory_plans.len(),
            tables = translated.table_plans.len(),
            "decoded module"
        );

        Ok(Self(Arc::new(ModuleInner {
            translated,
            bytes: bytes.into(),
        })))
    }

    /// Parse the textual format, then decode the resulting binary.
    pub fn from_wat(wat: &str) -> crate::Result<Self> {
        let bytes = wat::parse_str(wat)?;
        Self::new(&bytes)
    }

    pub fn imports(&self) -> impl ExactSizeIterator<Item = &Import> {
        self.0.translated.imports.iter()
    }

    pub fn exports(&self) -> impl ExactSizeIterator<Item = (&str, EntityIndex)> + '_ {
        self.0
            .translated
            .export_order
            .iter()
            .map(|name| (name.as_str(), self.0.translated.exports[name]))
    }

    /// The module's own name from the name section, if present.
    pub fn name(&self) -> Option<&str> {
        self.0.translated.names.module_name.as_deref()
    }

    pub(crate) fn get_export(&self, name: &str) -> Option<EntityIndex> {
        self.0.translated.exports.get(name).copied()
    }

    pub(crate) fn translated(&self) -> &TranslatedModule {
        &self.0.translated
    }

    /// The raw module image that code ranges index into.
    pub(crate) fn image(&self) -> &[u8] {
        &self.0.bytes
    }
}
