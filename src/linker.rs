use crate::const_eval::ConstExprEvaluator;
use crate::instance::Instance;
use crate::module::Module;
use crate::store::Store;
use crate::trap::Trap;
use crate::types::ValType;
use crate::Caller;

/// Resolves imports by `(module, name)` and drives instantiation.
///
/// Definitions live in the store's import registry, so anything defined
/// through one linker is visible to any other linker over the same store.
/// Chaining works by defining an instance under a module name and then
/// instantiating the next module against the same store.
#[derive(Default)]
pub struct Linker {}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every export of `instance` under the module name `name`, so
    /// later modules can import them. Functions link by handle-copy within
    /// the same store (the handle itself); memories, tables, globals, and
    /// tags link by handle-share.
    pub fn define_instance(
        &mut self,
        store: &mut Store,
        name: &str,
        instance: Instance,
    ) -> crate::Result<()> {
        let exports: Vec<_> = instance.exports(store).collect();
        for (export_name, ext) in exports {
            store.expose(name, &export_name, ext.addr())?;
        }
        Ok(())
    }

    /// Define a host function under `(module, name)`.
    pub fn define_host_func(
        &mut self,
        store: &mut Store,
        module: &str,
        name: &str,
        params: Vec<ValType>,
        results: Vec<ValType>,
        callback: impl Fn(&mut Caller<'_>) -> Result<(), Trap> + 'static,
    ) -> crate::Result<()> {
        store.expose_host_function(module, name, params, results, callback)?;
        Ok(())
    }

    /// Link `module` against the store: look up every import in the
    /// registry, then run the instantiation algorithm.
    ///
    /// # Errors
    ///
    /// [`Error::ImportNotFound`] or [`Error::ImportTypeMismatch`] for
    /// unresolvable imports, the segment-fit errors when an active segment
    /// is out of bounds, and [`Error::StartTrap`] when the start function
    /// traps.
    ///
    /// [`Error::ImportNotFound`]: crate::Error::ImportNotFound
    /// [`Error::ImportTypeMismatch`]: crate::Error::ImportTypeMismatch
    /// [`Error::StartTrap`]: crate::Error::StartTrap
    pub fn instantiate(
        &self,
        store: &mut Store,
        const_eval: &mut ConstExprEvaluator,
        module: &Module,
    ) -> crate::Result<Instance> {
        let mut imports = Vec::with_capacity(module.imports().len());
        for import in module.imports() {
            imports.push(store.lookup_import(&import.module, &import.name)?);
        }

        tracing::trace!(
            module = module.name().unwrap_or("<unnamed>"),
            imports = imports.len(),
            "instantiating module"
        );
        Instance::new(store, const_eval, module, &imports)
    }
}
