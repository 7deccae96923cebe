use crate::indices::{DefinedFuncIndex, FuncAddr, InstanceHandle, SharedTypeIndex};
use crate::interp::{Caller, SideTable};
use crate::module::Module;
use crate::store::Store;
use crate::trap::Trap;
use crate::types::FuncType;
use crate::values::{Val, VMVal};
use crate::Error;
use std::rc::Rc;
use std::sync::Arc;

/// The signature every host callback implements. Arguments are consumed and
/// results produced through the typed `push`/`pop` primitives on [`Caller`].
pub(crate) type HostFn = dyn Fn(&mut Caller<'_>) -> Result<(), Trap>;

/// A function owned by a store: its canonical signature plus either a wasm
/// body or a host callback.
#[derive(Debug)]
pub(crate) struct FuncInstance {
    pub ty: SharedTypeIndex,
    pub kind: FuncKind,
}

pub(crate) enum FuncKind {
    Wasm(WasmFuncData),
    Host(HostFuncData),
}

impl core::fmt::Debug for FuncKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FuncKind::Wasm(data) => f
                .debug_struct("Wasm")
                .field("instance", &data.instance)
                .field("def_index", &data.def_index)
                .finish_non_exhaustive(),
            FuncKind::Host(_) => f.debug_struct("Host").finish_non_exhaustive(),
        }
    }
}

pub(crate) struct WasmFuncData {
    /// The instance whose module-local index spaces the body is resolved
    /// against.
    pub instance: InstanceHandle,
    pub def_index: DefinedFuncIndex,
    /// Keeps the code bytes alive independently of the instance.
    pub module: Module,
    /// Lazily built branch-target side table. Reset when the function is
    /// copied into another store, so the copy re-derives it.
    pub side_table: Option<Arc<SideTable>>,
}

pub(crate) struct HostFuncData {
    pub callback: Rc<HostFn>,
}

impl FuncInstance {
    /// Duplicate this function for sharing into another store. The code
    /// reference survives; cached derived state does not.
    pub fn clone_for_share(&self) -> Self {
        let kind = match &self.kind {
            FuncKind::Wasm(data) => FuncKind::Wasm(WasmFuncData {
                instance: data.instance,
                def_index: data.def_index,
                module: data.module.clone(),
                side_table: None,
            }),
            FuncKind::Host(data) => FuncKind::Host(HostFuncData {
                callback: Rc::clone(&data.callback),
            }),
        };
        Self { ty: self.ty, kind }
    }
}

/// A handle to a function within some store.
#[derive(Debug, Clone, Copy)]
pub struct Func(FuncAddr);

impl Func {
    pub(crate) fn from_addr(addr: FuncAddr) -> Self {
        Self(addr)
    }

    pub(crate) fn addr(&self) -> FuncAddr {
        self.0
    }

    /// The function's signature.
    pub fn ty(&self, store: &Store) -> FuncType {
        store.types().func_type(store.func(self.0).ty).clone()
    }

    /// Call the function with `params`, writing its results into `results`.
    ///
    /// Argument values are checked against the signature before anything
    /// runs; `results` must be exactly as long as the result sequence.
    ///
    /// # Errors
    ///
    /// [`Error::ArityMismatch`] or [`Error::ArgumentTypeMismatch`] for a bad
    /// argument vector, [`Error::Trap`] when execution traps.
    pub fn call(
        &self,
        store: &mut Store,
        params: &[Val],
        results: &mut [Val],
    ) -> crate::Result<()> {
        let ty = self.ty(store);

        if params.len() != ty.params.len() {
            return Err(Error::ArityMismatch(format!(
                "expected {} arguments, got {}",
                ty.params.len(),
                params.len()
            )));
        }
        if results.len() != ty.results.len() {
            return Err(Error::ArityMismatch(format!(
                "expected room for {} results, got {}",
                ty.results.len(),
                results.len()
            )));
        }
        for (i, (param, expected)) in params.iter().zip(ty.params.iter()).enumerate() {
            if !param.matches(expected) {
                return Err(Error::ArgumentTypeMismatch(format!(
                    "argument {i} does not match {expected}"
                )));
            }
        }

        // Borrow juggling: the argument storage is taken out of the store for
        // the duration of the call and handed back afterwards.
        let mut values_vec = store.take_vmval_storage();
        debug_assert!(values_vec.is_empty());
        values_vec.resize(params.len().max(ty.results.len()), VMVal::ZERO);
        for (slot, param) in values_vec.iter_mut().zip(params.iter()) {
            *slot = param.to_vmval();
        }

        let res = store.with_vm(|vm, store| {
            vm.invoke(store, self.0, &mut values_vec, params.len(), ty.results.len())
        });

        if res.is_ok() {
            for (i, slot) in results.iter_mut().enumerate() {
                *slot = Val::from_vmval(store, values_vec[i], &ty.results[i]);
            }
        }

        values_vec.clear();
        store.return_vmval_storage(values_vec);

        res.map_err(Error::Trap)
    }
}
