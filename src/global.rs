use crate::indices::GlobalAddr;
use crate::store::Store;
use crate::types::ValType;
use crate::values::{Val, VMVal};
use crate::Error;

/// A global variable owned by a store. The value is held in a full 128-bit
/// slot regardless of its type.
#[derive(Debug)]
pub(crate) struct GlobalInstance {
    pub value: VMVal,
    pub content_type: ValType,
    pub mutable: bool,
}

/// A handle to a global within some store.
#[derive(Debug, Clone, Copy)]
pub struct Global(GlobalAddr);

impl Global {
    pub(crate) fn from_addr(addr: GlobalAddr) -> Self {
        Self(addr)
    }

    pub(crate) fn addr(&self) -> GlobalAddr {
        self.0
    }

    pub fn ty(&self, store: &Store) -> ValType {
        store.global(self.0).content_type
    }

    pub fn get(&self, store: &Store) -> Val {
        let global = store.global(self.0);
        Val::from_vmval(store, global.value, &global.content_type)
    }

    /// Set a mutable global. Immutable globals and mismatched value types are
    /// rejected.
    pub fn set(&self, store: &mut Store, val: Val) -> crate::Result<()> {
        let global = store.global(self.0);
        if !global.mutable {
            return Err(Error::ArgumentTypeMismatch("global is immutable".into()));
        }
        if !val.matches(&global.content_type) {
            return Err(Error::ArgumentTypeMismatch(format!(
                "expected {}",
                global.content_type
            )));
        }
        store.global_mut(self.0).value = val.to_vmval();
        Ok(())
    }
}
