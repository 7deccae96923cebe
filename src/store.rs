use crate::func::{FuncInstance, FuncKind, HostFn, HostFuncData};
use crate::gc::GcHeap;
use crate::global::GlobalInstance;
use crate::indices::{
    DataAddr, ElemAddr, ExternAddr, FuncAddr, GlobalAddr, InstanceHandle, MemAddr, SharedTypeIndex,
    TableAddr, TagAddr,
};
use crate::instance::InstanceData;
use crate::interp::Vm;
use crate::memory::MemoryInstance;
use crate::table::TableInstance;
use crate::tag::{mint_tag_identity, TagInstance};
use crate::translate::{MemoryPlan, TablePlan};
use crate::types::{FuncType, RefType, TypeRegistry, ValType};
use crate::values::VMVal;
use crate::Error;
use cranelift_entity::PrimaryMap;
use hashbrown::HashMap;
use std::rc::Rc;

/// An element segment instance: evaluated entries plus the "dropped" flag.
/// A dropped segment behaves as empty for `table.init` and `elem.drop`.
#[derive(Debug)]
pub(crate) struct ElemInstance {
    pub element_type: RefType,
    pub entries: Box<[u64]>,
    pub dropped: bool,
}

/// A data segment instance: raw bytes plus the "dropped" flag.
#[derive(Debug)]
pub(crate) struct DataInstance {
    pub bytes: Box<[u8]>,
    pub dropped: bool,
}

impl DataInstance {
    /// The live byte view; empty once dropped.
    pub fn data(&self) -> &[u8] {
        if self.dropped {
            &[]
        } else {
            &self.bytes
        }
    }
}

/// The process-wide arena that owns every runtime allocation: functions,
/// memories, tables, globals, tags, element and data segments, instances,
/// and the GC heap. Handles are stable indices and never recycled; dropping
/// the store releases everything at once.
#[derive(Default)]
pub struct Store {
    pub(crate) funcs: PrimaryMap<FuncAddr, FuncInstance>,
    pub(crate) memories: PrimaryMap<MemAddr, MemoryInstance>,
    pub(crate) tables: PrimaryMap<TableAddr, TableInstance>,
    pub(crate) globals: PrimaryMap<GlobalAddr, GlobalInstance>,
    pub(crate) tags: PrimaryMap<TagAddr, TagInstance>,
    pub(crate) elems: PrimaryMap<ElemAddr, ElemInstance>,
    pub(crate) datas: PrimaryMap<DataAddr, DataInstance>,
    pub(crate) instances: PrimaryMap<InstanceHandle, InstanceData>,
    pub(crate) gc: GcHeap,
    types: TypeRegistry,

    /// `(module, name)` to address: the import registry that `lookup_import`
    /// scans and instance/host definitions publish into.
    registry: HashMap<(String, String), ExternAddr>,

    vm: Option<Box<Vm>>,
    vmval_storage: Vec<VMVal>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub(crate) fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    // Arena accessors. An out-of-range handle is a bug in the caller (every
    // module-local index is translated through an instance's address vector
    // first), so these index directly.

    pub(crate) fn func(&self, addr: FuncAddr) -> &FuncInstance {
        &self.funcs[addr]
    }

    pub(crate) fn func_mut(&mut self, addr: FuncAddr) -> &mut FuncInstance {
        &mut self.funcs[addr]
    }

    pub(crate) fn memory(&self, addr: MemAddr) -> &MemoryInstance {
        &self.memories[addr]
    }

    pub(crate) fn memory_mut(&mut self, addr: MemAddr) -> &mut MemoryInstance {
        &mut self.memories[addr]
    }

    pub(crate) fn table(&self, addr: TableAddr) -> &TableInstance {
        &self.tables[addr]
    }

    pub(crate) fn table_mut(&mut self, addr: TableAddr) -> &mut TableInstance {
        &mut self.tables[addr]
    }

    pub(crate) fn global(&self, addr: GlobalAddr) -> &GlobalInstance {
        &self.globals[addr]
    }

    pub(crate) fn global_mut(&mut self, addr: GlobalAddr) -> &mut GlobalInstance {
        &mut self.globals[addr]
    }

    pub(crate) fn tag(&self, addr: TagAddr) -> &TagInstance {
        &self.tags[addr]
    }

    pub(crate) fn elem(&self, addr: ElemAddr) -> &ElemInstance {
        &self.elems[addr]
    }

    pub(crate) fn elem_mut(&mut self, addr: ElemAddr) -> &mut ElemInstance {
        &mut self.elems[addr]
    }

    pub(crate) fn data(&self, addr: DataAddr) -> &DataInstance {
        &self.datas[addr]
    }

    pub(crate) fn data_mut(&mut self, addr: DataAddr) -> &mut DataInstance {
        &mut self.datas[addr]
    }

    pub(crate) fn instance_data(&self, handle: InstanceHandle) -> &InstanceData {
        &self.instances[handle]
    }

    // Allocation. Every `add_*` can fail with `OutOfMemory` where an actual
    // buffer is involved.

    pub(crate) fn add_function(&mut self, func: FuncInstance) -> FuncAddr {
        self.funcs.push(func)
    }

    pub(crate) fn add_memory(&mut self, plan: &MemoryPlan) -> crate::Result<MemAddr> {
        let memory = MemoryInstance::new(plan)?;
        Ok(self.memories.push(memory))
    }

    pub(crate) fn add_table(&mut self, plan: &TablePlan, init: u64) -> crate::Result<TableAddr> {
        let table = TableInstance::new(plan, init)?;
        Ok(self.tables.push(table))
    }

    pub(crate) fn add_global(&mut self, global: GlobalInstance) -> GlobalAddr {
        self.globals.push(global)
    }

    /// Allocate a tag with a fresh process-unique identity.
    pub(crate) fn add_tag(&mut self, ty: SharedTypeIndex) -> TagAddr {
        self.add_tag_with_id(ty, mint_tag_identity())
    }

    /// Allocate a tag that keeps an existing identity. Used when an imported
    /// tag is re-registered so re-exports do not mint a new identity.
    pub(crate) fn add_tag_with_id(&mut self, ty: SharedTypeIndex, identity: u64) -> TagAddr {
        self.tags.push(TagInstance { ty, identity })
    }

    pub(crate) fn add_elem(&mut self, elem: ElemInstance) -> ElemAddr {
        self.elems.push(elem)
    }

    pub(crate) fn add_data(&mut self, data: DataInstance) -> DataAddr {
        self.datas.push(data)
    }

    /// Copy a function out of another store into this one. The code
    /// reference is shared; cached derived state (the branch side table) is
    /// invalidated on the copy.
    pub fn import_function_from(&mut self, other: &Store, func: crate::Func) -> crate::Func {
        let copied = other.func(func.addr()).clone_for_share();
        // Signatures must be re-canonicalized into this store's registry.
        let ty = other.types.func_type(copied.ty).clone();
        let ty = self.types.register_func_type(ty);
        let addr = self.funcs.push(FuncInstance { ty, ..copied });
        crate::Func::from_addr(addr)
    }

    /// Re-register another store's tag here, keeping its identity, so
    /// cross-store throws and catches keep matching.
    pub fn import_tag_from(&mut self, other: &Store, tag: crate::Tag) -> crate::Tag {
        let existing = *other.tag(tag.addr());
        let ty = match &other.types.get(existing.ty).composite.inner {
            crate::types::CompositeInnerType::Func(f) => f.clone(),
            _ => unreachable!("tag signatures are function types"),
        };
        let ty = self.types.register_func_type(ty);
        let addr = self.add_tag_with_id(ty, existing.identity);
        crate::Tag::from_addr(addr)
    }

    // The import registry.

    /// Publish `addr` under `(module, name)`.
    pub(crate) fn expose(
        &mut self,
        module: &str,
        name: &str,
        addr: ExternAddr,
    ) -> crate::Result<()> {
        let key = (module.to_string(), name.to_string());
        if self.registry.contains_key(&key) {
            return Err(Error::DuplicateDefinition {
                module: module.to_string(),
                name: name.to_string(),
            });
        }
        self.registry.insert(key, addr);
        Ok(())
    }

    /// Scan the registry for `(module, name)`.
    pub(crate) fn lookup_import(&self, module: &str, name: &str) -> crate::Result<ExternAddr> {
        self.registry
            .get(&(module.to_string(), name.to_string()))
            .copied()
            .ok_or_else(|| Error::import_not_found(module, name))
    }

    /// Register a host function and publish it under `(module, name)`.
    ///
    /// The callback consumes its arguments and produces its results through
    /// the typed `push`/`pop` primitives on [`Caller`].
    ///
    /// [`Caller`]: crate::Caller
    pub fn expose_host_function(
        &mut self,
        module: &str,
        name: &str,
        params: Vec<ValType>,
        results: Vec<ValType>,
        callback: impl Fn(&mut crate::Caller<'_>) -> Result<(), crate::Trap> + 'static,
    ) -> crate::Result<crate::Func> {
        let func = self.register_host_function(params, results, callback);
        self.expose(module, name, ExternAddr::Func(func.addr()))?;
        Ok(func)
    }

    /// Register a host function without publishing it.
    pub fn register_host_function(
        &mut self,
        params: Vec<ValType>,
        results: Vec<ValType>,
        callback: impl Fn(&mut crate::Caller<'_>) -> Result<(), crate::Trap> + 'static,
    ) -> crate::Func {
        let ty = self.types.register_func_type(FuncType {
            params: params.into_boxed_slice(),
            results: results.into_boxed_slice(),
        });
        let addr = self.funcs.push(FuncInstance {
            ty,
            kind: FuncKind::Host(HostFuncData {
                callback: Rc::new(callback) as Rc<HostFn>,
            }),
        });
        crate::Func::from_addr(addr)
    }

    // Interpreter plumbing: the VM and the argument scratch buffer are taken
    // out of the store for the duration of a call and handed back afterwards,
    // so the interpreter can borrow the store mutably while it runs.

    pub(crate) fn with_vm<R>(&mut self, f: impl FnOnce(&mut Vm, &mut Store) -> R) -> R {
        let mut vm = self.vm.take().unwrap_or_default();
        let result = f(&mut vm, self);
        self.vm = Some(vm);
        result
    }

    pub(crate) fn take_vmval_storage(&mut self) -> Vec<VMVal> {
        core::mem::take(&mut self.vmval_storage)
    }

    pub(crate) fn return_vmval_storage(&mut self, vec: Vec<VMVal>) {
        self.vmval_storage = vec;
    }
}
