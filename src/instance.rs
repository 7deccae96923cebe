use crate::const_eval::{ConstExprEvaluator, EvalContext};
use crate::enum_accessors;
use crate::func::{FuncInstance, FuncKind, WasmFuncData};
use crate::global::GlobalInstance;
use crate::indices::{
    DataAddr, DataIndex, DefinedGlobalIndex, DefinedTableIndex, ElemAddr,
    ElemIndex, EntityIndex, ExternAddr, FuncAddr, FuncIndex, GlobalAddr, GlobalIndex,
    InstanceHandle, MemAddr, MemoryIndex, SharedTypeIndex, TableAddr, TableIndex, TagAddr,
    TagIndex, TypeIndex,
};
use crate::module::Module;
use crate::store::{DataInstance, ElemInstance, Store};
use crate::translate::{ConstExpr, DataMode, ElementItems, ElementMode, EntityType, TableInitialValue};
use crate::types::{canon_reftype, canon_valtype};
use crate::values::{refs, Val, VMVal};
use crate::{Error, Func, Global, Memory, Table, Tag};
use cranelift_entity::PrimaryMap;

/// A module linked against a store, with imports resolved and every
/// module-local index translated to a store address. Copyable; the data
/// lives in the store.
#[derive(Debug, Clone, Copy)]
pub struct Instance(pub(crate) InstanceHandle);

/// The per-instance binding tables: one store-address vector per index
/// space, imports occupying the low indices.
#[derive(Debug)]
pub(crate) struct InstanceData {
    pub module: Module,
    pub type_ids: PrimaryMap<TypeIndex, SharedTypeIndex>,
    pub funcs: PrimaryMap<FuncIndex, FuncAddr>,
    pub tables: PrimaryMap<TableIndex, TableAddr>,
    pub memories: PrimaryMap<MemoryIndex, MemAddr>,
    pub globals: PrimaryMap<GlobalIndex, GlobalAddr>,
    pub tags: PrimaryMap<TagIndex, TagAddr>,
    pub elems: PrimaryMap<ElemIndex, ElemAddr>,
    pub datas: PrimaryMap<DataIndex, DataAddr>,
}

impl Instance {
    /// Link `module` into `store`: resolve imports from `imports` (store
    /// addresses in import order), allocate every defined entity, evaluate
    /// initializers, apply active segments, and run the start function.
    pub(crate) fn new(
        store: &mut Store,
        const_eval: &mut ConstExprEvaluator,
        module: &Module,
        imports: &[ExternAddr],
    ) -> crate::Result<Self> {
        let translated = module.translated();
        let handle = InstanceHandle::from_u32(store.instances.len() as u32);

        let type_ids = store.types_mut().register_module_types(&translated.types);

        if imports.len() != translated.imports.len() {
            return Err(Error::ArityMismatch(format!(
                "module declares {} imports, {} provided",
                translated.imports.len(),
                imports.len()
            )));
        }

        // 1. Resolve imports, checking each against its declared type.
        let mut funcs = PrimaryMap::with_capacity(translated.functions.len());
        let mut tables = PrimaryMap::with_capacity(translated.table_plans.len());
        let mut memories = PrimaryMap::with_capacity(translated.memory_plans.len());
        let mut globals = PrimaryMap::with_capacity(translated.globals.len());
        let mut tags = PrimaryMap::with_capacity(translated.tags.len());

        for (import, provided) in translated.imports.iter().zip(imports) {
            let mismatch = || Error::import_type_mismatch(&import.module, &import.name);
            match (&import.ty, provided) {
                (EntityType::Function(index), ExternAddr::Func(addr)) => {
                    let expected = type_ids[translated.functions[*index]];
                    let actual = store.func(*addr).ty;
                    if actual != expected && !store.types().is_subtype(actual, expected) {
                        return Err(mismatch());
                    }
                    funcs.push(*addr);
                }
                (EntityType::Table(index), ExternAddr::Table(addr)) => {
                    let plan = &translated.table_plans[*index];
                    let table = store.table(*addr);
                    let max_ok = match plan.maximum {
                        None => true,
                        Some(required) => {
                            matches!(table.maximum(), Some(provided) if provided <= required)
                        }
                    };
                    let ok = table.element_type == canon_reftype(&plan.element_type, &type_ids)
                        && table.table64 == plan.table64
                        && table.size() >= plan.minimum
                        && max_ok;
                    if !ok {
                        return Err(mismatch());
                    }
                    tables.push(*addr);
                }
                (EntityType::Memory(index), ExternAddr::Memory(addr)) => {
                    let plan = &translated.memory_plans[*index];
                    let memory = store.memory(*addr);
                    let max_ok = match plan.maximum {
                        None => true,
                        Some(required) => {
                            matches!(memory.maximum(), Some(provided) if provided <= required)
                        }
                    };
                    let ok = memory.shared == plan.shared
                        && memory.memory64 == plan.memory64
                        && memory.page_size() == plan.page_size()
                        && memory.size_pages() >= plan.minimum
                        && max_ok;
                    if !ok {
                        return Err(mismatch());
                    }
                    memories.push(*addr);
                }
                (EntityType::Global(index), ExternAddr::Global(addr)) => {
                    let plan = &translated.globals[*index];
                    let global = store.global(*addr);
                    let ok = global.content_type == canon_valtype(&plan.content_type, &type_ids)
                        && global.mutable == plan.mutable;
                    if !ok {
                        return Err(mismatch());
                    }
                    globals.push(*addr);
                }
                (EntityType::Tag(index), ExternAddr::Tag(addr)) => {
                    let expected = type_ids[translated.tags[*index]];
                    if store.tag(*addr).ty != expected {
                        return Err(mismatch());
                    }
                    tags.push(*addr);
                }
                _ => return Err(mismatch()),
            }
        }

        // 2. Allocate defined functions, back-pointing at this instance.
        for func_index in translated
            .functions
            .keys()
            .skip(translated.num_imported_functions as usize)
        {
            let def_index = translated
                .defined_func_index(func_index)
                .expect("imported functions were resolved above");
            let ty = type_ids[translated.functions[func_index]];
            let addr = store.add_function(FuncInstance {
                ty,
                kind: FuncKind::Wasm(WasmFuncData {
                    instance: handle,
                    def_index,
                    module: module.clone(),
                    side_table: None,
                }),
            });
            funcs.push(addr);
        }

        // 3. Allocate defined memories and tables at their declared minima.
        for plan in translated
            .memory_plans
            .values()
            .skip(translated.num_imported_memories as usize)
        {
            memories.push(store.add_memory(plan)?);
        }

        for (i, plan) in translated
            .table_plans
            .values()
            .skip(translated.num_imported_tables as usize)
            .enumerate()
        {
            let mut plan = plan.clone();
            plan.element_type = canon_reftype(&plan.element_type, &type_ids);
            let init = match &translated.table_initializers[DefinedTableIndex::from_u32(i as u32)]
            {
                TableInitialValue::RefNull => refs::NULL,
                TableInitialValue::ConstExpr(expr) => {
                    let ctx = EvalContext {
                        funcs: &funcs,
                        globals: &globals,
                        type_ids: &type_ids,
                    };
                    const_eval.eval(store, &ctx, expr)?.get_ref()
                }
            };
            tables.push(store.add_table(&plan, init)?);
        }

        // 4. Allocate defined globals, evaluating each initializer against
        // the partially-built instance (imported globals already resolved).
        for (i, plan) in translated
            .globals
            .values()
            .skip(translated.num_imported_globals as usize)
            .enumerate()
        {
            let expr = &translated.global_initializers[DefinedGlobalIndex::from_u32(i as u32)];
            let ctx = EvalContext {
                funcs: &funcs,
                globals: &globals,
                type_ids: &type_ids,
            };
            let value = const_eval.eval(store, &ctx, expr)?;
            let addr = store.add_global(GlobalInstance {
                value,
                content_type: canon_valtype(&plan.content_type, &type_ids),
                mutable: plan.mutable,
            });
            globals.push(addr);
        }

        // 5. Allocate defined tags; each gets a fresh identity.
        for type_index in translated
            .tags
            .values()
            .skip(translated.num_imported_tags as usize)
        {
            tags.push(store.add_tag(type_ids[*type_index]));
        }

        // 6. Element and data segments become store entries. Entries are
        // evaluated now; declarative segments are born dropped.
        let mut elems = PrimaryMap::with_capacity(translated.elements.len());
        for segment in translated.elements.values() {
            let entries: Box<[u64]> = match &segment.items {
                ElementItems::Functions(indices) => indices
                    .iter()
                    .map(|f| refs::from_handle(funcs[*f].as_u32()))
                    .collect(),
                ElementItems::Expressions(exprs) => {
                    let mut out = Vec::with_capacity(exprs.len());
                    for expr in exprs.iter() {
                        let ctx = EvalContext {
                            funcs: &funcs,
                            globals: &globals,
                            type_ids: &type_ids,
                        };
                        out.push(const_eval.eval(store, &ctx, expr)?.get_ref());
                    }
                    out.into_boxed_slice()
                }
            };
            elems.push(store.add_elem(ElemInstance {
                element_type: canon_reftype(&segment.element_type, &type_ids),
                entries,
                dropped: matches!(segment.mode, ElementMode::Declarative),
            }));
        }

        let mut datas = PrimaryMap::with_capacity(translated.datas.len());
        for segment in translated.datas.values() {
            datas.push(store.add_data(DataInstance {
                bytes: segment.range.slice(module.image()).into(),
                dropped: false,
            }));
        }

        // 7. Apply active element segments. The bounds check runs before any
        // entry is written, so a failing segment leaves its table untouched;
        // a successfully applied segment is marked dropped.
        for (index, segment) in translated.elements.iter() {
            let ElementMode::Active {
                table_index,
                offset,
            } = &segment.mode
            else {
                continue;
            };

            let table_addr = tables[*table_index];
            let elem_addr = elems[index];
            let ctx = EvalContext {
                funcs: &funcs,
                globals: &globals,
                type_ids: &type_ids,
            };
            let table64 = store.table(table_addr).table64;
            let offset = offset_value(const_eval, store, &ctx, offset, table64)?;

            let entries = store.elem(elem_addr).entries.clone();
            store
                .table_mut(table_addr)
                .init(offset, &entries)
                .map_err(|_| Error::ElementSegmentDoesNotFit)?;
            store.elem_mut(elem_addr).dropped = true;
        }

        // 8. Apply active data segments analogously.
        for (index, segment) in translated.datas.iter() {
            let DataMode::Active {
                memory_index,
                offset,
            } = &segment.mode
            else {
                continue;
            };

            let memory_addr = memories[*memory_index];
            let data_addr = datas[index];
            let ctx = EvalContext {
                funcs: &funcs,
                globals: &globals,
                type_ids: &type_ids,
            };
            let memory64 = store.memory(memory_addr).memory64;
            let offset = offset_value(const_eval, store, &ctx, offset, memory64)?;

            let bytes = store.data(data_addr).bytes.clone();
            let memory = store.memory_mut(memory_addr);
            let start = memory
                .check_range(offset, bytes.len() as u64)
                .map_err(|_| Error::DataSegmentDoesNotFit)?;
            memory.data_mut()[start..start + bytes.len()].copy_from_slice(&bytes);
            store.data_mut(data_addr).dropped = true;
        }

        let data = InstanceData {
            module: module.clone(),
            type_ids,
            funcs,
            tables,
            memories,
            globals,
            tags,
            elems,
            datas,
        };
        let pushed = store.instances.push(data);
        debug_assert_eq!(pushed, handle);
        let instance = Instance(handle);

        // 9. Run the start function on a fresh operand stack. Any trap
        // aborts instantiation.
        if let Some(start) = translated.start {
            let addr = store.instance_data(handle).funcs[start];
            tracing::trace!("running start function {start:?}");
            store
                .with_vm(|vm, store| {
                    let mut empty = Vec::new();
                    vm.invoke(store, addr, &mut empty, 0, 0)
                })
                .map_err(Error::StartTrap)?;
        }

        Ok(instance)
    }

    /// Look up an export of any kind.
    pub fn get_export(&self, store: &Store, name: &str) -> Option<Extern> {
        let data = store.instance_data(self.0);
        let index = data.module.get_export(name)?;
        Some(match index {
            EntityIndex::Function(i) => Extern::Func(Func::from_addr(data.funcs[i])),
            EntityIndex::Table(i) => Extern::Table(Table::from_addr(data.tables[i])),
            EntityIndex::Memory(i) => Extern::Memory(Memory::from_addr(data.memories[i])),
            EntityIndex::Global(i) => Extern::Global(Global::from_addr(data.globals[i])),
            EntityIndex::Tag(i) => Extern::Tag(Tag::from_addr(data.tags[i])),
        })
    }

    /// All exports, in section order.
    pub fn exports<'s>(&self, store: &'s Store) -> impl Iterator<Item = (String, Extern)> + 's {
        let data = store.instance_data(self.0);
        let this = *self;
        data.module
            .exports()
            .map(|(name, _)| name.to_string())
            .collect::<Vec<_>>()
            .into_iter()
            .map(move |name| {
                let ext = this.get_export(store, &name).unwrap();
                (name, ext)
            })
    }

    pub fn get_export_func(&self, store: &Store, name: &str) -> Option<Func> {
        self.get_export(store, name)?.into_func()
    }

    pub fn get_export_memory(&self, store: &Store, name: &str) -> Option<Memory> {
        self.get_export(store, name)?.into_memory()
    }

    pub fn get_export_table(&self, store: &Store, name: &str) -> Option<Table> {
        self.get_export(store, name)?.into_table()
    }

    pub fn get_export_global(&self, store: &Store, name: &str) -> Option<Global> {
        self.get_export(store, name)?.into_global()
    }

    pub fn get_export_tag(&self, store: &Store, name: &str) -> Option<Tag> {
        self.get_export(store, name)?.into_tag()
    }

    /// Call the named exported function.
    ///
    /// # Errors
    ///
    /// [`Error::ExportNotFound`] when no function export has that name, plus
    /// everything [`Func::call`] reports.
    pub fn invoke(
        &self,
        store: &mut Store,
        name: &str,
        args: &[Val],
        results: &mut [Val],
    ) -> crate::Result<()> {
        let func = self
            .get_export_func(store, name)
            .ok_or_else(|| Error::ExportNotFound(name.to_string()))?;
        func.call(store, args, results)
    }

    pub(crate) fn handle(&self) -> InstanceHandle {
        self.0
    }
}

/// An exported entity of any kind.
#[derive(Debug, Clone, Copy)]
pub enum Extern {
    Func(Func),
    Table(Table),
    Memory(Memory),
    Global(Global),
    Tag(Tag),
}

impl Extern {
    enum_accessors! {
        e
        (Func(Func) is_func into_func unwrap_func *e)
        (Table(Table) is_table into_table unwrap_table *e)
        (Memory(Memory) is_memory into_memory unwrap_memory *e)
        (Global(Global) is_global into_global unwrap_global *e)
        (Tag(Tag) is_tag into_tag unwrap_tag *e)
    }

    pub(crate) fn addr(&self) -> ExternAddr {
        match self {
            Extern::Func(f) => ExternAddr::Func(f.addr()),
            Extern::Table(t) => ExternAddr::Table(t.addr()),
            Extern::Memory(m) => ExternAddr::Memory(m.addr()),
            Extern::Global(g) => ExternAddr::Global(g.addr()),
            Extern::Tag(t) => ExternAddr::Tag(t.addr()),
        }
    }
}

/// Evaluate a segment offset expression to an unsigned index, widened per
/// the target's index width.
fn offset_value(
    eval: &mut ConstExprEvaluator,
    store: &mut Store,
    ctx: &EvalContext<'_>,
    expr: &ConstExpr,
    is_64: bool,
) -> crate::Result<u64> {
    let value: VMVal = eval.eval(store, ctx, expr)?;
    Ok(if is_64 {
        value.get_u64()
    } else {
        u64::from(value.get_u32())
    })
}
