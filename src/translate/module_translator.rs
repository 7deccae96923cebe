use crate::errors::Error;
use crate::indices::{
    DataIndex, ElemIndex, EntityIndex, FieldIndex, FuncIndex, GlobalIndex, LabelIndex, LocalIndex,
    MemoryIndex, TableIndex, TagIndex, TypeIndex,
};
use crate::translate::types::{convert_reftype, convert_subtype, convert_valtype};
use crate::translate::{
    CodeRange, ConstExpr, DataMode, DataSegment, ElementItems, ElementMode, ElementSegment,
    EntityType, FunctionBody, GlobalPlan, Import, MemoryPlan, TableInitialValue, TablePlan,
    TranslatedModule,
};
use crate::wasm_unsupported;
use core::mem;
use hashbrown::HashMap;
use wasmparser::{
    BinaryReader, DataKind, DataSectionReader, ElementKind, ElementSectionReader,
    ExportSectionReader, ExternalKind, FuncValidatorAllocations, FunctionSectionReader,
    GlobalSectionReader, ImportSectionReader, IndirectNameMap, MemorySectionReader, Name, NameMap,
    NameSectionReader, Parser, Payload, TableInit, TableSectionReader, TagKind, TagSectionReader,
    TypeRef, TypeSectionReader, Validator, WasmFeatures,
};

/// Every proposal the runtime implements.
pub(crate) fn features() -> WasmFeatures {
    WasmFeatures::MUTABLE_GLOBAL
        | WasmFeatures::SATURATING_FLOAT_TO_INT
        | WasmFeatures::SIGN_EXTENSION
        | WasmFeatures::REFERENCE_TYPES
        | WasmFeatures::MULTI_VALUE
        | WasmFeatures::BULK_MEMORY
        | WasmFeatures::SIMD
        | WasmFeatures::THREADS
        | WasmFeatures::TAIL_CALL
        | WasmFeatures::FLOATS
        | WasmFeatures::MULTI_MEMORY
        | WasmFeatures::EXCEPTIONS
        | WasmFeatures::MEMORY64
        | WasmFeatures::EXTENDED_CONST
        | WasmFeatures::FUNCTION_REFERENCES
        | WasmFeatures::GC
        | WasmFeatures::GC_TYPES
        | WasmFeatures::CUSTOM_PAGE_SIZES
}

/// Walks the binary's sections, validating each against the `Validator` and
/// reading it into a [`TranslatedModule`]. Function bodies are validated here
/// too, but their instruction bytes are only stepped over, never decoded.
pub struct ModuleTranslator<'a> {
    result: TranslatedModule,
    validator: &'a mut Validator,
    func_validator_allocs: FuncValidatorAllocations,
}

impl<'a> ModuleTranslator<'a> {
    pub fn new(validator: &'a mut Validator) -> Self {
        Self {
            result: TranslatedModule::default(),
            validator,
            func_validator_allocs: FuncValidatorAllocations::default(),
        }
    }

    pub fn translate(mut self, data: &[u8]) -> crate::Result<TranslatedModule> {
        let mut parser = Parser::default();
        parser.set_features(*self.validator.features());

        for payload in parser.parse_all(data) {
            self.translate_payload(payload?)?;
        }

        self.validator.reset();
        Ok(self.result)
    }

    fn translate_payload(&mut self, payload: Payload<'_>) -> crate::Result<()> {
        match payload {
            Payload::Version {
                num,
                encoding,
                range,
            } => {
                self.validator
                    .version(num, encoding, &range)
                    .map_err(Error::validation)?;
            }
            Payload::End(offset) => {
                self.validator.end(offset).map_err(Error::validation)?;
            }
            Payload::TypeSection(types) => {
                self.validator
                    .type_section(&types)
                    .map_err(Error::validation)?;
                self.read_type_section(types)?;
            }
            Payload::ImportSection(imports) => {
                self.validator
                    .import_section(&imports)
                    .map_err(Error::validation)?;
                self.read_import_section(imports)?;
            }
            Payload::FunctionSection(functions) => {
                self.validator
                    .function_section(&functions)
                    .map_err(Error::validation)?;
                self.read_function_section(functions)?;
            }
            Payload::TableSection(tables) => {
                self.validator
                    .table_section(&tables)
                    .map_err(Error::validation)?;
                self.read_table_section(tables)?;
            }
            Payload::MemorySection(memories) => {
                self.validator
                    .memory_section(&memories)
                    .map_err(Error::validation)?;
                self.read_memory_section(memories)?;
            }
            Payload::TagSection(tags) => {
                self.validator
                    .tag_section(&tags)
                    .map_err(Error::validation)?;
                self.read_tag_section(tags)?;
            }
            Payload::GlobalSection(globals) => {
                self.validator
                    .global_section(&globals)
                    .map_err(Error::validation)?;
                self.read_global_section(globals)?;
            }
            Payload::ExportSection(exports) => {
                self.validator
                    .export_section(&exports)
                    .map_err(Error::validation)?;
                self.read_export_section(exports)?;
            }
            Payload::StartSection { func, range } => {
                self.validator
                    .start_section(func, &range)
                    .map_err(Error::validation)?;
                self.result.start = Some(FuncIndex::from_u32(func));
            }
            Payload::ElementSection(elements) => {
                self.validator
                    .element_section(&elements)
                    .map_err(Error::validation)?;
                self.read_element_section(elements)?;
            }
            Payload::DataCountSection { count, range } => {
                self.validator
                    .data_count_section(count, &range)
                    .map_err(Error::validation)?;
            }
            Payload::DataSection(section) => {
                self.validator
                    .data_section(&section)
                    .map_err(Error::validation)?;
                self.read_data_section(section)?;
            }
            Payload::CodeSectionStart { count, range, .. } => {
                self.validator
                    .code_section_start(count, &range)
                    .map_err(Error::validation)?;
                self.result.func_bodies.reserve_exact(count as usize);
            }
            Payload::CodeSectionEntry(body) => {
                let func_to_validate = self
                    .validator
                    .code_section_entry(&body)
                    .map_err(Error::validation)?;

                let mut func_validator =
                    func_to_validate.into_validator(mem::take(&mut self.func_validator_allocs));
                func_validator
                    .validate(&body)
                    .map_err(Error::validation)?;
                self.func_validator_allocs = func_validator.into_allocations();

                self.read_code_entry(body)?;
            }
            Payload::CustomSection(sec) if sec.name() == "name" => {
                // Name section errors are non-fatal; a botched name
                // subsection degrades diagnostics, not semantics.
                let reader =
                    NameSectionReader::new(BinaryReader::new(sec.data(), sec.data_offset()));
                if let Err(e) = self.read_name_section(reader) {
                    tracing::warn!("ignoring malformed name section: {e}");
                }
            }
            Payload::CustomSection(sec) => {
                tracing::trace!("keeping custom section `{}` as opaque payload", sec.name());
                let start = sec.data_offset();
                self.result.custom_sections.push((
                    sec.name().to_string(),
                    CodeRange::new(start..start + sec.data().len()),
                ));
            }
            Payload::ModuleSection { .. }
            | Payload::InstanceSection(_)
            | Payload::CoreTypeSection(_)
            | Payload::ComponentSection { .. }
            | Payload::ComponentInstanceSection(_)
            | Payload::ComponentAliasSection(_)
            | Payload::ComponentTypeSection(_)
            | Payload::ComponentCanonicalSection(_)
            | Payload::ComponentStartSection { .. }
            | Payload::ComponentImportSection(_)
            | Payload::ComponentExportSection(_) => {
                return Err(wasm_unsupported!("component module"));
            }
            p => tracing::warn!("unknown section {p:?}"),
        }

        Ok(())
    }

    fn read_type_section(&mut self, types: TypeSectionReader<'_>) -> crate::Result<()> {
        let count = types.count();
        self.result.types.types.reserve_exact(count as usize);

        for rec_group in types {
            let rec_group = rec_group?;
            let start = self.result.types.types.len() as u32;
            for ty in rec_group.types() {
                self.result.types.types.push(convert_subtype(ty)?);
            }
            let end = self.result.types.types.len() as u32;
            self.result.types.rec_groups.push((start, end));
        }

        Ok(())
    }

    fn read_import_section(&mut self, imports: ImportSectionReader<'_>) -> crate::Result<()> {
        self.result.imports.reserve_exact(imports.count() as usize);

        for import in imports {
            let import = import?;
            let ty = match import.ty {
                TypeRef::Func(index) => {
                    let index = TypeIndex::from_u32(index);
                    self.result.num_imported_functions += 1;
                    EntityType::Function(self.result.functions.push(index))
                }
                TypeRef::Table(ty) => {
                    self.result.num_imported_tables += 1;
                    EntityType::Table(self.result.table_plans.push(table_plan(ty)))
                }
                TypeRef::Memory(ty) => {
                    self.result.num_imported_memories += 1;
                    EntityType::Memory(self.result.memory_plans.push(MemoryPlan::for_memory(ty)))
                }
                TypeRef::Global(ty) => {
                    self.result.num_imported_globals += 1;
                    EntityType::Global(self.result.globals.push(global_plan(ty)))
                }
                TypeRef::Tag(ty) => {
                    debug_assert_eq!(ty.kind, TagKind::Exception);
                    self.result.num_imported_tags += 1;
                    EntityType::Tag(
                        self.result
                            .tags
                            .push(TypeIndex::from_u32(ty.func_type_idx)),
                    )
                }
            };

            self.result.imports.push(Import {
                module: import.module.to_string(),
                name: import.name.to_string(),
                ty,
            });
        }

        Ok(())
    }

    fn read_function_section(&mut self, functions: FunctionSectionReader<'_>) -> crate::Result<()> {
        self.result
            .functions
            .reserve_exact(functions.count() as usize);

        for index in functions {
            self.result.functions.push(TypeIndex::from_u32(index?));
        }

        Ok(())
    }

    fn read_table_section(&mut self, tables: TableSectionReader<'_>) -> crate::Result<()> {
        self.result
            .table_plans
            .reserve_exact(tables.count() as usize);

        for table in tables {
            let table = table?;
            self.result.table_plans.push(table_plan(table.ty));

            let init = match table.init {
                TableInit::RefNull => TableInitialValue::RefNull,
                TableInit::Expr(expr) => {
                    TableInitialValue::ConstExpr(ConstExpr::from_wasmparser(expr)?)
                }
            };
            self.result.table_initializers.push(init);
        }

        Ok(())
    }

    fn read_memory_section(&mut self, memories: MemorySectionReader<'_>) -> crate::Result<()> {
        self.result
            .memory_plans
            .reserve_exact(memories.count() as usize);

        for ty in memories {
            self.result.memory_plans.push(MemoryPlan::for_memory(ty?));
        }

        Ok(())
    }

    fn read_tag_section(&mut self, tags: TagSectionReader<'_>) -> crate::Result<()> {
        self.result.tags.reserve_exact(tags.count() as usize);

        for tag in tags {
            let tag = tag?;
            debug_assert_eq!(tag.kind, TagKind::Exception);
            self.result
                .tags
                .push(TypeIndex::from_u32(tag.func_type_idx));
        }

        Ok(())
    }

    fn read_global_section(&mut self, globals: GlobalSectionReader<'_>) -> crate::Result<()> {
        self.result.globals.reserve_exact(globals.count() as usize);
        self.result
            .global_initializers
            .reserve_exact(globals.count() as usize);

        for global in globals {
            let global = global?;
            self.result.globals.push(global_plan(global.ty));
            self.result
                .global_initializers
                .push(ConstExpr::from_wasmparser(global.init_expr)?);
        }

        Ok(())
    }

    fn read_export_section(&mut self, exports: ExportSectionReader<'_>) -> crate::Result<()> {
        for export in exports {
            let export = export?;
            let index = match export.kind {
                ExternalKind::Func => EntityIndex::Function(FuncIndex::from_u32(export.index)),
                ExternalKind::Table => EntityIndex::Table(TableIndex::from_u32(export.index)),
                ExternalKind::Memory => EntityIndex::Memory(MemoryIndex::from_u32(export.index)),
                ExternalKind::Global => EntityIndex::Global(GlobalIndex::from_u32(export.index)),
                ExternalKind::Tag => EntityIndex::Tag(TagIndex::from_u32(export.index)),
            };

            self.result
                .exports
                .insert(export.name.to_string(), index);
            self.result.export_order.push(export.name.to_string());
        }

        Ok(())
    }

    fn read_element_section(&mut self, elements: ElementSectionReader<'_>) -> crate::Result<()> {
        for element in elements {
            let element = element?;

            let (element_type, items) = match element.items {
                wasmparser::ElementItems::Functions(funcs) => {
                    let mut out = Vec::with_capacity(funcs.count() as usize);
                    for func_idx in funcs {
                        out.push(FuncIndex::from_u32(func_idx?));
                    }
                    (
                        crate::types::RefType::FUNCREF,
                        ElementItems::Functions(out.into_boxed_slice()),
                    )
                }
                wasmparser::ElementItems::Expressions(ty, exprs) => {
                    let mut out = Vec::with_capacity(exprs.count() as usize);
                    for expr in exprs {
                        out.push(ConstExpr::from_wasmparser(expr?)?);
                    }
                    (
                        convert_reftype(ty),
                        ElementItems::Expressions(out.into_boxed_slice()),
                    )
                }
            };

            let mode = match element.kind {
                ElementKind::Active {
                    table_index,
                    offset_expr,
                } => ElementMode::Active {
                    table_index: TableIndex::from_u32(table_index.unwrap_or(0)),
                    offset: ConstExpr::from_wasmparser(offset_expr)?,
                },
                ElementKind::Passive => ElementMode::Passive,
                ElementKind::Declared => ElementMode::Declarative,
            };

            self.result.elements.push(ElementSegment {
                element_type,
                mode,
                items,
            });
        }

        Ok(())
    }

    fn read_data_section(&mut self, section: DataSectionReader<'_>) -> crate::Result<()> {
        for entry in section {
            let entry = entry?;

            let mode = match entry.kind {
                DataKind::Active {
                    memory_index,
                    offset_expr,
                } => DataMode::Active {
                    memory_index: MemoryIndex::from_u32(memory_index),
                    offset: ConstExpr::from_wasmparser(offset_expr)?,
                },
                DataKind::Passive => DataMode::Passive,
            };

            // The payload is the tail of the entry, after the mode header.
            let payload_start = entry.range.end - entry.data.len();
            self.result.datas.push(DataSegment {
                mode,
                range: CodeRange::new(payload_start..entry.range.end),
            });
        }

        Ok(())
    }

    fn read_code_entry(&mut self, body: wasmparser::FunctionBody<'_>) -> crate::Result<()> {
        let mut reader = body.get_binary_reader();

        let mut locals = Vec::new();
        for _ in 0..reader.read_var_u32()? {
            let count = reader.read_var_u32()?;
            let ty: wasmparser::ValType = reader.read()?;
            let ty = convert_valtype(ty);
            locals.extend(core::iter::repeat(ty).take(count as usize));
        }

        self.result.func_bodies.push(FunctionBody {
            locals: locals.into_boxed_slice(),
            code: CodeRange::new(reader.original_position()..body.range().end),
        });

        Ok(())
    }

    fn read_name_section(&mut self, reader: NameSectionReader<'_>) -> crate::Result<()> {
        fn direct<I: Copy + Eq + core::hash::Hash>(
            names: NameMap<'_>,
            make: impl Fn(u32) -> I,
            out: &mut HashMap<I, String>,
        ) -> crate::Result<()> {
            for name in names {
                let name = name?;
                out.insert(make(name.index), name.name.to_string());
            }
            Ok(())
        }

        fn indirect<O, I>(
            names: IndirectNameMap<'_>,
            make_outer: impl Fn(u32) -> O,
            make_inner: impl Fn(u32) -> I,
            out: &mut HashMap<O, HashMap<I, String>>,
        ) -> crate::Result<()>
        where
            O: Copy + Eq + core::hash::Hash,
            I: Copy + Eq + core::hash::Hash,
        {
            for naming in names {
                let naming = naming?;
                let mut inner = HashMap::default();
                for name in naming.names {
                    let name = name?;
                    inner.insert(make_inner(name.index), name.name.to_string());
                }
                out.insert(make_outer(naming.index), inner);
            }
            Ok(())
        }

        let names = &mut self.result.names;
        for subsection in reader {
            match subsection? {
                Name::Module { name, .. } => names.module_name = Some(name.to_string()),
                Name::Function(map) => {
                    direct(map, FuncIndex::from_u32, &mut names.func_names)?;
                }
                Name::Local(map) => indirect(
                    map,
                    FuncIndex::from_u32,
                    LocalIndex::from_u32,
                    &mut names.locals_names,
                )?,
                Name::Label(map) => indirect(
                    map,
                    FuncIndex::from_u32,
                    LabelIndex::from_u32,
                    &mut names.labels_names,
                )?,
                Name::Global(map) => {
                    direct(map, GlobalIndex::from_u32, &mut names.global_names)?;
                }
                Name::Data(map) => direct(map, DataIndex::from_u32, &mut names.data_names)?,
                Name::Type(map) => direct(map, TypeIndex::from_u32, &mut names.type_names)?,
                Name::Table(map) => direct(map, TableIndex::from_u32, &mut names.table_names)?,
                Name::Memory(map) => direct(map, MemoryIndex::from_u32, &mut names.memory_names)?,
                Name::Element(map) => {
                    direct(map, ElemIndex::from_u32, &mut names.element_names)?;
                }
                Name::Field(map) => indirect(
                    map,
                    TypeIndex::from_u32,
                    FieldIndex::from_u32,
                    &mut names.fields_names,
                )?,
                Name::Tag(map) => direct(map, TagIndex::from_u32, &mut names.tag_names)?,
                Name::Unknown { .. } => {}
            }
        }

        Ok(())
    }
}

fn table_plan(ty: wasmparser::TableType) -> TablePlan {
    TablePlan {
        element_type: convert_reftype(ty.element_type),
        minimum: ty.initial,
        maximum: ty.maximum,
        table64: ty.table64,
        shared: ty.shared,
    }
}

fn global_plan(ty: wasmparser::GlobalType) -> GlobalPlan {
    GlobalPlan {
        content_type: convert_valtype(ty.content_type),
        mutable: ty.mutable,
        shared: ty.shared,
    }
}
