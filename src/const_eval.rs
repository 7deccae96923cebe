use crate::gc::{ArrayObj, GcObject, StructObj};
use crate::indices::{FuncAddr, FuncIndex, GlobalAddr, GlobalIndex, SharedTypeIndex, TypeIndex};
use crate::store::Store;
use crate::translate::{ConstExpr, ConstOp};
use crate::types::CompositeInnerType;
use crate::values::{refs, VMVal};
use crate::wasm_unsupported;
use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

/// The address vectors a constant expression may reference while an instance
/// is still being built: functions and globals resolved so far, plus the
/// module-to-shared type map for GC constructors.
pub(crate) struct EvalContext<'a> {
    pub funcs: &'a PrimaryMap<FuncIndex, FuncAddr>,
    pub globals: &'a PrimaryMap<GlobalIndex, GlobalAddr>,
    pub type_ids: &'a PrimaryMap<TypeIndex, SharedTypeIndex>,
}

/// Evaluates constant expressions: global initializers, table initial
/// values, element entries, and segment offsets.
///
/// Constant expressions are pure. They read imported immutable globals,
/// build numeric constants with the extended-const arithmetic, reference
/// functions, and allocate GC objects; validation has already rejected
/// anything else.
#[derive(Debug, Default)]
pub struct ConstExprEvaluator {
    stack: SmallVec<[VMVal; 2]>,
}

impl ConstExprEvaluator {
    pub(crate) fn eval(
        &mut self,
        store: &mut Store,
        ctx: &EvalContext<'_>,
        expr: &ConstExpr,
    ) -> crate::Result<VMVal> {
        self.stack.clear();

        for op in expr.ops() {
            match op {
                ConstOp::I32Const(value) => self.push(VMVal::i32(value)),
                ConstOp::I64Const(value) => self.push(VMVal::i64(value)),
                ConstOp::F32Const(value) => self.push(VMVal::f32(value)),
                ConstOp::F64Const(value) => self.push(VMVal::f64(value)),
                ConstOp::V128Const(value) => self.push(VMVal::v128(u128::from_le_bytes(value))),
                ConstOp::GlobalGet(index) => {
                    let addr = ctx.globals[index];
                    self.push(store.global(addr).value);
                }
                ConstOp::RefNull => self.push(VMVal::ref_(refs::NULL)),
                ConstOp::RefI31 => {
                    let value = self.pop().get_i32();
                    self.push(VMVal::ref_(refs::from_i31(value)));
                }
                ConstOp::RefFunc(index) => {
                    let addr = ctx.funcs[index];
                    self.push(VMVal::ref_(refs::from_handle(addr.as_u32())));
                }
                ConstOp::I32Add => {
                    let (arg1, arg2) = self.pop2();
                    self.push(VMVal::i32(arg1.get_i32().wrapping_add(arg2.get_i32())));
                }
                ConstOp::I32Sub => {
                    let (arg1, arg2) = self.pop2();
                    self.push(VMVal::i32(arg1.get_i32().wrapping_sub(arg2.get_i32())));
                }
                ConstOp::I32Mul => {
                    let (arg1, arg2) = self.pop2();
                    self.push(VMVal::i32(arg1.get_i32().wrapping_mul(arg2.get_i32())));
                }
                ConstOp::I64Add => {
                    let (arg1, arg2) = self.pop2();
                    self.push(VMVal::i64(arg1.get_i64().wrapping_add(arg2.get_i64())));
                }
                ConstOp::I64Sub => {
                    let (arg1, arg2) = self.pop2();
                    self.push(VMVal::i64(arg1.get_i64().wrapping_sub(arg2.get_i64())));
                }
                ConstOp::I64Mul => {
                    let (arg1, arg2) = self.pop2();
                    self.push(VMVal::i64(arg1.get_i64().wrapping_mul(arg2.get_i64())));
                }
                ConstOp::StructNew(type_index) => {
                    let ty = ctx.type_ids[type_index];
                    let field_count = match &store.types().get(ty).composite.inner {
                        CompositeInnerType::Struct(s) => s.fields.len(),
                        _ => return Err(wasm_unsupported!("struct.new of non-struct type")),
                    };
                    let start = self.stack.len() - field_count;
                    let fields = self.stack.drain(start..).collect();
                    let bits = store.gc.alloc(GcObject::Struct(StructObj { ty, fields }));
                    self.push(VMVal::ref_(bits));
                }
                ConstOp::StructNewDefault(type_index) => {
                    let ty = ctx.type_ids[type_index];
                    let field_count = match &store.types().get(ty).composite.inner {
                        CompositeInnerType::Struct(s) => s.fields.len(),
                        _ => return Err(wasm_unsupported!("struct.new of non-struct type")),
                    };
                    let fields = vec![VMVal::ZERO; field_count].into_boxed_slice();
                    let bits = store.gc.alloc(GcObject::Struct(StructObj { ty, fields }));
                    self.push(VMVal::ref_(bits));
                }
                ConstOp::ArrayNew(type_index) => {
                    let ty = ctx.type_ids[type_index];
                    let len = self.pop().get_u32() as usize;
                    let value = self.pop();
                    let bits = store.gc.alloc(GcObject::Array(ArrayObj {
                        ty,
                        elems: vec![value; len],
                    }));
                    self.push(VMVal::ref_(bits));
                }
                ConstOp::ArrayNewDefault(type_index) => {
                    let ty = ctx.type_ids[type_index];
                    let len = self.pop().get_u32() as usize;
                    let bits = store.gc.alloc(GcObject::Array(ArrayObj {
                        ty,
                        elems: vec![VMVal::ZERO; len],
                    }));
                    self.push(VMVal::ref_(bits));
                }
                ConstOp::ArrayNewFixed { type_index, len } => {
                    let ty = ctx.type_ids[type_index];
                    let start = self.stack.len() - len as usize;
                    let elems = self.stack.drain(start..).collect();
                    let bits = store.gc.alloc(GcObject::Array(ArrayObj { ty, elems }));
                    self.push(VMVal::ref_(bits));
                }
                // Both conversions preserve the encoded bits; the type view
                // changes, the value does not.
                ConstOp::AnyConvertExtern | ConstOp::ExternConvertAny => {}
            }
        }

        debug_assert_eq!(self.stack.len(), 1);
        Ok(self.stack.pop().expect("empty const-expr stack"))
    }

    fn push(&mut self, val: VMVal) {
        self.stack.push(val);
    }

    fn pop(&mut self) -> VMVal {
        self.stack.pop().expect("const-expr stack underflow")
    }

    fn pop2(&mut self) -> (VMVal, VMVal) {
        let v2 = self.pop();
        let v1 = self.pop();
        (v1, v2)
    }
}
