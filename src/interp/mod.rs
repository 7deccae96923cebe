//! The stack virtual machine.
//!
//! Execution state is three explicit stacks: 128-bit operand slots, call
//! frames, and block labels. Frames are plain vector entries, never host
//! stack frames, so deep wasm recursion turns into a [`Trap::StackOverflow`]
//! instead of exhausting the host stack; host→wasm→host re-entry pushes
//! alternating activations onto the same vectors.
//!
//! A frame's locals live at the bottom of its operand-stack window
//! (parameters first, then zero-initialized declared locals); the operand
//! area grows above them. Labels record where a branch lands, how many
//! values it carries, and the operand height it resets to.

mod atomic;
mod code;
mod exec;
mod gc_ops;
mod simd;

pub(crate) use code::SideTable;
use code::CatchKind;

use crate::func::{FuncKind, HostFn};
use crate::indices::{FuncAddr, InstanceHandle};
use crate::instance::Instance;
use crate::module::Module;
use crate::store::Store;
use crate::trap::Trap;
use crate::types::ValType;
use crate::values::{Val, VMVal};
use crate::{Memory, MAX_CALL_DEPTH, MAX_OPERAND_SLOTS};
use smallvec::SmallVec;
use std::rc::Rc;
use std::sync::Arc;

#[derive(Debug)]
pub(crate) struct Frame {
    pub func: FuncAddr,
    pub instance: InstanceHandle,
    pub module: Module,
    /// Saved program counter while a callee runs; live in a local otherwise.
    pub pc: usize,
    pub code_end: u32,
    /// Operand index of the first local.
    pub base: usize,
    pub num_locals: usize,
    pub num_results: usize,
    pub labels_base: usize,
    pub side: Arc<SideTable>,
}

/// One active block, loop, if, or try_table.
#[derive(Debug)]
pub(crate) struct Label {
    /// Values a branch to this label carries.
    pub arity: u32,
    /// Operand height a branch resets to (entry height minus params).
    pub height: u32,
    /// Where a branch lands: after `end` for blocks, the body start for
    /// loops.
    pub target: u32,
    pub is_loop: bool,
    /// Catch clauses when this label is a `try_table`.
    pub catches: SmallVec<[ResolvedCatch; 2]>,
}

/// A catch clause with its tag resolved to a process-unique identity.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedCatch {
    pub kind: CatchKind,
    /// Tag identity to match; unused for the catch_all kinds.
    pub identity: u64,
    /// Branch depth, relative to the context enclosing the try_table.
    pub label: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Vm {
    pub(crate) stack: Vec<VMVal>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) labels: Vec<Label>,
}

impl Vm {
    /// Run `func` with arguments in `values[..nparams]`, leaving results in
    /// `values[..nresults]`. Re-entrant: an invocation nested under a host
    /// call stacks its frames on top of the outer ones and unwinds back to
    /// exactly this boundary on a trap.
    pub fn invoke(
        &mut self,
        store: &mut Store,
        func: FuncAddr,
        values: &mut Vec<VMVal>,
        nparams: usize,
        nresults: usize,
    ) -> Result<(), Trap> {
        let frames_base = self.frames.len();
        let stack_base = self.stack.len();
        let labels_base = self.labels.len();

        let result = self.invoke_inner(store, func, values, nparams, nresults, frames_base);

        if result.is_err() {
            // A trap unwinds every frame of this invocation; the store and
            // the outer activations stay valid.
            self.frames.truncate(frames_base);
            self.stack.truncate(stack_base);
            self.labels.truncate(labels_base);
        }
        result
    }

    fn invoke_inner(
        &mut self,
        store: &mut Store,
        func: FuncAddr,
        values: &mut Vec<VMVal>,
        nparams: usize,
        nresults: usize,
        frames_base: usize,
    ) -> Result<(), Trap> {
        let stack_base = self.stack.len();

        for value in values.iter().take(nparams) {
            self.push(*value)?;
        }

        match &store.func(func).kind {
            FuncKind::Wasm(_) => {
                self.push_wasm_frame(store, func, nparams)?;
                self.run(store, frames_base)?;
            }
            FuncKind::Host(host) => {
                let callback = Rc::clone(&host.callback);
                let ty = store.func(func).ty;
                self.call_host(store, &callback, ty, None)?;
            }
        }

        debug_assert_eq!(self.stack.len(), stack_base + nresults);
        if values.len() < nresults {
            values.resize(nresults, VMVal::ZERO);
        }
        for (i, slot) in self.stack.drain(stack_base..).enumerate() {
            values[i] = slot;
        }
        Ok(())
    }

    /// Invoke with typed values; used for host-initiated re-entry through
    /// [`Caller::call`].
    pub(crate) fn call_values(
        &mut self,
        store: &mut Store,
        func: crate::Func,
        params: &[Val],
        results: &mut [Val],
    ) -> crate::Result<()> {
        let ty = func.ty(store);
        if params.len() != ty.params.len() || results.len() != ty.results.len() {
            return Err(crate::Error::ArityMismatch(format!(
                "expected {} arguments and {} results",
                ty.params.len(),
                ty.results.len()
            )));
        }

        let mut values: Vec<VMVal> = params.iter().map(|v| v.to_vmval()).collect();
        values.resize(params.len().max(ty.results.len()), VMVal::ZERO);
        self.invoke(
            store,
            func.addr(),
            &mut values,
            params.len(),
            ty.results.len(),
        )?;
        for (i, slot) in results.iter_mut().enumerate() {
            *slot = Val::from_vmval(store, values[i], &ty.results[i]);
        }
        Ok(())
    }

    // Operand-stack primitives. The depth limit is what turns runaway
    // recursion into a recoverable trap.

    #[inline]
    pub(crate) fn push(&mut self, value: VMVal) -> Result<(), Trap> {
        if self.stack.len() >= MAX_OPERAND_SLOTS {
            return Err(Trap::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> VMVal {
        self.stack.pop().expect("operand stack underflow")
    }

    #[inline]
    pub(crate) fn peek(&self) -> VMVal {
        *self.stack.last().expect("operand stack underflow")
    }

    /// Push a frame for a wasm function whose `nparams` arguments are
    /// already on the operand stack.
    pub(crate) fn push_wasm_frame(
        &mut self,
        store: &mut Store,
        func: FuncAddr,
        nparams: usize,
    ) -> Result<(), Trap> {
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(Trap::StackOverflow);
        }

        let (module, instance, code_start, code_end, num_locals, side) =
            ensure_side_table(store, func);
        let num_results = store
            .types()
            .func_type(store.func(func).ty)
            .results
            .len();

        let base = self.stack.len() - nparams;
        // Declared locals are zero-initialized; the all-zero slot is also
        // the null reference, so one fill covers every type.
        for _ in 0..num_locals {
            self.push(VMVal::ZERO)?;
        }

        // The function body acts as an implicit outermost label: a branch to
        // it jumps to the final `end`, which then returns. `labels_base`
        // names this label's slot.
        let labels_base = self.labels.len();
        self.labels.push(Label {
            arity: num_results as u32,
            height: self.stack.len() as u32,
            target: code_end - 1,
            is_loop: false,
            catches: SmallVec::new(),
        });

        self.frames.push(Frame {
            func,
            instance,
            module,
            pc: code_start as usize,
            code_end,
            base,
            num_locals: nparams + num_locals,
            num_results,
            labels_base,
            side,
        });
        Ok(())
    }

    /// Run a host callback against the current operand stack, enforcing the
    /// declared signature around it.
    pub(crate) fn call_host(
        &mut self,
        store: &mut Store,
        callback: &Rc<HostFn>,
        ty: crate::indices::SharedTypeIndex,
        instance: Option<Instance>,
    ) -> Result<(), Trap> {
        let func_ty = store.types().func_type(ty);
        let params: SmallVec<[ValType; 8]> = func_ty.params.iter().copied().collect();
        let results: SmallVec<[ValType; 4]> = func_ty.results.iter().copied().collect();
        let expected_height = self.stack.len() - params.len() + results.len();

        let mut caller = Caller {
            vm: self,
            store,
            instance,
            params,
            results,
            popped: 0,
            pushed: 0,
        };
        callback(&mut caller)?;

        if self.stack.len() != expected_height {
            tracing::warn!("host function broke the operand stack contract");
            return Err(Trap::HostTrap);
        }
        Ok(())
    }
}

fn ensure_side_table(
    store: &mut Store,
    func: FuncAddr,
) -> (Module, InstanceHandle, u32, u32, usize, Arc<SideTable>) {
    let instance_func = store.func(func);
    let FuncKind::Wasm(data) = &instance_func.kind else {
        unreachable!("wasm frame for a host function")
    };

    let module = data.module.clone();
    let instance = data.instance;
    let def_index = data.def_index;
    let body = &module.translated().func_bodies[def_index];
    let (start, end, num_locals) = (body.code.start, body.code.end, body.locals.len());

    let side = if let Some(side) = &data.side_table {
        Arc::clone(side)
    } else {
        let side = Arc::new(SideTable::build(
            module.image(),
            start as usize,
            end as usize,
        ));
        if let FuncKind::Wasm(data) = &mut store.func_mut(func).kind {
            data.side_table = Some(Arc::clone(&side));
        }
        side
    };

    (module, instance, start, end, num_locals, side)
}

/// A host function's view of its caller.
///
/// Arguments are consumed with the typed `pop_*` primitives (topmost, i.e.
/// rightmost, argument first) or all at once with [`Caller::args`]; results
/// are produced with the typed `push_*` primitives in declaration order.
/// Each accessor checks the declared signature and refuses type confusion
/// with a [`Trap::HostTrap`].
pub struct Caller<'a> {
    vm: &'a mut Vm,
    store: &'a mut Store,
    instance: Option<Instance>,
    params: SmallVec<[ValType; 8]>,
    results: SmallVec<[ValType; 4]>,
    popped: usize,
    pushed: usize,
}

impl Caller<'_> {
    fn pop_checked(&mut self, expected: ValType) -> Result<VMVal, Trap> {
        let remaining = self.params.len().checked_sub(self.popped + 1);
        let Some(index) = remaining else {
            tracing::warn!("host function popped more arguments than declared");
            return Err(Trap::HostTrap);
        };
        if self.params[index] != expected && !(expected.is_ref() && self.params[index].is_ref()) {
            tracing::warn!(
                "host function popped {expected}, argument {index} is {}",
                self.params[index]
            );
            return Err(Trap::HostTrap);
        }
        self.popped += 1;
        Ok(self.vm.pop())
    }

    fn push_checked(&mut self, ty: ValType, value: VMVal) -> Result<(), Trap> {
        let Some(expected) = self.results.get(self.pushed) else {
            tracing::warn!("host function pushed more results than declared");
            return Err(Trap::HostTrap);
        };
        if *expected != ty && !(ty.is_ref() && expected.is_ref()) {
            tracing::warn!("host function pushed {ty}, result {} is {expected}", self.pushed);
            return Err(Trap::HostTrap);
        }
        self.pushed += 1;
        self.vm.push(value)
    }

    pub fn pop_i32(&mut self) -> Result<i32, Trap> {
        Ok(self.pop_checked(ValType::I32)?.get_i32())
    }

    pub fn pop_u32(&mut self) -> Result<u32, Trap> {
        Ok(self.pop_checked(ValType::I32)?.get_u32())
    }

    pub fn pop_i64(&mut self) -> Result<i64, Trap> {
        Ok(self.pop_checked(ValType::I64)?.get_i64())
    }

    pub fn pop_f32(&mut self) -> Result<f32, Trap> {
        Ok(self.pop_checked(ValType::F32)?.get_f32())
    }

    pub fn pop_f64(&mut self) -> Result<f64, Trap> {
        Ok(self.pop_checked(ValType::F64)?.get_f64())
    }

    pub fn push_i32(&mut self, value: i32) -> Result<(), Trap> {
        self.push_checked(ValType::I32, VMVal::i32(value))
    }

    pub fn push_u32(&mut self, value: u32) -> Result<(), Trap> {
        self.push_checked(ValType::I32, VMVal::u32(value))
    }

    pub fn push_i64(&mut self, value: i64) -> Result<(), Trap> {
        self.push_checked(ValType::I64, VMVal::i64(value))
    }

    pub fn push_f32(&mut self, value: f32) -> Result<(), Trap> {
        self.push_checked(ValType::F32, VMVal::f32(value.to_bits()))
    }

    pub fn push_f64(&mut self, value: f64) -> Result<(), Trap> {
        self.push_checked(ValType::F64, VMVal::f64(value.to_bits()))
    }

    /// Pop all remaining arguments, returned in declaration order.
    pub fn args(&mut self) -> Result<Vec<Val>, Trap> {
        let remaining = self.params.len() - self.popped;
        let mut out = vec![Val::I32(0); remaining];
        for i in (0..remaining).rev() {
            let ty = self.params[self.popped + i];
            let raw = self.pop_checked(ty)?;
            out[i] = Val::from_vmval(self.store, raw, &ty);
        }
        // pop_checked walked `popped` forward past the values we consumed
        // from the right; order in `out` is already left-to-right.
        Ok(out)
    }

    /// The instance whose code called this host function, if any.
    pub fn instance(&self) -> Option<Instance> {
        self.instance
    }

    /// The caller's exported linear memory, by WASI convention the export
    /// named `memory`.
    pub fn memory(&self) -> Option<Memory> {
        self.instance?.get_export_memory(self.store, "memory")
    }

    /// Bounds-checked read from the caller's exported memory.
    pub fn read_memory(&self, offset: u64, buf: &mut [u8]) -> Result<(), Trap> {
        let memory = self.memory().ok_or(Trap::HostTrap)?;
        memory
            .read(self.store, offset, buf)
            .map_err(|_| Trap::MemoryOutOfBounds)
    }

    /// Bounds-checked write into the caller's exported memory.
    pub fn write_memory(&mut self, offset: u64, data: &[u8]) -> Result<(), Trap> {
        let memory = self.memory().ok_or(Trap::HostTrap)?;
        memory
            .write(self.store, offset, data)
            .map_err(|_| Trap::MemoryOutOfBounds)
    }

    /// Re-enter wasm from a host function. The nested activation shares the
    /// same frame and operand vectors.
    pub fn call(
        &mut self,
        func: crate::Func,
        params: &[Val],
        results: &mut [Val],
    ) -> crate::Result<()> {
        self.vm.call_values(self.store, func, params, results)
    }

    pub fn store(&self) -> &Store {
        self.store
    }

    pub fn store_mut(&mut self) -> &mut Store {
        self.store
    }
}
