//! One-shot lowering of a call plan into a flat instruction routine.
//!
//! The pass walks the computed nodes once, in order. Parameters keep their
//! index as slot number; every non-void temporary gets the next free slot.
//! A per-slot table of statically known types lets the pass drop casts and
//! frame-shape checks it has already proven.

use std::sync::Arc;

use anyhow::Result;

use crate::callable::{CallableRef, Intrinsic, Target, narrowing_class};
use crate::config::EngineOptions;
use crate::error::EngineError;
use crate::plan::{Arg, CallPlan, Constraint, Node, NodeKind};
use crate::val::{ClassRef, ErasedSig, Obj, Value, class};

mod exec;
mod idiom;
mod insn;

pub use insn::{Insn, LoweredRoutine, RK_CONST_BIT, RK_INDEX_MASK, rk_index, rk_is_const, rk_make_const};

/// What lowering has proven about the value in a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Known {
    /// Null or an instance of the class.
    Class(ClassRef),
    /// A frame of exactly this shape.
    Shape(Arc<str>),
}

impl Known {
    fn class(&self) -> &ClassRef {
        match self {
            Known::Class(class) => class,
            Known::Shape(_) => class::frame(),
        }
    }

    fn implies(&self, class: &ClassRef) -> bool {
        self.class().is_subclass_of(class)
    }
}

pub(crate) struct Lowering<'p> {
    plan: &'p CallPlan,
    uses: Vec<u32>,
    slots: Vec<Option<u16>>,
    known: Vec<Option<Known>>,
    consts: Vec<Value>,
    code: Vec<Insn>,
}

/// Lowers `plan` without installing the result.
pub fn lower(plan: &CallPlan) -> Result<LoweredRoutine> {
    let mut lowering = Lowering::new(plan)?;
    lowering.run()?;
    Ok(lowering.finish())
}

/// Lowers `plan` and installs the routine, unless one is installed already.
pub fn lower_and_install(plan: &CallPlan, options: &EngineOptions) -> Result<Arc<LoweredRoutine>> {
    if let Some(installed) = plan.lowered() {
        return Ok(installed.clone());
    }
    let routine = Arc::new(lower(plan)?);
    let installed = plan.install_lowered(routine);
    tracing::debug!(
        target: "callplan::lower",
        "installed routine for {} after {} calls ({} insns, {} slots)",
        plan.debug_name(),
        plan.invocation_count(),
        installed.code().len(),
        installed.slot_count()
    );
    if options.dump_lowered {
        tracing::debug!(target: "callplan::lower", "{}\n{}", plan, installed);
    }
    Ok(installed)
}

impl<'p> Lowering<'p> {
    fn new(plan: &'p CallPlan) -> Result<Self> {
        let arity = plan.arity();
        if arity > RK_INDEX_MASK as usize {
            return Err(EngineError::illegal_state(format!(
                "{}: {} parameters exceed the slot range",
                plan.debug_name(),
                arity
            )));
        }
        let mut slots = vec![None; plan.nodes().len()];
        let mut known = Vec::with_capacity(plan.nodes().len());
        for (i, node) in plan.nodes()[..arity].iter().enumerate() {
            slots[i] = Some(i as u16);
            known.push(match node.constraint() {
                Some(Constraint::Shape(shape)) => Some(Known::Shape(shape.signature_arc().clone())),
                Some(Constraint::Class(class)) => Some(Known::Class(class.clone())),
                None => None,
            });
        }
        if let Some(owner) = plan.customized_for()
            && let Some(slot) = known.first_mut()
        {
            *slot = Some(Known::Shape(owner.shape().signature_arc().clone()));
        }
        Ok(Self {
            plan,
            uses: plan.use_counts(),
            slots,
            known,
            consts: Vec::new(),
            code: Vec::new(),
        })
    }

    fn run(&mut self) -> Result<()> {
        let plan = self.plan;
        let mut i = plan.arity();
        while i < plan.nodes().len() {
            let consumed = match self.try_two_way(i)? {
                Some(consumed) => consumed,
                None => match self.try_guard_with_catch(i)? {
                    Some(consumed) => consumed,
                    None => {
                        self.lower_node(&plan.nodes()[i])?;
                        1
                    }
                },
            };
            i += consumed;
        }
        let ret = match plan.result() {
            Some(r) => self.slots[r],
            None => None,
        };
        self.emit(Insn::Return(ret));
        Ok(())
    }

    fn finish(self) -> LoweredRoutine {
        tracing::trace!(
            target: "callplan::lower",
            "lowered {}: {} insns, {} consts",
            self.plan.debug_name(),
            self.code.len(),
            self.consts.len()
        );
        LoweredRoutine {
            name: self.plan.debug_name().into(),
            arity: self.plan.arity(),
            n_slots: self.known.len(),
            consts: self.consts,
            code: self.code,
        }
    }

    fn lower_node(&mut self, node: &Arc<Node>) -> Result<()> {
        let NodeKind::Computed { callable, args } = node.kind() else {
            return Err(EngineError::illegal_state(format!(
                "{}: cannot lower parameter node {}",
                self.plan.debug_name(),
                node.index()
            )));
        };
        let dst = self.assign_slot(node)?;
        let callable = match callable.resolve() {
            Ok(resolved) => resolved,
            Err(err) => {
                self.defer_resolution(callable, &err);
                return self.emit_boxed(callable, args, dst);
            }
        };
        match callable.target() {
            Target::Intrinsic(intrinsic) => self.lower_intrinsic(intrinsic, &callable, args, dst),
            _ => self.emit_call(&callable, args, dst),
        }
    }

    fn lower_intrinsic(&mut self, intrinsic: &Intrinsic, callable: &CallableRef, args: &[Arg], dst: Option<u16>) -> Result<()> {
        match intrinsic {
            Intrinsic::FieldGet { shape, index, .. } => {
                let Some(frame @ Arg::Node(_)) = args.first() else {
                    return self.emit_boxed(callable, args, dst);
                };
                let frame = self.operand(frame)?;
                self.check_shape(frame, shape)?;
                let index = u16::try_from(*index)
                    .map_err(|_| EngineError::illegal_state(format!("field index {} out of range", index)))?;
                let dst = self.required(dst)?;
                self.emit(Insn::GetField { dst, frame, index });
                Ok(())
            }
            Intrinsic::ArrayLoad(kind) => {
                let array = self.operand(self.arg(args, 0)?)?;
                let index = self.operand(self.arg(args, 1)?)?;
                let dst = self.required(dst)?;
                self.emit(Insn::ArrayLoad {
                    dst,
                    array,
                    index,
                    kind: *kind,
                });
                Ok(())
            }
            Intrinsic::ArrayStore(kind) => {
                let array = self.operand(self.arg(args, 0)?)?;
                let index = self.operand(self.arg(args, 1)?)?;
                let value = self.operand(self.arg(args, 2)?)?;
                self.emit(Insn::ArrayStore {
                    array,
                    index,
                    value,
                    kind: *kind,
                });
                Ok(())
            }
            Intrinsic::InvokeBasic(sig) => {
                let (callee, rest) = args
                    .split_first()
                    .ok_or_else(|| EngineError::illegal_state("invokeBasic without a callee"))?;
                self.emit_invoke(callee, sig, rest, dst)
            }
            Intrinsic::Identity(_) => {
                let src = self.operand(self.arg(args, 0)?)?;
                let dst = self.required(dst)?;
                self.emit(Insn::Move { dst, src });
                Ok(())
            }
            Intrinsic::Unbox(ty) => {
                let src = self.operand(self.arg(args, 0)?)?;
                if let Some(dst) = dst {
                    self.emit(Insn::Unbox { dst, src, ty: *ty });
                }
                Ok(())
            }
            Intrinsic::SelectAlternative | Intrinsic::CollectArgs(_) | Intrinsic::GuardWithCatch => {
                self.emit_boxed(callable, args, dst)
            }
        }
    }

    /// Invokes the callable held by `callee`, whose erased type must be `sig`.
    fn emit_invoke(&mut self, callee: &Arg, sig: &ErasedSig, args: &[Arg], dst: Option<u16>) -> Result<()> {
        if let Arg::Const(Value::Ref(Obj::Callable(target))) = callee
            && target.erased_sig() == sig
        {
            match target.resolve() {
                Ok(target) => return self.emit_call(&target, args, dst),
                Err(err) => self.defer_resolution(target, &err),
            }
        }
        let callee = self.operand(callee)?;
        let args = self.operands(args)?;
        self.emit(Insn::CallValue {
            dst,
            callee,
            sig: sig.clone(),
            args,
        });
        Ok(())
    }

    /// Direct call when the target is statically invocable, boxed call otherwise.
    fn emit_call(&mut self, callable: &CallableRef, args: &[Arg], dst: Option<u16>) -> Result<()> {
        let Some((symbol, func)) = callable.native_symbol() else {
            return self.emit_boxed(callable, args, dst);
        };
        if !symbol.is_statically_invocable() {
            return self.emit_boxed(callable, args, dst);
        }
        let params = callable.method_type().params();
        let mut operands = Vec::with_capacity(args.len());
        for (param, arg) in params.iter().zip(args) {
            let operand = self.operand(arg)?;
            if let Some(class) = narrowing_class(param) {
                self.narrow(arg, operand, class)?;
            }
            operands.push(operand);
        }
        self.emit(Insn::CallDirect {
            dst,
            func,
            name: symbol.key().into(),
            ret: callable.erased_sig().ret,
            args: operands.into_boxed_slice(),
        });
        Ok(())
    }

    /// Leaves an unresolvable symbol to the call that actually reaches it.
    fn defer_resolution(&self, callable: &CallableRef, err: &anyhow::Error) {
        tracing::debug!(
            target: "callplan::lower",
            "{}: {} stays symbolic: {:#}",
            self.plan.debug_name(),
            callable.name(),
            err
        );
    }

    fn emit_boxed(&mut self, callable: &CallableRef, args: &[Arg], dst: Option<u16>) -> Result<()> {
        let args = self.operands(args)?;
        self.emit(Insn::CallBoxed {
            dst,
            callable: callable.clone(),
            args,
        });
        Ok(())
    }

    /// Casts `arg` to `class` unless that is already proven. The narrowed type
    /// is remembered only for values read more than once, and never when it
    /// contradicts what is already known (only null passes both casts).
    fn narrow(&mut self, arg: &Arg, operand: u16, class: &ClassRef) -> Result<()> {
        let node = match arg {
            Arg::Const(value) => {
                if !(value.is_null() || value.is_instance_of(class)) {
                    self.emit(Insn::Cast {
                        src: operand,
                        class: class.clone(),
                    });
                }
                return Ok(());
            }
            Arg::Node(node) => node,
        };
        let slot = operand as usize;
        let mut record = true;
        if let Some(known) = &self.known[slot] {
            if known.implies(class) {
                return Ok(());
            }
            if !class.is_subclass_of(known.class()) {
                tracing::trace!(
                    target: "callplan::lower",
                    "{}: slot {} is known as {}, casting to {} without narrowing",
                    self.plan.debug_name(),
                    slot,
                    known.class(),
                    class
                );
                record = false;
            }
        }
        self.emit(Insn::Cast {
            src: operand,
            class: class.clone(),
        });
        let reads = node.slot().map_or(0, |at| self.uses[at]);
        if record && reads > 1 {
            self.known[slot] = Some(Known::Class(class.clone()));
        }
        Ok(())
    }

    /// Emits one shape check per frame slot.
    fn check_shape(&mut self, frame: u16, shape: &Arc<str>) -> Result<()> {
        let slot = frame as usize;
        match &self.known[slot] {
            Some(Known::Shape(known)) if known == shape => return Ok(()),
            Some(Known::Shape(known)) => {
                return Err(EngineError::illegal_state(format!(
                    "{}: slot {} holds shape \"{}\", getter expects \"{}\"",
                    self.plan.debug_name(),
                    slot,
                    known,
                    shape
                )));
            }
            _ => {}
        }
        self.emit(Insn::CheckShape {
            frame,
            shape: shape.clone(),
        });
        self.known[slot] = Some(Known::Shape(shape.clone()));
        Ok(())
    }

    fn arg<'a>(&self, args: &'a [Arg], index: usize) -> Result<&'a Arg> {
        args.get(index).ok_or_else(|| {
            EngineError::illegal_state(format!("{}: missing argument {}", self.plan.debug_name(), index))
        })
    }

    fn required(&self, dst: Option<u16>) -> Result<u16> {
        dst.ok_or_else(|| EngineError::illegal_state(format!("{}: value-producing node is void", self.plan.debug_name())))
    }

    fn operand(&mut self, arg: &Arg) -> Result<u16> {
        match arg {
            Arg::Node(node) => node.slot().and_then(|at| self.slots.get(at).copied().flatten()).ok_or_else(|| {
                EngineError::illegal_state(format!(
                    "{}: node {} has no slot",
                    self.plan.debug_name(),
                    node.index()
                ))
            }),
            Arg::Const(value) => self.k(value.clone()).map(rk_make_const),
        }
    }

    fn operands(&mut self, args: &[Arg]) -> Result<Box<[u16]>> {
        args.iter().map(|arg| self.operand(arg)).collect()
    }

    fn k(&mut self, value: Value) -> Result<u16> {
        let index = match self.consts.iter().position(|k| *k == value) {
            Some(index) => index,
            None => {
                self.consts.push(value);
                self.consts.len() - 1
            }
        };
        u16::try_from(index)
            .ok()
            .filter(|i| *i <= RK_INDEX_MASK)
            .ok_or_else(|| EngineError::illegal_state(format!("{}: constant pool overflow", self.plan.debug_name())))
    }

    fn assign_slot(&mut self, node: &Arc<Node>) -> Result<Option<u16>> {
        if !node.ty().is_arg() {
            return Ok(None);
        }
        let slot = self.alloc_scratch()?;
        if let Some(at) = node.slot() {
            self.slots[at] = Some(slot);
        }
        Ok(Some(slot))
    }

    fn alloc_scratch(&mut self) -> Result<u16> {
        let slot = u16::try_from(self.known.len())
            .ok()
            .filter(|s| *s <= RK_INDEX_MASK)
            .ok_or_else(|| EngineError::illegal_state(format!("{}: slot range exhausted", self.plan.debug_name())))?;
        self.known.push(None);
        Ok(slot)
    }

    fn emit(&mut self, insn: Insn) -> usize {
        self.code.push(insn);
        self.code.len() - 1
    }

    /// Points the jump at `at` to the next instruction to be emitted.
    fn patch_to_here(&mut self, at: usize) -> Result<()> {
        let ofs = i16::try_from(self.code.len() as isize - at as isize)
            .map_err(|_| EngineError::illegal_state(format!("{}: jump out of range", self.plan.debug_name())))?;
        match &mut self.code[at] {
            Insn::Jmp(o) | Insn::JmpIfZero { ofs: o, .. } | Insn::TryBegin { handler: o, .. } => {
                *o = ofs;
                Ok(())
            }
            other => Err(EngineError::illegal_state(format!("cannot patch {}", other))),
        }
    }
}

#[cfg(test)]
mod lower_test;
