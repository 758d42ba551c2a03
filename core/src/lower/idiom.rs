use std::sync::Arc;

use anyhow::Result;

use super::{Insn, Known, Lowering};
use crate::callable::Intrinsic;
use crate::plan::{Arg, Node};
use crate::val::{BasicType, ErasedSig};

impl Lowering<'_> {
    fn intrinsic_at(&self, index: usize) -> Option<(&Intrinsic, &[Arg])> {
        let node = self.plan.nodes().get(index)?;
        Some((node.callable()?.intrinsic_kind()?, node.args()))
    }

    fn single_use(&self, node: &Arc<Node>) -> bool {
        node.slot().is_some_and(|at| self.uses[at] == 1)
    }

    /// `t[i] = selectAlternative(test, a, b); t[i+1] = invokeBasic(t[i], args...)`
    /// with `test` an int node and the selection read nowhere else.
    fn two_way_window(&self, i: usize) -> Option<(&'_ [Arg], &'_ [Arg], &'_ ErasedSig)> {
        let nodes = self.plan.nodes();
        let select = nodes.get(i)?;
        let (Intrinsic::SelectAlternative, select_args) = self.intrinsic_at(i)? else {
            return None;
        };
        match select_args.first()? {
            Arg::Node(test) if test.ty() == BasicType::Int => {}
            _ => return None,
        }
        let (Intrinsic::InvokeBasic(sig), invoke_args) = self.intrinsic_at(i + 1)? else {
            return None;
        };
        if !invoke_args.first()?.is_node(select) || !self.single_use(select) {
            return None;
        }
        Some((select_args, invoke_args, sig))
    }

    /// Lowers a two-way dispatch to a branch with one call site per path.
    pub(super) fn try_two_way(&mut self, i: usize) -> Result<Option<usize>> {
        let plan = self.plan;
        let Some((select_args, invoke_args, sig)) = self.two_way_window(i) else {
            return Ok(None);
        };
        let (select_args, invoke_args, sig) = (select_args.to_vec(), invoke_args.to_vec(), sig.clone());
        let invoke = &plan.nodes()[i + 1];
        tracing::trace!(target: "callplan::lower", "{}: two-way dispatch at t{}", plan.debug_name(), i);

        let test = self.operand(&select_args[0])?;
        let dst = self.assign_slot(invoke)?;
        let rest = &invoke_args[1..];

        let branch = self.emit(Insn::JmpIfZero { cond: test, ofs: 0 });
        let before = self.known.clone();
        self.emit_invoke(&select_args[1], &sig, rest, dst)?;
        let after_true = std::mem::replace(&mut self.known, before);
        let skip = self.emit(Insn::Jmp(0));
        self.patch_to_here(branch)?;
        self.emit_invoke(&select_args[2], &sig, rest, dst)?;
        self.patch_to_here(skip)?;
        self.merge_known(after_true);
        Ok(Some(2))
    }

    /// `t[i] = collect(args...); t[i+1] = guardWithCatch(body, class, recovery, t[i]);
    /// t[i+2] = unbox(t[i+1])` with both intermediates read exactly once.
    fn guard_window(&self, i: usize) -> Option<(&'_ [Arg], &'_ [Arg], BasicType)> {
        let nodes = self.plan.nodes();
        let (Intrinsic::CollectArgs(_), collect_args) = self.intrinsic_at(i)? else {
            return None;
        };
        let (Intrinsic::GuardWithCatch, guard_args) = self.intrinsic_at(i + 1)? else {
            return None;
        };
        let (Intrinsic::Unbox(ty), unbox_args) = self.intrinsic_at(i + 2)? else {
            return None;
        };
        let collect = nodes.get(i)?;
        let guard = nodes.get(i + 1)?;
        if !guard_args.get(3)?.is_node(collect) || !unbox_args.first()?.is_node(guard) {
            return None;
        }
        if !self.single_use(collect) || !self.single_use(guard) {
            return None;
        }
        Some((collect_args, guard_args, *ty))
    }

    /// Lowers guarded exception recovery to a protected region plus handler.
    pub(super) fn try_guard_with_catch(&mut self, i: usize) -> Result<Option<usize>> {
        let plan = self.plan;
        let Some((collect_args, guard_args, ty)) = self.guard_window(i) else {
            return Ok(None);
        };
        let (collect_args, guard_args) = (collect_args.to_vec(), guard_args.to_vec());
        let unbox = &plan.nodes()[i + 2];
        tracing::trace!(target: "callplan::lower", "{}: guarded catch at t{}", plan.debug_name(), i);

        let collected = self.operands(&collect_args)?;
        let body = self.operand(&guard_args[0])?;
        let guard_class = self.operand(&guard_args[1])?;
        let recovery = self.operand(&guard_args[2])?;
        let dst = self.assign_slot(unbox)?;
        let exc = self.alloc_scratch()?;
        let matched = self.alloc_scratch()?;
        let boxed = self.alloc_scratch()?;
        let mut recovery_args = Vec::with_capacity(collected.len() + 1);
        recovery_args.push(exc);
        recovery_args.extend_from_slice(&collected);

        let region = self.emit(Insn::TryBegin { handler: 0, exc });
        self.emit(Insn::CallAdapted {
            dst: boxed,
            callee: body,
            args: collected,
        });
        self.emit(Insn::TryEnd);
        let done = self.emit(Insn::Jmp(0));
        self.patch_to_here(region)?;
        self.emit(Insn::InstanceOf {
            dst: matched,
            src: exc,
            class: guard_class,
        });
        let mismatch = self.emit(Insn::JmpIfZero { cond: matched, ofs: 0 });
        self.emit(Insn::CallAdapted {
            dst: boxed,
            callee: recovery,
            args: recovery_args.into_boxed_slice(),
        });
        let recovered = self.emit(Insn::Jmp(0));
        self.patch_to_here(mismatch)?;
        self.emit(Insn::Rethrow { exc });
        self.patch_to_here(done)?;
        self.patch_to_here(recovered)?;
        if let Some(dst) = dst {
            self.emit(Insn::Unbox { dst, src: boxed, ty });
        }
        Ok(Some(3))
    }

    /// Keeps only the facts both paths agree on.
    pub(super) fn merge_known(&mut self, other: Vec<Option<Known>>) {
        for (slot, fact) in self.known.iter_mut().enumerate() {
            if other.get(slot).cloned().flatten() != *fact {
                *fact = None;
            }
        }
    }
}
