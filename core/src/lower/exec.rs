use std::sync::Arc;

use anyhow::Result;

use super::insn::{Insn, LoweredRoutine, rk_index, rk_is_const};
use crate::callable::{invoke_adapted, invoke_callee};
use crate::error::EngineError;
use crate::species::Frame;
use crate::val::{ElemKind, Obj, Thrown, Value, array_operand, raise};

#[derive(Debug, Clone, Copy)]
struct Handler {
    target: usize,
    exc: u16,
}

enum Step {
    Next,
    Jump(usize),
    Return(Value),
}

impl LoweredRoutine {
    /// Runs the routine for `frame` on the external arguments `args`.
    pub fn invoke(&self, frame: &Arc<Frame>, args: &[Value]) -> Result<Value> {
        let mut params = Vec::with_capacity(self.n_slots.max(args.len() + 1));
        params.push(Value::Ref(Obj::Frame(frame.clone())));
        params.extend_from_slice(args);
        self.run(params)
    }

    /// Runs the routine on its full parameter list (frame first).
    pub fn run(&self, mut regs: Vec<Value>) -> Result<Value> {
        if regs.len() != self.arity {
            return Err(EngineError::illegal_state(format!(
                "routine {} takes {} parameters, got {}",
                self.name,
                self.arity,
                regs.len()
            )));
        }
        regs.resize(self.n_slots, Value::Void);
        let mut handlers: Vec<Handler> = Vec::new();
        let mut caught: Vec<(u16, anyhow::Error)> = Vec::new();
        let mut pc = 0usize;
        loop {
            let insn = self.code.get(pc).ok_or_else(|| {
                EngineError::illegal_state(format!("routine {} ran past its end at {}", self.name, pc))
            })?;
            let step = match insn {
                Insn::TryBegin { handler, exc } => jump_target(pc, *handler).map(|target| {
                    handlers.push(Handler { target, exc: *exc });
                    Step::Next
                }),
                Insn::TryEnd => {
                    handlers.pop();
                    Ok(Step::Next)
                }
                Insn::Rethrow { exc } => Err(take_caught(&mut caught, *exc, &regs)),
                other => self.step(other, pc, &mut regs),
            };
            match step {
                Ok(Step::Next) => pc += 1,
                Ok(Step::Jump(target)) => pc = target,
                Ok(Step::Return(value)) => return Ok(value),
                Err(err) => {
                    let Some(thrown) = Thrown::of(&err).cloned() else {
                        return Err(err);
                    };
                    let Some(handler) = handlers.pop() else {
                        return Err(err);
                    };
                    set(&mut regs, handler.exc, Value::Ref(Obj::Throwable(thrown)))?;
                    caught.push((handler.exc, err));
                    pc = handler.target;
                }
            }
        }
    }

    fn get(&self, regs: &[Value], operand: u16) -> Result<Value> {
        let index = rk_index(operand) as usize;
        let found = if rk_is_const(operand) {
            self.consts.get(index)
        } else {
            regs.get(index)
        };
        found
            .cloned()
            .ok_or_else(|| EngineError::illegal_state(format!("routine {}: bad operand {:#06x}", self.name, operand)))
    }

    fn gather(&self, regs: &[Value], operands: &[u16]) -> Result<Vec<Value>> {
        operands.iter().map(|op| self.get(regs, *op)).collect()
    }

    fn int(&self, regs: &[Value], operand: u16) -> Result<i32> {
        self.get(regs, operand)?
            .as_int()
            .ok_or_else(|| EngineError::illegal_state(format!("routine {}: operand is not an int", self.name)))
    }

    fn frame(&self, regs: &[Value], operand: u16) -> Result<Arc<Frame>> {
        match self.get(regs, operand)? {
            Value::Ref(Obj::Frame(frame)) => Ok(frame),
            other => Err(EngineError::illegal_state(format!(
                "routine {}: expected a frame, got {}",
                self.name,
                other.type_name()
            ))),
        }
    }

    fn step(&self, insn: &Insn, pc: usize, regs: &mut [Value]) -> Result<Step> {
        match insn {
            Insn::Move { dst, src } => {
                let value = self.get(regs, *src)?;
                set(regs, *dst, value)?;
            }
            Insn::CheckShape { frame, shape } => {
                let frame = self.frame(regs, *frame)?;
                if frame.shape().signature() != shape.as_ref() {
                    return Err(EngineError::illegal_state(format!(
                        "field getter for \"{}\" applied to frame of shape \"{}\"",
                        shape,
                        frame.shape().signature()
                    )));
                }
            }
            Insn::GetField { dst, frame, index } => {
                let frame = self.frame(regs, *frame)?;
                let value = frame
                    .field(*index as usize)
                    .cloned()
                    .ok_or_else(|| EngineError::illegal_state(format!("frame has no field {}", index)))?;
                set(regs, *dst, value)?;
            }
            Insn::Cast { src, class } => self.get(regs, *src)?.check_cast(class)?,
            Insn::CallDirect {
                dst,
                func,
                name,
                ret,
                args,
            } => {
                let args = self.gather(regs, args)?;
                let result = func(&args)?;
                if result.basic_type() != *ret {
                    return Err(EngineError::illegal_state(format!(
                        "{} returned {}, declared {}",
                        name,
                        result.basic_type(),
                        ret
                    )));
                }
                if let Some(dst) = dst {
                    set(regs, *dst, result)?;
                }
            }
            Insn::CallBoxed { dst, callable, args } => {
                let args = self.gather(regs, args)?;
                let result = callable.invoke_boxed(&args)?;
                if let Some(dst) = dst {
                    set(regs, *dst, result)?;
                }
            }
            Insn::CallValue {
                dst,
                callee,
                sig,
                args,
            } => {
                let callee = self.get(regs, *callee)?;
                let args = self.gather(regs, args)?;
                let result = invoke_callee(&callee, &args, Some(sig))?;
                if let Some(dst) = dst {
                    set(regs, *dst, result)?;
                }
            }
            Insn::CallAdapted { dst, callee, args } => {
                let callee = self.get(regs, *callee)?;
                let boxed = self.gather(regs, args)?.into_iter().map(Value::boxed).collect();
                let result = invoke_adapted(&callee, boxed)?;
                set(regs, *dst, result.boxed())?;
            }
            Insn::Unbox { dst, src, ty } => {
                let value = self.get(regs, *src)?.boxed().unboxed(*ty)?;
                set(regs, *dst, value)?;
            }
            Insn::ArrayLoad {
                dst,
                array,
                index,
                kind,
            } => {
                let array = self.get(regs, *array)?;
                let index = self.int(regs, *index)?;
                let array = array_operand(&array, *kind)?;
                let value = match kind {
                    ElemKind::Int => Value::Int(array.load_int(index)?),
                    ElemKind::Long => Value::Long(array.load_long(index)?),
                    ElemKind::Double => Value::Double(array.load_double(index)?),
                    _ => array.load(index)?,
                };
                set(regs, *dst, value)?;
            }
            Insn::ArrayStore {
                array,
                index,
                value,
                kind,
            } => {
                let array = self.get(regs, *array)?;
                let index = self.int(regs, *index)?;
                let value = self.get(regs, *value)?;
                let array = array_operand(&array, *kind)?;
                match (kind, &value) {
                    (ElemKind::Int, Value::Int(v)) => array.store_int(index, *v)?,
                    (ElemKind::Long, Value::Long(v)) => array.store_long(index, *v)?,
                    (ElemKind::Double, Value::Double(v)) => array.store_double(index, *v)?,
                    _ => array.store(index, &value)?,
                }
            }
            Insn::JmpIfZero { cond, ofs } => {
                if self.int(regs, *cond)? == 0 {
                    return jump_target(pc, *ofs).map(Step::Jump);
                }
            }
            Insn::Jmp(ofs) => return jump_target(pc, *ofs).map(Step::Jump),
            Insn::InstanceOf { dst, src, class } => {
                let Value::Ref(Obj::Class(class)) = self.get(regs, *class)? else {
                    return Err(EngineError::illegal_state("guardWithCatch guard is not a class"));
                };
                let matched = self.get(regs, *src)?.is_instance_of(&class);
                set(regs, *dst, Value::bool(matched))?;
            }
            Insn::Return(Some(src)) => return self.get(regs, *src).map(Step::Return),
            Insn::Return(None) => return Ok(Step::Return(Value::Void)),
            Insn::TryBegin { .. } | Insn::TryEnd | Insn::Rethrow { .. } => {
                return Err(EngineError::illegal_state(format!(
                    "routine {}: {} handled outside the dispatch loop",
                    self.name, insn
                )));
            }
        }
        Ok(Step::Next)
    }
}

fn set(regs: &mut [Value], slot: u16, value: Value) -> Result<()> {
    let cell = regs
        .get_mut(slot as usize)
        .ok_or_else(|| EngineError::illegal_state(format!("slot {} out of range", slot)))?;
    *cell = value;
    Ok(())
}

fn jump_target(pc: usize, ofs: i16) -> Result<usize> {
    usize::try_from(pc as isize + ofs as isize)
        .map_err(|_| EngineError::illegal_state(format!("jump from {} by {} leaves the routine", pc, ofs)))
}

/// The failure caught into `exc`, unchanged.
fn take_caught(caught: &mut Vec<(u16, anyhow::Error)>, exc: u16, regs: &[Value]) -> anyhow::Error {
    if let Some(at) = caught.iter().rposition(|(slot, _)| *slot == exc) {
        return caught.remove(at).1;
    }
    match regs.get(exc as usize).and_then(Value::as_throwable) {
        Some(throwable) => raise(throwable.clone()),
        None => EngineError::illegal_state(format!("nothing was caught into slot {}", exc)),
    }
}
