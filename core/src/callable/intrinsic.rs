use std::sync::Arc;

use anyhow::Result;

use crate::error::EngineError;
use crate::val::{
    ArrayData, BasicType, ElemKind, ErasedSig, Obj, Thrown, Value, array_operand, class, throw,
};

/// Engine-provided callables. The lowering pass recognizes some of them as
/// idiom heads; the interpreter runs all of them through [`Intrinsic::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// `(I test, L a, L b) -> L`: `a` when `test != 0`, else `b`.
    SelectAlternative,
    /// `(L callee, args...) -> ret`: invokes a callable value of the given erased type.
    InvokeBasic(ErasedSig),
    /// `(args...) -> L`: packs arguments into a boxed reference array.
    CollectArgs(Arc<[BasicType]>),
    /// `(L body, L class, L recovery, L args) -> L`: runs `body`, recovering from
    /// throws of `class` by calling `recovery(exception, args...)`. The result is boxed.
    GuardWithCatch,
    /// `(L) -> T`: converts a boxed result back to `T`.
    Unbox(BasicType),
    /// `(L array, I index) -> T`
    ArrayLoad(ElemKind),
    /// `(L array, I index, T value) -> V`
    ArrayStore(ElemKind),
    /// `(L frame) -> T`: field getter of the frame shape `shape`.
    FieldGet {
        shape: Arc<str>,
        index: usize,
        ty: BasicType,
    },
    /// `(T) -> T`
    Identity(BasicType),
}

impl Intrinsic {
    pub fn erased_sig(&self) -> ErasedSig {
        use BasicType::*;
        match self {
            Intrinsic::SelectAlternative => ErasedSig::new(vec![Int, Ref, Ref], Ref),
            Intrinsic::InvokeBasic(sig) => sig.prepend(Ref),
            Intrinsic::CollectArgs(params) => ErasedSig::new(params.clone(), Ref),
            Intrinsic::GuardWithCatch => ErasedSig::new(vec![Ref, Ref, Ref, Ref], Ref),
            Intrinsic::Unbox(ty) => ErasedSig::new(vec![Ref], *ty),
            Intrinsic::ArrayLoad(kind) => ErasedSig::new(vec![Ref, Int], kind.basic_type()),
            Intrinsic::ArrayStore(kind) => ErasedSig::new(vec![Ref, Int, kind.basic_type()], Void),
            Intrinsic::FieldGet { ty, .. } => ErasedSig::new(vec![Ref], *ty),
            Intrinsic::Identity(ty) => ErasedSig::new(vec![*ty], *ty),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Intrinsic::SelectAlternative => "selectAlternative".to_string(),
            Intrinsic::InvokeBasic(sig) => format!("invokeBasic{}", sig),
            Intrinsic::CollectArgs(params) => format!("collect_{}", BasicType::signature(params)),
            Intrinsic::GuardWithCatch => "guardWithCatch".to_string(),
            Intrinsic::Unbox(ty) => format!("unbox_{}", ty),
            Intrinsic::ArrayLoad(kind) => format!("arrayLoad_{}", kind),
            Intrinsic::ArrayStore(kind) => format!("arrayStore_{}", kind),
            Intrinsic::FieldGet { shape, index, ty } => format!("get{}{}@\"{}\"", ty, index, shape),
            Intrinsic::Identity(ty) => format!("identity_{}", ty),
        }
    }

    /// Generic semantics, used by the interpreter and by boxed calls in lowered code.
    pub fn apply(&self, args: &[Value]) -> Result<Value> {
        match self {
            Intrinsic::SelectAlternative => {
                let test = int_arg(args, 0)?;
                let picked = if test != 0 { arg(args, 1)? } else { arg(args, 2)? };
                Ok(picked.clone())
            }
            Intrinsic::InvokeBasic(sig) => {
                let (callee, rest) = args
                    .split_first()
                    .ok_or_else(|| EngineError::illegal_state("invokeBasic without a callee"))?;
                invoke_callee(callee, rest, Some(sig))
            }
            Intrinsic::CollectArgs(_) => Ok(Value::array(ArrayData::Ref(
                args.iter().map(|v| v.clone().boxed()).collect(),
            ))),
            Intrinsic::GuardWithCatch => guard_with_catch(args),
            Intrinsic::Unbox(ty) => arg(args, 0)?.clone().unboxed(*ty),
            Intrinsic::ArrayLoad(kind) => {
                let index = int_arg(args, 1)?;
                array_operand(arg(args, 0)?, *kind)?.load(index)
            }
            Intrinsic::ArrayStore(kind) => {
                let index = int_arg(args, 1)?;
                array_operand(arg(args, 0)?, *kind)?.store(index, arg(args, 2)?)?;
                Ok(Value::Void)
            }
            Intrinsic::FieldGet { shape, index, .. } => {
                let Value::Ref(Obj::Frame(frame)) = arg(args, 0)? else {
                    return Err(EngineError::illegal_state(format!(
                        "field getter for \"{}\" applied to a non-frame value",
                        shape
                    )));
                };
                if frame.shape().signature() != shape.as_ref() {
                    return Err(EngineError::illegal_state(format!(
                        "field getter for \"{}\" applied to frame of shape \"{}\"",
                        shape,
                        frame.shape().signature()
                    )));
                }
                frame
                    .field(*index)
                    .cloned()
                    .ok_or_else(|| EngineError::illegal_state(format!("frame has no field {}", index)))
            }
            Intrinsic::Identity(_) => Ok(arg(args, 0)?.clone()),
        }
    }
}

fn arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index)
        .ok_or_else(|| EngineError::illegal_state(format!("missing intrinsic argument {}", index)))
}

fn int_arg(args: &[Value], index: usize) -> Result<i32> {
    arg(args, index)?
        .as_int()
        .ok_or_else(|| EngineError::illegal_state(format!("intrinsic argument {} is not an int", index)))
}

/// Erased signature of a callable value (a callable or a frame).
pub fn callee_sig(callee: &Value) -> Result<ErasedSig> {
    match callee {
        Value::Ref(Obj::Callable(c)) => Ok(c.erased_sig().clone()),
        Value::Ref(Obj::Frame(frame)) => Ok(frame.method_type().erase()),
        other => Err(not_callable(other)),
    }
}

fn not_callable(value: &Value) -> anyhow::Error {
    if value.is_null() {
        return throw(class::null_pointer_exception(), "cannot invoke a null callable");
    }
    throw(
        class::class_cast_exception(),
        format!("{} cannot be cast to {}", value.type_name(), class::callable()),
    )
}

/// Invokes a callable value generically. When `expected` is given the callee
/// must have exactly that erased signature.
pub fn invoke_callee(callee: &Value, args: &[Value], expected: Option<&ErasedSig>) -> Result<Value> {
    if let Some(expected) = expected {
        let actual = callee_sig(callee)?;
        if &actual != expected {
            return Err(EngineError::illegal_state(format!(
                "callee has type {}, call site expects {}",
                actual, expected
            )));
        }
    }
    match callee {
        Value::Ref(Obj::Callable(c)) => c.invoke_boxed(args),
        Value::Ref(Obj::Frame(frame)) => crate::vm::invoke(frame, args),
        other => Err(not_callable(other)),
    }
}

/// Invokes a callable value on boxed arguments, converting each one to the
/// callee's erased parameter type first.
pub fn invoke_adapted(callee: &Value, boxed: Vec<Value>) -> Result<Value> {
    let sig = callee_sig(callee)?;
    if sig.arity() != boxed.len() {
        return Err(EngineError::illegal_state(format!(
            "callee of type {} invoked with {} arguments",
            sig,
            boxed.len()
        )));
    }
    let args = boxed
        .into_iter()
        .zip(sig.params.iter())
        .map(|(value, ty)| value.unboxed(*ty))
        .collect::<Result<Vec<_>>>()?;
    invoke_callee(callee, &args, None)
}

fn guard_with_catch(args: &[Value]) -> Result<Value> {
    let body = arg(args, 0)?;
    let Value::Ref(Obj::Class(guard)) = arg(args, 1)? else {
        return Err(EngineError::illegal_state("guardWithCatch guard is not a class"));
    };
    let recovery = arg(args, 2)?;
    let Value::Ref(Obj::Array(collected)) = arg(args, 3)? else {
        return Err(EngineError::illegal_state("guardWithCatch arguments are not collected"));
    };
    let ArrayData::Ref(boxed) = collected.snapshot()? else {
        return Err(EngineError::illegal_state("guardWithCatch arguments are not a reference array"));
    };
    match invoke_adapted(body, boxed.clone()) {
        Ok(result) => Ok(result.boxed()),
        Err(err) => {
            let Some(thrown) = Thrown::of(&err) else {
                return Err(err);
            };
            if !thrown.class().is_subclass_of(guard) {
                return Err(err);
            }
            let mut recovery_args = Vec::with_capacity(boxed.len() + 1);
            recovery_args.push(Value::Ref(Obj::Throwable(thrown.clone())));
            recovery_args.extend(boxed);
            invoke_adapted(recovery, recovery_args).map(Value::boxed)
        }
    }
}
