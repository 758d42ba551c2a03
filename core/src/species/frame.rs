use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use super::Shape;
use crate::callable::CallableRef;
use crate::error::EngineError;
use crate::plan::{CallPlan, Constraint};
use crate::val::{BasicType, ErasedSig, MethodType, Value};

/// An immutable bound-argument frame: a field tuple typed by its shape, plus
/// the call plan that runs when the frame is invoked.
///
/// The plan's parameter 0 receives the frame itself; the method type
/// describes the remaining external arguments.
pub struct Frame {
    shape: Arc<Shape>,
    plan: Arc<CallPlan>,
    ty: MethodType,
    sig: ErasedSig,
    fields: Box<[Value]>,
}

impl Frame {
    pub(super) fn new(shape: Arc<Shape>, plan: Arc<CallPlan>, ty: MethodType, fields: Box<[Value]>) -> Result<Self> {
        let sig = ty.erase();
        check_plan_matches(&plan, &sig, &shape)?;
        Ok(Self {
            shape,
            plan,
            ty,
            sig,
            fields,
        })
    }

    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    pub fn plan(&self) -> &Arc<CallPlan> {
        &self.plan
    }

    pub fn method_type(&self) -> &MethodType {
        &self.ty
    }

    pub fn erased_sig(&self) -> &ErasedSig {
        &self.sig
    }

    pub fn field(&self, index: usize) -> Option<&Value> {
        self.fields.get(index)
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// This frame as a callable value.
    pub fn to_callable(self: &Arc<Self>) -> CallableRef {
        CallableRef::bound(self.clone())
    }

    /// A copy of this frame running a plan specialized for exactly that copy.
    pub fn customized(&self) -> Result<Arc<Frame>> {
        check_plan_matches(&self.plan, &self.sig, &self.shape)?;
        Ok(Arc::new_cyclic(|owner| Frame {
            shape: self.shape.clone(),
            plan: Arc::new(self.plan.customized_for_frame(owner.clone())),
            ty: self.ty.clone(),
            sig: self.sig.clone(),
            fields: self.fields.clone(),
        }))
    }
}

/// The plan must take the frame as parameter 0 and match the frame type. A
/// shape constraint on parameter 0 must name the frame's own shape, since
/// lowering reads fields without checking the shape again.
fn check_plan_matches(plan: &CallPlan, sig: &ErasedSig, shape: &Shape) -> Result<()> {
    if plan.arity() != sig.arity() + 1 {
        return Err(EngineError::illegal_state(format!(
            "plan {} takes {} parameters, frame type {} needs {}",
            plan.debug_name(),
            plan.arity(),
            sig,
            sig.arity() + 1
        )));
    }
    if plan.param_type(0) != Some(BasicType::Ref) {
        return Err(EngineError::illegal_state(format!(
            "plan {} does not take the frame as parameter 0",
            plan.debug_name()
        )));
    }
    if let Some(Constraint::Shape(expected)) = plan.node(0).and_then(|frame| frame.constraint())
        && expected.signature() != shape.signature()
    {
        return Err(EngineError::illegal_state(format!(
            "plan {} runs on frames of shape \"{}\", not \"{}\"",
            plan.debug_name(),
            expected.signature(),
            shape.signature()
        )));
    }
    let plan_sig = plan.erased_sig();
    if plan_sig.params[1..] != sig.params[..] || plan_sig.ret != sig.ret {
        return Err(EngineError::illegal_state(format!(
            "plan {} has type {}, frame type is {}",
            plan.debug_name(),
            plan_sig,
            sig
        )));
    }
    Ok(())
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("shape", &self.shape.signature())
            .field("plan", &self.plan.debug_name())
            .field("type", &format_args!("{}", self.ty))
            .field("fields", &self.fields)
            .finish()
    }
}
