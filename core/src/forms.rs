//! Ready-made composed calls.
//!
//! Each form pairs a frame shape with a call plan that reads its bound
//! callables out of the frame. Plans depend only on erased types, so they are
//! built once per type and shared by every frame of that form; the lowered
//! routine installed on a shared plan serves all of them.

use std::hash::Hash;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::callable::{CallableRef, Intrinsic};
use crate::error::EngineError;
use crate::plan::{Arg, CallPlan, Constraint, Node, make_plan};
use crate::species::{Frame, Shape, get_shape};
use crate::val::{BasicType, ClassRef, ElemKind, ErasedSig, MethodType, TypeDesc, Value, class};

static REINVOKER_PLANS: Lazy<DashMap<ErasedSig, Arc<CallPlan>>> = Lazy::new(DashMap::new);
static DIRECT_PLANS: Lazy<DashMap<CallableRef, Arc<CallPlan>>> = Lazy::new(DashMap::new);
static GUARD_TEST_PLANS: Lazy<DashMap<ErasedSig, Arc<CallPlan>>> = Lazy::new(DashMap::new);
static GUARD_CATCH_PLANS: Lazy<DashMap<ErasedSig, Arc<CallPlan>>> = Lazy::new(DashMap::new);
static ARRAY_PLANS: Lazy<DashMap<(ElemKind, bool), Arc<CallPlan>>> = Lazy::new(DashMap::new);

fn cached<K, F>(table: &DashMap<K, Arc<CallPlan>>, key: K, build: F) -> Result<Arc<CallPlan>>
where
    K: Eq + Hash,
    F: FnOnce() -> Result<Arc<CallPlan>>,
{
    if let Some(hit) = table.get(&key) {
        return Ok(hit.value().clone());
    }
    let plan = build()?;
    Ok(table.entry(key).or_insert(plan).value().clone())
}

/// Parameter nodes of a frame plan: the frame of `shape`, then one per external argument.
fn frame_params(shape: &Arc<Shape>, params: &[BasicType]) -> Vec<Arc<Node>> {
    let mut nodes = Vec::with_capacity(params.len() + 4);
    nodes.push(Node::constrained_param(0, BasicType::Ref, Constraint::Shape(shape.clone())));
    nodes.extend(params.iter().enumerate().map(|(i, ty)| Node::param(i + 1, *ty)));
    nodes
}

fn getter(shape: &Shape, index: usize) -> Result<&CallableRef> {
    shape
        .getter(index)
        .ok_or_else(|| EngineError::illegal_state(format!("shape \"{}\" has no field {}", shape.signature(), index)))
}

fn external_args(nodes: &[Arc<Node>], arity: usize) -> Vec<Arg> {
    nodes[1..arity].iter().map(Arg::from).collect()
}

/// Appends `node` and returns it.
fn push(nodes: &mut Vec<Arc<Node>>, node: Arc<Node>) -> Arc<Node> {
    nodes.push(node.clone());
    node
}

/// Index of the last node when it produces a value.
fn result_of(nodes: &[Arc<Node>]) -> Option<usize> {
    nodes.last().filter(|n| n.ty().is_arg()).map(|_| nodes.len() - 1)
}

/// A frame that forwards its arguments to the bound `target`.
pub fn reinvoker(target: &CallableRef) -> Result<Arc<Frame>> {
    let shape = get_shape("L")?;
    let sig = target.erased_sig().clone();
    let plan = cached(&REINVOKER_PLANS, sig.clone(), || {
        let arity = sig.arity() + 1;
        let mut nodes = frame_params(&shape, &sig.params);
        let frame = Arg::from(&nodes[0]);
        let bound = push(&mut nodes, Node::call(getter(&shape, 0)?, vec![frame]));
        let mut args = vec![Arg::Node(bound)];
        args.extend(external_args(&nodes, arity));
        push(&mut nodes, Node::call(&CallableRef::intrinsic(Intrinsic::InvokeBasic(sig.clone())), args));
        let result = result_of(&nodes);
        make_plan(&format!("reinvoke{}", sig), arity, nodes, result)
    })?;
    shape.construct(plan, target.method_type().clone(), vec![Value::callable(target.clone())])
}

/// A frame that calls `target` itself, with nothing bound.
pub fn direct(target: &CallableRef) -> Result<Arc<Frame>> {
    let shape = get_shape("")?;
    let plan = cached(&DIRECT_PLANS, target.clone(), || {
        let sig = target.erased_sig();
        let arity = sig.arity() + 1;
        let mut nodes = frame_params(&shape, &sig.params);
        let args = external_args(&nodes, arity);
        push(&mut nodes, Node::call(target, args));
        let result = result_of(&nodes);
        make_plan(&format!("direct:{}", target.name()), arity, nodes, result)
    })?;
    shape.construct(plan, target.method_type().clone(), Vec::new())
}

/// `test(args) != 0 ? target(args) : fallback(args)`.
pub fn guard_with_test(test: &CallableRef, target: &CallableRef, fallback: &CallableRef) -> Result<Arc<Frame>> {
    let sig = target.erased_sig().clone();
    if fallback.erased_sig() != &sig {
        return Err(EngineError::malformed(format!(
            "guardWithTest fallback has type {}, target has {}",
            fallback.erased_sig(),
            sig
        )));
    }
    let test_sig = ErasedSig::new(sig.params.clone(), BasicType::Int);
    if test.erased_sig() != &test_sig {
        return Err(EngineError::malformed(format!(
            "guardWithTest test has type {}, expected {}",
            test.erased_sig(),
            test_sig
        )));
    }
    let shape = get_shape("LLL")?;
    let plan = cached(&GUARD_TEST_PLANS, sig.clone(), || {
        let arity = sig.arity() + 1;
        let mut nodes = frame_params(&shape, &sig.params);
        let frame = Arg::from(&nodes[0]);
        let args = external_args(&nodes, arity);
        let test_fn = push(&mut nodes, Node::call(getter(&shape, 0)?, vec![frame.clone()]));
        let mut test_args = vec![Arg::Node(test_fn)];
        test_args.extend(args.iter().cloned());
        let outcome = push(
            &mut nodes,
            Node::call(&CallableRef::intrinsic(Intrinsic::InvokeBasic(test_sig.clone())), test_args),
        );
        let on_true = push(&mut nodes, Node::call(getter(&shape, 1)?, vec![frame.clone()]));
        let on_false = push(&mut nodes, Node::call(getter(&shape, 2)?, vec![frame]));
        let selected = push(
            &mut nodes,
            Node::call(
                &CallableRef::intrinsic(Intrinsic::SelectAlternative),
                vec![Arg::Node(outcome), Arg::Node(on_true), Arg::Node(on_false)],
            ),
        );
        let mut call_args = vec![Arg::Node(selected)];
        call_args.extend(args);
        push(&mut nodes, Node::call(&CallableRef::intrinsic(Intrinsic::InvokeBasic(sig.clone())), call_args));
        let result = result_of(&nodes);
        make_plan(&format!("guardWithTest{}", sig), arity, nodes, result)
    })?;
    shape.construct(
        plan,
        target.method_type().clone(),
        vec![
            Value::callable(test.clone()),
            Value::callable(target.clone()),
            Value::callable(fallback.clone()),
        ],
    )
}

/// Runs `body(args)`; a throw of `guard` (or a subclass) is recovered by
/// `recovery(exception, args)`. Anything else propagates unchanged.
pub fn guard_with_catch(body: &CallableRef, guard: &ClassRef, recovery: &CallableRef) -> Result<Arc<Frame>> {
    let sig = body.erased_sig().clone();
    let recovery_sig = sig.prepend(BasicType::Ref);
    if recovery.erased_sig() != &recovery_sig {
        return Err(EngineError::malformed(format!(
            "guardWithCatch recovery has type {}, expected {}",
            recovery.erased_sig(),
            recovery_sig
        )));
    }
    let shape = get_shape("LLL")?;
    let plan = cached(&GUARD_CATCH_PLANS, sig.clone(), || {
        let arity = sig.arity() + 1;
        let mut nodes = frame_params(&shape, &sig.params);
        let frame = Arg::from(&nodes[0]);
        let args = external_args(&nodes, arity);
        let body_fn = push(&mut nodes, Node::call(getter(&shape, 0)?, vec![frame.clone()]));
        let guard_class = push(&mut nodes, Node::call(getter(&shape, 1)?, vec![frame.clone()]));
        let recovery_fn = push(&mut nodes, Node::call(getter(&shape, 2)?, vec![frame]));
        let collected = push(
            &mut nodes,
            Node::call(&CallableRef::intrinsic(Intrinsic::CollectArgs(sig.params.clone())), args),
        );
        let guarded = push(
            &mut nodes,
            Node::call(
                &CallableRef::intrinsic(Intrinsic::GuardWithCatch),
                vec![
                    Arg::Node(body_fn),
                    Arg::Node(guard_class),
                    Arg::Node(recovery_fn),
                    Arg::Node(collected),
                ],
            ),
        );
        push(
            &mut nodes,
            Node::call(&CallableRef::intrinsic(Intrinsic::Unbox(sig.ret)), vec![Arg::Node(guarded)]),
        );
        let result = result_of(&nodes);
        make_plan(&format!("guardWithCatch{}", sig), arity, nodes, result)
    })?;
    shape.construct(
        plan,
        body.method_type().clone(),
        vec![
            Value::callable(body.clone()),
            Value::class(guard),
            Value::callable(recovery.clone()),
        ],
    )
}

fn element_desc(kind: ElemKind) -> TypeDesc {
    match kind {
        ElemKind::Ref => TypeDesc::object(),
        ElemKind::Byte => TypeDesc::Byte,
        ElemKind::Int => TypeDesc::Int,
        ElemKind::Long => TypeDesc::Long,
        ElemKind::Float => TypeDesc::Float,
        ElemKind::Double => TypeDesc::Double,
    }
}

fn array_plan(kind: ElemKind, store: bool) -> Result<Arc<CallPlan>> {
    let shape = get_shape("")?;
    cached(&ARRAY_PLANS, (kind, store), || {
        let intrinsic = if store {
            Intrinsic::ArrayStore(kind)
        } else {
            Intrinsic::ArrayLoad(kind)
        };
        let callable = CallableRef::intrinsic(intrinsic);
        let sig = callable.erased_sig().clone();
        let arity = sig.arity() + 1;
        let mut nodes = frame_params(&shape, &sig.params);
        let args = external_args(&nodes, arity);
        push(&mut nodes, Node::call(&callable, args));
        let result = result_of(&nodes);
        make_plan(&callable.name(), arity, nodes, result)
    })
}

/// `(array, index) -> element` for arrays of `kind`.
pub fn array_element_getter(kind: ElemKind) -> Result<Arc<Frame>> {
    let ty = MethodType::new(
        vec![TypeDesc::Class(class::array(kind).clone()), TypeDesc::Int],
        element_desc(kind),
    );
    get_shape("")?.construct(array_plan(kind, false)?, ty, Vec::new())
}

/// `(array, index, element) -> void` for arrays of `kind`.
pub fn array_element_setter(kind: ElemKind) -> Result<Arc<Frame>> {
    let ty = MethodType::new(
        vec![TypeDesc::Class(class::array(kind).clone()), TypeDesc::Int, element_desc(kind)],
        TypeDesc::Void,
    );
    get_shape("")?.construct(array_plan(kind, true)?, ty, Vec::new())
}

/// Binds external argument `position` of `frame` to `value`, producing a
/// frame one field larger that takes the remaining arguments.
pub fn bind_value(frame: &Arc<Frame>, position: usize, value: Value) -> Result<Arc<Frame>> {
    let sig = frame.erased_sig();
    let Some(expected) = sig.params.get(position) else {
        return Err(EngineError::malformed(format!(
            "cannot bind argument {} of a {}-argument frame",
            position,
            sig.arity()
        )));
    };
    if value.basic_type() != *expected {
        return Err(EngineError::malformed(format!(
            "argument {} is {}, cannot bind a {}",
            position,
            expected,
            value.basic_type()
        )));
    }
    if let Some(class) = frame.method_type().param(position).and_then(TypeDesc::class) {
        value.check_cast(class)?;
    }
    let shape = frame.shape().extend(*expected)?;
    let plan = frame.plan().bind_argument(position + 1, &shape)?;
    let ty = frame
        .method_type()
        .drop_param(position)
        .ok_or_else(|| EngineError::illegal_state(format!("frame type has no parameter {}", position)))?;
    tracing::trace!(
        target: "callplan::forms",
        "bound argument {} of {} into shape \"{}\"",
        position,
        frame.plan().debug_name(),
        shape.signature()
    );
    shape.construct_frame(plan, ty, frame.fields(), value)
}

#[cfg(test)]
#[path = "forms_test.rs"]
mod forms_test;
