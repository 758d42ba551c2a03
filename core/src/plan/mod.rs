//! Call plans: the symbolic IR of one composed call.
//!
//! A plan is an ordered node list. The first `arity` nodes are parameters in
//! index order; the rest are computed nodes, each applying a callable to
//! earlier nodes or literal constants. Plans are immutable once made. The
//! only runtime state they carry is an invocation counter, the installed
//! lowered routine, and a memo of derived plans.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Result;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use rustc_hash::FxHashMap;

use crate::callable::CallableRef;
use crate::error::EngineError;
use crate::lower::LoweredRoutine;
use crate::species::{Frame, Shape};
use crate::val::{BasicType, ClassRef, ErasedSig, Value};

mod edit;

pub(crate) use edit::TransformKey;

/// Parameter nodes below this index are shared per basic type.
pub const PARAM_INTERN_LIMIT: usize = 10;

static INTERNED_PARAMS: Lazy<Vec<Vec<Arc<Node>>>> = Lazy::new(|| {
    BasicType::ARG_TYPES
        .iter()
        .map(|ty| {
            (0..PARAM_INTERN_LIMIT)
                .map(|i| {
                    Arc::new(Node {
                        index: i as i16,
                        ty: *ty,
                        kind: NodeKind::Parameter,
                        constraint: None,
                    })
                })
                .collect()
        })
        .collect()
});

/// Extra static knowledge about a parameter, used to skip redundant checks.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// The parameter is a frame of exactly this shape.
    Shape(Arc<Shape>),
    /// The parameter is null or an instance of this class.
    Class(ClassRef),
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Parameter,
    Computed { callable: CallableRef, args: Box<[Arg]> },
}

#[derive(Debug, Clone)]
pub enum Arg {
    Node(Arc<Node>),
    Const(Value),
}

impl Arg {
    pub fn basic_type(&self) -> BasicType {
        match self {
            Arg::Node(node) => node.ty(),
            Arg::Const(value) => value.basic_type(),
        }
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        match self {
            Arg::Node(node) => Some(node),
            Arg::Const(_) => None,
        }
    }

    pub fn is_node(&self, node: &Arc<Node>) -> bool {
        self.node().is_some_and(|n| Arc::ptr_eq(n, node))
    }

    fn structurally_eq(&self, other: &Arg) -> bool {
        match (self, other) {
            (Arg::Node(a), Arg::Node(b)) => a.index == b.index,
            (Arg::Const(a), Arg::Const(b)) => a == b,
            _ => false,
        }
    }
}

impl From<&Arc<Node>> for Arg {
    fn from(node: &Arc<Node>) -> Self {
        Arg::Node(node.clone())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Arg::Const(value)
    }
}

/// One position in a call plan.
#[derive(Debug)]
pub struct Node {
    index: i16,
    ty: BasicType,
    kind: NodeKind,
    constraint: Option<Constraint>,
}

impl Node {
    /// Parameter node at `index`; shared for small indices.
    pub fn param(index: usize, ty: BasicType) -> Arc<Node> {
        if index < PARAM_INTERN_LIMIT && ty.is_arg() {
            return INTERNED_PARAMS[ty.ordinal()][index].clone();
        }
        Arc::new(Node {
            index: placed(index),
            ty,
            kind: NodeKind::Parameter,
            constraint: None,
        })
    }

    pub fn constrained_param(index: usize, ty: BasicType, constraint: Constraint) -> Arc<Node> {
        Arc::new(Node {
            index: placed(index),
            ty,
            kind: NodeKind::Parameter,
            constraint: Some(constraint),
        })
    }

    /// A parameter that `normalize` will place.
    pub fn unplaced_param(ty: BasicType) -> Arc<Node> {
        Arc::new(Node {
            index: -1,
            ty,
            kind: NodeKind::Parameter,
            constraint: None,
        })
    }

    /// An unplaced application of `callable`; its type is the callable's erased return type.
    pub fn call(callable: &CallableRef, args: Vec<Arg>) -> Arc<Node> {
        Self::computed(-1, callable.clone(), args.into_boxed_slice())
    }

    /// Application of `callable` placed at `index`.
    pub fn call_at(index: usize, callable: &CallableRef, args: Vec<Arg>) -> Arc<Node> {
        Self::computed(placed(index), callable.clone(), args.into_boxed_slice())
    }

    fn computed(index: i16, callable: CallableRef, args: Box<[Arg]>) -> Arc<Node> {
        Arc::new(Node {
            index,
            ty: callable.erased_sig().ret,
            kind: NodeKind::Computed { callable, args },
            constraint: None,
        })
    }

    /// Same node at another index, keeping its constraint.
    fn relocated(&self, index: usize, kind: NodeKind) -> Arc<Node> {
        if self.constraint.is_none() && matches!(kind, NodeKind::Parameter) {
            return Node::param(index, self.ty);
        }
        Arc::new(Node {
            index: placed(index),
            ty: self.ty,
            kind,
            constraint: self.constraint.clone(),
        })
    }

    pub fn with_constraint(&self, constraint: Option<Constraint>) -> Arc<Node> {
        Arc::new(Node {
            index: self.index,
            ty: self.ty,
            kind: self.kind.clone(),
            constraint,
        })
    }

    pub fn index(&self) -> i16 {
        self.index
    }

    /// Position in the owning plan, `None` while unplaced.
    pub fn slot(&self) -> Option<usize> {
        usize::try_from(self.index).ok()
    }

    pub fn ty(&self) -> BasicType {
        self.ty
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_param(&self) -> bool {
        matches!(self.kind, NodeKind::Parameter)
    }

    pub fn callable(&self) -> Option<&CallableRef> {
        match &self.kind {
            NodeKind::Computed { callable, .. } => Some(callable),
            NodeKind::Parameter => None,
        }
    }

    pub fn args(&self) -> &[Arg] {
        match &self.kind {
            NodeKind::Computed { args, .. } => args,
            NodeKind::Parameter => &[],
        }
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    fn structurally_eq(&self, other: &Node) -> bool {
        if self.index != other.index || self.ty != other.ty {
            return false;
        }
        match (&self.kind, &other.kind) {
            (NodeKind::Parameter, NodeKind::Parameter) => true,
            (
                NodeKind::Computed { callable: ca, args: aa },
                NodeKind::Computed { callable: cb, args: ab },
            ) => ca == cb && aa.len() == ab.len() && aa.iter().zip(ab.iter()).all(|(a, b)| a.structurally_eq(b)),
            _ => false,
        }
    }

    fn structural_hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.ty.hash(state);
        match &self.kind {
            NodeKind::Parameter => 0u8.hash(state),
            NodeKind::Computed { callable, args } => {
                1u8.hash(state);
                callable.hash(state);
                for arg in args.iter() {
                    match arg {
                        Arg::Node(node) => node.index.hash(state),
                        Arg::Const(value) => value.hash(state),
                    }
                }
            }
        }
    }
}

#[inline]
fn placed(index: usize) -> i16 {
    i16::try_from(index).unwrap_or(-1)
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            NodeKind::Parameter => write!(f, "a{}:{}", self.index, self.ty),
            NodeKind::Computed { callable, args } => {
                write!(f, "t{}:{}={}(", self.index, self.ty, callable.name())?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match arg {
                        Arg::Node(node) if node.is_param() => write!(f, "a{}", node.index)?,
                        Arg::Node(node) => write!(f, "t{}", node.index)?,
                        Arg::Const(value) => write!(f, "{:?}", value)?,
                    }
                }
                write!(f, ")")
            }
        }
    }
}

/// Places unplaced nodes, renumbers misplaced ones and rewrites argument
/// references to the renumbered copies. Nodes that already sit at their index
/// with unchanged arguments are returned as-is, so a second pass is a no-op.
pub fn normalize(nodes: &[Arc<Node>]) -> Vec<Arc<Node>> {
    let mut remap: FxHashMap<*const Node, Arc<Node>> = FxHashMap::default();
    let mut out = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let placed_here = node.slot() == Some(i);
        let rewritten = match &node.kind {
            NodeKind::Parameter if placed_here => node.clone(),
            NodeKind::Parameter => node.relocated(i, NodeKind::Parameter),
            NodeKind::Computed { callable, args } => {
                let mut changed = false;
                let new_args: Box<[Arg]> = args
                    .iter()
                    .map(|arg| match arg {
                        Arg::Node(target) => match remap.get(&Arc::as_ptr(target)) {
                            Some(replacement) => {
                                changed = true;
                                Arg::Node(replacement.clone())
                            }
                            None => arg.clone(),
                        },
                        Arg::Const(_) => arg.clone(),
                    })
                    .collect();
                if placed_here && !changed {
                    node.clone()
                } else {
                    node.relocated(
                        i,
                        NodeKind::Computed {
                            callable: callable.clone(),
                            args: new_args,
                        },
                    )
                }
            }
        };
        if !Arc::ptr_eq(&rewritten, node) {
            remap.insert(Arc::as_ptr(node), rewritten.clone());
        }
        out.push(rewritten);
    }
    out
}

fn validate(name: &str, arity: usize, nodes: &[Arc<Node>], result: Option<usize>) -> Result<()> {
    if nodes.len() > i16::MAX as usize {
        return Err(EngineError::malformed(format!("{}: {} nodes exceed the index range", name, nodes.len())));
    }
    if arity > nodes.len() {
        return Err(EngineError::malformed(format!(
            "{}: arity {} exceeds {} nodes",
            name,
            arity,
            nodes.len()
        )));
    }
    for (i, node) in nodes.iter().enumerate() {
        if node.slot() != Some(i) {
            return Err(EngineError::malformed(format!(
                "{}: node at {} claims index {}",
                name, i, node.index
            )));
        }
        match &node.kind {
            NodeKind::Parameter if i < arity => {
                if !node.ty.is_arg() {
                    return Err(EngineError::malformed(format!("{}: parameter {} is void", name, i)));
                }
            }
            NodeKind::Parameter => {
                return Err(EngineError::malformed(format!(
                    "{}: parameter node at {} lies past arity {}",
                    name, i, arity
                )));
            }
            NodeKind::Computed { .. } if i < arity => {
                return Err(EngineError::malformed(format!(
                    "{}: computed node at {} lies inside the parameter region",
                    name, i
                )));
            }
            NodeKind::Computed { callable, args } => {
                let sig = callable.erased_sig();
                if sig.arity() != args.len() {
                    return Err(EngineError::malformed(format!(
                        "{}: t{} passes {} arguments to {:?}",
                        name,
                        i,
                        args.len(),
                        callable
                    )));
                }
                if node.ty != sig.ret {
                    return Err(EngineError::malformed(format!(
                        "{}: t{} has type {}, {:?} returns {}",
                        name, i, node.ty, callable, sig.ret
                    )));
                }
                for (j, (arg, expected)) in args.iter().zip(sig.params.iter()).enumerate() {
                    if let Arg::Node(target) = arg {
                        let Some(at) = target.slot().filter(|at| *at < i) else {
                            return Err(EngineError::malformed(format!(
                                "{}: t{} argument {} is not an earlier node",
                                name, i, j
                            )));
                        };
                        if !Arc::ptr_eq(&nodes[at], target) {
                            return Err(EngineError::malformed(format!(
                                "{}: t{} argument {} refers to a node foreign to this plan",
                                name, i, j
                            )));
                        }
                    }
                    if arg.basic_type() != *expected {
                        return Err(EngineError::malformed(format!(
                            "{}: t{} argument {} is {}, {:?} expects {}",
                            name,
                            i,
                            j,
                            arg.basic_type(),
                            callable,
                            expected
                        )));
                    }
                }
            }
        }
    }
    if let Some(result) = result.filter(|r| *r >= nodes.len()) {
        return Err(EngineError::malformed(format!(
            "{}: result index {} out of {} nodes",
            name,
            result,
            nodes.len()
        )));
    }
    Ok(())
}

/// Normalizes `nodes` and checks every structural invariant of a plan.
pub fn make_plan(debug_name: &str, arity: usize, nodes: Vec<Arc<Node>>, result: Option<usize>) -> Result<Arc<CallPlan>> {
    CallPlan::build(debug_name, arity, &nodes, result, false).map(Arc::new)
}

/// Like [`make_plan`], flagging the plan for eager lowering.
pub fn make_inline_plan(
    debug_name: &str,
    arity: usize,
    nodes: Vec<Arc<Node>>,
    result: Option<usize>,
) -> Result<Arc<CallPlan>> {
    CallPlan::build(debug_name, arity, &nodes, result, true).map(Arc::new)
}

pub struct CallPlan {
    debug_name: Arc<str>,
    arity: usize,
    nodes: Box<[Arc<Node>]>,
    result: Option<usize>,
    force_inline: bool,
    customized_for: Option<Weak<Frame>>,
    counter: AtomicU32,
    lowered: OnceCell<Arc<LoweredRoutine>>,
    lowering_failed: AtomicBool,
    transforms: DashMap<TransformKey, Arc<CallPlan>>,
}

impl CallPlan {
    pub(crate) fn build(
        debug_name: &str,
        arity: usize,
        nodes: &[Arc<Node>],
        result: Option<usize>,
        force_inline: bool,
    ) -> Result<CallPlan> {
        let nodes = normalize(nodes);
        validate(debug_name, arity, &nodes, result)?;
        Ok(CallPlan {
            debug_name: debug_name.into(),
            arity,
            nodes: nodes.into_boxed_slice(),
            result,
            force_inline,
            customized_for: None,
            counter: AtomicU32::new(0),
            lowered: OnceCell::new(),
            lowering_failed: AtomicBool::new(false),
            transforms: DashMap::new(),
        })
    }

    /// Copy of this plan that only ever runs for `owner`.
    pub(crate) fn customized_for_frame(&self, owner: Weak<Frame>) -> CallPlan {
        CallPlan {
            debug_name: self.debug_name.clone(),
            arity: self.arity,
            nodes: self.nodes.clone(),
            result: self.result,
            force_inline: self.force_inline,
            customized_for: Some(owner),
            counter: AtomicU32::new(0),
            lowered: OnceCell::new(),
            lowering_failed: AtomicBool::new(false),
            transforms: DashMap::new(),
        }
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Arc<Node>> {
        self.nodes.get(index)
    }

    pub fn result(&self) -> Option<usize> {
        self.result
    }

    pub fn force_inline(&self) -> bool {
        self.force_inline
    }

    /// The frame this plan is specialized for, if any and still alive.
    pub fn customized_for(&self) -> Option<Arc<Frame>> {
        self.customized_for.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_customized(&self) -> bool {
        self.customized_for.is_some()
    }

    pub fn param_type(&self, index: usize) -> Option<BasicType> {
        (index < self.arity).then(|| self.nodes[index].ty)
    }

    pub fn return_type(&self) -> BasicType {
        self.result.map_or(BasicType::Void, |r| self.nodes[r].ty)
    }

    pub fn erased_sig(&self) -> ErasedSig {
        let params: Vec<BasicType> = self.nodes[..self.arity].iter().map(|n| n.ty).collect();
        ErasedSig::new(params, self.return_type())
    }

    /// How often each node's value is read, counting the result as one read.
    pub fn use_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.nodes.len()];
        for node in self.nodes[self.arity..].iter() {
            for arg in node.args() {
                if let Some(at) = arg.node().and_then(|n| n.slot()) {
                    counts[at] += 1;
                }
            }
        }
        if let Some(result) = self.result {
            counts[result] += 1;
        }
        counts
    }

    /// Invocations counted so far.
    pub fn invocation_count(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Counts one invocation. Concurrent callers may lose increments.
    pub(crate) fn bump_counter(&self) -> u32 {
        let next = self.counter.load(Ordering::Relaxed).saturating_add(1);
        self.counter.store(next, Ordering::Relaxed);
        next
    }

    pub fn lowered(&self) -> Option<&Arc<LoweredRoutine>> {
        self.lowered.get()
    }

    /// Installs `routine` unless one is already installed; returns the installed one.
    pub fn install_lowered(&self, routine: Arc<LoweredRoutine>) -> Arc<LoweredRoutine> {
        self.lowered.get_or_init(|| routine).clone()
    }

    /// Whether lowering was attempted and failed; such a plan stays interpreted.
    pub fn lowering_failed(&self) -> bool {
        self.lowering_failed.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_lowering_failed(&self) {
        self.lowering_failed.store(true, Ordering::Relaxed);
    }

    /// Number of memoized derived plans.
    pub fn transform_count(&self) -> usize {
        self.transforms.len()
    }
}

impl PartialEq for CallPlan {
    fn eq(&self, other: &Self) -> bool {
        self.result == other.result
            && self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(other.nodes.iter())
                .all(|(a, b)| a.structurally_eq(b))
    }
}

impl Eq for CallPlan {}

impl Hash for CallPlan {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.result.hash(state);
        self.nodes.len().hash(state);
        for node in self.nodes.iter() {
            node.structural_hash(state);
        }
    }
}

impl fmt::Display for CallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=(", self.debug_name)?;
        for (i, node) in self.nodes[..self.arity].iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", node)?;
        }
        write!(f, ")=>{{")?;
        for node in self.nodes[self.arity..].iter() {
            write!(f, "{};", node)?;
        }
        write!(f, "}}")?;
        match self.result {
            Some(r) if r < self.arity => write!(f, "a{}", r),
            Some(r) => write!(f, "t{}", r),
            None => write!(f, "void"),
        }
    }
}

impl fmt::Debug for CallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
