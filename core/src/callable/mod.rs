//! Callable references: invocable targets plus cached erased-type metadata.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;
use once_cell::sync::OnceCell;

use crate::error::EngineError;
use crate::species::Frame;
use crate::val::{ClassRef, ErasedSig, MethodType, TypeDesc, Value, class};

mod intrinsic;
mod invoker;
mod symbols;

pub use intrinsic::{Intrinsic, callee_sig, invoke_adapted, invoke_callee};
pub use invoker::{BoxedInvoker, invoker_count, invoker_for};
pub use symbols::{SymbolTable, global_symbols};

/// Native target with strongly typed direct dispatch.
pub type NativeFn = fn(&[Value]) -> Result<Value>;

pub type ClosureFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Static,
    Virtual,
    Constructor,
}

/// A resolved member: owner class, name, kind and declared type.
///
/// For `Virtual` members the receiver is the first declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    owner: ClassRef,
    name: Arc<str>,
    kind: SymbolKind,
    ty: MethodType,
}

impl Symbol {
    pub fn new(owner: &ClassRef, name: impl Into<Arc<str>>, kind: SymbolKind, ty: MethodType) -> Self {
        Self {
            owner: owner.clone(),
            name: name.into(),
            kind,
            ty,
        }
    }

    pub fn owner(&self) -> &ClassRef {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    pub fn method_type(&self) -> &MethodType {
        &self.ty
    }

    /// Lookup key in a [`SymbolTable`]: `Owner.name`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.owner.name(), self.name)
    }

    /// Whether lowered code may call this member directly instead of going
    /// through the boxed invoker.
    pub fn is_statically_invocable(&self) -> bool {
        if self.kind == SymbolKind::Constructor {
            return false;
        }
        let flags = self.owner.flags();
        if flags.array || flags.primitive || flags.anonymous || flags.local || !flags.public {
            return false;
        }
        self.ty
            .params()
            .iter()
            .chain(std::iter::once(self.ty.ret()))
            .all(|t| t.class().is_none_or(ClassRef::is_visible))
    }
}

pub enum Target {
    Native { symbol: Arc<Symbol>, func: NativeFn },
    Closure { name: Arc<str>, func: Arc<ClosureFn> },
    Intrinsic(Intrinsic),
    Bound(Arc<Frame>),
    Pending { key: Arc<str>, resolved: OnceCell<CallableRef> },
}

struct CallableInner {
    target: Target,
    ty: MethodType,
    sig: ErasedSig,
    invoker: OnceCell<Arc<BoxedInvoker>>,
}

#[derive(Clone)]
pub struct CallableRef(Arc<CallableInner>);

impl CallableRef {
    fn from_target(target: Target, ty: MethodType) -> Self {
        let sig = ty.erase();
        Self(Arc::new(CallableInner {
            target,
            ty,
            sig,
            invoker: OnceCell::new(),
        }))
    }

    pub fn native(symbol: Symbol, func: NativeFn) -> Self {
        let ty = symbol.method_type().clone();
        Self::from_target(
            Target::Native {
                symbol: Arc::new(symbol),
                func,
            },
            ty,
        )
    }

    pub fn closure<F>(name: &str, ty: MethodType, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_target(
            Target::Closure {
                name: name.into(),
                func: Arc::new(func),
            },
            ty,
        )
    }

    pub fn intrinsic(intrinsic: Intrinsic) -> Self {
        let ty = MethodType::generic(&intrinsic.erased_sig());
        Self::from_target(Target::Intrinsic(intrinsic), ty)
    }

    /// A callable that runs a composed call.
    pub fn bound(frame: Arc<Frame>) -> Self {
        let ty = frame.method_type().clone();
        Self::from_target(Target::Bound(frame), ty)
    }

    /// A symbolic reference resolved through the global [`SymbolTable`] on first use.
    pub fn pending(key: &str, ty: MethodType) -> Self {
        Self::from_target(
            Target::Pending {
                key: key.into(),
                resolved: OnceCell::new(),
            },
            ty,
        )
    }

    pub fn target(&self) -> &Target {
        &self.0.target
    }

    pub fn method_type(&self) -> &MethodType {
        &self.0.ty
    }

    pub fn erased_sig(&self) -> &ErasedSig {
        &self.0.sig
    }

    pub fn intrinsic_kind(&self) -> Option<&Intrinsic> {
        match &self.0.target {
            Target::Intrinsic(intrinsic) => Some(intrinsic),
            _ => None,
        }
    }

    pub fn native_symbol(&self) -> Option<(&Arc<Symbol>, NativeFn)> {
        match &self.0.target {
            Target::Native { symbol, func } => Some((symbol, *func)),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match &self.0.target {
            Target::Native { symbol, .. } => symbol.key(),
            Target::Closure { name, .. } => name.to_string(),
            Target::Intrinsic(intrinsic) => intrinsic.name(),
            Target::Bound(frame) => format!("bound:{}", frame.plan().debug_name()),
            Target::Pending { key, .. } => format!("pending:{}", key),
        }
    }

    /// The callable this reference stands for once symbolic references are resolved.
    pub fn resolve(&self) -> Result<CallableRef> {
        let Target::Pending { key, resolved } = &self.0.target else {
            return Ok(self.clone());
        };
        resolved
            .get_or_try_init(|| {
                let found = global_symbols().lookup(key).ok_or_else(|| EngineError::unresolved(key))?;
                if found.erased_sig() != self.erased_sig() {
                    return Err(EngineError::illegal_state(format!(
                        "symbol {} has type {}, expected {}",
                        key,
                        found.erased_sig(),
                        self.erased_sig()
                    )));
                }
                tracing::trace!(target: "callplan::callable", "resolved pending symbol {}", key);
                Ok(found)
            })
            .cloned()
    }

    pub fn boxed_invoker(&self) -> &Arc<BoxedInvoker> {
        self.0.invoker.get_or_init(|| invoker_for(&self.0.sig))
    }

    /// Generic invocation: argument shape checked, primitives passed as values.
    pub fn invoke_boxed(&self, args: &[Value]) -> Result<Value> {
        self.boxed_invoker().invoke(self, args)
    }

    /// Casts every argument declared with a specific class type.
    pub(crate) fn check_param_classes(&self, args: &[Value]) -> Result<()> {
        for (param, arg) in self.0.ty.params().iter().zip(args) {
            if let Some(class) = narrowing_class(param) {
                arg.check_cast(class)?;
            }
        }
        Ok(())
    }

    /// Dispatch without argument checks.
    pub(crate) fn invoke_exact(&self, args: &[Value]) -> Result<Value> {
        match &self.0.target {
            Target::Native { func, .. } => func(args),
            Target::Closure { func, .. } => func(args),
            Target::Intrinsic(intrinsic) => intrinsic.apply(args),
            Target::Bound(frame) => crate::vm::invoke(frame, args),
            Target::Pending { .. } => self.resolve()?.invoke_exact(args),
        }
    }
}

/// The class a parameter of type `desc` must be cast to, if any.
pub(crate) fn narrowing_class(desc: &TypeDesc) -> Option<&ClassRef> {
    desc.class().filter(|c| *c != class::object())
}

impl PartialEq for CallableRef {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&self.0.target, &other.0.target) {
            (Target::Native { symbol: a, .. }, Target::Native { symbol: b, .. }) => a == b,
            (Target::Closure { func: a, .. }, Target::Closure { func: b, .. }) => Arc::ptr_eq(a, b),
            (Target::Intrinsic(a), Target::Intrinsic(b)) => a == b,
            (Target::Bound(a), Target::Bound(b)) => Arc::ptr_eq(a, b),
            (Target::Pending { key: a, .. }, Target::Pending { key: b, .. }) => a == b && self.0.ty == other.0.ty,
            _ => false,
        }
    }
}

impl Eq for CallableRef {}

impl Hash for CallableRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.0.target {
            Target::Native { symbol, .. } => {
                0u8.hash(state);
                symbol.hash(state);
            }
            Target::Closure { func, .. } => {
                1u8.hash(state);
                (Arc::as_ptr(func) as *const () as usize).hash(state);
            }
            Target::Intrinsic(intrinsic) => {
                2u8.hash(state);
                intrinsic.hash(state);
            }
            Target::Bound(frame) => {
                3u8.hash(state);
                (Arc::as_ptr(frame) as usize).hash(state);
            }
            Target::Pending { key, .. } => {
                4u8.hash(state);
                key.hash(state);
            }
        }
    }
}

impl fmt::Debug for CallableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.0.sig)
    }
}

#[cfg(test)]
mod callable_test;
