use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use dashmap::DashMap;
use once_cell::sync::Lazy;

use super::CallableRef;
use crate::error::EngineError;
use crate::val::{ErasedSig, Value};

// One adapter per distinct erased signature, shared by every callable of that shape.
static INVOKERS: Lazy<DashMap<ErasedSig, Arc<BoxedInvoker>>> = Lazy::new(DashMap::new);

/// Generic `(callable, values) -> value` adapter for one erased signature.
///
/// This is the only path through which the interpreter calls targets: it
/// enforces the arity and erased types the plan promised, casts parameters
/// declared with a specific class, and checks the erased result type.
#[derive(Debug)]
pub struct BoxedInvoker {
    sig: ErasedSig,
    calls: AtomicU64,
}

impl BoxedInvoker {
    fn new(sig: ErasedSig) -> Self {
        Self {
            sig,
            calls: AtomicU64::new(0),
        }
    }

    pub fn sig(&self) -> &ErasedSig {
        &self.sig
    }

    /// Calls made through this adapter so far (approximate under contention).
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn invoke(&self, callable: &CallableRef, args: &[Value]) -> Result<Value> {
        if callable.erased_sig() != &self.sig {
            return Err(EngineError::illegal_state(format!(
                "invoker {} used for {:?}",
                self.sig, callable
            )));
        }
        if args.len() != self.sig.arity() {
            return Err(EngineError::illegal_state(format!(
                "{:?} expects {} arguments, got {}",
                callable,
                self.sig.arity(),
                args.len()
            )));
        }
        for (i, (arg, ty)) in args.iter().zip(self.sig.params.iter()).enumerate() {
            if arg.basic_type() != *ty {
                return Err(EngineError::illegal_state(format!(
                    "{:?} argument {} must be {}, got {}",
                    callable,
                    i,
                    ty,
                    arg.basic_type()
                )));
            }
        }
        callable.check_param_classes(args)?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        let result = callable.invoke_exact(args)?;
        if result.basic_type() != self.sig.ret {
            return Err(EngineError::illegal_state(format!(
                "{:?} returned {}, declared {}",
                callable,
                result.basic_type(),
                self.sig.ret
            )));
        }
        Ok(result)
    }
}

/// The shared adapter for `sig`, generated on first request.
pub fn invoker_for(sig: &ErasedSig) -> Arc<BoxedInvoker> {
    if let Some(existing) = INVOKERS.get(sig) {
        return Arc::clone(existing.value());
    }
    let entry = INVOKERS.entry(sig.clone()).or_insert_with(|| {
        tracing::trace!(target: "callplan::callable", "generated boxed invoker {}", sig);
        Arc::new(BoxedInvoker::new(sig.clone()))
    });
    Arc::clone(entry.value())
}

/// Number of distinct boxed invokers generated so far.
pub fn invoker_count() -> usize {
    INVOKERS.len()
}
