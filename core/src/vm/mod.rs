//! Running composed calls.
//!
//! [`invoke`] is the single entry point: it runs the routine installed on the
//! frame's plan when there is one, and the interpreter otherwise. The
//! interpreter counts invocations and lowers the plan once the configured
//! threshold is reached.

use std::sync::Arc;

use anyhow::Result;

use crate::config::{EngineOptions, options};
use crate::error::EngineError;
use crate::species::Frame;
use crate::val::Value;

mod interp;

pub use interp::{evaluate, interpret, interpret_with_options};

/// Runs the composed call `frame` on `args` with the process-wide options.
pub fn invoke(frame: &Arc<Frame>, args: &[Value]) -> Result<Value> {
    invoke_with_options(frame, args, options())
}

pub fn invoke_with_options(frame: &Arc<Frame>, args: &[Value], options: &EngineOptions) -> Result<Value> {
    check_args(frame, args)?;
    let plan = frame.plan();
    if plan.is_customized() {
        match plan.customized_for() {
            Some(owner) if Arc::ptr_eq(&owner, frame) => {}
            _ => {
                return Err(EngineError::illegal_state(format!(
                    "plan {} is customized for another frame",
                    plan.debug_name()
                )));
            }
        }
    }
    match plan.lowered() {
        Some(routine) => routine.invoke(frame, args),
        None => interp::run(frame, args, options),
    }
}

/// Checks `args` against the frame's erased type.
pub(crate) fn check_args(frame: &Frame, args: &[Value]) -> Result<()> {
    let sig = frame.erased_sig();
    if args.len() != sig.arity() {
        return Err(EngineError::illegal_state(format!(
            "{} expects {} arguments, got {}",
            frame.plan().debug_name(),
            sig.arity(),
            args.len()
        )));
    }
    for (i, (arg, ty)) in args.iter().zip(sig.params.iter()).enumerate() {
        if arg.basic_type() != *ty {
            return Err(EngineError::illegal_state(format!(
                "{}: argument {} is {}, expected {}",
                frame.plan().debug_name(),
                i,
                arg.basic_type(),
                ty
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod vm_test;
