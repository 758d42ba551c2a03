use std::sync::Arc;

use anyhow::Result;

use super::check_args;
use crate::config::{EngineOptions, options};
use crate::error::EngineError;
use crate::lower::lower_and_install;
use crate::plan::{Arg, NodeKind};
use crate::species::Frame;
use crate::val::{Obj, Value};

/// Interprets the frame's plan, counting the invocation.
pub fn interpret(frame: &Arc<Frame>, args: &[Value]) -> Result<Value> {
    interpret_with_options(frame, args, options())
}

pub fn interpret_with_options(frame: &Arc<Frame>, args: &[Value], options: &EngineOptions) -> Result<Value> {
    check_args(frame, args)?;
    run(frame, args, options)
}

/// Counts the call and either walks the plan or, once the plan turns hot,
/// lowers it and continues on the installed routine. A plan whose lowering
/// fails keeps being walked and is not lowered again.
pub(super) fn run(frame: &Arc<Frame>, args: &[Value], options: &EngineOptions) -> Result<Value> {
    let plan = frame.plan();
    let count = plan.bump_counter();
    if plan.lowered().is_none() && !plan.lowering_failed() && options.should_lower(count, plan.force_inline()) {
        tracing::debug!(
            target: "callplan::interp",
            "{} is hot after {} calls, lowering",
            plan.debug_name(),
            count
        );
        match lower_and_install(plan, options) {
            Ok(routine) => return routine.invoke(frame, args),
            Err(err) => {
                tracing::warn!(
                    target: "callplan::interp",
                    "lowering {} failed, it stays interpreted: {:#}",
                    plan.debug_name(),
                    err
                );
                plan.mark_lowering_failed();
            }
        }
    }
    walk(frame, args)
}

/// Walks the plan once without counting the call.
pub fn evaluate(frame: &Arc<Frame>, args: &[Value]) -> Result<Value> {
    check_args(frame, args)?;
    walk(frame, args)
}

fn walk(frame: &Arc<Frame>, args: &[Value]) -> Result<Value> {
    let plan = frame.plan();
    let mut values: Vec<Value> = Vec::with_capacity(plan.nodes().len());
    values.push(Value::Ref(Obj::Frame(frame.clone())));
    values.extend_from_slice(args);
    for node in plan.nodes()[plan.arity()..].iter() {
        let NodeKind::Computed { callable, args } = node.kind() else {
            return Err(EngineError::illegal_state(format!(
                "{}: parameter node at {} in the computed region",
                plan.debug_name(),
                node.index()
            )));
        };
        let inputs = args
            .iter()
            .map(|arg| match arg {
                Arg::Node(input) => input.slot().and_then(|at| values.get(at)).cloned().ok_or_else(|| {
                    EngineError::illegal_state(format!(
                        "{}: t{} reads a value that is not computed yet",
                        plan.debug_name(),
                        node.index()
                    ))
                }),
                Arg::Const(value) => Ok(value.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        let result = callable.invoke_boxed(&inputs)?;
        values.push(result);
    }
    match plan.result() {
        Some(r) => values
            .get(r)
            .cloned()
            .ok_or_else(|| EngineError::illegal_state(format!("{}: result slot {} missing", plan.debug_name(), r))),
        None => Ok(Value::Void),
    }
}
