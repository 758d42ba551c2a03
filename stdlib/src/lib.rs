pub mod cmp;
pub mod math;
pub mod string;

#[cfg(test)]
mod math_test;
#[cfg(test)]
mod string_test;

use anyhow::{Result, anyhow};
use callplan_core::{
    callable::{CallableRef, SymbolTable, global_symbols},
    val::{Value, class, throw},
};

/// Every stdlib callable, in registration order.
pub fn stdlib_callables() -> impl Iterator<Item = &'static CallableRef> {
    string::callables()
        .iter()
        .chain(math::callables().iter())
        .chain(cmp::callables().iter())
}

/// Registers all stdlib callables with the given table
pub fn register_stdlib_symbols(table: &SymbolTable) -> Result<()> {
    let mut count = 0usize;
    for callable in stdlib_callables() {
        table.register(callable.clone())?;
        count += 1;
    }
    tracing::debug!(target: "callplan::stdlib", "registered {} stdlib symbols", count);
    Ok(())
}

/// Registers the stdlib with the process-wide symbol table. Safe to call more than once.
pub fn install() -> Result<()> {
    register_stdlib_symbols(global_symbols())
}

/// Looks up a stdlib callable by its `Owner.name` key.
pub fn stdlib_callable(key: &str) -> Option<&'static CallableRef> {
    stdlib_callables().find(|c| c.native_symbol().is_some_and(|(symbol, _)| symbol.key() == key))
}

pub(crate) fn arg(args: &[Value], index: usize) -> Result<&Value> {
    args.get(index)
        .ok_or_else(|| anyhow!("missing argument {}", index))
}

pub(crate) fn int_arg(args: &[Value], index: usize) -> Result<i32> {
    match arg(args, index)? {
        Value::Int(v) => Ok(*v),
        other => Err(anyhow!("argument {} must be int, got {}", index, other.type_name())),
    }
}

pub(crate) fn long_arg(args: &[Value], index: usize) -> Result<i64> {
    match arg(args, index)? {
        Value::Long(v) => Ok(*v),
        other => Err(anyhow!("argument {} must be long, got {}", index, other.type_name())),
    }
}

pub(crate) fn double_arg(args: &[Value], index: usize) -> Result<f64> {
    match arg(args, index)? {
        Value::Double(v) => Ok(*v),
        other => Err(anyhow!("argument {} must be double, got {}", index, other.type_name())),
    }
}

/// String argument; null throws `NullPointerException`.
pub(crate) fn str_arg(args: &[Value], index: usize) -> Result<&str> {
    let value = arg(args, index)?;
    if value.is_null() {
        return Err(throw(class::null_pointer_exception(), format!("argument {} is null", index)));
    }
    value
        .as_str()
        .ok_or_else(|| anyhow!("argument {} must be String, got {}", index, value.type_name()))
}
