use anyhow::Result;
use callplan_core::{
    callable::{CallableRef, NativeFn, Symbol, SymbolKind},
    val::{ClassRef, MethodType, TypeDesc, Value, class, throw},
};
use once_cell::sync::Lazy;

use crate::{double_arg, int_arg, long_arg};

static MATH: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("Math"));

static CALLABLES: Lazy<Vec<CallableRef>> = Lazy::new(|| {
    let int2 = || MethodType::new(vec![TypeDesc::Int, TypeDesc::Int], TypeDesc::Int);
    let owner = &*MATH;
    let func = |name: &str, ty: MethodType, f: NativeFn| CallableRef::native(Symbol::new(owner, name, SymbolKind::Static, ty), f);
    vec![
        func("addExact", int2(), add_exact),
        func("subtractExact", int2(), subtract_exact),
        func("multiplyExact", int2(), multiply_exact),
        func("floorDiv", int2(), floor_div),
        func("floorMod", int2(), floor_mod),
        func("max", int2(), max),
        func("abs", MethodType::new(vec![TypeDesc::Long], TypeDesc::Long), abs_long),
        func("sqrt", MethodType::new(vec![TypeDesc::Double], TypeDesc::Double), sqrt),
    ]
});

pub fn callables() -> &'static [CallableRef] {
    &CALLABLES
}

/// The `Math` owner class.
pub fn math_class() -> &'static ClassRef {
    &MATH
}

fn overflow(op: &str) -> anyhow::Error {
    throw(class::arithmetic_exception(), format!("integer overflow in {}", op))
}

fn divide_by_zero() -> anyhow::Error {
    throw(class::arithmetic_exception(), "/ by zero")
}

fn add_exact(args: &[Value]) -> Result<Value> {
    let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
    a.checked_add(b).map(Value::Int).ok_or_else(|| overflow("addExact"))
}

fn subtract_exact(args: &[Value]) -> Result<Value> {
    let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
    a.checked_sub(b).map(Value::Int).ok_or_else(|| overflow("subtractExact"))
}

fn multiply_exact(args: &[Value]) -> Result<Value> {
    let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
    a.checked_mul(b).map(Value::Int).ok_or_else(|| overflow("multiplyExact"))
}

fn floor_div(args: &[Value]) -> Result<Value> {
    let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
    if b == 0 {
        return Err(divide_by_zero());
    }
    // MIN / -1 wraps, matching two's-complement division.
    let q = a.wrapping_div(b);
    let adjust = a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0));
    Ok(Value::Int(if adjust { q - 1 } else { q }))
}

fn floor_mod(args: &[Value]) -> Result<Value> {
    let (a, b) = (int_arg(args, 0)?, int_arg(args, 1)?);
    if b == 0 {
        return Err(divide_by_zero());
    }
    let r = a.wrapping_rem(b);
    Ok(Value::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
}

fn max(args: &[Value]) -> Result<Value> {
    Ok(Value::Int(int_arg(args, 0)?.max(int_arg(args, 1)?)))
}

fn abs_long(args: &[Value]) -> Result<Value> {
    Ok(Value::Long(long_arg(args, 0)?.wrapping_abs()))
}

fn sqrt(args: &[Value]) -> Result<Value> {
    Ok(Value::Double(double_arg(args, 0)?.sqrt()))
}
