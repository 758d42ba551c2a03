use anyhow::Result;
use callplan_core::{
    callable::{CallableRef, Symbol, SymbolKind},
    val::{ClassRef, MethodType, TypeDesc, Value},
};
use once_cell::sync::Lazy;

use crate::{arg, int_arg};

static OBJECTS: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("Objects"));

static CALLABLES: Lazy<Vec<CallableRef>> = Lazy::new(|| {
    let owner = &*OBJECTS;
    vec![
        CallableRef::native(
            Symbol::new(
                owner,
                "lessThan",
                SymbolKind::Static,
                MethodType::new(vec![TypeDesc::Int, TypeDesc::Int], TypeDesc::Boolean),
            ),
            less_than,
        ),
        CallableRef::native(
            Symbol::new(
                owner,
                "isNull",
                SymbolKind::Static,
                MethodType::new(vec![TypeDesc::object()], TypeDesc::Boolean),
            ),
            is_null,
        ),
        CallableRef::native(
            Symbol::new(
                owner,
                "equals",
                SymbolKind::Static,
                MethodType::new(vec![TypeDesc::object(), TypeDesc::object()], TypeDesc::Boolean),
            ),
            equals,
        ),
    ]
});

pub fn callables() -> &'static [CallableRef] {
    &CALLABLES
}

fn less_than(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(int_arg(args, 0)? < int_arg(args, 1)?))
}

fn is_null(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(arg(args, 0)?.is_null()))
}

/// Literal equality: content for strings and boxed primitives, identity otherwise.
fn equals(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(arg(args, 0)? == arg(args, 1)?))
}
