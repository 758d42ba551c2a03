use anyhow::Result;
use callplan_core::{
    callable::{CallableRef, Symbol, SymbolKind},
    val::{MethodType, TypeDesc, Value, class, throw},
};
use once_cell::sync::Lazy;

use crate::{int_arg, str_arg};

static CALLABLES: Lazy<Vec<CallableRef>> = Lazy::new(|| {
    let string = || TypeDesc::Class(class::string().clone());
    let owner = class::string();
    let integer = class::integer();
    vec![
        CallableRef::native(
            Symbol::new(owner, "length", SymbolKind::Virtual, MethodType::new(vec![string()], TypeDesc::Int)),
            length,
        ),
        CallableRef::native(
            Symbol::new(
                owner,
                "concat",
                SymbolKind::Virtual,
                MethodType::new(vec![string(), string()], string()),
            ),
            concat,
        ),
        CallableRef::native(
            Symbol::new(owner, "toUpperCase", SymbolKind::Virtual, MethodType::new(vec![string()], string())),
            to_upper_case,
        ),
        CallableRef::native(
            Symbol::new(owner, "trim", SymbolKind::Virtual, MethodType::new(vec![string()], string())),
            trim,
        ),
        CallableRef::native(
            Symbol::new(
                owner,
                "charAt",
                SymbolKind::Virtual,
                MethodType::new(vec![string(), TypeDesc::Int], TypeDesc::Char),
            ),
            char_at,
        ),
        CallableRef::native(
            Symbol::new(
                owner,
                "isEmpty",
                SymbolKind::Virtual,
                MethodType::new(vec![string()], TypeDesc::Boolean),
            ),
            is_empty,
        ),
        CallableRef::native(
            Symbol::new(integer, "parseInt", SymbolKind::Static, MethodType::new(vec![string()], TypeDesc::Int)),
            parse_int,
        ),
        CallableRef::native(
            Symbol::new(integer, "toString", SymbolKind::Static, MethodType::new(vec![TypeDesc::Int], string())),
            int_to_string,
        ),
    ]
});

pub fn callables() -> &'static [CallableRef] {
    &CALLABLES
}

/// Length in UTF-16 code units
fn length(args: &[Value]) -> Result<Value> {
    let s = str_arg(args, 0)?;
    Ok(Value::Int(s.encode_utf16().count() as i32))
}

fn concat(args: &[Value]) -> Result<Value> {
    let head = str_arg(args, 0)?;
    let tail = str_arg(args, 1)?;
    Ok(Value::str(format!("{}{}", head, tail)))
}

fn to_upper_case(args: &[Value]) -> Result<Value> {
    Ok(Value::str(str_arg(args, 0)?.to_uppercase()))
}

fn trim(args: &[Value]) -> Result<Value> {
    Ok(Value::str(str_arg(args, 0)?.trim()))
}

fn char_at(args: &[Value]) -> Result<Value> {
    let s = str_arg(args, 0)?;
    let index = int_arg(args, 1)?;
    let unit = usize::try_from(index)
        .ok()
        .and_then(|i| s.encode_utf16().nth(i))
        .ok_or_else(|| {
            throw(
                class::index_out_of_bounds_exception(),
                format!("index {} out of bounds for length {}", index, s.encode_utf16().count()),
            )
        })?;
    Ok(Value::Int(unit as i32))
}

fn is_empty(args: &[Value]) -> Result<Value> {
    Ok(Value::bool(str_arg(args, 0)?.is_empty()))
}

fn parse_int(args: &[Value]) -> Result<Value> {
    let s = str_arg(args, 0)?;
    s.parse::<i32>()
        .map(Value::Int)
        .map_err(|_| throw(class::number_format_exception(), format!("For input string: \"{}\"", s)))
}

fn int_to_string(args: &[Value]) -> Result<Value> {
    Ok(Value::str(int_arg(args, 0)?.to_string()))
}
