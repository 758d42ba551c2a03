//! Erased runtime values.
//!
//! Every argument, frame field and node result is a [`Value`]. Primitive
//! values are stored unboxed; everything else is a reference ([`Obj`]).

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use anyhow::Result;

use crate::callable::CallableRef;
use crate::species::Frame;

pub mod array;
pub mod class;
mod types;

pub use array::{ArrayData, ArrayObj, ElemKind, array_operand};
pub use class::{ClassFlags, ClassRef};
pub use types::{BasicType, ErasedSig, MethodType, TypeDesc};

#[derive(Clone)]
pub enum Value {
    Void,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Ref(Obj),
}

#[derive(Clone)]
pub enum Obj {
    Null,
    Str(Arc<str>),
    /// A primitive wrapped as a reference; the inner value is never `Ref` or `Void`.
    Boxed(Box<Value>),
    Array(Arc<ArrayObj>),
    Callable(CallableRef),
    Frame(Arc<Frame>),
    Throwable(Arc<Throwable>),
    Class(ClassRef),
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn null() -> Value {
        Value::Ref(Obj::Null)
    }

    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Ref(Obj::Str(s.into()))
    }

    pub fn bool(b: bool) -> Value {
        Value::Int(b as i32)
    }

    pub fn array(data: ArrayData) -> Value {
        Value::Ref(Obj::Array(Arc::new(ArrayObj::new(data))))
    }

    pub fn callable(callable: CallableRef) -> Value {
        Value::Ref(Obj::Callable(callable))
    }

    pub fn class(class: &ClassRef) -> Value {
        Value::Ref(Obj::Class(class.clone()))
    }

    pub fn basic_type(&self) -> BasicType {
        match self {
            Value::Void => BasicType::Void,
            Value::Int(_) => BasicType::Int,
            Value::Long(_) => BasicType::Long,
            Value::Float(_) => BasicType::Float,
            Value::Double(_) => BasicType::Double,
            Value::Ref(_) => BasicType::Ref,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Ref(Obj::Null))
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ref(Obj::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_throwable(&self) -> Option<&Arc<Throwable>> {
        match self {
            Value::Ref(Obj::Throwable(t)) => Some(t),
            _ => None,
        }
    }

    /// Runtime class of a reference; `None` for null and primitives.
    pub fn class_of(&self) -> Option<ClassRef> {
        let Value::Ref(obj) = self else {
            return None;
        };
        let class = match obj {
            Obj::Null => return None,
            Obj::Str(_) => class::string(),
            Obj::Boxed(inner) => match inner.as_ref() {
                Value::Int(_) => class::integer(),
                Value::Long(_) => class::long(),
                Value::Float(_) => class::float(),
                Value::Double(_) => class::double(),
                _ => class::object(),
            },
            Obj::Array(array) => array.class(),
            Obj::Callable(_) => class::callable(),
            Obj::Frame(_) => class::frame(),
            Obj::Throwable(t) => return Some(t.class().clone()),
            Obj::Class(_) => class::class(),
            Obj::Opaque(_) => class::object(),
        };
        Some(class.clone())
    }

    pub fn is_instance_of(&self, class: &ClassRef) -> bool {
        self.class_of().is_some_and(|c| c.is_subclass_of(class))
    }

    /// Reference cast: null and instances pass, anything else throws `ClassCastException`.
    pub fn check_cast(&self, class: &ClassRef) -> Result<()> {
        if self.is_null() || self.is_instance_of(class) {
            return Ok(());
        }
        Err(throw(
            class::class_cast_exception(),
            format!("{} cannot be cast to {}", self.type_name(), class),
        ))
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Void => "void".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Long(_) => "long".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Double(_) => "double".to_string(),
            Value::Ref(Obj::Null) => "null".to_string(),
            Value::Ref(_) => self
                .class_of()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "Object".to_string()),
        }
    }

    /// Wraps primitives into references; references pass through, void becomes null.
    pub fn boxed(self) -> Value {
        match self {
            Value::Ref(_) => self,
            Value::Void => Value::null(),
            prim => Value::Ref(Obj::Boxed(Box::new(prim))),
        }
    }

    /// Converts a reference back to the erased type `ty`.
    pub fn unboxed(self, ty: BasicType) -> Result<Value> {
        match (ty, self) {
            (BasicType::Void, _) => Ok(Value::Void),
            (BasicType::Ref, v @ Value::Ref(_)) => Ok(v),
            (_, Value::Ref(Obj::Boxed(inner))) if inner.basic_type() == ty => Ok(*inner),
            (_, Value::Ref(Obj::Null)) => Err(throw(
                class::null_pointer_exception(),
                format!("cannot unbox null as {}", ty),
            )),
            (_, other) => Err(throw(
                class::class_cast_exception(),
                format!("{} cannot be unboxed as {}", other.type_name(), ty),
            )),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Ref(a), Value::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Void => {}
            Value::Int(v) => v.hash(state),
            Value::Long(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Double(v) => v.to_bits().hash(state),
            Value::Ref(obj) => obj.hash(state),
        }
    }
}

impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Obj::Null, Obj::Null) => true,
            (Obj::Str(a), Obj::Str(b)) => a == b,
            (Obj::Boxed(a), Obj::Boxed(b)) => a == b,
            (Obj::Array(a), Obj::Array(b)) => Arc::ptr_eq(a, b),
            (Obj::Callable(a), Obj::Callable(b)) => a == b,
            (Obj::Frame(a), Obj::Frame(b)) => Arc::ptr_eq(a, b),
            (Obj::Throwable(a), Obj::Throwable(b)) => Arc::ptr_eq(a, b),
            (Obj::Class(a), Obj::Class(b)) => a == b,
            (Obj::Opaque(a), Obj::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Obj {}

impl Hash for Obj {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Obj::Null => {}
            Obj::Str(s) => s.hash(state),
            Obj::Boxed(inner) => inner.hash(state),
            Obj::Array(a) => (Arc::as_ptr(a) as usize).hash(state),
            Obj::Callable(c) => c.hash(state),
            Obj::Frame(f) => (Arc::as_ptr(f) as usize).hash(state),
            Obj::Throwable(t) => (Arc::as_ptr(t) as usize).hash(state),
            Obj::Class(c) => c.hash(state),
            Obj::Opaque(o) => (Arc::as_ptr(o) as *const () as usize).hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "Void"),
            Value::Int(v) => write!(f, "Int({})", v),
            Value::Long(v) => write!(f, "Long({})", v),
            Value::Float(v) => write!(f, "Float({})", v),
            Value::Double(v) => write!(f, "Double({})", v),
            Value::Ref(obj) => write!(f, "Ref({:?})", obj),
        }
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Obj::Null => write!(f, "null"),
            Obj::Str(s) => write!(f, "{:?}", s),
            Obj::Boxed(inner) => write!(f, "box {:?}", inner),
            Obj::Array(a) => write!(f, "{}[{}]", a.kind(), a.len()),
            Obj::Callable(c) => write!(f, "{:?}", c),
            Obj::Frame(frame) => write!(f, "frame \"{}\"", frame.shape().signature()),
            Obj::Throwable(t) => write!(f, "{}", t),
            Obj::Class(c) => write!(f, "{:?}", c),
            Obj::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Ref(Obj::Str(s)) => f.write_str(s),
            Value::Ref(Obj::Boxed(inner)) => write!(f, "{}", inner),
            Value::Ref(obj) => write!(f, "{:?}", obj),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

/// An exception object raised by an invoked target.
#[derive(Debug)]
pub struct Throwable {
    class: ClassRef,
    message: String,
}

impl Throwable {
    pub fn new(class: &ClassRef, message: impl Into<String>) -> Self {
        Self {
            class: class.clone(),
            message: message.into(),
        }
    }

    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.class)
        } else {
            write!(f, "{}: {}", self.class, self.message)
        }
    }
}

/// Error payload carrying a catchable [`Throwable`] through `anyhow::Error`.
#[derive(Debug, Clone)]
pub struct Thrown(pub Arc<Throwable>);

impl fmt::Display for Thrown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for Thrown {}

impl Thrown {
    /// The exception carried by `err`, if it is a catchable throw.
    pub fn of(err: &anyhow::Error) -> Option<&Arc<Throwable>> {
        err.downcast_ref::<Thrown>().map(|t| &t.0)
    }
}

/// Builds a catchable failure of `class`.
pub fn throw(class: &ClassRef, message: impl Into<String>) -> anyhow::Error {
    raise(Arc::new(Throwable::new(class, message)))
}

/// Raises an existing exception object.
pub fn raise(throwable: Arc<Throwable>) -> anyhow::Error {
    anyhow::Error::new(Thrown(throwable))
}
