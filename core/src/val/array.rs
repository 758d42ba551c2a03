use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;

use super::class::{self, ClassRef};
use super::types::BasicType;
use super::{Obj, Value, throw};
use crate::error::EngineError;

/// Element representation of a typed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    Ref,
    Byte,
    Int,
    Long,
    Float,
    Double,
}

impl ElemKind {
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    /// Erased type of a loaded element (bytes widen to `Int`).
    pub const fn basic_type(self) -> BasicType {
        match self {
            ElemKind::Ref => BasicType::Ref,
            ElemKind::Byte | ElemKind::Int => BasicType::Int,
            ElemKind::Long => BasicType::Long,
            ElemKind::Float => BasicType::Float,
            ElemKind::Double => BasicType::Double,
        }
    }

    pub const fn is_primitive(self) -> bool {
        !matches!(self, ElemKind::Ref)
    }
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemKind::Ref => "ref",
            ElemKind::Byte => "byte",
            ElemKind::Int => "int",
            ElemKind::Long => "long",
            ElemKind::Float => "float",
            ElemKind::Double => "double",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum ArrayData {
    Ref(Vec<Value>),
    Byte(Vec<i8>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl ArrayData {
    fn kind(&self) -> ElemKind {
        match self {
            ArrayData::Ref(_) => ElemKind::Ref,
            ArrayData::Byte(_) => ElemKind::Byte,
            ArrayData::Int(_) => ElemKind::Int,
            ArrayData::Long(_) => ElemKind::Long,
            ArrayData::Float(_) => ElemKind::Float,
            ArrayData::Double(_) => ElemKind::Double,
        }
    }

    fn len(&self) -> usize {
        match self {
            ArrayData::Ref(v) => v.len(),
            ArrayData::Byte(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Long(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Double(v) => v.len(),
        }
    }
}

/// Fixed-length typed array shared by reference; elements are mutable in place.
#[derive(Debug)]
pub struct ArrayObj {
    kind: ElemKind,
    data: RwLock<ArrayData>,
}

fn out_of_bounds(index: i32, len: usize) -> anyhow::Error {
    throw(
        class::index_out_of_bounds_exception(),
        format!("Index {} out of bounds for length {}", index, len),
    )
}

#[inline]
fn checked_index(index: i32, len: usize) -> Result<usize> {
    match usize::try_from(index) {
        Ok(i) if i < len => Ok(i),
        _ => Err(out_of_bounds(index, len)),
    }
}

fn store_mismatch(kind: ElemKind, value: &Value) -> anyhow::Error {
    throw(
        class::class_cast_exception(),
        format!("cannot store {} into {} array", value.type_name(), kind),
    )
}

impl ArrayObj {
    pub fn new(data: ArrayData) -> Self {
        Self {
            kind: data.kind(),
            data: RwLock::new(data),
        }
    }

    pub fn kind(&self) -> ElemKind {
        self.kind
    }

    pub fn class(&self) -> &'static ClassRef {
        class::array(self.kind)
    }

    pub fn len(&self) -> usize {
        self.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ArrayData>> {
        self.data
            .read()
            .map_err(|_| EngineError::illegal_state("array storage lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ArrayData>> {
        self.data
            .write()
            .map_err(|_| EngineError::illegal_state("array storage lock poisoned"))
    }

    /// Copy of the whole contents.
    pub fn snapshot(&self) -> Result<ArrayData> {
        Ok(self.read()?.clone())
    }

    /// Generic element read, widening bytes to `Int`.
    pub fn load(&self, index: i32) -> Result<Value> {
        let data = self.read()?;
        let i = checked_index(index, data.len())?;
        Ok(match &*data {
            ArrayData::Ref(v) => v[i].clone(),
            ArrayData::Byte(v) => Value::Int(v[i] as i32),
            ArrayData::Int(v) => Value::Int(v[i]),
            ArrayData::Long(v) => Value::Long(v[i]),
            ArrayData::Float(v) => Value::Float(v[i]),
            ArrayData::Double(v) => Value::Double(v[i]),
        })
    }

    /// Generic element write; bytes are truncated from `Int`.
    pub fn store(&self, index: i32, value: &Value) -> Result<()> {
        let mut data = self.write()?;
        let i = checked_index(index, data.len())?;
        match (&mut *data, value) {
            (ArrayData::Ref(v), Value::Ref(_)) => v[i] = value.clone(),
            (ArrayData::Byte(v), Value::Int(x)) => v[i] = *x as i8,
            (ArrayData::Int(v), Value::Int(x)) => v[i] = *x,
            (ArrayData::Long(v), Value::Long(x)) => v[i] = *x,
            (ArrayData::Float(v), Value::Float(x)) => v[i] = *x,
            (ArrayData::Double(v), Value::Double(x)) => v[i] = *x,
            _ => return Err(store_mismatch(self.kind, value)),
        }
        Ok(())
    }

    pub fn load_int(&self, index: i32) -> Result<i32> {
        let data = self.read()?;
        let i = checked_index(index, data.len())?;
        match &*data {
            ArrayData::Int(v) => Ok(v[i]),
            ArrayData::Byte(v) => Ok(v[i] as i32),
            _ => Err(EngineError::illegal_state("int load from non-int array")),
        }
    }

    pub fn load_long(&self, index: i32) -> Result<i64> {
        let data = self.read()?;
        let i = checked_index(index, data.len())?;
        match &*data {
            ArrayData::Long(v) => Ok(v[i]),
            _ => Err(EngineError::illegal_state("long load from non-long array")),
        }
    }

    pub fn load_double(&self, index: i32) -> Result<f64> {
        let data = self.read()?;
        let i = checked_index(index, data.len())?;
        match &*data {
            ArrayData::Double(v) => Ok(v[i]),
            _ => Err(EngineError::illegal_state("double load from non-double array")),
        }
    }

    pub fn store_int(&self, index: i32, value: i32) -> Result<()> {
        let mut data = self.write()?;
        let i = checked_index(index, data.len())?;
        match &mut *data {
            ArrayData::Int(v) => v[i] = value,
            ArrayData::Byte(v) => v[i] = value as i8,
            _ => return Err(EngineError::illegal_state("int store into non-int array")),
        }
        Ok(())
    }

    pub fn store_long(&self, index: i32, value: i64) -> Result<()> {
        let mut data = self.write()?;
        let i = checked_index(index, data.len())?;
        match &mut *data {
            ArrayData::Long(v) => v[i] = value,
            _ => return Err(EngineError::illegal_state("long store into non-long array")),
        }
        Ok(())
    }

    pub fn store_double(&self, index: i32, value: f64) -> Result<()> {
        let mut data = self.write()?;
        let i = checked_index(index, data.len())?;
        match &mut *data {
            ArrayData::Double(v) => v[i] = value,
            _ => return Err(EngineError::illegal_state("double store into non-double array")),
        }
        Ok(())
    }
}

/// Resolves `value` as an array of `kind`, throwing the same failures on every
/// execution path: null → `NullPointerException`, anything else → `ClassCastException`.
pub fn array_operand(value: &Value, kind: ElemKind) -> Result<&std::sync::Arc<ArrayObj>> {
    match value {
        Value::Ref(Obj::Array(array)) if array.kind() == kind => Ok(array),
        Value::Ref(Obj::Null) => Err(throw(
            class::null_pointer_exception(),
            format!("cannot access element of null {} array", kind),
        )),
        other => Err(throw(
            class::class_cast_exception(),
            format!("{} cannot be cast to {}", other.type_name(), class::array(kind)),
        )),
    }
}
