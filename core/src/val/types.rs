use std::fmt;
use std::sync::Arc;

use super::Value;
use super::class::ClassRef;

/// Closed set of erased types every value is reduced to before entering a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BasicType {
    Ref,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl BasicType {
    pub const ALL: [BasicType; 6] = [
        BasicType::Ref,
        BasicType::Int,
        BasicType::Long,
        BasicType::Float,
        BasicType::Double,
        BasicType::Void,
    ];

    /// Types that may appear as arguments or frame fields.
    pub const ARG_TYPES: [BasicType; 5] = [
        BasicType::Ref,
        BasicType::Int,
        BasicType::Long,
        BasicType::Float,
        BasicType::Double,
    ];

    pub const ARG_TYPE_COUNT: usize = 5;

    #[inline]
    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub const fn char(self) -> char {
        match self {
            BasicType::Ref => 'L',
            BasicType::Int => 'I',
            BasicType::Long => 'J',
            BasicType::Float => 'F',
            BasicType::Double => 'D',
            BasicType::Void => 'V',
        }
    }

    pub fn from_char(c: char) -> Option<BasicType> {
        match c {
            'L' => Some(BasicType::Ref),
            'I' => Some(BasicType::Int),
            'J' => Some(BasicType::Long),
            'F' => Some(BasicType::Float),
            'D' => Some(BasicType::Double),
            'V' => Some(BasicType::Void),
            _ => None,
        }
    }

    /// Machine slots occupied by a value of this type.
    pub const fn slot_count(self) -> usize {
        match self {
            BasicType::Long | BasicType::Double => 2,
            BasicType::Void => 0,
            _ => 1,
        }
    }

    #[inline]
    pub const fn is_arg(self) -> bool {
        !matches!(self, BasicType::Void)
    }

    pub fn zero(self) -> Value {
        match self {
            BasicType::Ref => Value::null(),
            BasicType::Int => Value::Int(0),
            BasicType::Long => Value::Long(0),
            BasicType::Float => Value::Float(0.0),
            BasicType::Double => Value::Double(0.0),
            BasicType::Void => Value::Void,
        }
    }

    pub fn signature(types: &[BasicType]) -> String {
        types.iter().map(|t| t.char()).collect()
    }
}

impl fmt::Display for BasicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.char())
    }
}

/// Richer type descriptor supplied by the lookup layer; erased before use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Void,
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Long,
    Float,
    Double,
    Class(ClassRef),
}

impl TypeDesc {
    pub fn erase(&self) -> BasicType {
        match self {
            TypeDesc::Void => BasicType::Void,
            TypeDesc::Boolean | TypeDesc::Byte | TypeDesc::Short | TypeDesc::Char | TypeDesc::Int => BasicType::Int,
            TypeDesc::Long => BasicType::Long,
            TypeDesc::Float => BasicType::Float,
            TypeDesc::Double => BasicType::Double,
            TypeDesc::Class(_) => BasicType::Ref,
        }
    }

    pub fn object() -> TypeDesc {
        TypeDesc::Class(super::class::object().clone())
    }

    pub fn class(&self) -> Option<&ClassRef> {
        match self {
            TypeDesc::Class(class) => Some(class),
            _ => None,
        }
    }

    /// The least specific descriptor that erases to `basic`.
    pub fn of_basic(basic: BasicType) -> TypeDesc {
        match basic {
            BasicType::Ref => TypeDesc::object(),
            BasicType::Int => TypeDesc::Int,
            BasicType::Long => TypeDesc::Long,
            BasicType::Float => TypeDesc::Float,
            BasicType::Double => TypeDesc::Double,
            BasicType::Void => TypeDesc::Void,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Boolean => write!(f, "boolean"),
            TypeDesc::Byte => write!(f, "byte"),
            TypeDesc::Short => write!(f, "short"),
            TypeDesc::Char => write!(f, "char"),
            TypeDesc::Int => write!(f, "int"),
            TypeDesc::Long => write!(f, "long"),
            TypeDesc::Float => write!(f, "float"),
            TypeDesc::Double => write!(f, "double"),
            TypeDesc::Class(class) => write!(f, "{}", class.name()),
        }
    }
}

/// Erased call signature; the key under which boxed invokers are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErasedSig {
    pub params: Arc<[BasicType]>,
    pub ret: BasicType,
}

impl ErasedSig {
    pub fn new(params: impl Into<Arc<[BasicType]>>, ret: BasicType) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Same signature with `leading` inserted in front of the parameters.
    pub fn prepend(&self, leading: BasicType) -> ErasedSig {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(leading);
        params.extend_from_slice(&self.params);
        ErasedSig::new(params, self.ret)
    }
}

impl fmt::Display for ErasedSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}){}", BasicType::signature(&self.params), self.ret.char())
    }
}

/// Full method type: parameter and return descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodType {
    params: Arc<[TypeDesc]>,
    ret: TypeDesc,
}

impl MethodType {
    pub fn new(params: impl Into<Arc<[TypeDesc]>>, ret: TypeDesc) -> Self {
        Self {
            params: params.into(),
            ret,
        }
    }

    /// The plainest method type with the given erasure.
    pub fn generic(sig: &ErasedSig) -> Self {
        let params: Vec<TypeDesc> = sig.params.iter().map(|t| TypeDesc::of_basic(*t)).collect();
        Self::new(params, TypeDesc::of_basic(sig.ret))
    }

    pub fn params(&self) -> &[TypeDesc] {
        &self.params
    }

    pub fn param(&self, index: usize) -> Option<&TypeDesc> {
        self.params.get(index)
    }

    pub fn ret(&self) -> &TypeDesc {
        &self.ret
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn erase(&self) -> ErasedSig {
        let params: Vec<BasicType> = self.params.iter().map(TypeDesc::erase).collect();
        ErasedSig::new(params, self.ret.erase())
    }

    pub fn drop_param(&self, index: usize) -> Option<MethodType> {
        if index >= self.params.len() {
            return None;
        }
        let mut params = self.params.to_vec();
        params.remove(index);
        Some(MethodType::new(params, self.ret.clone()))
    }
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.ret)
    }
}
