use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use once_cell::sync::Lazy;

use super::array::ElemKind;

/// Properties that decide whether a class can be named from lowered code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassFlags {
    pub public: bool,
    pub array: bool,
    pub primitive: bool,
    pub anonymous: bool,
    pub local: bool,
}

impl ClassFlags {
    pub const PUBLIC: ClassFlags = ClassFlags {
        public: true,
        array: false,
        primitive: false,
        anonymous: false,
        local: false,
    };

    pub const PRIVATE: ClassFlags = ClassFlags {
        public: false,
        ..ClassFlags::PUBLIC
    };
}

#[derive(Debug)]
struct Class {
    name: Arc<str>,
    superclass: Option<ClassRef>,
    component: Option<ClassRef>,
    flags: ClassFlags,
}

/// Nominal class used for casts, exception guards and visibility checks.
///
/// Classes compare by identity; two classes with the same name are distinct.
#[derive(Clone)]
pub struct ClassRef(Arc<Class>);

impl ClassRef {
    pub fn new(name: impl Into<Arc<str>>, superclass: Option<&ClassRef>, flags: ClassFlags) -> Self {
        Self(Arc::new(Class {
            name: name.into(),
            superclass: superclass.cloned(),
            component: None,
            flags,
        }))
    }

    /// A public class extending `Object`.
    pub fn public(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, Some(object()), ClassFlags::PUBLIC)
    }

    /// A public subclass of `superclass`.
    pub fn subclass(name: impl Into<Arc<str>>, superclass: &ClassRef) -> Self {
        Self::new(name, Some(superclass), ClassFlags::PUBLIC)
    }

    fn array_of(component: &ClassRef) -> Self {
        Self(Arc::new(Class {
            name: format!("{}[]", component.name()).into(),
            superclass: Some(object().clone()),
            component: Some(component.clone()),
            flags: ClassFlags {
                array: true,
                ..ClassFlags::PUBLIC
            },
        }))
    }

    fn primitive(name: &str) -> Self {
        Self::new(
            name,
            None,
            ClassFlags {
                primitive: true,
                ..ClassFlags::PUBLIC
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn flags(&self) -> ClassFlags {
        self.0.flags
    }

    pub fn superclass(&self) -> Option<&ClassRef> {
        self.0.superclass.as_ref()
    }

    pub fn component(&self) -> Option<&ClassRef> {
        self.0.component.as_ref()
    }

    pub fn is_array(&self) -> bool {
        self.0.flags.array
    }

    pub fn is_primitive(&self) -> bool {
        self.0.flags.primitive
    }

    /// True when `self` is `other` or inherits from it.
    pub fn is_subclass_of(&self, other: &ClassRef) -> bool {
        let mut cursor = Some(self);
        while let Some(class) = cursor {
            if class == other {
                return true;
            }
            cursor = class.superclass();
        }
        false
    }

    /// Whether code outside the class's defining scope may name it.
    pub fn is_visible(&self) -> bool {
        let flags = self.0.flags;
        if flags.array {
            return self.component().is_some_and(ClassRef::is_visible);
        }
        flags.public && !flags.anonymous && !flags.local
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClassRef {}

impl Hash for ClassRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.name())
    }
}

impl fmt::Display for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static OBJECT: Lazy<ClassRef> = Lazy::new(|| ClassRef::new("Object", None, ClassFlags::PUBLIC));
static STRING: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("String"));
static CLASS: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("Class"));
static NUMBER: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("Number"));
static INTEGER: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("Integer", &NUMBER));
static LONG: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("Long", &NUMBER));
static FLOAT: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("Float", &NUMBER));
static DOUBLE: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("Double", &NUMBER));
static CALLABLE: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("Callable"));
static FRAME: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("BoundFrame", &CALLABLE));

static THROWABLE: Lazy<ClassRef> = Lazy::new(|| ClassRef::public("Throwable"));
static EXCEPTION: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("Exception", &THROWABLE));
static RUNTIME_EXCEPTION: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("RuntimeException", &EXCEPTION));
static ARITHMETIC: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("ArithmeticException", &RUNTIME_EXCEPTION));
static NULL_POINTER: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("NullPointerException", &RUNTIME_EXCEPTION));
static CLASS_CAST: Lazy<ClassRef> = Lazy::new(|| ClassRef::subclass("ClassCastException", &RUNTIME_EXCEPTION));
static INDEX_OUT_OF_BOUNDS: Lazy<ClassRef> =
    Lazy::new(|| ClassRef::subclass("ArrayIndexOutOfBoundsException", &RUNTIME_EXCEPTION));
static ILLEGAL_ARGUMENT: Lazy<ClassRef> =
    Lazy::new(|| ClassRef::subclass("IllegalArgumentException", &RUNTIME_EXCEPTION));
static NUMBER_FORMAT: Lazy<ClassRef> =
    Lazy::new(|| ClassRef::subclass("NumberFormatException", &ILLEGAL_ARGUMENT));

static PRIMITIVES: Lazy<[ClassRef; 6]> = Lazy::new(|| {
    [
        OBJECT.clone(),
        ClassRef::primitive("byte"),
        ClassRef::primitive("int"),
        ClassRef::primitive("long"),
        ClassRef::primitive("float"),
        ClassRef::primitive("double"),
    ]
});

static ARRAYS: Lazy<[ClassRef; 6]> = Lazy::new(|| {
    let p = &*PRIMITIVES;
    [
        ClassRef::array_of(&p[0]),
        ClassRef::array_of(&p[1]),
        ClassRef::array_of(&p[2]),
        ClassRef::array_of(&p[3]),
        ClassRef::array_of(&p[4]),
        ClassRef::array_of(&p[5]),
    ]
});

pub fn object() -> &'static ClassRef {
    &OBJECT
}

pub fn string() -> &'static ClassRef {
    &STRING
}

pub fn class() -> &'static ClassRef {
    &CLASS
}

pub fn number() -> &'static ClassRef {
    &NUMBER
}

pub fn integer() -> &'static ClassRef {
    &INTEGER
}

pub fn long() -> &'static ClassRef {
    &LONG
}

pub fn float() -> &'static ClassRef {
    &FLOAT
}

pub fn double() -> &'static ClassRef {
    &DOUBLE
}

pub fn callable() -> &'static ClassRef {
    &CALLABLE
}

pub fn frame() -> &'static ClassRef {
    &FRAME
}

pub fn throwable() -> &'static ClassRef {
    &THROWABLE
}

pub fn exception() -> &'static ClassRef {
    &EXCEPTION
}

pub fn runtime_exception() -> &'static ClassRef {
    &RUNTIME_EXCEPTION
}

pub fn arithmetic_exception() -> &'static ClassRef {
    &ARITHMETIC
}

pub fn null_pointer_exception() -> &'static ClassRef {
    &NULL_POINTER
}

pub fn class_cast_exception() -> &'static ClassRef {
    &CLASS_CAST
}

pub fn index_out_of_bounds_exception() -> &'static ClassRef {
    &INDEX_OUT_OF_BOUNDS
}

pub fn illegal_argument_exception() -> &'static ClassRef {
    &ILLEGAL_ARGUMENT
}

pub fn number_format_exception() -> &'static ClassRef {
    &NUMBER_FORMAT
}

pub fn array(kind: ElemKind) -> &'static ClassRef {
    &ARRAYS[kind.ordinal()]
}
