use std::fmt;
use std::sync::Arc;

use crate::callable::{CallableRef, NativeFn};
use crate::val::{BasicType, ClassRef, ElemKind, ErasedSig, Value};

/// Operands are "RK" encoded: a slot index, or a constant-pool index with the high bit set.
pub const RK_CONST_BIT: u16 = 1 << 15;
pub const RK_INDEX_MASK: u16 = RK_CONST_BIT - 1;

#[inline]
pub fn rk_is_const(rk: u16) -> bool {
    (rk & RK_CONST_BIT) != 0
}

#[inline]
pub fn rk_index(rk: u16) -> u16 {
    rk & RK_INDEX_MASK
}

#[inline]
pub const fn rk_make_const(kidx: u16) -> u16 {
    kidx | RK_CONST_BIT
}

#[derive(Clone)]
pub enum Insn {
    Move {
        dst: u16,
        src: u16,
    },
    /// Fails unless slot `frame` holds a frame of shape `shape`.
    CheckShape {
        frame: u16,
        shape: Arc<str>,
    },
    GetField {
        dst: u16,
        frame: u16,
        index: u16,
    },
    /// Reference cast of an operand; null passes.
    Cast {
        src: u16,
        class: ClassRef,
    },
    /// Straight call into a native body. Arguments are already cast.
    CallDirect {
        dst: Option<u16>,
        func: NativeFn,
        name: Arc<str>,
        ret: BasicType,
        args: Box<[u16]>,
    },
    /// Call through the callable's boxed invoker.
    CallBoxed {
        dst: Option<u16>,
        callable: CallableRef,
        args: Box<[u16]>,
    },
    /// Call of a callable value held in an operand, which must have type `sig`.
    CallValue {
        dst: Option<u16>,
        callee: u16,
        sig: ErasedSig,
        args: Box<[u16]>,
    },
    /// Call of a callable value, adapting the arguments to whatever erased
    /// type the callee has. The result is boxed.
    CallAdapted {
        dst: u16,
        callee: u16,
        args: Box<[u16]>,
    },
    /// `dst = src` boxed, then converted to `ty`.
    Unbox {
        dst: u16,
        src: u16,
        ty: BasicType,
    },
    ArrayLoad {
        dst: u16,
        array: u16,
        index: u16,
        kind: ElemKind,
    },
    ArrayStore {
        array: u16,
        index: u16,
        value: u16,
        kind: ElemKind,
    },
    /// Jump by `ofs` when the int operand `cond` is zero.
    JmpIfZero {
        cond: u16,
        ofs: i16,
    },
    Jmp(i16),
    /// Opens a protected region. A thrown failure inside it stores the
    /// exception in slot `exc` and jumps by `handler`.
    TryBegin {
        handler: i16,
        exc: u16,
    },
    TryEnd,
    /// `dst = src instanceof class`, `class` being an operand holding a class.
    InstanceOf {
        dst: u16,
        src: u16,
        class: u16,
    },
    /// Re-raises the failure caught into slot `exc`, unchanged.
    Rethrow {
        exc: u16,
    },
    Return(Option<u16>),
}

fn rk(f: &mut fmt::Formatter<'_>, operand: u16) -> fmt::Result {
    if rk_is_const(operand) {
        write!(f, "k{}", rk_index(operand))
    } else {
        write!(f, "r{}", operand)
    }
}

fn rk_list(f: &mut fmt::Formatter<'_>, operands: &[u16]) -> fmt::Result {
    write!(f, "(")?;
    for (i, operand) in operands.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        rk(f, *operand)?;
    }
    write!(f, ")")
}

fn dst(f: &mut fmt::Formatter<'_>, dst: Option<u16>) -> fmt::Result {
    match dst {
        Some(d) => write!(f, "r{}", d),
        None => write!(f, "_"),
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Insn::Move { dst, src } => {
                write!(f, "Move r{}, ", dst)?;
                rk(f, *src)
            }
            Insn::CheckShape { frame, shape } => write!(f, "CheckShape r{}, \"{}\"", frame, shape),
            Insn::GetField { dst, frame, index } => write!(f, "GetField r{}, r{}.{}", dst, frame, index),
            Insn::Cast { src, class } => {
                write!(f, "Cast ")?;
                rk(f, *src)?;
                write!(f, ", {}", class)
            }
            Insn::CallDirect {
                dst: d, name, args, ..
            } => {
                write!(f, "CallDirect ")?;
                dst(f, *d)?;
                write!(f, ", {}", name)?;
                rk_list(f, args)
            }
            Insn::CallBoxed { dst: d, callable, args } => {
                write!(f, "CallBoxed ")?;
                dst(f, *d)?;
                write!(f, ", {:?}", callable)?;
                rk_list(f, args)
            }
            Insn::CallValue {
                dst: d,
                callee,
                sig,
                args,
            } => {
                write!(f, "CallValue ")?;
                dst(f, *d)?;
                write!(f, ", ")?;
                rk(f, *callee)?;
                write!(f, "{}", sig)?;
                rk_list(f, args)
            }
            Insn::CallAdapted { dst: d, callee, args } => {
                write!(f, "CallAdapted r{}, ", d)?;
                rk(f, *callee)?;
                rk_list(f, args)
            }
            Insn::Unbox { dst, src, ty } => {
                write!(f, "Unbox r{}, ", dst)?;
                rk(f, *src)?;
                write!(f, ", {}", ty)
            }
            Insn::ArrayLoad {
                dst,
                array,
                index,
                kind,
            } => {
                write!(f, "ArrayLoad.{} r{}, ", kind, dst)?;
                rk(f, *array)?;
                write!(f, "[")?;
                rk(f, *index)?;
                write!(f, "]")
            }
            Insn::ArrayStore {
                array,
                index,
                value,
                kind,
            } => {
                write!(f, "ArrayStore.{} ", kind)?;
                rk(f, *array)?;
                write!(f, "[")?;
                rk(f, *index)?;
                write!(f, "], ")?;
                rk(f, *value)
            }
            Insn::JmpIfZero { cond, ofs } => {
                write!(f, "JmpIfZero ")?;
                rk(f, *cond)?;
                write!(f, ", {}", ofs)
            }
            Insn::Jmp(ofs) => write!(f, "Jmp {}", ofs),
            Insn::TryBegin { handler, exc } => write!(f, "TryBegin {}, r{}", handler, exc),
            Insn::TryEnd => write!(f, "TryEnd"),
            Insn::InstanceOf { dst, src, class } => {
                write!(f, "InstanceOf r{}, r{}, ", dst, src)?;
                rk(f, *class)
            }
            Insn::Rethrow { exc } => write!(f, "Rethrow r{}", exc),
            Insn::Return(Some(src)) => {
                write!(f, "Return ")?;
                rk(f, *src)
            }
            Insn::Return(None) => write!(f, "Return"),
        }
    }
}

impl fmt::Debug for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Flat routine produced by lowering one call plan.
pub struct LoweredRoutine {
    pub(crate) name: Arc<str>,
    pub(crate) arity: usize,
    pub(crate) n_slots: usize,
    pub(crate) consts: Vec<Value>,
    pub(crate) code: Vec<Insn>,
}

impl LoweredRoutine {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn slot_count(&self) -> usize {
        self.n_slots
    }

    pub fn consts(&self) -> &[Value] {
        &self.consts
    }

    pub fn code(&self) -> &[Insn] {
        &self.code
    }

    /// Whether any instruction satisfies `pred`.
    pub fn contains(&self, pred: impl Fn(&Insn) -> bool) -> bool {
        self.code.iter().any(pred)
    }

    pub fn count(&self, pred: impl Fn(&Insn) -> bool) -> usize {
        self.code.iter().filter(|insn| pred(insn)).count()
    }
}

impl fmt::Display for LoweredRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "routine {} (arity {}, {} slots)", self.name, self.arity, self.n_slots)?;
        for (i, k) in self.consts.iter().enumerate() {
            writeln!(f, "  k{} = {:?}", i, k)?;
        }
        for (pc, insn) in self.code.iter().enumerate() {
            writeln!(f, "  {:04}  {}", pc, insn)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LoweredRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LoweredRoutine({}, {} insns)", self.name, self.code.len())
    }
}
