//! Frame shapes ("species"): interned layouts for bound-argument frames.
//!
//! A shape is identified by its signature, a string over `L I J F D` naming
//! the basic type of every field in order. Shapes are generated on first use
//! and never replaced; the registry holds at most one realized shape per
//! signature for the life of the process.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use anyhow::Result;
use once_cell::sync::{Lazy, OnceCell};
use rustc_hash::FxHashMap;

use crate::callable::{CallableRef, Intrinsic};
use crate::error::EngineError;
use crate::plan::CallPlan;
use crate::val::{BasicType, MethodType, Value};

mod frame;

pub use frame::Frame;

/// Upper bound on the slot count of a frame shape (int64/float64 fields take two).
pub const MAX_SHAPE_SLOTS: usize = 250;

static REGISTRY: Lazy<ShapeRegistry> = Lazy::new(ShapeRegistry::bootstrap);

/// Immutable layout shared by every frame with the same field signature.
pub struct Shape {
    signature: Arc<str>,
    field_types: Box<[BasicType]>,
    getters: Box<[CallableRef]>,
    extensions: [OnceCell<Arc<Shape>>; BasicType::ARG_TYPE_COUNT],
}

impl Shape {
    fn new(signature: Arc<str>, field_types: Vec<BasicType>) -> Self {
        let getters = field_types
            .iter()
            .enumerate()
            .map(|(index, ty)| {
                CallableRef::intrinsic(Intrinsic::FieldGet {
                    shape: signature.clone(),
                    index,
                    ty: *ty,
                })
            })
            .collect();
        Self {
            signature,
            field_types: field_types.into_boxed_slice(),
            getters,
            extensions: Default::default(),
        }
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn signature_arc(&self) -> &Arc<str> {
        &self.signature
    }

    pub fn field_types(&self) -> &[BasicType] {
        &self.field_types
    }

    pub fn field_count(&self) -> usize {
        self.field_types.len()
    }

    pub fn field_type(&self, index: usize) -> Option<BasicType> {
        self.field_types.get(index).copied()
    }

    pub fn slot_count(&self) -> usize {
        self.field_types.iter().map(|t| t.slot_count()).sum()
    }

    /// Getter callable `(L frame) -> T` for field `index`.
    pub fn getter(&self, index: usize) -> Option<&CallableRef> {
        self.getters.get(index)
    }

    pub fn getters(&self) -> &[CallableRef] {
        &self.getters
    }

    /// Signature this shape was extended from; `None` for the empty shape.
    pub fn parent_signature(&self) -> Option<&str> {
        let len = self.signature.len();
        (len > 0).then(|| &self.signature[..len - 1])
    }

    /// Shape with one more trailing field of type `ty`, memoized per type on this shape.
    pub fn extend(&self, ty: BasicType) -> Result<Arc<Shape>> {
        if !ty.is_arg() {
            return Err(EngineError::shape(
                &self.signature,
                format!("cannot extend with a field of type {}", ty),
            ));
        }
        self.extensions[ty.ordinal()]
            .get_or_try_init(|| get_shape(&format!("{}{}", self.signature, ty.char())))
            .cloned()
    }

    /// Builds a frame of this shape from a complete field tuple.
    pub fn construct(self: &Arc<Self>, plan: Arc<CallPlan>, ty: MethodType, fields: Vec<Value>) -> Result<Arc<Frame>> {
        if fields.len() != self.field_count() {
            return Err(EngineError::illegal_state(format!(
                "shape \"{}\" has {} fields, got {} values",
                self.signature,
                self.field_count(),
                fields.len()
            )));
        }
        for (i, (value, ty)) in fields.iter().zip(self.field_types.iter()).enumerate() {
            if value.basic_type() != *ty {
                return Err(EngineError::illegal_state(format!(
                    "field {} of shape \"{}\" is {}, got {}",
                    i,
                    self.signature,
                    ty,
                    value.basic_type()
                )));
            }
        }
        Frame::new(self.clone(), plan, ty, fields.into_boxed_slice()).map(Arc::new)
    }

    /// Builds a frame holding `existing` followed by `new_value`. Values are
    /// checked at the basic-type level only.
    pub fn construct_frame(
        self: &Arc<Self>,
        plan: Arc<CallPlan>,
        ty: MethodType,
        existing: &[Value],
        new_value: Value,
    ) -> Result<Arc<Frame>> {
        let mut fields = Vec::with_capacity(existing.len() + 1);
        fields.extend_from_slice(existing);
        fields.push(new_value);
        self.construct(plan, ty, fields)
    }
}

impl PartialEq for Shape {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for Shape {}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape(\"{}\")", self.signature)
    }
}

enum ShapeEntry {
    /// Generation in progress on `owner`.
    Placeholder { owner: ThreadId },
    Ready(Arc<Shape>),
}

/// Signature → shape table. Writes happen only around placeholder install
/// and publish; generation runs with the table unlocked.
pub struct ShapeRegistry {
    table: Mutex<FxHashMap<Arc<str>, ShapeEntry>>,
    ready: Condvar,
}

impl ShapeRegistry {
    /// Registry with the hand-built empty shape and the five one-field shapes.
    fn bootstrap() -> Self {
        let registry = Self {
            table: Mutex::new(FxHashMap::default()),
            ready: Condvar::new(),
        };
        let empty: Arc<str> = Arc::from("");
        let root = Arc::new(Shape::new(empty.clone(), Vec::new()));
        registry.lock().insert(empty, ShapeEntry::Ready(root));
        for ty in BasicType::ARG_TYPES {
            if let Err(err) = registry.lookup(&ty.char().to_string()) {
                tracing::error!(target: "callplan::species", "bootstrap of shape {} failed: {:#}", ty, err);
            }
        }
        registry
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<Arc<str>, ShapeEntry>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the shape for `signature`, generating it on first request.
    pub fn lookup(&self, signature: &str) -> Result<Arc<Shape>> {
        self.realize(signature, |key, field_types| self.generate(key, field_types))
    }

    fn realize<G>(&self, signature: &str, generate: G) -> Result<Arc<Shape>>
    where
        G: FnOnce(&Arc<str>, Vec<BasicType>) -> Result<Arc<Shape>>,
    {
        let field_types = parse_signature(signature)?;
        let me = thread::current().id();
        let mut table = self.lock();
        loop {
            match table.get(signature) {
                Some(ShapeEntry::Ready(shape)) => return Ok(shape.clone()),
                Some(ShapeEntry::Placeholder { owner }) if *owner == me => {
                    return Err(EngineError::shape(signature, "recursive request during its own generation"));
                }
                Some(ShapeEntry::Placeholder { .. }) => {
                    table = self.ready.wait(table).unwrap_or_else(PoisonError::into_inner);
                }
                None => break,
            }
        }
        let key: Arc<str> = Arc::from(signature);
        table.insert(key.clone(), ShapeEntry::Placeholder { owner: me });
        drop(table);

        let placeholder = Placeholder {
            registry: self,
            key,
            published: false,
        };
        let shape = generate(&placeholder.key, field_types)?;
        placeholder.publish(shape.clone());
        Ok(shape)
    }

    fn generate(&self, signature: &Arc<str>, field_types: Vec<BasicType>) -> Result<Arc<Shape>> {
        if let Some(prefix) = signature.len().checked_sub(1).map(|len| &signature[..len]) {
            // Generating "IJ" realizes "I" first.
            self.lookup(prefix)?;
        }
        let shape = Arc::new(Shape::new(signature.clone(), field_types));
        tracing::debug!(
            target: "callplan::species",
            "generated shape \"{}\" ({} slots)",
            shape.signature(),
            shape.slot_count()
        );
        Ok(shape)
    }

    /// Signatures currently realized.
    pub fn signatures(&self) -> Vec<String> {
        let table = self.lock();
        let mut out: Vec<String> = table
            .iter()
            .filter(|(_, entry)| matches!(entry, ShapeEntry::Ready(_)))
            .map(|(k, _)| k.to_string())
            .collect();
        out.sort();
        out
    }
}

/// A placeholder held by the generating thread. Unless published, it is
/// withdrawn on drop (failed or panicking generation) and waiters retry.
struct Placeholder<'r> {
    registry: &'r ShapeRegistry,
    key: Arc<str>,
    published: bool,
}

impl Placeholder<'_> {
    fn publish(mut self, shape: Arc<Shape>) {
        self.registry.lock().insert(self.key.clone(), ShapeEntry::Ready(shape));
        self.published = true;
        self.registry.ready.notify_all();
    }
}

impl Drop for Placeholder<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.registry.lock().remove(&self.key);
            self.registry.ready.notify_all();
        }
    }
}

fn parse_signature(signature: &str) -> Result<Vec<BasicType>> {
    let mut types = Vec::with_capacity(signature.len());
    let mut slots = 0;
    for c in signature.chars() {
        let ty = BasicType::from_char(c)
            .filter(|t| t.is_arg())
            .ok_or_else(|| EngineError::shape(signature, format!("unknown field type '{}'", c)))?;
        slots += ty.slot_count();
        types.push(ty);
    }
    if slots > MAX_SHAPE_SLOTS {
        return Err(EngineError::shape(
            signature,
            format!("{} slots exceed the limit of {}", slots, MAX_SHAPE_SLOTS),
        ));
    }
    Ok(types)
}

/// The global registry.
pub fn registry() -> &'static ShapeRegistry {
    &REGISTRY
}

/// The interned shape for `signature`.
pub fn get_shape(signature: &str) -> Result<Arc<Shape>> {
    REGISTRY.lookup(signature)
}

/// Shape of `shape` extended by one field of `ty`.
pub fn extend(shape: &Shape, ty: BasicType) -> Result<Arc<Shape>> {
    shape.extend(ty)
}

/// The empty shape.
pub fn empty_shape() -> Result<Arc<Shape>> {
    get_shape("")
}
