//! Adaptive call composition.
//!
//! A composed call is a [`species::Frame`]: bound values laid out by an
//! interned [`species::Shape`], plus a [`plan::CallPlan`] describing what to
//! do with them. Calls start out interpreted; once a plan turns hot it is
//! lowered to a flat routine that every frame sharing the plan then runs.

pub mod callable;
pub mod config;
pub mod error;
pub mod forms;
pub mod lower;
pub mod plan;
pub mod species;
pub mod val;
pub mod vm;

pub use callable::{CallableRef, Symbol, SymbolKind, SymbolTable, global_symbols};
pub use config::EngineOptions;
pub use error::EngineError;
pub use plan::{Arg, CallPlan, Node, make_plan};
pub use species::{Frame, Shape, get_shape};
pub use val::{BasicType, MethodType, TypeDesc, Value};
pub use vm::invoke;
