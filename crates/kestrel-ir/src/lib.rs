//! Slot-allocated intermediate representation for Kestrel functions.
//!
//! This is the form handed to the compiler after optimization and slot
//! allocation: every function is a flat list of [`Inst`]s over numbered
//! local slots, with symbolic labels for control flow. The compiler decides
//! where functions may suspend; the IR itself knows nothing about
//! resumption.

pub mod builder;
pub mod inst;
pub mod program;

use cranelift_entity::entity_impl;
use serde::{Deserialize, Serialize};

pub use builder::{BuildError, FunctionBuilder, ProgramBuilder};
pub use inst::{ArithOp, Builtin, CompareOp, Constant, Inst};
pub use program::{Program, Proto};

/// A local register of a function activation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u32);
entity_impl!(Slot, "r");

/// A jump target inside a function body.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelId(u32);
entity_impl!(LabelId, "L");

/// Index of a function in its program's function table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(u32);
entity_impl!(FunctionId, "fn");
