//! Instructions and constants.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{FunctionId, LabelId, Slot};

/// Binary arithmetic operators. All of them are dispatched: operands that
/// are not numbers (or strings, for `Concat`) fall back to metamethods.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    #[display("add")]
    Add,
    #[display("sub")]
    Sub,
    #[display("mul")]
    Mul,
    #[display("div")]
    Div,
    #[display("mod")]
    Mod,
    #[display("concat")]
    Concat,
}

impl ArithOp {
    /// Name of the metamethod consulted when the operands are not primitive.
    pub fn metamethod(self) -> &'static str {
        match self {
            ArithOp::Add => "__add",
            ArithOp::Sub => "__sub",
            ArithOp::Mul => "__mul",
            ArithOp::Div => "__div",
            ArithOp::Mod => "__mod",
            ArithOp::Concat => "__concat",
        }
    }
}

/// Comparison operators, dispatched like [`ArithOp`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[display("eq")]
    Eq,
    #[display("lt")]
    Lt,
    #[display("le")]
    Le,
}

impl CompareOp {
    pub fn metamethod(self) -> &'static str {
        match self {
            CompareOp::Eq => "__eq",
            CompareOp::Lt => "__lt",
            CompareOp::Le => "__le",
        }
    }
}

/// Functions provided by the runtime rather than compiled from source.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Builtin {
    #[display("pcall")]
    Pcall,
    #[display("error")]
    Error,
    #[display("setmetatable")]
    SetMetatable,
    #[display("getmetatable")]
    GetMetatable,
    #[display("coroutine.create")]
    CoroutineCreate,
    #[display("coroutine.resume")]
    CoroutineResume,
    #[display("coroutine.yield")]
    CoroutineYield,
    #[display("coroutine.status")]
    CoroutineStatus,
    #[display("coroutine.running")]
    CoroutineRunning,
    #[display("coroutine.isyieldable")]
    CoroutineIsYieldable,
    /// Voluntarily pause the whole call.
    #[display("pause")]
    Pause,
    /// Wait for an asynchronous task supplied by the embedder.
    #[display("await")]
    Await,
}

/// Compile-time constant operand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Function(FunctionId),
    Builtin(Builtin),
}

impl std::fmt::Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Int(i) => write!(f, "{i}"),
            Constant::Float(x) => write!(f, "{x:?}"),
            Constant::Str(s) => write!(f, "{s:?}"),
            Constant::Function(id) => write!(f, "{id}"),
            Constant::Builtin(b) => write!(f, "<{b}>"),
        }
    }
}

/// A single IR instruction.
///
/// `Arith`, `Compare`, `GetIndex`, `Call` and `Checkpoint` may suspend the
/// running call; everything else completes immediately.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Inst {
    LoadConst {
        dest: Slot,
        value: Constant,
    },
    Move {
        dest: Slot,
        src: Slot,
    },
    Not {
        dest: Slot,
        src: Slot,
    },
    Arith {
        op: ArithOp,
        dest: Slot,
        lhs: Slot,
        rhs: Slot,
    },
    Compare {
        op: CompareOp,
        dest: Slot,
        lhs: Slot,
        rhs: Slot,
    },
    GetIndex {
        dest: Slot,
        table: Slot,
        key: Slot,
    },
    /// Raw store; never consults `__newindex`.
    SetIndex {
        table: Slot,
        key: Slot,
        value: Slot,
    },
    NewTable {
        dest: Slot,
    },
    /// Load the `index`-th extra argument of a vararg function.
    Vararg {
        dest: Slot,
        index: u32,
    },
    Call {
        target: Slot,
        args: Vec<Slot>,
        #[serde(default)]
        spread_varargs: bool,
        results: Vec<Slot>,
    },
    TailCall {
        target: Slot,
        args: Vec<Slot>,
        #[serde(default)]
        spread_varargs: bool,
    },
    Return {
        values: Vec<Slot>,
        #[serde(default)]
        spread_varargs: bool,
    },
    Label(LabelId),
    Jump(LabelId),
    JumpUnless {
        cond: Slot,
        target: LabelId,
    },
    /// Scheduler checkpoint: register `ticks` with the scheduling policy and
    /// pause if it asks to.
    Checkpoint {
        ticks: u32,
    },
}

impl Inst {
    /// Whether executing this instruction can suspend the call.
    pub fn may_suspend(&self) -> bool {
        matches!(
            self,
            Inst::Arith { .. }
                | Inst::Compare { .. }
                | Inst::GetIndex { .. }
                | Inst::Call { .. }
                | Inst::Checkpoint { .. }
        )
    }

    /// Slots read by this instruction.
    pub fn uses(&self) -> Vec<Slot> {
        match self {
            Inst::LoadConst { .. }
            | Inst::NewTable { .. }
            | Inst::Vararg { .. }
            | Inst::Label(_)
            | Inst::Jump(_)
            | Inst::Checkpoint { .. } => Vec::new(),
            Inst::Move { src, .. } | Inst::Not { src, .. } => vec![*src],
            Inst::Arith { lhs, rhs, .. } | Inst::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::GetIndex { table, key, .. } => vec![*table, *key],
            Inst::SetIndex { table, key, value } => vec![*table, *key, *value],
            Inst::Call { target, args, .. } | Inst::TailCall { target, args, .. } => {
                std::iter::once(*target).chain(args.iter().copied()).collect()
            }
            Inst::Return { values, .. } => values.clone(),
            Inst::JumpUnless { cond, .. } => vec![*cond],
        }
    }

    /// Slots written by this instruction.
    pub fn defs(&self) -> Vec<Slot> {
        match self {
            Inst::LoadConst { dest, .. }
            | Inst::Move { dest, .. }
            | Inst::Not { dest, .. }
            | Inst::Arith { dest, .. }
            | Inst::Compare { dest, .. }
            | Inst::GetIndex { dest, .. }
            | Inst::NewTable { dest }
            | Inst::Vararg { dest, .. } => vec![*dest],
            Inst::Call { results, .. } => results.clone(),
            Inst::SetIndex { .. }
            | Inst::TailCall { .. }
            | Inst::Return { .. }
            | Inst::Label(_)
            | Inst::Jump(_)
            | Inst::JumpUnless { .. }
            | Inst::Checkpoint { .. } => Vec::new(),
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Return { .. } | Inst::TailCall { .. } | Inst::Jump(_)
        )
    }
}
