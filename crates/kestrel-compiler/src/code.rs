//! The executable form produced by the compiler.
//!
//! A compiled function is one or more *segments* of [`HostOp`]s. Control
//! enters a function only through its [`ResumptionTable`]: the initial call
//! dispatches on [`PointId::ENTRY`], and every resume dispatches on the point
//! recorded in the snapshot.

use std::fmt;

use cranelift_entity::PrimaryMap;
use kestrel_ir::{ArithOp, CompareOp, Constant, FunctionId, Slot};

use crate::resumption::ResumptionTable;

/// Identifies a resumption point: `(segment << 16) | offset`.
///
/// `0.0` is the function entry used by ordinary calls. Offset 0 of every
/// other segment is never allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(u32);

impl PointId {
    pub const ENTRY: PointId = PointId(0);

    const SEGMENT_SHIFT: u32 = 16;

    pub fn new(segment: u16, offset: u16) -> Self {
        PointId(((segment as u32) << Self::SEGMENT_SHIFT) | offset as u32)
    }

    pub fn from_raw(raw: u32) -> Self {
        PointId(raw)
    }

    pub fn as_raw(self) -> u32 {
        self.0
    }

    pub fn segment(self) -> u16 {
        (self.0 >> Self::SEGMENT_SHIFT) as u16
    }

    pub fn offset(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.segment(), self.offset())
    }
}

/// A position in compiled code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CodeAddr {
    pub segment: u16,
    pub pc: u32,
}

impl CodeAddr {
    pub fn new(segment: u16, pc: u32) -> Self {
        Self { segment, pc }
    }
}

impl fmt::Display for CodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.pc)
    }
}

/// One instruction of compiled code.
///
/// Suspending operations (`Arith`, `Compare`, `Index`, `Call`, `Checkpoint`)
/// leave their results in the return buffer; they are always preceded by a
/// `SetPoint` and followed by the point's label, where a `Receive` moves the
/// results into slots.
#[derive(Clone, Debug, PartialEq)]
pub enum HostOp {
    SetPoint(PointId),
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
    NewTable {
        dest: Slot,
    },
    SetIndex {
        table: Slot,
        key: Slot,
        value: Slot,
    },
    Vararg {
        dest: Slot,
        index: u32,
    },
    Arith {
        op: ArithOp,
        lhs: Slot,
        rhs: Slot,
    },
    Compare {
        op: CompareOp,
        lhs: Slot,
        rhs: Slot,
    },
    Index {
        table: Slot,
        key: Slot,
    },
    Call {
        target: Slot,
        args: Vec<Slot>,
        spread_varargs: bool,
    },
    Checkpoint {
        ticks: u32,
    },
    Receive {
        dests: Vec<Slot>,
    },
    /// Receive a single result coerced to a boolean.
    ReceiveTruth {
        dest: Slot,
    },
    TailCall {
        target: Slot,
        args: Vec<Slot>,
        spread_varargs: bool,
    },
    Return {
        values: Vec<Slot>,
        spread_varargs: bool,
    },
    Jump(CodeAddr),
    JumpUnless {
        cond: Slot,
        target: CodeAddr,
    },
}

struct SlotList<'a>(&'a [Slot], bool);

impl fmt::Display for SlotList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slot) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot}")?;
        }
        if self.1 {
            if !self.0.is_empty() {
                write!(f, ", ")?;
            }
            write!(f, "...")?;
        }
        Ok(())
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOp::SetPoint(point) => write!(f, "setpoint {point}"),
            HostOp::LoadConst { dest, value } => write!(f, "load {dest}, {value}"),
            HostOp::Move { dest, src } => write!(f, "move {dest}, {src}"),
            HostOp::Not { dest, src } => write!(f, "not {dest}, {src}"),
            HostOp::NewTable { dest } => write!(f, "newtable {dest}"),
            HostOp::SetIndex { table, key, value } => {
                write!(f, "setindex {table}[{key}], {value}")
            }
            HostOp::Vararg { dest, index } => write!(f, "vararg {dest}, {index}"),
            HostOp::Arith { op, lhs, rhs } => write!(f, "{op} {lhs}, {rhs}"),
            HostOp::Compare { op, lhs, rhs } => write!(f, "{op} {lhs}, {rhs}"),
            HostOp::Index { table, key } => write!(f, "index {table}[{key}]"),
            HostOp::Call {
                target,
                args,
                spread_varargs,
            } => write!(f, "call {target}({})", SlotList(args, *spread_varargs)),
            HostOp::Checkpoint { ticks } => write!(f, "checkpoint {ticks}"),
            HostOp::Receive { dests } => write!(f, "receive {}", SlotList(dests, false)),
            HostOp::ReceiveTruth { dest } => write!(f, "receive.truth {dest}"),
            HostOp::TailCall {
                target,
                args,
                spread_varargs,
            } => write!(f, "tailcall {target}({})", SlotList(args, *spread_varargs)),
            HostOp::Return {
                values,
                spread_varargs,
            } => {
                if values.is_empty() && !spread_varargs {
                    write!(f, "return")
                } else {
                    write!(f, "return {}", SlotList(values, *spread_varargs))
                }
            }
            HostOp::Jump(target) => write!(f, "jump {target}"),
            HostOp::JumpUnless { cond, target } => write!(f, "jumpunless {cond}, {target}"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Segment {
    pub ops: Vec<HostOp>,
}

/// A function ready to be executed by the runtime.
#[derive(Clone, Debug)]
pub struct CompiledFunction {
    pub id: FunctionId,
    pub name: String,
    pub num_params: u32,
    pub num_slots: u32,
    pub is_vararg: bool,
    pub segments: Vec<Segment>,
    pub resumption: ResumptionTable,
}

impl CompiledFunction {
    /// Whether any suspension point was allocated beyond the entry.
    pub fn is_resumable(&self) -> bool {
        self.resumption.is_resumable()
    }

    pub fn segment(&self, index: u16) -> Option<&Segment> {
        self.segments.get(index as usize)
    }
}

impl fmt::Display for CompiledFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fn {} params={} slots={}",
            self.name, self.num_params, self.num_slots
        )?;
        if self.is_vararg {
            write!(f, " vararg")?;
        }
        writeln!(f)?;
        writeln!(f, "  points:")?;
        for point in self.resumption.points() {
            writeln!(
                f,
                "    {} -> {} live=[{}]",
                point.id,
                point.addr,
                SlotList(&point.live, false)
            )?;
        }
        for (index, segment) in self.segments.iter().enumerate() {
            writeln!(f, "  segment {index}:")?;
            for (pc, op) in segment.ops.iter().enumerate() {
                writeln!(f, "    {pc:04} {op}")?;
            }
        }
        Ok(())
    }
}

/// Every function of a program, indexed by [`FunctionId`].
#[derive(Clone, Debug)]
pub struct CompiledProgram {
    pub functions: PrimaryMap<FunctionId, CompiledFunction>,
    pub main: FunctionId,
}

impl CompiledProgram {
    pub fn function(&self, id: FunctionId) -> Option<&CompiledFunction> {
        self.functions.get(id)
    }

    /// Find a function by name; the first match wins.
    pub fn lookup(&self, name: &str) -> Option<FunctionId> {
        self.functions
            .iter()
            .find(|(_, function)| function.name == name)
            .map(|(id, _)| id)
    }
}
