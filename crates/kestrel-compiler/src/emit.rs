//! Lowering of IR function bodies to segmented host code.

use std::collections::HashMap;

use cranelift_entity::EntityRef;
use kestrel_ir::{FunctionId, Inst, LabelId, Program, Proto, Slot};

use crate::code::{CodeAddr, CompiledFunction, HostOp, Segment};
use crate::errors::{CompilationError, CompilationErrorKind, CompilationResult};
use crate::liveness::Liveness;
use crate::options::CompilerOptions;
use crate::resumption::ResumptionTable;

/// Compile one function of `program`.
pub fn compile_function(
    program: &Program,
    id: FunctionId,
    options: &CompilerOptions,
) -> CompilationResult<CompiledFunction> {
    let proto = program
        .function(id)
        .ok_or(CompilationErrorKind::FunctionNotFound(id))?;
    let labels = validate(program, proto)
        .map_err(|kind| CompilationError::in_function(&proto.name, kind))?;
    let liveness = Liveness::analyze(proto, &labels);

    let mut emitter = Emitter {
        proto,
        options,
        labels: &labels,
        liveness: &liveness,
        table: ResumptionTable::new(),
        segments: Vec::new(),
        label_addrs: HashMap::new(),
        fixups: Vec::new(),
    };
    emitter
        .emit_body()
        .map_err(|e| CompilationError::in_function(&proto.name, e.into_kind()))?;

    let Emitter {
        table, segments, ..
    } = emitter;
    Ok(CompiledFunction {
        id,
        name: proto.name.clone(),
        num_params: proto.num_params,
        num_slots: proto.num_slots,
        is_vararg: proto.is_vararg,
        segments,
        resumption: table,
    })
}

/// Check slot ranges, label bindings and function references. Returns the
/// position of every label in the body.
fn validate(
    program: &Program,
    proto: &Proto,
) -> Result<HashMap<LabelId, usize>, CompilationErrorKind> {
    let mut labels = HashMap::new();
    for (index, inst) in proto.body.iter().enumerate() {
        if let Inst::Label(label) = inst {
            if labels.insert(*label, index).is_some() {
                return Err(CompilationErrorKind::DuplicateLabel(*label));
            }
        }
    }

    let check_slot = |slot: Slot| {
        if slot.index() >= proto.num_slots as usize {
            Err(CompilationErrorKind::SlotOutOfRange {
                slot,
                num_slots: proto.num_slots,
            })
        } else {
            Ok(())
        }
    };
    if proto.num_params > proto.num_slots {
        return Err(CompilationErrorKind::SlotOutOfRange {
            slot: Slot::from_u32(proto.num_params.saturating_sub(1)),
            num_slots: proto.num_slots,
        });
    }

    for inst in &proto.body {
        for slot in inst.uses().into_iter().chain(inst.defs()) {
            check_slot(slot)?;
        }
        match inst {
            Inst::Jump(target) | Inst::JumpUnless { target, .. } => {
                if !labels.contains_key(target) {
                    return Err(CompilationErrorKind::UnboundLabel(*target));
                }
            }
            Inst::LoadConst {
                value: kestrel_ir::Constant::Function(callee),
                ..
            } => {
                if program.function(*callee).is_none() {
                    return Err(CompilationErrorKind::FunctionNotFound(*callee));
                }
            }
            _ => {}
        }
    }
    Ok(labels)
}

struct Emitter<'a> {
    proto: &'a Proto,
    options: &'a CompilerOptions,
    labels: &'a HashMap<LabelId, usize>,
    liveness: &'a Liveness,
    table: ResumptionTable,
    segments: Vec<Segment>,
    label_addrs: HashMap<LabelId, CodeAddr>,
    /// `(segment, pc, label)` of every jump whose target is patched last.
    fixups: Vec<(usize, usize, LabelId)>,
}

impl Emitter<'_> {
    fn emit_body(&mut self) -> CompilationResult<()> {
        let threshold = self.options.segment_threshold;
        if threshold == 0 {
            return Err(
                CompilationErrorKind::InvalidOptions("segment_threshold must be positive").into(),
            );
        }
        let proto = self.proto;
        let body = &proto.body;
        let chunks: Vec<(usize, &[Inst])> = if body.is_empty() {
            vec![(0, &body[..])]
        } else {
            body.chunks(threshold)
                .enumerate()
                .map(|(n, chunk)| (n * threshold, chunk))
                .collect()
        };
        if chunks.len() > u16::MAX as usize + 1 {
            return Err(CompilationErrorKind::TooManySegments(chunks.len()).into());
        }

        let last = chunks.len() - 1;
        for (n, (start, chunk)) in chunks.into_iter().enumerate() {
            let segment = if n == 0 {
                0
            } else {
                self.table.begin_segment()?
            };
            self.segments.push(Segment::default());

            for (offset, inst) in chunk.iter().enumerate() {
                self.emit_inst(segment, start + offset, inst)?;
            }

            let falls_through = chunk.last().is_none_or(|inst| !inst.is_terminator());
            if falls_through {
                if n == last {
                    self.push(segment, HostOp::Return {
                        values: Vec::new(),
                        spread_varargs: false,
                    });
                } else {
                    self.push(segment, HostOp::Jump(CodeAddr::new(segment + 1, 0)));
                }
            }
        }

        for (segment, pc, label) in std::mem::take(&mut self.fixups) {
            let addr = *self
                .label_addrs
                .get(&label)
                .ok_or(CompilationErrorKind::UnboundLabel(label))?;
            if let HostOp::Jump(target) | HostOp::JumpUnless { target, .. } =
                &mut self.segments[segment].ops[pc]
            {
                *target = addr;
            }
        }
        Ok(())
    }

    fn emit_inst(&mut self, segment: u16, index: usize, inst: &Inst) -> CompilationResult<()> {
        match inst {
            Inst::LoadConst { dest, value } => self.push(segment, HostOp::LoadConst {
                dest: *dest,
                value: value.clone(),
            }),
            Inst::Move { dest, src } => self.push(segment, HostOp::Move {
                dest: *dest,
                src: *src,
            }),
            Inst::Not { dest, src } => self.push(segment, HostOp::Not {
                dest: *dest,
                src: *src,
            }),
            Inst::NewTable { dest } => self.push(segment, HostOp::NewTable { dest: *dest }),
            Inst::SetIndex { table, key, value } => self.push(segment, HostOp::SetIndex {
                table: *table,
                key: *key,
                value: *value,
            }),
            Inst::Vararg { dest, index: at } => self.push(segment, HostOp::Vararg {
                dest: *dest,
                index: *at,
            }),
            Inst::Arith { op, dest, lhs, rhs } => {
                let op = HostOp::Arith {
                    op: *op,
                    lhs: *lhs,
                    rhs: *rhs,
                };
                self.emit_suspending(segment, index, inst, op)?;
                self.push(segment, HostOp::Receive { dests: vec![*dest] });
            }
            Inst::Compare { op, dest, lhs, rhs } => {
                let op = HostOp::Compare {
                    op: *op,
                    lhs: *lhs,
                    rhs: *rhs,
                };
                self.emit_suspending(segment, index, inst, op)?;
                self.push(segment, HostOp::ReceiveTruth { dest: *dest });
            }
            Inst::GetIndex { dest, table, key } => {
                let op = HostOp::Index {
                    table: *table,
                    key: *key,
                };
                self.emit_suspending(segment, index, inst, op)?;
                self.push(segment, HostOp::Receive { dests: vec![*dest] });
            }
            Inst::Call {
                target,
                args,
                spread_varargs,
                results,
            } => {
                let op = HostOp::Call {
                    target: *target,
                    args: args.clone(),
                    spread_varargs: *spread_varargs,
                };
                self.emit_suspending(segment, index, inst, op)?;
                self.push(segment, HostOp::Receive {
                    dests: results.clone(),
                });
            }
            Inst::Checkpoint { ticks } => {
                self.emit_suspending(segment, index, inst, HostOp::Checkpoint { ticks: *ticks })?;
            }
            Inst::TailCall {
                target,
                args,
                spread_varargs,
            } => self.push(segment, HostOp::TailCall {
                target: *target,
                args: args.clone(),
                spread_varargs: *spread_varargs,
            }),
            Inst::Return {
                values,
                spread_varargs,
            } => self.push(segment, HostOp::Return {
                values: values.clone(),
                spread_varargs: *spread_varargs,
            }),
            Inst::Label(label) => {
                let pc = self.segments[segment as usize].ops.len() as u32;
                self.label_addrs.insert(*label, CodeAddr::new(segment, pc));
            }
            Inst::Jump(target) => {
                self.emit_back_edge_checkpoint(segment, index, *target)?;
                self.push_fixup(segment, HostOp::Jump(CodeAddr::new(0, 0)), *target);
            }
            Inst::JumpUnless { cond, target } => {
                self.emit_back_edge_checkpoint(segment, index, *target)?;
                let op = HostOp::JumpUnless {
                    cond: *cond,
                    target: CodeAddr::new(0, 0),
                };
                self.push_fixup(segment, op, *target);
            }
        }
        Ok(())
    }

    /// `SetPoint(p)`, the operation, then bind `p` to the instruction after
    /// it so that re-entry finds the result in the return buffer.
    fn emit_suspending(
        &mut self,
        segment: u16,
        index: usize,
        inst: &Inst,
        op: HostOp,
    ) -> CompilationResult<()> {
        let live = self.liveness.live_across(index, inst);
        let point = self.table.new_resumption_point(segment, live)?;
        self.push(segment, HostOp::SetPoint(point));
        self.push(segment, op);
        let pc = self.segments[segment as usize].ops.len() as u32;
        self.table.bind_label(point, pc);
        Ok(())
    }

    fn emit_back_edge_checkpoint(
        &mut self,
        segment: u16,
        index: usize,
        target: LabelId,
    ) -> CompilationResult<()> {
        let Some(ticks) = self.options.back_edge_ticks else {
            return Ok(());
        };
        if self.labels[&target] >= index {
            return Ok(());
        }
        let live = self.liveness.live_in(index).iter().copied().collect();
        let point = self.table.new_resumption_point(segment, live)?;
        self.push(segment, HostOp::SetPoint(point));
        self.push(segment, HostOp::Checkpoint { ticks });
        let pc = self.segments[segment as usize].ops.len() as u32;
        self.table.bind_label(point, pc);
        Ok(())
    }

    fn push(&mut self, segment: u16, op: HostOp) {
        self.segments[segment as usize].ops.push(op);
    }

    fn push_fixup(&mut self, segment: u16, op: HostOp, label: LabelId) {
        let ops = &mut self.segments[segment as usize].ops;
        self.fixups.push((segment as usize, ops.len(), label));
        ops.push(op);
    }
}
