//! Execution of compiled segments.
//!
//! Each invocation of a compiled function gets an [`Activation`] in the
//! call's arena. The activation records which resumption point the function
//! is at; when an operation reports [`Flow::Suspended`], the executor turns
//! the live slots of that point into a [`Snapshot`], appends its frame to
//! the signal and releases the activation. Resuming allocates a fresh
//! activation from the snapshot and jumps to the point's address.

use std::ops::{Index, IndexMut};

use cranelift_entity::{EntityRef, PrimaryMap, entity_impl};
use kestrel_compiler::{CodeAddr, CompiledFunction, HostOp, PointId, PointKind};
use kestrel_ir::{FunctionId, Slot};

use crate::context::ExecutionContext;
use crate::dispatch;
use crate::errors::{InternalError, RuntimeError, RuntimeResult};
use crate::policy::SchedulingPolicy;
use crate::resumable::Resumable;
use crate::signal::{ExecResult, Flow, Payload, SuspendSignal};
use crate::snapshot::Snapshot;
use crate::value::Value;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(u32);
entity_impl!(ActivationId, "act");

#[derive(Debug)]
pub struct Activation {
    pub function: FunctionId,
    pub slots: Vec<Value>,
    pub varargs: Vec<Value>,
    pub resume_point: PointId,
}

/// Arena of activation records with a free list, so that slot vectors are
/// reused across calls.
#[derive(Debug, Default)]
pub struct Activations {
    records: PrimaryMap<ActivationId, Activation>,
    free: Vec<ActivationId>,
}

impl Activations {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(
        &mut self,
        function: FunctionId,
        num_slots: usize,
        varargs: Vec<Value>,
    ) -> ActivationId {
        match self.free.pop() {
            Some(id) => {
                let record = &mut self.records[id];
                record.function = function;
                record.slots.clear();
                record.slots.resize(num_slots, Value::Nil);
                record.varargs = varargs;
                record.resume_point = PointId::ENTRY;
                id
            }
            None => self.records.push(Activation {
                function,
                slots: vec![Value::Nil; num_slots],
                varargs,
                resume_point: PointId::ENTRY,
            }),
        }
    }

    fn release(&mut self, id: ActivationId) {
        let record = &mut self.records[id];
        record.slots.clear();
        record.varargs.clear();
        self.free.push(id);
    }

    /// Activations currently in use.
    pub fn live(&self) -> usize {
        self.records.len() - self.free.len()
    }
}

impl Index<ActivationId> for Activations {
    type Output = Activation;

    fn index(&self, id: ActivationId) -> &Activation {
        &self.records[id]
    }
}

impl IndexMut<ActivationId> for Activations {
    fn index_mut(&mut self, id: ActivationId) -> &mut Activation {
        &mut self.records[id]
    }
}

fn lookup<'p>(ctx: &ExecutionContext<'p>, id: FunctionId) -> RuntimeResult<&'p CompiledFunction> {
    let program = ctx.program;
    program
        .function(id)
        .ok_or_else(|| InternalError::UnknownFunction(id).into())
}

/// Call compiled function `id` from its entry point.
pub(crate) fn invoke_compiled(
    ctx: &mut ExecutionContext<'_>,
    id: FunctionId,
    mut args: Vec<Value>,
) -> ExecResult {
    let function = lookup(ctx, id)?;
    let num_params = function.num_params as usize;
    let varargs = if function.is_vararg && args.len() > num_params {
        args.split_off(num_params)
    } else {
        Vec::new()
    };
    let act = ctx
        .activations
        .alloc(id, function.num_slots as usize, varargs);
    let slots = &mut ctx.activations[act].slots;
    for (slot, value) in slots.iter_mut().zip(args.into_iter().take(num_params)) {
        *slot = value;
    }
    let entry = function
        .resumption
        .dispatch(PointId::ENTRY)
        .map(|point| point.addr)
        .unwrap_or(CodeAddr::new(0, 0));
    run(ctx, function, act, entry)
}

/// Re-enter compiled function `id` at the point recorded in `snapshot`.
pub(crate) fn resume_compiled(
    ctx: &mut ExecutionContext<'_>,
    id: FunctionId,
    snapshot: Snapshot,
) -> ExecResult {
    let function = lookup(ctx, id)?;
    if !function.is_resumable() {
        return Err(InternalError::NotResumable(function.name.clone()).into());
    }
    let point = function
        .resumption
        .dispatch(snapshot.resume_point)
        .filter(|point| point.kind == PointKind::Suspend)
        .ok_or_else(|| InternalError::InvalidResumePoint {
            function: function.name.clone(),
            point: snapshot.resume_point,
        })?;
    if point.live.len() != snapshot.registers.len()
        || function.is_vararg != snapshot.varargs.is_some()
    {
        return Err(InternalError::SnapshotMismatch {
            function: function.name.clone(),
            expected: point.live.len(),
            found: snapshot.registers.len(),
        }
        .into());
    }

    tracing::trace!(function = %function.name, point = %point.id, "resuming frame");
    let act = ctx.activations.alloc(
        id,
        function.num_slots as usize,
        snapshot.varargs.unwrap_or_default(),
    );
    let activation = &mut ctx.activations[act];
    activation.resume_point = point.id;
    for (slot, value) in point.live.iter().zip(snapshot.registers) {
        activation.slots[slot.index()] = value;
    }
    run(ctx, function, act, point.addr)
}

fn run(
    ctx: &mut ExecutionContext<'_>,
    function: &CompiledFunction,
    act: ActivationId,
    start: CodeAddr,
) -> ExecResult {
    let mut segment = start.segment;
    let mut ops = &function.segments[segment as usize].ops;
    let mut pc = start.pc as usize;

    loop {
        let op = &ops[pc];
        pc += 1;
        let result = match op {
            HostOp::SetPoint(point) => {
                ctx.activations[act].resume_point = *point;
                continue;
            }
            HostOp::LoadConst { dest, value } => {
                set(ctx, act, *dest, Value::from_constant(value));
                continue;
            }
            HostOp::Move { dest, src } => {
                let value = get(ctx, act, *src);
                set(ctx, act, *dest, value);
                continue;
            }
            HostOp::Not { dest, src } => {
                let value = !get(ctx, act, *src).is_truthy();
                set(ctx, act, *dest, Value::Bool(value));
                continue;
            }
            HostOp::NewTable { dest } => {
                set(ctx, act, *dest, Value::table());
                continue;
            }
            HostOp::SetIndex { table, key, value } => {
                let (table, key) = (get(ctx, act, *table), get(ctx, act, *key));
                let value = get(ctx, act, *value);
                match dispatch::raw_set(&table, &key, value) {
                    Ok(()) => continue,
                    Err(error) => Err(error),
                }
            }
            HostOp::Vararg { dest, index } => {
                let value = ctx.activations[act]
                    .varargs
                    .get(*index as usize)
                    .cloned()
                    .unwrap_or_default();
                set(ctx, act, *dest, value);
                continue;
            }
            HostOp::Arith { op, lhs, rhs } => {
                let (lhs, rhs) = (get(ctx, act, *lhs), get(ctx, act, *rhs));
                dispatch::arith(ctx, *op, lhs, rhs)
            }
            HostOp::Compare { op, lhs, rhs } => {
                let (lhs, rhs) = (get(ctx, act, *lhs), get(ctx, act, *rhs));
                dispatch::compare(ctx, *op, lhs, rhs)
            }
            HostOp::Index { table, key } => {
                let (table, key) = (get(ctx, act, *table), get(ctx, act, *key));
                dispatch::index(ctx, table, key)
            }
            HostOp::Call {
                target,
                args,
                spread_varargs,
            } => {
                let target = get(ctx, act, *target);
                let args = gather(ctx, act, args, *spread_varargs);
                dispatch::call(ctx, target, args)
            }
            HostOp::Checkpoint { ticks } => {
                if check_preemption(ctx.policy, *ticks) {
                    Ok(Flow::Suspended(SuspendSignal::new(Payload::Preempt)))
                } else {
                    continue;
                }
            }
            HostOp::Receive { dests } => {
                for (i, dest) in dests.iter().enumerate() {
                    let value = ctx.rbuf.get(i);
                    set(ctx, act, *dest, value);
                }
                continue;
            }
            HostOp::ReceiveTruth { dest } => {
                let value = ctx.rbuf.get(0).is_truthy();
                set(ctx, act, *dest, Value::Bool(value));
                continue;
            }
            HostOp::TailCall {
                target,
                args,
                spread_varargs,
            } => {
                let target = get(ctx, act, *target);
                let args = gather(ctx, act, args, *spread_varargs);
                ctx.rbuf.set_tail_call(target, args);
                ctx.activations.release(act);
                return Ok(Flow::Completed);
            }
            HostOp::Return {
                values,
                spread_varargs,
            } => {
                let values = gather(ctx, act, values, *spread_varargs);
                ctx.rbuf.set_to(values);
                ctx.activations.release(act);
                return Ok(Flow::Completed);
            }
            HostOp::Jump(target) => {
                if target.segment != segment {
                    segment = target.segment;
                    ops = &function.segments[segment as usize].ops;
                }
                pc = target.pc as usize;
                continue;
            }
            HostOp::JumpUnless { cond, target } => {
                if !get(ctx, act, *cond).is_truthy() {
                    if target.segment != segment {
                        segment = target.segment;
                        ops = &function.segments[segment as usize].ops;
                    }
                    pc = target.pc as usize;
                }
                continue;
            }
        };

        match result {
            Ok(Flow::Completed) => {}
            Ok(Flow::Suspended(mut signal)) => {
                let snapshot = capture(ctx, function, act);
                ctx.activations.release(act);
                signal.push_frame(Resumable::Compiled(function.id), snapshot?);
                return Ok(Flow::Suspended(signal));
            }
            Err(error) => {
                ctx.activations.release(act);
                return Err(error);
            }
        }
    }
}

/// Register `ticks` with the policy and ask whether to pause here.
fn check_preemption(policy: &mut dyn SchedulingPolicy, ticks: u32) -> bool {
    policy.register_ticks(ticks);
    policy.should_yield()
}

/// Take the live slots of the current resumption point out of `act`.
fn capture(
    ctx: &mut ExecutionContext<'_>,
    function: &CompiledFunction,
    act: ActivationId,
) -> RuntimeResult<Snapshot> {
    let activation = &mut ctx.activations[act];
    let point = function
        .resumption
        .dispatch(activation.resume_point)
        .filter(|point| point.kind == PointKind::Suspend)
        .ok_or_else(|| -> RuntimeError {
            InternalError::InvalidResumePoint {
                function: function.name.clone(),
                point: activation.resume_point,
            }
            .into()
        })?;
    let registers = point
        .live
        .iter()
        .map(|slot| std::mem::take(&mut activation.slots[slot.index()]))
        .collect();
    tracing::trace!(
        function = %function.name,
        point = %point.id,
        live = point.live.len(),
        "frame suspended"
    );
    let snapshot = Snapshot::new(point.id, registers);
    Ok(if function.is_vararg {
        snapshot.with_varargs(std::mem::take(&mut activation.varargs))
    } else {
        snapshot
    })
}

fn get(ctx: &ExecutionContext<'_>, act: ActivationId, slot: Slot) -> Value {
    ctx.activations[act].slots[slot.index()].clone()
}

fn set(ctx: &mut ExecutionContext<'_>, act: ActivationId, slot: Slot, value: Value) {
    ctx.activations[act].slots[slot.index()] = value;
}

fn gather(
    ctx: &ExecutionContext<'_>,
    act: ActivationId,
    slots: &[Slot],
    spread_varargs: bool,
) -> Vec<Value> {
    let activation = &ctx.activations[act];
    let mut values: Vec<Value> = slots
        .iter()
        .map(|slot| activation.slots[slot.index()].clone())
        .collect();
    if spread_varargs {
        values.extend(activation.varargs.iter().cloned());
    }
    values
}
