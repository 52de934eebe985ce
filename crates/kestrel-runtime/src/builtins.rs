//! Functions provided by the runtime.
//!
//! Builtins that suspend (`pause`, `await`, `coroutine.resume`,
//! `coroutine.yield`) raise the signal themselves and push their own frame,
//! so that they can shape what the caller receives on resume. `pcall` is
//! not suspending itself but stays on the stack as a protected frame when
//! the function it calls suspends.

use kestrel_compiler::PointId;
use kestrel_ir::Builtin;

use crate::context::ExecutionContext;
use crate::coroutine::CoroutineRef;
use crate::dispatch;
use crate::errors::{InternalError, RuntimeError};
use crate::resumable::Resumable;
use crate::signal::{ExecResult, Flow, Payload, SuspendSignal};
use crate::snapshot::Snapshot;
use crate::task::{AsyncTask, TaskOutcome};
use crate::value::{TableRef, Value};

pub(crate) fn invoke(
    ctx: &mut ExecutionContext<'_>,
    builtin: Builtin,
    args: Vec<Value>,
) -> ExecResult {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    match builtin {
        Builtin::Pcall => {
            let mut args = args.into_iter();
            let target = args.next().unwrap_or_default();
            match dispatch::call(ctx, target, args.collect()) {
                Ok(Flow::Completed) => {
                    ctx.rbuf.prepend(Value::Bool(true));
                    Ok(Flow::Completed)
                }
                Ok(Flow::Suspended(mut signal)) => {
                    signal.push_frame(Resumable::Builtin(Builtin::Pcall), Snapshot::empty());
                    Ok(Flow::Suspended(signal))
                }
                Err(error) => catch(ctx, error),
            }
        }
        Builtin::Error => Err(RuntimeError::user(arg(0))),
        Builtin::SetMetatable => {
            let table = expect_table(&arg(0), 1, builtin)?;
            let metatable = match arg(1) {
                Value::Nil => None,
                Value::Table(mt) => Some(mt),
                other => {
                    return Err(bad_argument(2, builtin, "nil or table", &other));
                }
            };
            table.set_metatable(metatable);
            ctx.rbuf.set_single(arg(0));
            Ok(Flow::Completed)
        }
        Builtin::GetMetatable => {
            let metatable = arg(0).metatable().map(Value::Table).unwrap_or_default();
            ctx.rbuf.set_single(metatable);
            Ok(Flow::Completed)
        }
        Builtin::CoroutineCreate => {
            let entry = arg(0);
            if !matches!(entry, Value::Function(_)) {
                return Err(bad_argument(1, builtin, "function", &entry));
            }
            ctx.rbuf.set_single(Value::Coroutine(CoroutineRef::new(entry)));
            Ok(Flow::Completed)
        }
        Builtin::CoroutineResume => {
            let mut args = args.into_iter();
            let target = match args.next().unwrap_or_default() {
                Value::Coroutine(co) => co,
                other => return Err(bad_argument(1, builtin, "coroutine", &other)),
            };
            let payload = Payload::CoroutineResume {
                target,
                args: args.collect(),
            };
            Ok(SuspendSignal::raise(
                payload,
                Resumable::Builtin(builtin),
                Snapshot::empty(),
            ))
        }
        Builtin::CoroutineYield => Ok(SuspendSignal::raise(
            Payload::CoroutineYield(args),
            Resumable::Builtin(builtin),
            Snapshot::empty(),
        )),
        Builtin::CoroutineStatus => {
            let status = match arg(0) {
                Value::Coroutine(co) => co.status(),
                other => return Err(bad_argument(1, builtin, "coroutine", &other)),
            };
            ctx.rbuf.set_single(Value::from(status.to_string()));
            Ok(Flow::Completed)
        }
        Builtin::CoroutineRunning => {
            ctx.rbuf.set_to([
                Value::Coroutine(ctx.current.clone()),
                Value::Bool(ctx.in_main),
            ]);
            Ok(Flow::Completed)
        }
        Builtin::CoroutineIsYieldable => {
            ctx.rbuf.set_single(Value::Bool(!ctx.in_main));
            Ok(Flow::Completed)
        }
        Builtin::Pause => Ok(SuspendSignal::raise(
            Payload::Preempt,
            Resumable::Builtin(builtin),
            Snapshot::empty(),
        )),
        Builtin::Await => {
            let task = match arg(0) {
                Value::Task(task) => task,
                other => return Err(bad_argument(1, builtin, "task", &other)),
            };
            wait(ctx, task)
        }
    }
}

pub(crate) fn resume(
    ctx: &mut ExecutionContext<'_>,
    builtin: Builtin,
    snapshot: Snapshot,
) -> ExecResult {
    match builtin {
        Builtin::Pcall | Builtin::CoroutineResume => ctx.rbuf.prepend(Value::Bool(true)),
        // The driver has already put the values passed to `resume` in place.
        Builtin::CoroutineYield => {}
        Builtin::Pause => ctx.rbuf.clear(),
        Builtin::Await => {
            let task = match snapshot.registers.first() {
                Some(Value::Task(task)) => task.clone(),
                _ => {
                    return Err(InternalError::SnapshotMismatch {
                        function: builtin.to_string(),
                        expected: 1,
                        found: snapshot.registers.len(),
                    }
                    .into());
                }
            };
            return wait(ctx, task);
        }
        other => return Err(InternalError::NotResumable(other.to_string()).into()),
    }
    Ok(Flow::Completed)
}

pub(crate) fn resume_error(
    ctx: &mut ExecutionContext<'_>,
    builtin: Builtin,
    _snapshot: Snapshot,
    error: RuntimeError,
) -> ExecResult {
    match builtin {
        Builtin::Pcall | Builtin::CoroutineResume => catch(ctx, error),
        _ => Err(error),
    }
}

/// Turn a recoverable error into `false, value`.
fn catch(ctx: &mut ExecutionContext<'_>, error: RuntimeError) -> ExecResult {
    if error.is_fatal() {
        return Err(error);
    }
    tracing::debug!(%error, "error caught by protected frame");
    ctx.rbuf.set_to([Value::Bool(false), error.value()]);
    Ok(Flow::Completed)
}

/// Deliver the task's outcome, or suspend on it until it has one. Resuming
/// before completion waits again on the same task.
fn wait(ctx: &mut ExecutionContext<'_>, task: AsyncTask) -> ExecResult {
    if let Some(outcome) = task.outcome() {
        return deliver(ctx, outcome);
    }
    let snapshot = Snapshot::new(PointId::ENTRY, vec![Value::Task(task.clone())]);
    Ok(SuspendSignal::raise(
        Payload::AsyncWait(task),
        Resumable::Builtin(Builtin::Await),
        snapshot,
    ))
}

fn deliver(ctx: &mut ExecutionContext<'_>, outcome: TaskOutcome) -> ExecResult {
    match outcome {
        Ok(values) => {
            ctx.rbuf.set_to(values);
            Ok(Flow::Completed)
        }
        Err(message) => Err(RuntimeError::message(message)),
    }
}

fn expect_table(
    value: &Value,
    position: usize,
    builtin: Builtin,
) -> Result<TableRef, RuntimeError> {
    match value {
        Value::Table(table) => Ok(table.clone()),
        other => Err(bad_argument(position, builtin, "table", other)),
    }
}

fn bad_argument(position: usize, builtin: Builtin, expected: &str, got: &Value) -> RuntimeError {
    RuntimeError::message(format_args!(
        "bad argument #{position} to '{builtin}' ({expected} expected, got {})",
        got.type_name()
    ))
}
