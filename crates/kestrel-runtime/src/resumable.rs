use kestrel_ir::{Builtin, FunctionId};
use serde::{Deserialize, Serialize};

use crate::builtins;
use crate::context::ExecutionContext;
use crate::dispatch;
use crate::errors::RuntimeError;
use crate::exec;
use crate::signal::{ExecResult, Flow};
use crate::snapshot::Snapshot;

/// Everything that can be re-entered with a [`Snapshot`].
///
/// The set of compiled functions is fixed per program, so re-entry is a
/// match on this tag rather than virtual dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resumable {
    Compiled(FunctionId),
    Builtin(Builtin),
    /// Start of a call or coroutine that has not run yet. Its snapshot holds
    /// the callee; the arguments are whatever the return buffer holds when
    /// it is resumed.
    Bootstrap,
}

impl Resumable {
    /// Error-aware frames get a chance to handle errors raised by the frames
    /// they enclose.
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            Resumable::Builtin(Builtin::Pcall | Builtin::CoroutineResume)
        )
    }

    /// Continue this frame. Results of the frames it called are in the
    /// return buffer. A tail call left behind by the frame is evaluated here,
    /// so tail calls never add frames.
    pub fn resume(&self, ctx: &mut ExecutionContext<'_>, snapshot: Snapshot) -> ExecResult {
        let flow = match self {
            Resumable::Compiled(id) => exec::resume_compiled(ctx, *id, snapshot)?,
            Resumable::Builtin(builtin) => builtins::resume(ctx, *builtin, snapshot)?,
            Resumable::Bootstrap => {
                let callee = snapshot.registers.into_iter().next().unwrap_or_default();
                let args = ctx.rbuf.take_values();
                ctx.rbuf.set_tail_call(callee, args);
                Flow::Completed
            }
        };
        match flow {
            Flow::Completed => dispatch::evaluate_tail_calls(ctx),
            suspended => Ok(suspended),
        }
    }

    /// Continue a protected frame with an error raised below it.
    pub fn resume_error(
        &self,
        ctx: &mut ExecutionContext<'_>,
        snapshot: Snapshot,
        error: RuntimeError,
    ) -> ExecResult {
        match self {
            Resumable::Builtin(builtin) if self.is_protected() => {
                builtins::resume_error(ctx, *builtin, snapshot, error)
            }
            _ => Err(error),
        }
    }
}
