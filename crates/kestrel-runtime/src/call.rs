//! Top-level calls and the driver that runs them.
//!
//! A [`Call`] owns the chain of active coroutines (main at the bottom), the
//! return buffer and the activation arena. Embedders never touch it
//! directly: they hold a [`Continuation`], a one-shot token for the call at
//! one particular pause. Resuming claims the call by swapping the token's
//! version for `RUNNING`; a stale or duplicate token loses that race and
//! gets [`InvalidContinuation`].
//!
//! The driver pops frames from the running coroutine's stack and resumes
//! them one at a time. An error travels down the stack as a pending value,
//! offered to each protected frame it meets. A suspension pushes its frames
//! back on top of the frames not yet reached; the payload then decides
//! whether the call pauses or a coroutine switch happens in place.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::Display;
use kestrel_compiler::CompiledProgram;

use crate::context::ExecutionContext;
use crate::coroutine::{self, CoroutineRef, CoroutineStatus};
use crate::errors::{CoroutineError, InvalidContinuation, RuntimeError, RuntimeResult};
use crate::exec::Activations;
use crate::policy::SchedulingPolicy;
use crate::rbuf::ReturnBuffer;
use crate::signal::{FrameStack, Flow, Payload};
use crate::task::AsyncTask;
use crate::value::Value;

/// Version of a call that some thread is currently driving.
const RUNNING: u64 = 0;
/// Version of a call that returned or failed.
const TERMINATED: u64 = 1;

/// Pick a fresh version for a paused call.
fn fresh_version() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seed = COUNTER.fetch_add(1, Ordering::Relaxed);
    match RandomState::new().hash_one(seed) {
        reserved @ (RUNNING | TERMINATED) => reserved + 2,
        version => version,
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum CallStatus {
    #[display("paused")]
    Paused,
    #[display("running")]
    Running,
    #[display("terminated")]
    Terminated,
}

/// What one resume of a continuation ended with.
#[derive(Debug)]
pub enum CallEvent {
    Paused(Continuation),
    AsyncWait(Continuation, AsyncTask),
    Returned(Vec<Value>),
    Failed(RuntimeError),
}

/// Receives the outcome of [`Continuation::resume`].
pub trait CallEventHandler {
    fn paused(&mut self, call: &Call, next: Continuation);

    fn async_wait(&mut self, call: &Call, next: Continuation, task: AsyncTask);

    fn returned(&mut self, call: &Call, values: Vec<Value>);

    fn failed(&mut self, call: &Call, error: RuntimeError);
}

/// Records events in order.
impl CallEventHandler for Vec<CallEvent> {
    fn paused(&mut self, _call: &Call, next: Continuation) {
        self.push(CallEvent::Paused(next));
    }

    fn async_wait(&mut self, _call: &Call, next: Continuation, task: AsyncTask) {
        self.push(CallEvent::AsyncWait(next, task));
    }

    fn returned(&mut self, _call: &Call, values: Vec<Value>) {
        self.push(CallEvent::Returned(values));
    }

    fn failed(&mut self, _call: &Call, error: RuntimeError) {
        self.push(CallEvent::Failed(error));
    }
}

/// Handle to a top-level invocation.
#[derive(Clone)]
pub struct Call(Arc<CallInner>);

struct CallInner {
    version: AtomicU64,
    state: Mutex<CallState>,
}

pub(crate) struct CallState {
    pub(crate) program: Arc<CompiledProgram>,
    pub(crate) rbuf: ReturnBuffer,
    activations: Activations,
    /// Active coroutines; the main coroutine is first, the running one last.
    pub(crate) coroutines: Vec<CoroutineRef>,
}

enum Outcome {
    Paused,
    AsyncWait(AsyncTask),
    Returned(Vec<Value>),
    Failed(RuntimeError),
}

impl Call {
    pub(crate) fn paused(state: CallState) -> Continuation {
        let version = fresh_version();
        let call = Call(Arc::new(CallInner {
            version: AtomicU64::new(version),
            state: Mutex::new(state),
        }));
        Continuation { call, version }
    }

    pub fn status(&self) -> CallStatus {
        match self.0.version.load(Ordering::Acquire) {
            RUNNING => CallStatus::Running,
            TERMINATED => CallStatus::Terminated,
            _ => CallStatus::Paused,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, CallState> {
        self.0.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn version(&self) -> u64 {
        self.0.version.load(Ordering::Acquire)
    }

    /// Frames saved on the running coroutine's stack.
    pub fn frame_depth(&self) -> usize {
        let state = self.lock();
        state
            .coroutines
            .last()
            .map_or(0, |co| co.with_frames(FrameStack::len))
    }

    /// Number of coroutines in the active chain, main included.
    pub fn coroutine_depth(&self) -> usize {
        self.lock().coroutines.len()
    }

    /// Activation records in use; zero whenever the call is not running.
    pub fn live_activations(&self) -> usize {
        self.lock().activations.live()
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call").field("status", &self.status()).finish()
    }
}

/// Start a call of `target` with `args`. Nothing runs until the returned
/// continuation is resumed.
pub fn new_call(program: Arc<CompiledProgram>, target: Value, args: Vec<Value>) -> Continuation {
    let main = CoroutineRef::with_stack(CoroutineStatus::Running, coroutine::bootstrap(target));
    let mut rbuf = ReturnBuffer::new();
    rbuf.set_to(args);
    Call::paused(CallState::new(program, rbuf, vec![main]))
}

/// Start the program's main function with `args`.
pub fn call_main(program: Arc<CompiledProgram>, args: Vec<Value>) -> Continuation {
    let target = Value::Function(crate::value::Callable::Compiled(program.main));
    new_call(program, target, args)
}

/// A paused call, resumable at most once.
#[derive(Clone, Debug)]
pub struct Continuation {
    call: Call,
    version: u64,
}

impl Continuation {
    pub fn call(&self) -> &Call {
        &self.call
    }

    /// Whether resuming this continuation would still be accepted.
    pub fn is_current(&self) -> bool {
        self.call.version() == self.version
    }

    /// Drive the call until it pauses or terminates and report the outcome to
    /// `handler`.
    pub fn resume(
        &self,
        handler: &mut dyn CallEventHandler,
        policy: &mut dyn SchedulingPolicy,
    ) -> Result<(), InvalidContinuation> {
        match self.step(policy)? {
            CallEvent::Paused(next) => handler.paused(&self.call, next),
            CallEvent::AsyncWait(next, task) => handler.async_wait(&self.call, next, task),
            CallEvent::Returned(values) => handler.returned(&self.call, values),
            CallEvent::Failed(error) => handler.failed(&self.call, error),
        }
        Ok(())
    }

    /// Like [`resume`](Self::resume), returning the event instead.
    pub fn step(&self, policy: &mut dyn SchedulingPolicy) -> Result<CallEvent, InvalidContinuation> {
        let inner = &self.call.0;
        inner
            .version
            .compare_exchange(self.version, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| InvalidContinuation)?;

        // The state lock is released before anyone sees the next token.
        let outcome = self.call.lock().drive(policy);

        let event = match outcome {
            Outcome::Paused => CallEvent::Paused(self.successor()),
            Outcome::AsyncWait(task) => CallEvent::AsyncWait(self.successor(), task),
            Outcome::Returned(values) => {
                inner.version.store(TERMINATED, Ordering::Release);
                CallEvent::Returned(values)
            }
            Outcome::Failed(error) => {
                inner.version.store(TERMINATED, Ordering::Release);
                CallEvent::Failed(error)
            }
        };
        Ok(event)
    }

    /// Publish a new version for the paused call and hand out its token.
    fn successor(&self) -> Continuation {
        let version = fresh_version();
        self.call.0.version.store(version, Ordering::Release);
        Continuation {
            call: self.call.clone(),
            version,
        }
    }

    /// Resume repeatedly until the call terminates, executing async tasks
    /// inline. Fails on a task that has no job and is still pending, since
    /// only the embedder can complete it.
    pub fn run_to_completion(self, policy: &mut dyn SchedulingPolicy) -> RuntimeResult<Vec<Value>> {
        let mut next = self;
        loop {
            next = match next.step(policy)? {
                CallEvent::Paused(cont) => cont,
                CallEvent::AsyncWait(cont, task) => {
                    task.execute();
                    if !task.is_complete() {
                        return Err(RuntimeError::message(format_args!(
                            "async task '{}' has no job and was never completed",
                            task.description()
                        )));
                    }
                    cont
                }
                CallEvent::Returned(values) => return Ok(values),
                CallEvent::Failed(error) => return Err(error),
            };
        }
    }
}

impl CallState {
    pub(crate) fn new(
        program: Arc<CompiledProgram>,
        rbuf: ReturnBuffer,
        coroutines: Vec<CoroutineRef>,
    ) -> Self {
        Self {
            program,
            rbuf,
            activations: Activations::new(),
            coroutines,
        }
    }

    fn drive(&mut self, policy: &mut dyn SchedulingPolicy) -> Outcome {
        let Some(mut current) = self.coroutines.last().cloned() else {
            return Outcome::Returned(Vec::new());
        };
        let mut stack = current.take_stack();
        let mut pending: Option<RuntimeError> = None;
        tracing::debug!(frames = stack.len(), coroutines = self.coroutines.len(), "resuming call");

        loop {
            let Some(frame) = stack.pop() else {
                // The running coroutine returned or failed.
                current.set_status(CoroutineStatus::Dead);
                self.coroutines.pop();
                let Some(parent) = self.coroutines.last().cloned() else {
                    return match pending {
                        Some(error) => {
                            tracing::debug!(%error, "call failed");
                            Outcome::Failed(error)
                        }
                        None => {
                            tracing::debug!(values = self.rbuf.len(), "call returned");
                            Outcome::Returned(self.rbuf.take_values())
                        }
                    };
                };
                tracing::debug!(failed = pending.is_some(), "coroutine finished");
                parent.set_status(CoroutineStatus::Running);
                stack = parent.take_stack();
                current = parent;
                continue;
            };

            let result = {
                let mut ctx = ExecutionContext {
                    program: &self.program,
                    rbuf: &mut self.rbuf,
                    activations: &mut self.activations,
                    policy: &mut *policy,
                    current: current.clone(),
                    in_main: self.coroutines.len() == 1,
                };
                match pending.take() {
                    None => frame.resumable.resume(&mut ctx, frame.snapshot),
                    Some(error) if frame.resumable.is_protected() => {
                        frame.resumable.resume_error(&mut ctx, frame.snapshot, error)
                    }
                    Some(error) => {
                        tracing::trace!(resumable = ?frame.resumable, "unwinding frame");
                        Err(error)
                    }
                }
            };

            let signal = match result {
                Ok(Flow::Completed) => continue,
                Ok(Flow::Suspended(signal)) => signal,
                Err(error) if error.is_fatal() => {
                    tracing::warn!(%error, "call aborted");
                    for co in self.coroutines.drain(..) {
                        co.set_status(CoroutineStatus::Dead);
                        drop(co.take_stack());
                    }
                    return Outcome::Failed(error);
                }
                Err(error) => {
                    pending = Some(error);
                    continue;
                }
            };

            let (payload, frames) = signal.into_parts();
            stack.absorb(frames);
            match payload {
                Payload::Preempt => {
                    tracing::debug!(frames = stack.len(), "call paused");
                    current.save_stack(stack);
                    return Outcome::Paused;
                }
                Payload::AsyncWait(task) => {
                    tracing::debug!(
                        task = task.description(),
                        frames = stack.len(),
                        "call waiting on task"
                    );
                    current.save_stack(stack);
                    return Outcome::AsyncWait(task);
                }
                Payload::CoroutineResume { target, args } => match target.status() {
                    CoroutineStatus::Suspended => {
                        tracing::debug!(depth = self.coroutines.len() + 1, "switching into coroutine");
                        current.set_status(CoroutineStatus::Normal);
                        current.save_stack(stack);
                        target.set_status(CoroutineStatus::Running);
                        stack = target.take_stack();
                        self.coroutines.push(target.clone());
                        current = target;
                        self.rbuf.set_to(args);
                    }
                    CoroutineStatus::Dead => pending = Some(CoroutineError::ResumeDead.into()),
                    CoroutineStatus::Running | CoroutineStatus::Normal => {
                        pending = Some(CoroutineError::ResumeNotSuspended.into());
                    }
                },
                Payload::CoroutineYield(args) => {
                    let depth = self.coroutines.len();
                    if depth < 2 {
                        pending = Some(CoroutineError::YieldOutsideCoroutine.into());
                        continue;
                    }
                    let parent = self.coroutines[depth - 2].clone();
                    tracing::debug!(values = args.len(), "coroutine yielded");
                    current.set_status(CoroutineStatus::Suspended);
                    current.save_stack(stack);
                    self.coroutines.pop();
                    parent.set_status(CoroutineStatus::Running);
                    stack = parent.take_stack();
                    current = parent;
                    self.rbuf.set_to(args);
                }
            }
        }
    }
}
