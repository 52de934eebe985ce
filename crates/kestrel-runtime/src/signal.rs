//! Suspension as a value.
//!
//! Every operation that may suspend returns [`ExecResult`]. A
//! [`Flow::Suspended`] result travels outward through the host call stack;
//! each compiled frame it passes appends a [`ResumeFrame`] for itself and
//! hands the signal on unchanged. The driver receives the completed frame
//! list and decides what the payload means.

use std::fmt;

use crate::coroutine::CoroutineRef;
use crate::errors::RuntimeError;
use crate::resumable::Resumable;
use crate::snapshot::Snapshot;
use crate::task::AsyncTask;
use crate::value::Value;

/// Outcome of an operation that did not fail. Results of a completed
/// operation are in the return buffer.
#[must_use]
#[derive(Debug)]
pub enum Flow {
    Completed,
    Suspended(SuspendSignal),
}

pub type ExecResult = Result<Flow, RuntimeError>;

/// Why execution is being suspended.
#[derive(Debug)]
pub enum Payload {
    /// Voluntary pause requested by the scheduling policy or by `pause`.
    Preempt,
    CoroutineResume {
        target: CoroutineRef,
        args: Vec<Value>,
    },
    CoroutineYield(Vec<Value>),
    AsyncWait(AsyncTask),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Preempt => write!(f, "preempt"),
            Payload::CoroutineResume { args, .. } => write!(f, "resume({} args)", args.len()),
            Payload::CoroutineYield(args) => write!(f, "yield({} args)", args.len()),
            Payload::AsyncWait(task) => write!(f, "await({})", task.description()),
        }
    }
}

/// One suspended call level.
#[derive(Clone, Debug)]
pub struct ResumeFrame {
    pub resumable: Resumable,
    pub snapshot: Snapshot,
}

/// A suspension in flight. Frames are kept innermost first.
#[derive(Debug)]
pub struct SuspendSignal {
    payload: Payload,
    frames: Vec<ResumeFrame>,
}

impl SuspendSignal {
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            frames: Vec::new(),
        }
    }

    /// Raise a signal whose innermost frame is `resumable`.
    pub fn raise(payload: Payload, resumable: Resumable, snapshot: Snapshot) -> Flow {
        let mut signal = Self::new(payload);
        signal.push_frame(resumable, snapshot);
        Flow::Suspended(signal)
    }

    /// Append the next enclosing frame.
    pub fn push_frame(&mut self, resumable: Resumable, snapshot: Snapshot) {
        self.frames.push(ResumeFrame {
            resumable,
            snapshot,
        });
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn frames(&self) -> &[ResumeFrame] {
        &self.frames
    }

    pub fn into_parts(self) -> (Payload, Vec<ResumeFrame>) {
        (self.payload, self.frames)
    }
}

/// A saved call stack. The top of the stack is the innermost frame, which
/// is resumed first.
#[derive(Clone, Debug, Default)]
pub struct FrameStack {
    frames: Vec<ResumeFrame>,
}

impl FrameStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ResumeFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ResumeFrame> {
        self.frames.pop()
    }

    /// Stack the frames of a signal (innermost first) on top of the frames
    /// that had not been reached yet, keeping the innermost on top.
    pub fn absorb(&mut self, innermost_first: Vec<ResumeFrame>) {
        self.frames.extend(innermost_first.into_iter().rev());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from innermost to outermost.
    pub fn iter_innermost_first(&self) -> impl Iterator<Item = &ResumeFrame> {
        self.frames.iter().rev()
    }

    pub fn top(&self) -> Option<&ResumeFrame> {
        self.frames.last()
    }
}

impl FromIterator<ResumeFrame> for FrameStack {
    /// Collect frames given innermost first.
    fn from_iter<I: IntoIterator<Item = ResumeFrame>>(iter: I) -> Self {
        let mut stack = FrameStack::new();
        stack.absorb(iter.into_iter().collect());
        stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;
    use kestrel_ir::FunctionId;

    fn frame(n: usize) -> ResumeFrame {
        ResumeFrame {
            resumable: Resumable::Compiled(FunctionId::new(n)),
            snapshot: Snapshot::empty(),
        }
    }

    fn ids(stack: &mut FrameStack) -> Vec<usize> {
        std::iter::from_fn(|| stack.pop())
            .map(|f| match f.resumable {
                Resumable::Compiled(id) => id.index(),
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn absorbed_frames_resume_innermost_first() {
        // Frames 10 and 11 were still pending below the resumed frame.
        let mut stack: FrameStack = [frame(10), frame(11)].into_iter().collect();
        assert_eq!(stack.top().map(|f| f.resumable), Some(Resumable::Compiled(FunctionId::new(10))));

        let Flow::Suspended(mut signal) = SuspendSignal::raise(
            Payload::Preempt,
            Resumable::Compiled(FunctionId::new(3)),
            Snapshot::empty(),
        ) else {
            unreachable!()
        };
        signal.push_frame(Resumable::Compiled(FunctionId::new(2)), Snapshot::empty());
        signal.push_frame(Resumable::Compiled(FunctionId::new(1)), Snapshot::empty());
        let (_, frames) = signal.into_parts();
        stack.absorb(frames);

        assert_eq!(ids(&mut stack), vec![3, 2, 1, 10, 11]);
    }
}
