//! Runtime error types.
//!
//! Errors fall into three groups. [`InternalError`]s mean a broken invariant
//! (a corrupted snapshot, a double resume) and are never offered to protected
//! frames. [`CoroutineError`]s are protocol misuse and behave like user
//! errors. `User` errors carry the value passed to `error` or the message of
//! a failed dispatch.

use derive_more::Display;
use kestrel_compiler::PointId;
use kestrel_ir::FunctionId;

use crate::value::Value;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Clone, Display, Debug)]
#[display("{kind}")]
pub struct RuntimeError {
    kind: Box<RuntimeErrorKind>,
}

impl<E> From<E> for RuntimeError
where
    RuntimeErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        RuntimeError {
            kind: Box::new(RuntimeErrorKind::from(error)),
        }
    }
}

impl RuntimeError {
    pub fn user(value: Value) -> Self {
        RuntimeErrorKind::User(value).into()
    }

    pub fn message(msg: impl std::fmt::Display) -> Self {
        RuntimeErrorKind::User(Value::from(msg.to_string())).into()
    }

    pub fn kind(&self) -> &RuntimeErrorKind {
        &self.kind
    }

    /// Fatal errors terminate the call without visiting protected frames.
    pub fn is_fatal(&self) -> bool {
        matches!(
            *self.kind,
            RuntimeErrorKind::Internal(_) | RuntimeErrorKind::InvalidContinuation(_)
        )
    }

    /// The value a protected frame such as `pcall` hands back to user code.
    pub fn value(&self) -> Value {
        match &*self.kind {
            RuntimeErrorKind::User(value) => value.clone(),
            other => Value::from(other.to_string()),
        }
    }
}

#[derive(Clone, Display, Debug)]
pub enum RuntimeErrorKind {
    #[display("{_0}")]
    User(Value),

    #[display("{_0}")]
    Coroutine(CoroutineError),

    #[display("internal error: {_0}")]
    Internal(InternalError),

    #[display("{_0}")]
    InvalidContinuation(InvalidContinuation),
}

impl From<CoroutineError> for RuntimeErrorKind {
    fn from(error: CoroutineError) -> Self {
        RuntimeErrorKind::Coroutine(error)
    }
}

impl From<InternalError> for RuntimeErrorKind {
    fn from(error: InternalError) -> Self {
        RuntimeErrorKind::Internal(error)
    }
}

impl From<InvalidContinuation> for RuntimeErrorKind {
    fn from(error: InvalidContinuation) -> Self {
        RuntimeErrorKind::InvalidContinuation(error)
    }
}

#[derive(Clone, Copy, Display, Debug, PartialEq, Eq)]
pub enum CoroutineError {
    #[display("cannot resume dead coroutine")]
    ResumeDead,

    #[display("cannot resume non-suspended coroutine")]
    ResumeNotSuspended,

    #[display("attempt to yield from outside a coroutine")]
    YieldOutsideCoroutine,
}

#[derive(Clone, Display, Debug, PartialEq, Eq)]
pub enum InternalError {
    #[display("resume point {point} does not exist in {function}")]
    InvalidResumePoint { function: String, point: PointId },

    #[display("function {_0} has no resumption points and cannot be resumed")]
    NotResumable(String),

    #[display("snapshot for {function} holds {found} registers, expected {expected}")]
    SnapshotMismatch {
        function: String,
        expected: usize,
        found: usize,
    },

    #[display("unknown function {_0}")]
    UnknownFunction(FunctionId),
}

/// A continuation was resumed after it had already been consumed, or while
/// another thread was resuming it.
#[derive(Clone, Copy, Display, Debug, PartialEq, Eq)]
#[display("invalid continuation: the call is no longer paused at this point")]
pub struct InvalidContinuation;

impl std::error::Error for RuntimeError {}

impl std::error::Error for InvalidContinuation {}

impl std::error::Error for InternalError {}

impl std::error::Error for CoroutineError {}
