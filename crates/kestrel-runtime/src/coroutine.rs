use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::Display;

use crate::resumable::Resumable;
use crate::signal::{FrameStack, ResumeFrame};
use crate::snapshot::Snapshot;
use crate::value::Value;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum CoroutineStatus {
    #[display("suspended")]
    Suspended,
    #[display("running")]
    Running,
    /// Active but not running: it resumed another coroutine.
    #[display("normal")]
    Normal,
    #[display("dead")]
    Dead,
}

#[derive(Debug)]
pub struct Coroutine {
    status: CoroutineStatus,
    /// Saved frames while the coroutine is not running.
    stack: FrameStack,
}

/// Shared handle to a coroutine. Compares by identity.
#[derive(Clone)]
pub struct CoroutineRef(Arc<Mutex<Coroutine>>);

impl CoroutineRef {
    /// A suspended coroutine that will call `entry` on its first resume.
    pub fn new(entry: Value) -> Self {
        Self::with_stack(CoroutineStatus::Suspended, bootstrap(entry))
    }

    pub(crate) fn with_stack(status: CoroutineStatus, stack: FrameStack) -> Self {
        CoroutineRef(Arc::new(Mutex::new(Coroutine { status, stack })))
    }

    fn lock(&self) -> MutexGuard<'_, Coroutine> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> CoroutineStatus {
        self.lock().status
    }

    pub(crate) fn set_status(&self, status: CoroutineStatus) {
        self.lock().status = status;
    }

    /// Move the saved frames out; the coroutine keeps an empty stack.
    pub(crate) fn take_stack(&self) -> FrameStack {
        std::mem::take(&mut self.lock().stack)
    }

    pub(crate) fn save_stack(&self, stack: FrameStack) {
        self.lock().stack = stack;
    }

    pub(crate) fn with_frames<R>(&self, f: impl FnOnce(&FrameStack) -> R) -> R {
        f(&self.lock().stack)
    }

    pub(crate) fn as_ptr(&self) -> *const Mutex<Coroutine> {
        Arc::as_ptr(&self.0)
    }
}

/// A stack whose only frame starts `entry` with whatever arguments the
/// return buffer holds when it is resumed.
pub(crate) fn bootstrap(entry: Value) -> FrameStack {
    let mut stack = FrameStack::new();
    stack.push(ResumeFrame {
        resumable: Resumable::Bootstrap,
        snapshot: Snapshot::new(kestrel_compiler::PointId::ENTRY, vec![entry]),
    });
    stack
}

impl PartialEq for CoroutineRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CoroutineRef {}

impl Hash for CoroutineRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_ptr().hash(state);
    }
}

impl fmt::Debug for CoroutineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoroutineRef({:p})", self.as_ptr())
    }
}
