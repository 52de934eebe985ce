//! Runtime for compiled Kestrel programs.
//!
//! Compiled code never captures the host stack. Every operation that may
//! suspend returns a [`Flow`]; a suspension travels outward as a
//! [`SuspendSignal`] collecting one [`ResumeFrame`] per compiled frame it
//! passes. The driver behind [`Continuation::resume`] keeps those frames as
//! the call's virtual stack and replays them innermost first, switching
//! coroutines or pausing the call as the signal's [`Payload`] asks.
//!
//! ```
//! use std::sync::Arc;
//!
//! use kestrel_compiler::{CompilerOptions, compile_program};
//! use kestrel_ir::{ArithOp, FunctionBuilder, ProgramBuilder};
//! use kestrel_runtime::{NeverYield, Value, call_main};
//!
//! let mut program = ProgramBuilder::new();
//! let mut main = FunctionBuilder::new("main", 0);
//! let a = main.int(40);
//! let b = main.int(2);
//! let sum = main.slot();
//! main.arith(ArithOp::Add, sum, a, b);
//! main.ret(&[sum]);
//! let id = program.add(main.finish());
//! program.set_main(id);
//!
//! let compiled = compile_program(&program.finish().unwrap(), &CompilerOptions::default()).unwrap();
//! let values = call_main(Arc::new(compiled), vec![])
//!     .run_to_completion(&mut NeverYield)
//!     .unwrap();
//! assert_eq!(values, vec![Value::Int(42)]);
//! ```

mod builtins;
pub mod call;
pub mod context;
pub mod coroutine;
pub mod dispatch;
pub mod errors;
pub mod exec;
pub mod persist;
pub mod policy;
pub mod rbuf;
pub mod resumable;
pub mod signal;
pub mod snapshot;
pub mod task;
pub mod value;

pub use call::{
    Call, CallEvent, CallEventHandler, CallStatus, Continuation, call_main, new_call,
};
pub use context::ExecutionContext;
pub use coroutine::{CoroutineRef, CoroutineStatus};
pub use errors::{
    CoroutineError, InternalError, InvalidContinuation, RuntimeError, RuntimeErrorKind,
    RuntimeResult,
};
pub use persist::{FrameRecord, PersistError, PersistedCall, PersistedValue, SnapshotRecord};
pub use policy::{NeverYield, SchedulingPolicy, TickQuantum};
pub use rbuf::ReturnBuffer;
pub use resumable::Resumable;
pub use signal::{ExecResult, Flow, FrameStack, Payload, ResumeFrame, SuspendSignal};
pub use snapshot::Snapshot;
pub use task::{AsyncTask, TaskOutcome};
pub use value::{Callable, TableRef, Value};
