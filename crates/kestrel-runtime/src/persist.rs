//! Persisted form of a paused call.
//!
//! A paused call is its frames (innermost first) plus whatever the return
//! buffer holds for the frame resumed next. Each snapshot is stored as
//! `(resume_point, registers, varargs)`. Reference values other than
//! functions and async tasks have no persisted form.

use std::sync::Arc;

use derive_more::Display;
use kestrel_compiler::{CompiledProgram, PointId};
use kestrel_ir::FunctionId;
use serde::{Deserialize, Serialize};

use crate::call::{Call, CallState, Continuation};
use crate::coroutine::{CoroutineRef, CoroutineStatus};
use crate::rbuf::ReturnBuffer;
use crate::resumable::Resumable;
use crate::signal::{FrameStack, ResumeFrame};
use crate::snapshot::Snapshot;
use crate::task::AsyncTask;
use crate::value::{Callable, Value};

#[derive(Debug, Display, PartialEq, Eq)]
pub enum PersistError {
    #[display("continuation is no longer paused at this point")]
    NotPaused,

    #[display("cannot persist a call paused inside a coroutine")]
    InsideCoroutine,

    #[display("cannot persist a {_0} value")]
    Unpersistable(&'static str),

    #[display("persisted frame refers to unknown function {_0}")]
    UnknownFunction(FunctionId),
}

impl std::error::Error for PersistError {}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedCall {
    /// Innermost first.
    pub frames: Vec<FrameRecord>,
    pub return_values: Vec<PersistedValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub resumable: Resumable,
    pub snapshot: SnapshotRecord,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub resume_point: i32,
    pub registers: Vec<PersistedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub varargs: Option<Vec<PersistedValue>>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PersistedValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Function(Callable),
    Task {
        description: String,
        outcome: Option<Result<Vec<PersistedValue>, String>>,
    },
}

impl TryFrom<&Value> for PersistedValue {
    type Error = PersistError;

    fn try_from(value: &Value) -> Result<Self, PersistError> {
        Ok(match value {
            Value::Nil => PersistedValue::Nil,
            Value::Bool(b) => PersistedValue::Bool(*b),
            Value::Int(i) => PersistedValue::Int(*i),
            Value::Float(x) => PersistedValue::Float(*x),
            Value::Str(s) => PersistedValue::Str(s.to_string()),
            Value::Function(callable) => PersistedValue::Function(*callable),
            Value::Task(task) => PersistedValue::Task {
                description: task.description().to_string(),
                outcome: match task.outcome() {
                    None => None,
                    Some(Ok(values)) => Some(Ok(persist_values(&values)?)),
                    Some(Err(message)) => Some(Err(message)),
                },
            },
            Value::Table(_) | Value::Coroutine(_) => {
                return Err(PersistError::Unpersistable(value.type_name()));
            }
        })
    }
}

impl From<PersistedValue> for Value {
    fn from(value: PersistedValue) -> Self {
        match value {
            PersistedValue::Nil => Value::Nil,
            PersistedValue::Bool(b) => Value::Bool(b),
            PersistedValue::Int(i) => Value::Int(i),
            PersistedValue::Float(x) => Value::Float(x),
            PersistedValue::Str(s) => Value::from(s),
            PersistedValue::Function(callable) => Value::Function(callable),
            PersistedValue::Task {
                description,
                outcome: Some(outcome),
            } => Value::Task(AsyncTask::completed(
                description,
                outcome.map(restore_values),
            )),
            PersistedValue::Task {
                description,
                outcome: None,
            } => Value::Task(AsyncTask::pending(description)),
        }
    }
}

fn persist_values(values: &[Value]) -> Result<Vec<PersistedValue>, PersistError> {
    values.iter().map(PersistedValue::try_from).collect()
}

fn restore_values(values: Vec<PersistedValue>) -> Vec<Value> {
    values.into_iter().map(Value::from).collect()
}

impl Continuation {
    /// Capture the paused call so that it can be rebuilt elsewhere with
    /// [`restore`](Self::restore). The continuation stays valid.
    pub fn persist(&self) -> Result<PersistedCall, PersistError> {
        let state = self.call().lock();
        // Checked under the lock: a resume claims the version first.
        if !self.is_current() {
            return Err(PersistError::NotPaused);
        }
        let [main] = state.coroutines.as_slice() else {
            return Err(PersistError::InsideCoroutine);
        };
        let frames = main.with_frames(|stack| {
            stack
                .iter_innermost_first()
                .map(|frame| {
                    Ok(FrameRecord {
                        resumable: frame.resumable,
                        snapshot: SnapshotRecord {
                            resume_point: frame.snapshot.resume_point.as_raw() as i32,
                            registers: persist_values(&frame.snapshot.registers)?,
                            varargs: frame
                                .snapshot
                                .varargs
                                .as_deref()
                                .map(persist_values)
                                .transpose()?,
                        },
                    })
                })
                .collect::<Result<Vec<_>, PersistError>>()
        })?;
        Ok(PersistedCall {
            frames,
            return_values: persist_values(state.rbuf.as_slice())?,
        })
    }

    /// Rebuild a paused call from its persisted form.
    pub fn restore(
        program: Arc<CompiledProgram>,
        persisted: PersistedCall,
    ) -> Result<Continuation, PersistError> {
        for record in &persisted.frames {
            if let Resumable::Compiled(id) = record.resumable {
                if program.function(id).is_none() {
                    return Err(PersistError::UnknownFunction(id));
                }
            }
        }
        let stack: FrameStack = persisted
            .frames
            .into_iter()
            .map(|record| {
                let SnapshotRecord {
                    resume_point,
                    registers,
                    varargs,
                } = record.snapshot;
                let point = PointId::from_raw(resume_point as u32);
                let mut snapshot = Snapshot::new(point, restore_values(registers));
                snapshot.varargs = varargs.map(restore_values);
                ResumeFrame {
                    resumable: record.resumable,
                    snapshot,
                }
            })
            .collect();
        tracing::debug!(frames = stack.len(), "restored paused call");

        let mut rbuf = ReturnBuffer::new();
        rbuf.set_to(restore_values(persisted.return_values));
        let main = CoroutineRef::with_stack(CoroutineStatus::Running, stack);
        Ok(Call::paused(CallState::new(program, rbuf, vec![main])))
    }
}
