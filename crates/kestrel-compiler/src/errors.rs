//! Error types for resumable code generation

use derive_more::Display;
use kestrel_ir::{FunctionId, LabelId, Slot};

pub type CompilationResult<T> = Result<T, CompilationError>;

#[derive(Display, Debug)]
#[display("{kind}")]
pub struct CompilationError {
    kind: Box<CompilationErrorKind>,
}

impl<E> From<E> for CompilationError
where
    CompilationErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        CompilationError {
            kind: Box::new(CompilationErrorKind::from(error)),
        }
    }
}

impl CompilationError {
    pub fn kind(&self) -> &CompilationErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> CompilationErrorKind {
        *self.kind
    }

    pub(crate) fn in_function(function: &str, kind: CompilationErrorKind) -> Self {
        CompilationErrorKind::InFunction {
            function: function.to_string(),
            source: Box::new(kind),
        }
        .into()
    }
}

#[derive(Clone, Display, Debug, PartialEq)]
pub enum CompilationErrorKind {
    #[display("Slot {slot} out of range (function has {num_slots} slots)")]
    SlotOutOfRange { slot: Slot, num_slots: u32 },

    #[display("Label {_0} is never bound")]
    UnboundLabel(LabelId),

    #[display("Label {_0} is bound more than once")]
    DuplicateLabel(LabelId),

    #[display("Function not found: {_0}")]
    FunctionNotFound(FunctionId),

    #[display("Too many resumption points in segment {_0}")]
    TooManyPoints(u16),

    #[display("Too many segments: {_0}")]
    TooManySegments(usize),

    #[display("Invalid options: {_0}")]
    InvalidOptions(&'static str),

    #[display("In function {function}: {source}")]
    InFunction {
        function: String,
        source: Box<CompilationErrorKind>,
    },
}

impl std::error::Error for CompilationError {}

impl std::error::Error for CompilationErrorKind {}
