use kestrel_compiler::PointId;

use crate::value::Value;

/// Captured local state of one suspended call frame.
///
/// `registers` holds the values of the slots live at `resume_point`, in the
/// order the function's resumption table lists them. The runtime never
/// relies on identity: an equivalent copy (for instance one rebuilt from a
/// persisted record) resumes the same way.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub resume_point: PointId,
    pub registers: Vec<Value>,
    pub varargs: Option<Vec<Value>>,
}

impl Snapshot {
    pub fn new(resume_point: PointId, registers: Vec<Value>) -> Self {
        Self {
            resume_point,
            registers,
            varargs: None,
        }
    }

    pub fn with_varargs(mut self, varargs: Vec<Value>) -> Self {
        self.varargs = Some(varargs);
        self
    }

    /// Snapshot for frames that keep no state of their own.
    pub fn empty() -> Self {
        Self::new(PointId::ENTRY, Vec::new())
    }
}
