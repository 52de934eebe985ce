use kestrel_compiler::CompiledProgram;

use crate::coroutine::CoroutineRef;
use crate::exec::Activations;
use crate::policy::SchedulingPolicy;
use crate::rbuf::ReturnBuffer;

/// Everything running code may touch during one pass of the driver.
pub struct ExecutionContext<'a> {
    pub(crate) program: &'a CompiledProgram,
    pub(crate) rbuf: &'a mut ReturnBuffer,
    pub(crate) activations: &'a mut Activations,
    pub(crate) policy: &'a mut dyn SchedulingPolicy,
    /// The running coroutine.
    pub(crate) current: CoroutineRef,
    pub(crate) in_main: bool,
}

impl ExecutionContext<'_> {
    pub fn program(&self) -> &CompiledProgram {
        self.program
    }

    pub fn rbuf(&self) -> &ReturnBuffer {
        self.rbuf
    }

    /// Whether the running coroutine is the call's main coroutine.
    pub fn in_main(&self) -> bool {
        self.in_main
    }
}
