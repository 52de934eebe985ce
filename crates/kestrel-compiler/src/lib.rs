//! Resumable code generation for Kestrel.
//!
//! Lowers slot-allocated IR into [`HostOp`] segments and builds, for every
//! function, the [`ResumptionTable`] that lets the runtime re-enter the
//! function after it has been suspended:
//!
//! - every operation that may suspend (dispatched arithmetic, comparison,
//!   indexing, calls and scheduler checkpoints) is bracketed by a
//!   `SetPoint`/label pair, so re-entry lands just after it;
//! - each point records the slots that are live across it, which is exactly
//!   what a snapshot must hold;
//! - long bodies are split into segments and points are numbered
//!   `(segment, offset)`, so dispatch is two-level.

pub mod code;
pub mod emit;
pub mod errors;
pub mod liveness;
pub mod options;
pub mod resumption;

use cranelift_entity::PrimaryMap;
use kestrel_ir::Program;

pub use code::{CodeAddr, CompiledFunction, CompiledProgram, HostOp, PointId, Segment};
pub use emit::compile_function;
pub use errors::{CompilationError, CompilationErrorKind, CompilationResult};
pub use options::CompilerOptions;
pub use resumption::{PointKind, ResumePoint, ResumptionTable};

/// Compile every function of `program`.
pub fn compile_program(
    program: &Program,
    options: &CompilerOptions,
) -> CompilationResult<CompiledProgram> {
    if program.function(program.main).is_none() {
        return Err(CompilationErrorKind::FunctionNotFound(program.main).into());
    }

    let mut functions = PrimaryMap::with_capacity(program.functions.len());
    for (id, proto) in program.iter() {
        let compiled = compile_function(program, id, options)?;
        tracing::debug!(
            function = %proto.name,
            points = compiled.resumption.points().count(),
            segments = compiled.segments.len(),
            resumable = compiled.is_resumable(),
            "compiled function"
        );
        let pushed = functions.push(compiled);
        debug_assert_eq!(pushed, id);
    }

    Ok(CompiledProgram {
        functions,
        main: program.main,
    })
}
