//! Load, compile and run a Kestrel program.
//!
//! ```text
//! program.json
//!     │
//!     ▼
//! load_program ─► Program (slot-allocated IR)
//!     │
//!     ▼
//! compile ─► CompiledProgram (segments + resumption tables)
//!     │
//!     ▼
//! run ─► RunReport (values, pauses, awaited tasks)
//! ```

use std::path::Path;
use std::sync::Arc;

use derive_more::{Display, From};
use kestrel_compiler::{CompilationError, CompiledProgram, CompilerOptions, compile_program};
use kestrel_ir::Program;
use kestrel_runtime::{
    CallEvent, InvalidContinuation, NeverYield, RuntimeError, SchedulingPolicy, TickQuantum,
    Value, call_main,
};

#[derive(Debug, Display, From)]
pub enum PipelineError {
    #[display("cannot read program: {_0}")]
    Io(std::io::Error),

    #[display("malformed program: {_0}")]
    Json(serde_json::Error),

    #[display("compilation failed: {_0}")]
    Compile(CompilationError),

    #[display("runtime error: {_0}")]
    Runtime(RuntimeError),

    #[display("{_0}")]
    Continuation(InvalidContinuation),
}

impl std::error::Error for PipelineError {}

/// Settings for one run.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub compiler: CompilerOptions,
    /// Preempt after this many ticks; `None` never preempts.
    pub quantum: Option<u64>,
}

/// What a run produced.
#[derive(Debug, PartialEq)]
pub struct RunReport {
    pub values: Vec<Value>,
    pub pauses: usize,
    pub tasks: usize,
}

pub fn load_program(path: &Path) -> Result<Program, PipelineError> {
    let text = std::fs::read_to_string(path)?;
    let program = Program::from_json(&text)?;
    tracing::debug!(
        path = %path.display(),
        functions = program.functions.len(),
        "loaded program"
    );
    Ok(program)
}

pub fn compile(
    program: &Program,
    options: &CompilerOptions,
) -> Result<Arc<CompiledProgram>, PipelineError> {
    Ok(Arc::new(compile_program(program, options)?))
}

/// Call the program's main function with `args` and drive it to the end,
/// resuming after every pause and executing awaited tasks inline.
pub fn run(
    program: Arc<CompiledProgram>,
    args: Vec<Value>,
    quantum: Option<u64>,
) -> Result<RunReport, PipelineError> {
    let mut policy: Box<dyn SchedulingPolicy> = match quantum {
        Some(quantum) => Box::new(TickQuantum::new(quantum)),
        None => Box::new(NeverYield),
    };
    let mut cont = call_main(program, args);
    let (mut pauses, mut tasks) = (0, 0);
    loop {
        cont = match cont.step(policy.as_mut())? {
            CallEvent::Paused(next) => {
                pauses += 1;
                next
            }
            CallEvent::AsyncWait(next, task) => {
                tasks += 1;
                task.execute();
                if !task.is_complete() {
                    return Err(RuntimeError::message(format_args!(
                        "async task '{}' has no job and was never completed",
                        task.description()
                    ))
                    .into());
                }
                next
            }
            CallEvent::Returned(values) => {
                tracing::info!(pauses, tasks, "program finished");
                return Ok(RunReport {
                    values,
                    pauses,
                    tasks,
                });
            }
            CallEvent::Failed(error) => return Err(error.into()),
        };
    }
}

pub fn run_file(
    path: &Path,
    args: Vec<Value>,
    options: &RunOptions,
) -> Result<RunReport, PipelineError> {
    let program = load_program(path)?;
    let compiled = compile(&program, &options.compiler)?;
    run(compiled, args, options.quantum)
}

/// Read a command-line argument as a script value: `nil`, booleans and
/// numbers are recognized, anything else is a string.
pub fn parse_value(text: &str) -> Value {
    match text {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => {
            if let Ok(i) = text.parse::<i64>() {
                Value::Int(i)
            } else if let Ok(x) = text.parse::<f64>() {
                Value::Float(x)
            } else {
                Value::from(text)
            }
        }
    }
}

/// Human-readable listing of every compiled function.
pub fn disassemble(program: &CompiledProgram) -> String {
    program
        .functions
        .values()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_parse_as_values() {
        assert_eq!(parse_value("nil"), Value::Nil);
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("-12"), Value::Int(-12));
        assert_eq!(parse_value("2.5"), Value::Float(2.5));
        assert_eq!(parse_value("hello"), Value::from("hello"));
    }
}
