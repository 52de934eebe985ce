//! Shared helpers for runtime integration tests.

use std::sync::Arc;

use kestrel_compiler::{CompiledProgram, CompilerOptions, compile_program};
use kestrel_ir::{
    ArithOp, Builtin, CompareOp, Constant, FunctionBuilder, Program, ProgramBuilder, Slot,
};
use kestrel_runtime::{
    CallEvent, Continuation, NeverYield, RuntimeError, SchedulingPolicy, Value, call_main,
};

#[allow(dead_code)]
pub fn compile(program: &Program) -> Arc<CompiledProgram> {
    compile_with(program, &CompilerOptions::default())
}

#[allow(dead_code)]
pub fn compile_with(program: &Program, options: &CompilerOptions) -> Arc<CompiledProgram> {
    Arc::new(compile_program(program, options).expect("program should compile"))
}

/// Outcome of driving a call to completion.
#[allow(dead_code)]
#[derive(Debug)]
pub struct Run {
    pub values: Vec<Value>,
    pub pauses: usize,
    /// Frame depth of the running coroutine at every pause.
    pub depths: Vec<usize>,
}

/// Resume until the call terminates, executing async tasks inline.
#[allow(dead_code)]
pub fn drive(
    mut cont: Continuation,
    policy: &mut dyn SchedulingPolicy,
) -> Result<Run, RuntimeError> {
    let mut pauses = 0;
    let mut depths = Vec::new();
    loop {
        cont = match cont.step(policy)? {
            CallEvent::Paused(next) => {
                pauses += 1;
                depths.push(next.call().frame_depth());
                assert_eq!(next.call().live_activations(), 0);
                next
            }
            CallEvent::AsyncWait(next, task) => {
                task.execute();
                next
            }
            CallEvent::Returned(values) => {
                return Ok(Run {
                    values,
                    pauses,
                    depths,
                });
            }
            CallEvent::Failed(error) => return Err(error),
        };
    }
}

/// Run the program's main function without preemption.
#[allow(dead_code)]
pub fn run(program: &Program, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
    call_main(compile(program), args).run_to_completion(&mut NeverYield)
}

#[allow(dead_code)]
pub fn single_function(builder: FunctionBuilder) -> Program {
    let mut program = ProgramBuilder::new();
    let id = program.add(builder.finish());
    program.set_main(id);
    program.finish().expect("program has main")
}

/// `sum(n)`: adds `0..n` in a loop whose back edge is a checkpoint.
#[allow(dead_code)]
pub fn sum_program() -> Program {
    let mut f = FunctionBuilder::new("sum", 1);
    let n = f.param(0);
    let i = f.int(0);
    let s = f.int(0);
    let one = f.int(1);
    let c = f.slot();
    let top = f.label();
    let end = f.label();
    f.bind(top);
    f.compare(CompareOp::Lt, c, i, n);
    f.jump_unless(c, end);
    f.arith(ArithOp::Add, s, s, i);
    f.arith(ArithOp::Add, i, i, one);
    f.jump(top);
    f.bind(end);
    f.ret(&[s]);
    single_function(f)
}

/// A chain `main -> level(depth-1) -> ... -> level0`. Each level `k > 0`
/// returns `inner * 2 + k`; `level0` returns its argument, pausing first
/// when `pause` is set.
#[allow(dead_code)]
pub fn chain_program(depth: usize, pause: bool) -> Program {
    let mut program = ProgramBuilder::new();
    let levels: Vec<_> = (0..depth)
        .map(|k| program.declare(format!("level{k}")))
        .collect();

    let mut level0 = FunctionBuilder::new("level0", 1);
    let x = level0.param(0);
    if pause {
        let p = level0.builtin(Builtin::Pause);
        level0.call(p, &[], &[]);
    }
    level0.ret(&[x]);
    program.define(levels[0], level0.finish());

    for k in 1..depth {
        let mut f = FunctionBuilder::new(format!("level{k}"), 1);
        let x = f.param(0);
        let inner = f.function(levels[k - 1]);
        let r = f.slot();
        f.call(inner, &[x], &[r]);
        let two = f.int(2);
        let k_slot = f.int(k as i64);
        f.arith(ArithOp::Mul, r, r, two);
        f.arith(ArithOp::Add, r, r, k_slot);
        f.ret(&[r]);
        program.define(levels[k], f.finish());
    }

    let mut main = FunctionBuilder::new("main", 1);
    let x = main.param(0);
    let top = main.function(levels[depth - 1]);
    let r = main.slot();
    main.call(top, &[x], &[r]);
    main.ret(&[r]);
    let id = program.add(main.finish());
    program.set_main(id);
    program.finish().expect("chain program is complete")
}

/// What `chain_program(depth, _)` computes for `x`.
#[allow(dead_code)]
pub fn chain_expected(depth: usize, x: i64) -> i64 {
    (1..depth as i64).fold(x, |v, k| v * 2 + k)
}

/// Load a string constant into a fresh slot.
#[allow(dead_code)]
pub fn string(f: &mut FunctionBuilder, s: &str) -> Slot {
    f.constant(Constant::Str(s.to_string()))
}

#[allow(dead_code)]
pub fn str_value(s: &str) -> Value {
    Value::from(s)
}
