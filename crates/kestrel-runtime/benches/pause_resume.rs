//! Cost of suspending and resuming compiled code.

use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use kestrel_compiler::{CompiledProgram, CompilerOptions, compile_program};
use kestrel_ir::{ArithOp, Builtin, CompareOp, FunctionBuilder, ProgramBuilder};
use kestrel_runtime::{NeverYield, TickQuantum, Value, call_main};

/// `sum(n)` with a checkpoint on the loop's back edge.
fn sum_program() -> Arc<CompiledProgram> {
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

    let mut program = ProgramBuilder::new();
    let id = program.add(f.finish());
    program.set_main(id);
    let program = program.finish().unwrap();
    Arc::new(compile_program(&program, &CompilerOptions::default()).unwrap())
}

/// `main -> level(depth-1) -> ... -> level0`, where `level0` pauses.
fn deep_pause_program(depth: usize) -> Arc<CompiledProgram> {
    let mut program = ProgramBuilder::new();
    let levels: Vec<_> = (0..depth)
        .map(|k| program.declare(format!("level{k}")))
        .collect();
    let mut level0 = FunctionBuilder::new("level0", 1);
    let x = level0.param(0);
    let pause = level0.builtin(Builtin::Pause);
    level0.call(pause, &[], &[]);
    level0.ret(&[x]);
    program.define(levels[0], level0.finish());
    for k in 1..depth {
        let mut f = FunctionBuilder::new(format!("level{k}"), 1);
        let x = f.param(0);
        let inner = f.function(levels[k - 1]);
        let r = f.slot();
        f.call(inner, &[x], &[r]);
        f.ret(&[r]);
        program.define(levels[k], f.finish());
    }
    program.set_main(levels[depth - 1]);
    let program = program.finish().unwrap();
    Arc::new(compile_program(&program, &CompilerOptions::default()).unwrap())
}

fn bench_preemption(c: &mut Criterion) {
    let program = sum_program();
    let mut group = c.benchmark_group("preemption");

    group.bench_function("sum_1000_uninterrupted", |b| {
        b.iter(|| {
            call_main(program.clone(), vec![Value::Int(black_box(1000))])
                .run_to_completion(&mut NeverYield)
                .unwrap()
        });
    });

    group.bench_function("sum_1000_pause_every_iteration", |b| {
        b.iter(|| {
            call_main(program.clone(), vec![Value::Int(black_box(1000))])
                .run_to_completion(&mut TickQuantum::new(1))
                .unwrap()
        });
    });

    group.finish();
}

fn bench_deep_stacks(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep_stacks");

    for depth in [4, 32, 128] {
        let program = deep_pause_program(depth);
        group.bench_function(format!("pause_resume_depth_{depth}"), |b| {
            b.iter(|| {
                call_main(program.clone(), vec![Value::Int(black_box(7))])
                    .run_to_completion(&mut NeverYield)
                    .unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_preemption, bench_deep_stacks);
criterion_main!(benches);
