//! Pausing, resuming and persisting calls.

mod common;

use std::sync::Arc;

use common::{chain_expected, chain_program, compile, compile_with, drive, string, sum_program};
use kestrel_compiler::CompilerOptions;
use kestrel_ir::{ArithOp, Builtin, FunctionBuilder, ProgramBuilder};
use kestrel_runtime::{
    AsyncTask, CallEvent, CallStatus, Callable, Continuation, FrameRecord, InternalError,
    InvalidContinuation, NeverYield, PersistError, PersistedCall, PersistedValue, Resumable,
    RuntimeErrorKind, SnapshotRecord, TickQuantum, Value, call_main, new_call,
};

fn expect_paused(event: CallEvent) -> Continuation {
    match event {
        CallEvent::Paused(next) => next,
        other => panic!("expected a pause, got {other:?}"),
    }
}

#[test]
fn nested_pause_resumes_innermost_first() {
    let program = compile(&chain_program(4, true));
    let cont = call_main(program, vec![Value::Int(5)]);

    let next = expect_paused(cont.step(&mut NeverYield).unwrap());
    // pause, level0..level3, main
    assert_eq!(next.call().frame_depth(), 6);
    assert_eq!(next.call().status(), CallStatus::Paused);
    assert_eq!(next.call().live_activations(), 0);

    match next.step(&mut NeverYield).unwrap() {
        CallEvent::Returned(values) => {
            assert_eq!(values, vec![Value::Int(chain_expected(4, 5))]);
        }
        other => panic!("expected a return, got {other:?}"),
    }
    assert_eq!(next.call().status(), CallStatus::Terminated);
}

#[test]
fn paused_run_matches_uninterrupted_run() {
    let baseline = drive(
        call_main(compile(&chain_program(6, false)), vec![Value::Int(3)]),
        &mut NeverYield,
    )
    .unwrap();
    let paused = drive(
        call_main(compile(&chain_program(6, true)), vec![Value::Int(3)]),
        &mut NeverYield,
    )
    .unwrap();
    assert_eq!(baseline.pauses, 0);
    assert_eq!(paused.pauses, 1);
    assert_eq!(paused.values, baseline.values);
}

#[test]
fn continuation_resumes_only_once() {
    let cont = call_main(compile(&chain_program(2, true)), vec![Value::Int(1)]);
    let next = expect_paused(cont.step(&mut NeverYield).unwrap());

    assert!(!cont.is_current());
    assert!(cont.step(&mut NeverYield).is_err());
    // The failed attempt left the paused call alone.
    assert_eq!(next.call().status(), CallStatus::Paused);
    assert!(next.is_current());

    let copy = next.clone();
    assert!(matches!(
        next.step(&mut NeverYield).unwrap(),
        CallEvent::Returned(_)
    ));
    assert!(copy.step(&mut NeverYield).is_err());
}

fn expect_wait(event: CallEvent) -> (Continuation, AsyncTask) {
    match event {
        CallEvent::AsyncWait(next, task) => (next, task),
        other => panic!("expected an async wait, got {other:?}"),
    }
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn racing_threads_resume_a_continuation_once() {
    assert_send_sync::<Continuation>();

    let baseline = drive(
        call_main(compile(&chain_program(4, false)), vec![Value::Int(5)]),
        &mut NeverYield,
    )
    .unwrap();
    let cont = call_main(compile(&chain_program(4, true)), vec![Value::Int(5)]);
    let next = expect_paused(cont.step(&mut NeverYield).unwrap());

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cont = next.clone();
                scope.spawn(move || cont.step(&mut NeverYield))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    let (won, lost): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    assert_eq!(won.len(), 1);
    assert_eq!(lost.len(), 7);
    assert!(
        lost.iter()
            .all(|result| matches!(result, Err(InvalidContinuation)))
    );
    match won.into_iter().next().unwrap().unwrap() {
        CallEvent::Returned(values) => assert_eq!(values, baseline.values),
        other => panic!("expected a return, got {other:?}"),
    }
    assert_eq!(next.call().status(), CallStatus::Terminated);
}

#[test]
fn event_handler_receives_each_outcome() {
    let cont = call_main(compile(&chain_program(3, true)), vec![Value::Int(2)]);
    let mut events = Vec::new();
    cont.resume(&mut events, &mut NeverYield).unwrap();
    let Some(CallEvent::Paused(next)) = events.pop() else {
        panic!("expected a pause");
    };
    next.resume(&mut events, &mut NeverYield).unwrap();
    assert!(matches!(
        events.as_slice(),
        [CallEvent::Returned(values)] if values == &[Value::Int(chain_expected(3, 2))]
    ));
}

#[test]
fn tail_calls_do_not_grow_the_frame_stack() {
    // count(n, acc): pause; if n <= 0 return acc else return count(n - 1, acc + 1)
    let mut program = ProgramBuilder::new();
    let count = program.declare("count");
    let mut f = FunctionBuilder::new("count", 2);
    let (n, acc) = (f.param(0), f.param(1));
    let pause = f.builtin(Builtin::Pause);
    f.call(pause, &[], &[]);
    let zero = f.int(0);
    let done = f.slot();
    let more = f.label();
    f.compare(kestrel_ir::CompareOp::Le, done, n, zero);
    f.jump_unless(done, more);
    f.ret(&[acc]);
    f.bind(more);
    let one = f.int(1);
    f.arith(ArithOp::Sub, n, n, one);
    f.arith(ArithOp::Add, acc, acc, one);
    let callee = f.function(count);
    f.tail_call(callee, &[n, acc]);
    program.define(count, f.finish());

    let mut main = FunctionBuilder::new("main", 0);
    let callee = main.function(count);
    let n = main.int(5);
    let acc = main.int(0);
    let r = main.slot();
    main.call(callee, &[n, acc], &[r]);
    main.ret(&[r]);
    let main = program.add(main.finish());
    program.set_main(main);

    let run = drive(
        call_main(compile(&program.finish().unwrap()), vec![]),
        &mut NeverYield,
    )
    .unwrap();
    assert_eq!(run.values, vec![Value::Int(5)]);
    assert_eq!(run.pauses, 6);
    // pause, count, main
    assert!(run.depths.iter().all(|&depth| depth == 3), "{:?}", run.depths);
}

#[test]
fn back_edges_preempt_on_the_tick_quantum() {
    let program = compile(&sum_program());
    let run = drive(
        call_main(program.clone(), vec![Value::Int(10)]),
        &mut TickQuantum::new(3),
    )
    .unwrap();
    assert_eq!(run.values, vec![Value::Int(45)]);
    assert_eq!(run.pauses, 3);

    let run = drive(call_main(program, vec![Value::Int(10)]), &mut NeverYield).unwrap();
    assert_eq!(run.values, vec![Value::Int(45)]);
    assert_eq!(run.pauses, 0);
}

#[test]
fn segmented_code_suspends_like_unsegmented_code() {
    let whole = compile(&sum_program());
    let split = compile_with(
        &sum_program(),
        &CompilerOptions::default().with_segment_threshold(2),
    );
    let main = split.function(split.main).unwrap();
    assert!(main.segments.len() > 1);

    let a = drive(call_main(whole, vec![Value::Int(12)]), &mut TickQuantum::new(2)).unwrap();
    let b = drive(call_main(split, vec![Value::Int(12)]), &mut TickQuantum::new(2)).unwrap();
    assert_eq!(a.values, b.values);
    assert_eq!(a.pauses, b.pauses);
    assert_eq!(a.pauses, 6);
}

/// `t1 + t2` where `__add` awaits a task before summing the `v` fields.
fn awaiting_metamethod_program() -> kestrel_ir::Program {
    let mut program = ProgramBuilder::new();

    let mut add = FunctionBuilder::new("add", 2);
    let (a, b) = (add.param(0), add.param(1));
    let task_key = string(&mut add, "task");
    let task = add.slot();
    add.get_index(task, a, task_key);
    let await_fn = add.builtin(Builtin::Await);
    let bonus = add.slot();
    add.call(await_fn, &[task], &[bonus]);
    let v = string(&mut add, "v");
    let (av, bv) = (add.slot(), add.slot());
    add.get_index(av, a, v);
    add.get_index(bv, b, v);
    let sum = add.slot();
    add.arith(ArithOp::Add, sum, av, bv);
    add.arith(ArithOp::Add, sum, sum, bonus);
    add.ret(&[sum]);
    let add = program.add(add.finish());

    let mut main = FunctionBuilder::new("main", 1);
    let task = main.param(0);
    let (t1, t2, mt) = (main.slot(), main.slot(), main.slot());
    main.new_table(t1);
    main.new_table(t2);
    main.new_table(mt);
    let key = string(&mut main, "__add");
    let handler = main.function(add);
    main.set_index(mt, key, handler);
    let setmetatable = main.builtin(Builtin::SetMetatable);
    main.call(setmetatable, &[t1, mt], &[]);
    main.call(setmetatable, &[t2, mt], &[]);
    let v = string(&mut main, "v");
    let twenty = main.int(20);
    let twenty_two = main.int(22);
    main.set_index(t1, v, twenty);
    main.set_index(t2, v, twenty_two);
    let task_key = string(&mut main, "task");
    main.set_index(t1, task_key, task);
    let r = main.slot();
    main.arith(ArithOp::Add, r, t1, t2);
    main.ret(&[r]);
    let main = program.add(main.finish());
    program.set_main(main);
    program.finish().unwrap()
}

#[test]
fn metamethod_may_wait_on_async_task() {
    let program = compile(&awaiting_metamethod_program());
    let task = AsyncTask::new("bonus", || Ok(vec![Value::Int(100)]));
    let cont = call_main(program, vec![Value::Task(task.clone())]);

    let (next, waited) = match cont.step(&mut NeverYield).unwrap() {
        CallEvent::AsyncWait(next, waited) => (next, waited),
        other => panic!("expected an async wait, got {other:?}"),
    };
    assert_eq!(waited, task);
    assert_eq!(waited.description(), "bonus");
    // await, add, main
    assert_eq!(next.call().frame_depth(), 3);

    waited.execute();
    match next.step(&mut NeverYield).unwrap() {
        CallEvent::Returned(values) => assert_eq!(values, vec![Value::Int(142)]),
        other => panic!("expected a return, got {other:?}"),
    }
}

#[test]
fn failed_task_raises_in_the_awaiting_frame() {
    let program = compile(&awaiting_metamethod_program());
    let task = AsyncTask::new("bonus", || Err("disk on fire".to_string()));
    let error = call_main(program, vec![Value::Task(task)])
        .run_to_completion(&mut NeverYield)
        .unwrap_err();
    assert_eq!(error.value(), Value::from("disk on fire"));
    assert!(!error.is_fatal());
}

/// `main(task) = await(task)`
fn await_program() -> kestrel_ir::Program {
    let mut f = FunctionBuilder::new("main", 1);
    let task = f.param(0);
    let await_fn = f.builtin(Builtin::Await);
    let result = f.slot();
    f.call(await_fn, &[task], &[result]);
    f.ret(&[result]);
    common::single_function(f)
}

/// `main(task) = pcall(await, task)`
fn protected_await_program() -> kestrel_ir::Program {
    let mut f = FunctionBuilder::new("main", 1);
    let task = f.param(0);
    let pcall = f.builtin(Builtin::Pcall);
    let await_fn = f.builtin(Builtin::Await);
    let (ok, value) = (f.slot(), f.slot());
    f.call(pcall, &[await_fn, task], &[ok, value]);
    f.ret(&[ok, value]);
    common::single_function(f)
}

#[test]
fn early_resume_waits_again_on_the_same_task() {
    let program = compile(&protected_await_program());
    let task = AsyncTask::pending("slow");
    let cont = call_main(program, vec![Value::Task(task.clone())]);

    let (next, waited) = expect_wait(cont.step(&mut NeverYield).unwrap());
    assert_eq!(waited, task);
    // Resuming before the task completes must not reach pcall as an error.
    let (next, waited) = expect_wait(next.step(&mut NeverYield).unwrap());
    assert_eq!(waited, task);
    // await, pcall, main
    assert_eq!(next.call().frame_depth(), 3);

    task.complete(Ok(vec![Value::Int(5)]));
    match next.step(&mut NeverYield).unwrap() {
        CallEvent::Returned(values) => {
            assert_eq!(values, vec![Value::Bool(true), Value::Int(5)]);
        }
        other => panic!("expected a return, got {other:?}"),
    }
}

#[test]
fn pending_wait_survives_persist_and_restore() {
    let program = compile(&await_program());
    let cont = call_main(
        program.clone(),
        vec![Value::Task(AsyncTask::pending("lookup"))],
    );
    let (paused, _) = expect_wait(cont.step(&mut NeverYield).unwrap());

    let persisted = paused.persist().unwrap();
    assert_eq!(persisted.frames[0].resumable, Resumable::Builtin(Builtin::Await));
    assert_eq!(
        persisted.frames[0].snapshot.registers,
        vec![PersistedValue::Task {
            description: "lookup".to_string(),
            outcome: None,
        }]
    );
    let text = serde_json::to_string(&persisted).unwrap();
    let loaded: PersistedCall = serde_json::from_str(&text).unwrap();

    // The restored call hands the task back before anything else runs.
    let restored = Continuation::restore(program, loaded).unwrap();
    let (next, task) = expect_wait(restored.step(&mut NeverYield).unwrap());
    assert_eq!(task.description(), "lookup");
    assert!(!task.is_complete());

    task.complete(Ok(vec![Value::from("found")]));
    match next.step(&mut NeverYield).unwrap() {
        CallEvent::Returned(values) => assert_eq!(values, vec![Value::from("found")]),
        other => panic!("expected a return, got {other:?}"),
    }
}

#[test]
fn run_to_completion_rejects_tasks_without_a_job() {
    let program = compile(&await_program());
    let error = call_main(program, vec![Value::Task(AsyncTask::pending("external"))])
        .run_to_completion(&mut NeverYield)
        .unwrap_err();
    assert_eq!(
        error.value(),
        Value::from("async task 'external' has no job and was never completed")
    );
}

#[test]
fn persisted_call_resumes_after_json_round_trip() {
    let program = compile(&chain_program(4, true));
    let cont = call_main(program.clone(), vec![Value::Int(5)]);
    let paused = expect_paused(cont.step(&mut NeverYield).unwrap());

    let persisted = paused.persist().unwrap();
    assert_eq!(persisted.frames.len(), 6);
    assert_eq!(persisted.frames[0].resumable, Resumable::Builtin(Builtin::Pause));
    let text = serde_json::to_string(&persisted).unwrap();
    let loaded: PersistedCall = serde_json::from_str(&text).unwrap();
    assert_eq!(loaded, persisted);

    let expected = vec![Value::Int(chain_expected(4, 5))];
    let restored = Continuation::restore(program, loaded).unwrap();
    assert_eq!(restored.run_to_completion(&mut NeverYield).unwrap(), expected);
    // The original is untouched by persisting.
    assert_eq!(paused.run_to_completion(&mut NeverYield).unwrap(), expected);
}

#[test]
fn unstarted_call_persists_its_arguments() {
    let program = compile(&sum_program());
    let cont = call_main(program.clone(), vec![Value::Int(4)]);
    let persisted = cont.persist().unwrap();
    assert_eq!(persisted.frames.len(), 1);
    assert_eq!(persisted.frames[0].resumable, Resumable::Bootstrap);

    let restored = Continuation::restore(program, persisted).unwrap();
    assert_eq!(
        restored.run_to_completion(&mut NeverYield).unwrap(),
        vec![Value::Int(6)]
    );
}

#[test]
fn tables_cannot_be_persisted() {
    let program = compile(&awaiting_metamethod_program());
    let task = AsyncTask::pending("never");
    let cont = call_main(program, vec![Value::Task(task)]);
    let CallEvent::AsyncWait(next, _) = cont.step(&mut NeverYield).unwrap() else {
        panic!("expected an async wait");
    };
    assert_eq!(next.persist(), Err(PersistError::Unpersistable("table")));
    assert_eq!(cont.persist(), Err(PersistError::NotPaused));
}

#[test]
fn corrupted_snapshot_is_fatal() {
    let program = compile(&sum_program());
    let persisted = PersistedCall {
        frames: vec![FrameRecord {
            resumable: Resumable::Compiled(program.main),
            snapshot: SnapshotRecord {
                resume_point: 999,
                registers: vec![],
                varargs: None,
            },
        }],
        return_values: vec![],
    };
    let error = Continuation::restore(program, persisted)
        .unwrap()
        .run_to_completion(&mut NeverYield)
        .unwrap_err();
    assert!(error.is_fatal());
    assert!(matches!(
        error.kind(),
        RuntimeErrorKind::Internal(InternalError::InvalidResumePoint { .. })
    ));
}

#[test]
fn functions_without_points_cannot_be_resumed() {
    let mut f = FunctionBuilder::new("plain", 0);
    let one = f.int(1);
    f.ret(&[one]);
    let program = compile(&common::single_function(f));
    assert!(!program.function(program.main).unwrap().is_resumable());

    let persisted = PersistedCall {
        frames: vec![FrameRecord {
            resumable: Resumable::Compiled(program.main),
            snapshot: SnapshotRecord {
                resume_point: 1,
                registers: vec![],
                varargs: None,
            },
        }],
        return_values: vec![],
    };
    let error = Continuation::restore(program, persisted)
        .unwrap()
        .run_to_completion(&mut NeverYield)
        .unwrap_err();
    assert!(matches!(
        error.kind(),
        RuntimeErrorKind::Internal(InternalError::NotResumable(name)) if name == "plain"
    ));
}

#[test]
fn calls_start_from_any_callable() {
    let program = compile(&sum_program());
    let target = Value::Function(Callable::Compiled(program.main));
    let values = new_call(Arc::clone(&program), target, vec![Value::Int(5)])
        .run_to_completion(&mut NeverYield)
        .unwrap();
    assert_eq!(values, vec![Value::Int(10)]);

    let error = new_call(program, Value::Int(3), vec![])
        .run_to_completion(&mut NeverYield)
        .unwrap_err();
    assert_eq!(error.to_string(), "attempt to call a number value");
}
