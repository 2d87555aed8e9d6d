// tests/engine_control_flow.rs

use std::error::Error;
use std::time::Duration;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use jobdag::actions::LogAction;
use jobdag::calendar::{DateSchedule, Schedule, ScheduleSet, TimeSchedule};
use jobdag::dag::{Invocation, TaskKind, TaskResult, TaskSpec};
use jobdag::engine::{BoolExpr, ProcessStatus, StaticRows, Value, ValueExpr};
use jobdag::errors::JobdagError;
use jobdag_test_utils::builders::{act, engine, int_below, process};
use jobdag_test_utils::fake_actions::{
    ErrorMessageProbe, FailingAction, IncrementAction, RecordingLog, ResultWatcher,
    SleepAction,
};
use jobdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn log(name: &str, message: &str) -> TaskSpec {
    act(name, LogAction::text(message))
}

#[tokio::test]
async fn and_predecessor_orphans_when_one_side_fails() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    // B looks at C just before it finishes itself.
    let watcher = ResultWatcher::new(Duration::from_millis(100), "C");
    let main = process(
        "main",
        vec![
            log("Start", "start"),
            act("A", FailingAction::new("A broke")).after("Start"),
            act("B", watcher.clone()).after("Start"),
            act("C", recorder.action("C")).after("A SUCCEEDS AND B SUCCEEDS"),
        ],
    );
    let (engine, _sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.result_of("A"), Some(TaskResult::Failed));
    assert_eq!(outcome.result_of("B"), Some(TaskResult::Succeeded));
    assert_eq!(outcome.result_of("C"), Some(TaskResult::Orphaned));
    // Orphaned as soon as A failed, while B was still running.
    assert_eq!(watcher.seen(), vec![Some(TaskResult::Orphaned)]);
    assert!(recorder.entries().is_empty());
    assert_eq!(outcome.status, ProcessStatus::Failed);
    assert_eq!(outcome.message.as_deref(), Some("A broke"));
    Ok(())
}

#[tokio::test]
async fn or_predecessor_runs_on_first_success() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    let main = process(
        "main",
        vec![
            log("Start", "start"),
            act("A", FailingAction::new("A broke")).after("Start"),
            act("B", recorder.action("B")).after("Start"),
            act("C", recorder.action("C")).after("A SUCCEEDS OR B SUCCEEDS"),
            act("Handler", recorder.action("Handler")).after("A FAILS"),
        ],
    );
    let (engine, _sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.result_of("C"), Some(TaskResult::Succeeded));
    assert_eq!(recorder.count("C"), 1);
    assert_eq!(recorder.count("Handler"), 1);
    // The FAILS successor handled A, so the process still succeeds.
    assert_eq!(outcome.status, ProcessStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn or_predecessor_orphans_when_every_side_fails() -> TestResult {
    init_tracing();
    let main = process(
        "main",
        vec![
            log("Start", "start"),
            act("A", FailingAction::new("A broke")).after("Start"),
            act("B", FailingAction::new("B broke")).after("Start"),
            log("C", "never").after("A SUCCEEDS OR B SUCCEEDS"),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.result_of("C"), Some(TaskResult::Orphaned));
    assert_eq!(sink.lines(), vec!["start".to_string()]);
    assert_eq!(outcome.status, ProcessStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn break_unwinds_siblings_still_running() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    let main = process(
        "main",
        vec![
            TaskSpec::named("Loop", TaskKind::While(BoolExpr::constant(true))).children([
                log("Start", "start"),
                act(
                    "Slow",
                    SleepAction::new(Duration::from_secs(30)).recording(&recorder, "slow done"),
                )
                .after("Start"),
                TaskSpec::named("Breaker", TaskKind::Break(None)).after("Start"),
            ]),
            log("LogAfter", "After"),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.result_of("Loop/Breaker"), Some(TaskResult::Broken));
    assert_eq!(outcome.result_of("Loop/Slow"), Some(TaskResult::Orphaned));
    assert_eq!(outcome.result_of("Loop"), Some(TaskResult::Succeeded));
    assert_eq!(outcome.result_of("LogAfter"), Some(TaskResult::Succeeded));
    assert!(recorder.entries().is_empty());
    assert_eq!(
        sink.lines(),
        vec!["start".to_string(), "breaking".to_string(), "After".to_string()]
    );
    assert_eq!(outcome.status, ProcessStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn break_ends_the_loop_after_the_current_iteration() -> TestResult {
    init_tracing();
    let main = process(
        "main",
        vec![
            TaskSpec::named("Loop", TaskKind::While(BoolExpr::constant(true))).children([
                TaskSpec::named(
                    "Breaker",
                    TaskKind::Break(Some(ValueExpr::text("Breaker says bye"))),
                ),
                log("NonBreaker", "NonBreaker"),
                log("AfterNonBreaker", "AfterNonBreaker").after("NonBreaker"),
            ]),
            log("LogAfter", "After"),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(
        sink.lines(),
        vec![
            "Breaker says bye".to_string(),
            "breaking".to_string(),
            "After".to_string()
        ]
    );
    assert_eq!(outcome.result_of("Loop"), Some(TaskResult::Succeeded));
    assert_eq!(outcome.result_of("Loop/Breaker"), Some(TaskResult::Broken));
    assert_eq!(outcome.result_of("Loop/NonBreaker"), Some(TaskResult::Orphaned));
    assert_eq!(outcome.result_of("Loop/AfterNonBreaker"), Some(TaskResult::Orphaned));
    assert_eq!(outcome.result_of("LogAfter"), Some(TaskResult::Succeeded));
    assert_eq!(outcome.status, ProcessStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn stop_orphans_everything_and_stops_the_process() -> TestResult {
    init_tracing();
    let main = process(
        "main",
        vec![
            log("LogBefore", "Before"),
            TaskSpec::named("Stopper", TaskKind::Stop(Some(ValueExpr::text("Middle")))),
            log("LogAfter", "After"),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(
        sink.lines(),
        vec![
            "Before".to_string(),
            "Middle".to_string(),
            "stopping".to_string()
        ]
    );
    assert_eq!(outcome.result_of("Stopper"), Some(TaskResult::Stopped));
    assert_eq!(outcome.result_of("LogAfter"), Some(TaskResult::Orphaned));
    assert_eq!(outcome.status, ProcessStatus::Stopped);
    assert_eq!(outcome.message.as_deref(), Some("Middle"));
    Ok(())
}

#[tokio::test]
async fn nested_stop_cancels_running_siblings() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    let main = process(
        "main",
        vec![
            log("Start", "start"),
            act(
                "Slow",
                SleepAction::new(Duration::from_secs(30)).recording(&recorder, "slow done"),
            )
            .after("Start"),
            TaskSpec::named("Block", TaskKind::Group)
                .after("Start")
                .child(TaskSpec::named("Halt", TaskKind::Stop(None))),
        ],
    );
    let (engine, _sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.status, ProcessStatus::Stopped);
    assert_eq!(outcome.result_of("Block/Halt"), Some(TaskResult::Stopped));
    assert_eq!(outcome.result_of("Slow"), Some(TaskResult::Orphaned));
    assert!(recorder.entries().is_empty());
    Ok(())
}

#[tokio::test]
async fn cancelling_from_outside_stops_the_process() -> TestResult {
    init_tracing();
    let main = process(
        "main",
        vec![act("Slow", SleepAction::new(Duration::from_secs(30)))],
    );
    let (engine, _sink) = engine(vec![main]);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = with_timeout(engine.run("main", vec![], cancel)).await?;
    assert_eq!(outcome.status, ProcessStatus::Stopped);
    assert_eq!(outcome.result_of("Slow"), Some(TaskResult::Orphaned));
    Ok(())
}

#[tokio::test]
async fn error_message_comes_from_the_failed_predecessor() -> TestResult {
    init_tracing();
    let direct = ErrorMessageProbe::new();
    let nested = ErrorMessageProbe::new();
    let main = process(
        "main",
        vec![
            TaskSpec::named("Explode", TaskKind::Fail(ValueExpr::text("disk full"))),
            act("Direct", direct.clone()).after("Explode FAILS"),
            TaskSpec::named("Cleanup", TaskKind::Group)
                .after("Explode FAILS")
                .child(act("Nested", nested.clone())),
        ],
    );
    let (engine, _sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(direct.seen(), vec![Some("disk full".to_string())]);
    assert_eq!(nested.seen(), vec![Some("disk full".to_string())]);
    assert_eq!(outcome.status, ProcessStatus::Succeeded);
    Ok(())
}

#[tokio::test]
async fn sync_process_hands_back_its_return_value() -> TestResult {
    init_tracing();
    let double = process(
        "double",
        vec![TaskSpec::named(
            "Ret",
            TaskKind::Return(ValueExpr::new(|ctx| {
                let n = ctx.arg(0).and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(n * 2))
            })),
        )],
    );
    let main = process(
        "main",
        vec![
            TaskSpec::named(
                "Call",
                TaskKind::Process {
                    name: "double".to_string(),
                    args: vec![ValueExpr::constant(Value::Int(21))],
                    invocation: Invocation::Sync {
                        into: Some("answer".to_string()),
                    },
                },
            ),
            TaskSpec::named("Ret", TaskKind::Return(ValueExpr::var("answer"))),
            log("Still", "still running"),
        ],
    );
    let (engine, sink) = engine(vec![double, main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.return_value, Some(Value::Int(42)));
    // RETURN does not end the process.
    assert_eq!(sink.lines(), vec!["still running".to_string()]);
    assert!(outcome.succeeded());
    Ok(())
}

#[tokio::test]
async fn sync_process_failure_and_stop_reach_the_caller() -> TestResult {
    init_tracing();
    let broken = process(
        "broken",
        vec![TaskSpec::named("F", TaskKind::Fail(ValueExpr::text("inner failure")))],
    );
    let halting = process("halting", vec![TaskSpec::named("S", TaskKind::Stop(None))]);
    let call = |name: &str, target: &str| {
        TaskSpec::named(
            name,
            TaskKind::Process {
                name: target.to_string(),
                args: Vec::new(),
                invocation: Invocation::Sync { into: None },
            },
        )
    };
    let fails = process("fails", vec![call("Call", "broken")]);
    let stops = process("stops", vec![call("Call", "halting"), log("Next", "next")]);
    let (engine, sink) = engine(vec![broken, halting, fails, stops]);

    let failed = with_timeout(engine.run("fails", vec![], CancellationToken::new())).await?;
    assert_eq!(failed.status, ProcessStatus::Failed);
    assert_eq!(failed.result_of("Call"), Some(TaskResult::Failed));
    assert_eq!(failed.message.as_deref(), Some("inner failure"));

    let stopped = with_timeout(engine.run("stops", vec![], CancellationToken::new())).await?;
    assert_eq!(stopped.status, ProcessStatus::Stopped);
    assert_eq!(stopped.result_of("Call"), Some(TaskResult::Stopped));
    assert_eq!(stopped.result_of("Next"), Some(TaskResult::Orphaned));
    assert!(!sink.lines().contains(&"next".to_string()));
    Ok(())
}

#[tokio::test]
async fn false_guard_skips_the_task() -> TestResult {
    init_tracing();
    let main = process(
        "main",
        vec![
            log("Guarded", "guarded").when(BoolExpr::constant(false)),
            log("Next", "next"),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(outcome.result_of("Guarded"), Some(TaskResult::Skipped));
    // A skipped task neither succeeds nor fails.
    assert_eq!(outcome.result_of("Next"), Some(TaskResult::Orphaned));
    assert!(sink.lines().is_empty());
    assert!(outcome.succeeded());
    Ok(())
}

#[tokio::test]
async fn while_loop_runs_until_its_condition_is_false() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    let main = process(
        "main",
        vec![
            TaskSpec::named("Loop", TaskKind::While(int_below("i", 3))).children([
                act("Bump", IncrementAction::new("i")),
                act("Mark", recorder.action("iteration")),
            ]),
        ],
    );
    let (engine, _sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(recorder.count("iteration"), 3);
    assert!(outcome.succeeded());
    Ok(())
}

#[tokio::test]
async fn failed_iteration_ends_the_loop() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    let main = process(
        "main",
        vec![
            TaskSpec::named("Loop", TaskKind::While(BoolExpr::constant(true))).children([
                act("Mark", recorder.action("iteration")),
                act("Boom", FailingAction::new("iteration failed")),
            ]),
            log("After", "after"),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(recorder.count("iteration"), 1);
    assert_eq!(outcome.result_of("Loop"), Some(TaskResult::Failed));
    // COMPLETES follows a failed loop too.
    assert_eq!(sink.lines(), vec!["after".to_string()]);
    assert_eq!(outcome.status, ProcessStatus::Failed);
    assert_eq!(outcome.message.as_deref(), Some("iteration failed"));
    Ok(())
}

#[tokio::test]
async fn for_loop_binds_each_row() -> TestResult {
    init_tracing();
    let rows = StaticRows::new(vec![
        vec![Value::Int(1), Value::from("one")],
        vec![Value::Int(2), Value::from("two")],
        vec![Value::Int(3), Value::from("three")],
    ]);
    let main = process(
        "main",
        vec![
            TaskSpec::named(
                "Each",
                TaskKind::For {
                    vars: vec!["n".to_string(), "word".to_string()],
                    source: std::sync::Arc::new(rows),
                },
            )
            .child(act(
                "Say",
                LogAction::new(ValueExpr::new(|ctx| {
                    let n = ctx.var("n").unwrap_or_default();
                    let word = ctx.var("word").unwrap_or_default();
                    Ok(Value::Text(format!("{n}={word}")))
                })),
            )),
        ],
    );
    let (engine, sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(
        sink.lines(),
        vec!["1=one".to_string(), "2=two".to_string(), "3=three".to_string()]
    );
    assert!(outcome.succeeded());
    Ok(())
}

#[tokio::test]
async fn immediate_only_schedule_runs_its_body_once() -> TestResult {
    init_tracing();
    let recorder = RecordingLog::new();
    let once = ScheduleSet::new(vec![
        Schedule::new(DateSchedule::once(NaiveDate::MIN), TimeSchedule::Never).with_immediate(true),
    ]);
    let main = process(
        "main",
        vec![
            TaskSpec::named("Every", TaskKind::OnSchedule(once))
                .child(act("Tick", recorder.action("tick"))),
        ],
    );
    let (engine, _sink) = engine(vec![main]);

    let outcome = with_timeout(engine.run("main", vec![], CancellationToken::new())).await?;

    assert_eq!(recorder.count("tick"), 1);
    assert!(outcome.succeeded());
    Ok(())
}

#[tokio::test]
async fn unknown_process_is_reported() -> TestResult {
    init_tracing();
    let (engine, _sink) = engine(vec![process("main", vec![log("A", "a")])]);

    let err = engine
        .run("missing", vec![], CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, JobdagError::ProcessNotFound(name) if name == "missing"));
    Ok(())
}
