// tests/job_manager.rs

use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::NamedTempFile;

use jobdag::actions::LogAction;
use jobdag::calendar::{DateSchedule, Schedule, ScheduleSet, TimeSchedule};
use jobdag::engine::{Process, Value, ValueExpr};
use jobdag::errors::JobdagError;
use jobdag::exec::Monitor;
use jobdag::jobs::{Job, JobScheduler, MemoryStore, RunStatus, SchedulerSettings};
use jobdag_test_utils::builders::{act, manager, process};
use jobdag_test_utils::failing_store::SlowStore;
use jobdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Logs `<greeting> <first arg>`.
fn greet() -> Process {
    process(
        "greet",
        vec![act(
            "Say",
            LogAction::new(ValueExpr::new(|ctx| {
                let greeting = ctx.var("greeting").unwrap_or_else(|| Value::from("hi"));
                let who = ctx.arg(0).cloned().unwrap_or_default();
                Ok(Value::Text(format!("{greeting} {who}")))
            })),
        )],
    )
}

fn immediate_only() -> ScheduleSet {
    ScheduleSet::new(vec![
        Schedule::new(DateSchedule::once(NaiveDate::MIN), TimeSchedule::Never).with_immediate(true),
    ])
}

fn far_future() -> ScheduleSet {
    let date = NaiveDate::from_ymd_opt(2999, 1, 1).unwrap();
    ScheduleSet::new(vec![Schedule::new(
        DateSchedule::once(date),
        TimeSchedule::once(chrono::NaiveTime::MIN),
    )])
}

#[tokio::test]
async fn run_seeds_properties_and_arguments() -> TestResult {
    init_tracing();
    let mut props = NamedTempFile::new()?;
    writeln!(props, "greeting = \"hello\"")?;

    let mut job = Job::new("hello", "greet").with_args(["world"]);
    job.properties = Some(props.path().to_path_buf());
    let store = Arc::new(MemoryStore::with_jobs([job]));
    let (manager, sink) = manager(vec![greet()], store.clone());

    let run = manager.run("hello")?;
    // Persisted as soon as it is submitted.
    assert_eq!(
        store.run(run.id()).map(|r| r.status),
        Some(RunStatus::Running)
    );

    let done = with_timeout(manager.executor().get_completed()).await?;
    assert_eq!(done.status(), RunStatus::Succeeded);
    assert_eq!(sink.lines(), vec!["hello world".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_submission_save_never_overwrites_the_final_status() -> TestResult {
    init_tracing();
    let store = Arc::new(SlowStore::with_jobs(
        [Job::new("hello", "greet")],
        Duration::from_millis(200),
    ));
    let (manager, _sink) = manager(vec![greet()], store.clone());
    let monitor = Monitor::spawn(manager.executor().clone(), store.clone());

    let run = manager.run("hello")?;
    monitor
        .shutdown(manager.executor(), Duration::from_secs(5))
        .await;

    assert_eq!(run.status(), RunStatus::Succeeded);
    assert_eq!(
        store.run(run.id()).map(|r| r.status),
        Some(RunStatus::Succeeded)
    );
    Ok(())
}

#[tokio::test]
async fn run_ids_are_allocated_by_the_store() -> TestResult {
    init_tracing();
    let store = Arc::new(MemoryStore::with_jobs([Job::new("hello", "greet")]));
    let (manager, _sink) = manager(vec![greet()], store);

    let first = manager.run("hello")?;
    let second = manager.run("hello")?;
    assert!(second.id() > first.id());

    for _ in 0..2 {
        with_timeout(manager.executor().get_completed()).await?;
    }
    Ok(())
}

#[tokio::test]
async fn unknown_job_and_process_are_reported() -> TestResult {
    init_tracing();
    let store = Arc::new(MemoryStore::with_jobs([Job::new("orphan", "missing")]));
    let (manager, _sink) = manager(vec![greet()], store);

    assert!(matches!(
        manager.run("nope"),
        Err(JobdagError::JobNotFound(name)) if name == "nope"
    ));
    assert!(matches!(
        manager.run("orphan"),
        Err(JobdagError::ProcessNotFound(name)) if name == "missing"
    ));
    assert!(manager.list_running().is_empty());
    Ok(())
}

#[tokio::test]
async fn non_scalar_property_is_a_config_error() -> TestResult {
    init_tracing();
    let mut props = NamedTempFile::new()?;
    writeln!(props, "names = [\"a\", \"b\"]")?;

    let mut job = Job::new("hello", "greet");
    job.properties = Some(props.path().to_path_buf());
    let store = Arc::new(MemoryStore::with_jobs([job]));
    let (manager, _sink) = manager(vec![greet()], store);

    assert!(matches!(manager.run("hello"), Err(JobdagError::ConfigError(_))));
    Ok(())
}

#[tokio::test]
async fn run_scheduled_starts_only_enabled_bound_jobs() -> TestResult {
    init_tracing();
    let store = Arc::new(MemoryStore::with_jobs([
        Job::new("a", "greet").on_schedule("nightly"),
        Job::new("b", "greet").on_schedule("nightly").disabled(),
        Job::new("c", "greet").on_schedule("weekly"),
    ]));
    let (manager, _sink) = manager(vec![greet()], store);

    let runs = manager.run_scheduled("nightly")?;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].job(), "a");

    with_timeout(manager.executor().get_completed()).await?;
    Ok(())
}

#[tokio::test]
async fn immediate_schedule_fires_once_and_finishes() -> TestResult {
    init_tracing();
    let store = Arc::new(MemoryStore::with_jobs([
        Job::new("boot", "greet").with_args(["boot"]).on_schedule("startup"),
    ]));
    let (manager, sink) = manager(vec![greet()], store);
    let scheduler = JobScheduler::new(manager.clone(), SchedulerSettings::default());

    scheduler.start("startup", immediate_only());
    let done = with_timeout(manager.executor().get_completed()).await?;

    assert_eq!(done.job(), "boot");
    assert_eq!(sink.lines(), vec!["hi boot".to_string()]);

    with_timeout(async {
        while !scheduler.active().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(scheduler.stop("startup").await);
    assert!(!scheduler.stop("startup").await);
    Ok(())
}

#[tokio::test]
async fn revise_replaces_a_waiting_schedule() -> TestResult {
    init_tracing();
    let store = Arc::new(MemoryStore::with_jobs([
        Job::new("later", "greet").on_schedule("slot"),
    ]));
    let (manager, _sink) = manager(vec![greet()], store);
    let scheduler = JobScheduler::new(
        manager.clone(),
        SchedulerSettings {
            sleep_granularity: Duration::from_millis(20),
            join_timeout: Duration::from_secs(1),
        },
    );

    scheduler.start("slot", far_future());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(scheduler.active(), vec!["slot".to_string()]);
    assert!(manager.list_running().is_empty());

    with_timeout(scheduler.revise("slot", immediate_only())).await;
    let done = with_timeout(manager.executor().get_completed()).await?;
    assert_eq!(done.job(), "later");

    scheduler.stop_all();
    assert!(scheduler.active().is_empty());
    Ok(())
}
