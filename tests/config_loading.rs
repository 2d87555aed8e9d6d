// tests/config_loading.rs

use std::io::Write;

use tempfile::NamedTempFile;

use jobdag::calendar::ScheduleError;
use jobdag::config::{load_and_validate, load_properties};
use jobdag::dag::{BuildError, TaskKind};
use jobdag::engine::Value;
use jobdag::errors::JobdagError;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

const FULL: &str = r#"
[config]
sleep_granularity_ms = 250
close_timeout_secs = 10

[[schedule.nightly]]
date = { kind = "recurring", unit = "days", start = "2026-01-01" }
time = { kind = "once", time = "02:00:00" }

[[schedule.nightly]]
date = { kind = "logical_day_of_month", ordinal = 0, day = "weekday", start = "2026-01-01" }
time = { kind = "recurring", unit = "hours", every = 6, start = "00:00:00", end = "23:00:00" }

[[schedule.boot]]
immediate = true

[process.add]
[[process.add.task]]
kind = "return"
value = "9"

[process.etl]
[[process.etl.task]]
name = "extract"
kind = "command"
cmd = "echo extract"

[[process.etl.task]]
name = "report"
kind = "log"
after = "extract FAILS"
message = "extract failed"

[[process.etl.task]]
name = "load"
kind = "group"
after = "extract SUCCEEDS"

[[process.etl.task.tasks]]
name = "sum"
kind = "process"
process = "add"
args = ["4", "5"]
into = "total"
async = true

[[process.etl.task.tasks]]
name = "wait"
kind = "waitfor_async"

[[process.etl.task.tasks]]
kind = "return"
value = "done"

[job.nightly_etl]
process = "etl"
args = ["x", "42"]
schedules = ["nightly"]

[job.paused]
process = "add"
enabled = false
schedules = ["boot"]
"#;

#[test]
fn full_config_builds_schedules_processes_and_jobs() {
    let file = write_config(FULL);
    let cfg = load_and_validate(file.path()).expect("config should load");

    assert_eq!(cfg.config.sleep_granularity_ms, 250);
    assert_eq!(cfg.config.close_timeout_secs, 10);
    assert_eq!(cfg.config.join_timeout_secs, 5);

    assert_eq!(cfg.schedules.len(), 2);
    assert_eq!(cfg.schedules["nightly"].schedules().len(), 2);
    assert!(cfg.schedules["boot"].is_immediate());
    assert!(!cfg.schedules["nightly"].is_immediate());

    assert_eq!(cfg.processes.len(), 2);
    let etl = cfg.processes.get("etl").unwrap();
    let graph = etl.graph();
    assert_eq!(graph.len(), 6);
    let sum = graph.find("load/sum").unwrap();
    assert!(graph.task(sum).kind.is_async_launch());
    assert!(matches!(
        graph.task(graph.find("load/wait").unwrap()).kind,
        TaskKind::WaitForAsync
    ));
    assert!(graph.find("load/#3").is_some());

    assert_eq!(cfg.jobs.len(), 2);
    let nightly = cfg.jobs.iter().find(|j| j.name == "nightly_etl").unwrap();
    assert_eq!(nightly.args, vec!["x".to_string(), "42".to_string()]);
    assert!(nightly.enabled);
    let paused = cfg.jobs.iter().find(|j| j.name == "paused").unwrap();
    assert!(!paused.enabled);
}

#[test]
fn config_without_processes_is_rejected() {
    let file = write_config("[config]\nsleep_granularity_ms = 100\n");
    match load_and_validate(file.path()) {
        Err(JobdagError::ConfigError(msg)) => assert!(msg.contains("at least one")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn zero_sleep_granularity_is_rejected() {
    let file = write_config(
        r#"
[config]
sleep_granularity_ms = 0

[process.p]
[[process.p.task]]
kind = "log"
message = "x"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(JobdagError::ConfigError(_))
    ));
}

#[test]
fn unknown_predecessor_is_a_build_error() {
    let file = write_config(
        r#"
[process.p]
[[process.p.task]]
name = "A"
kind = "log"
message = "a"
after = "Ghost SUCCEEDS"
"#,
    );
    match load_and_validate(file.path()) {
        Err(JobdagError::Build { process, source }) => {
            assert_eq!(process, "p");
            assert_eq!(
                source,
                BuildError::UnknownPredecessor {
                    task: "A".to_string(),
                    predecessor: "Ghost".to_string()
                }
            );
        }
        other => panic!("expected Build error, got {other:?}"),
    }
}

#[test]
fn break_at_process_level_is_a_build_error() {
    let file = write_config(
        r#"
[process.p]
[[process.p.task]]
name = "Out"
kind = "break"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(JobdagError::Build {
            source: BuildError::BreakOutsideLoop { .. },
            ..
        })
    ));
}

#[test]
fn ambiguous_waitfor_is_a_build_error() {
    let file = write_config(
        r#"
[process.child]
[[process.child.task]]
kind = "log"
message = "child"

[process.p]
[[process.p.task]]
name = "L1"
kind = "process"
process = "child"
async = true

[[process.p.task]]
name = "L2"
kind = "process"
process = "child"
async = true

[[process.p.task]]
name = "Either"
kind = "log"
message = "either"
after = "L1 OR L2"

[[process.p.task]]
name = "Wait"
kind = "waitfor_async"
after = "Either"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(JobdagError::Build {
            source: BuildError::AmbiguousWaitFor { .. },
            ..
        })
    ));
}

#[test]
fn invalid_schedule_names_the_schedule() {
    let file = write_config(
        r#"
[[schedule.broken]]
date = { kind = "recurring", unit = "days", every = 0, start = "2026-01-01" }
time = { kind = "once", time = "01:00:00" }

[process.p]
[[process.p.task]]
kind = "log"
message = "x"
"#,
    );
    match load_and_validate(file.path()) {
        Err(JobdagError::Schedule { name, source }) => {
            assert_eq!(name, "broken");
            assert_eq!(source, ScheduleError::ZeroFrequency);
        }
        other => panic!("expected Schedule error, got {other:?}"),
    }
}

#[test]
fn unknown_weekday_is_reported() {
    let file = write_config(
        r#"
[[schedule.weekly]]
date = { kind = "days_of_week", days = ["Mon", "Funday"], start = "2026-01-01" }
time = { kind = "once", time = "01:00:00" }

[process.p]
[[process.p.task]]
kind = "log"
message = "x"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(JobdagError::Schedule {
            source: ScheduleError::UnknownDay(_),
            ..
        })
    ));
}

#[test]
fn dangling_references_are_config_errors() {
    let unknown_job_process = write_config(
        r#"
[process.p]
[[process.p.task]]
kind = "log"
message = "x"

[job.j]
process = "nope"
"#,
    );
    match load_and_validate(unknown_job_process.path()) {
        Err(JobdagError::ConfigError(msg)) => assert!(msg.contains("unknown process 'nope'")),
        other => panic!("expected ConfigError, got {other:?}"),
    }

    let unknown_job_schedule = write_config(
        r#"
[process.p]
[[process.p.task]]
kind = "log"
message = "x"

[job.j]
process = "p"
schedules = ["never_defined"]
"#,
    );
    match load_and_validate(unknown_job_schedule.path()) {
        Err(JobdagError::ConfigError(msg)) => assert!(msg.contains("never_defined")),
        other => panic!("expected ConfigError, got {other:?}"),
    }

    let unknown_invoked = write_config(
        r#"
[process.p]
[[process.p.task]]
kind = "process"
process = "ghost"
"#,
    );
    match load_and_validate(unknown_invoked.path()) {
        Err(JobdagError::ConfigError(msg)) => assert!(msg.contains("ghost")),
        other => panic!("expected ConfigError, got {other:?}"),
    }
}

#[test]
fn unknown_task_kind_is_a_toml_error() {
    let file = write_config(
        r#"
[process.p]
[[process.p.task]]
kind = "teleport"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(JobdagError::TomlError(_))
    ));
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(matches!(
        load_and_validate("/definitely/not/here/Jobdag.toml"),
        Err(JobdagError::IoError(_))
    ));
}

#[test]
fn properties_are_read_as_scalars() {
    let file = write_config(
        r#"
name = "nightly"
retries = 3
ratio = 0.5
verbose = true
"#,
    );
    let mut props = load_properties(file.path()).unwrap();
    props.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(
        props,
        vec![
            ("name".to_string(), Value::Text("nightly".to_string())),
            ("ratio".to_string(), Value::Float(0.5)),
            ("retries".to_string(), Value::Int(3)),
            ("verbose".to_string(), Value::Bool(true)),
        ]
    );
}
