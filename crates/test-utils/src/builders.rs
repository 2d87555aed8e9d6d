#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jobdag::dag::{TaskKind, TaskSpec};
use jobdag::engine::{
    Action, BoolExpr, Engine, EngineSettings, LogSink, Process, ProcessRegistry, Value,
};
use jobdag::exec::JobExecutor;
use jobdag::jobs::{JobManager, JobStore};

/// Build a process, panicking on structural errors.
pub fn process(name: &str, tasks: Vec<TaskSpec>) -> Process {
    Process::build(name, tasks).expect("process should build")
}

/// An engine over `processes` whose task log lines are collected in the
/// returned sink.
pub fn engine(processes: Vec<Process>) -> (Engine, LogSink) {
    let sink = LogSink::new();
    let registry: ProcessRegistry = processes.into_iter().collect();
    let engine = Engine::with_settings(
        Arc::new(registry),
        EngineSettings {
            log_sink: Some(sink.clone()),
            ..EngineSettings::default()
        },
    );
    (engine, sink)
}

/// Named task running `action`.
pub fn act(name: &str, action: impl Action + 'static) -> TaskSpec {
    TaskSpec::named(name, TaskKind::action(action))
}

/// `var < limit`, treating an unset variable as zero.
pub fn int_below(var: &str, limit: i64) -> BoolExpr {
    let var = var.to_string();
    BoolExpr::new(move |ctx| {
        Ok(ctx
            .var(&var)
            .and_then(|v| v.as_int())
            .unwrap_or(0)
            < limit)
    })
}

/// `var == value`.
pub fn var_is(var: &str, value: Value) -> BoolExpr {
    let var = var.to_string();
    BoolExpr::new(move |ctx| Ok(ctx.var(&var).as_ref() == Some(&value)))
}

/// A job manager over `processes` and `store`, with its own executor.
pub fn manager(processes: Vec<Process>, store: Arc<dyn JobStore>) -> (Arc<JobManager>, LogSink) {
    let sink = LogSink::new();
    let registry: Arc<ProcessRegistry> = Arc::new(processes.into_iter().collect());
    let engine = Engine::with_settings(
        Arc::clone(&registry),
        EngineSettings {
            sleep_granularity: Duration::from_millis(20),
            log_sink: Some(sink.clone()),
        },
    );
    let manager = JobManager::new(store, registry, JobExecutor::new(engine));
    (Arc::new(manager), sink)
}
