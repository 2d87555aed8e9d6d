// src/engine/process.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::dag::{BuildError, Invocation, TaskGraph, TaskResult, TaskSpec, build_graph};
use crate::engine::context::TaskContext;
use crate::engine::runner::{AsyncLaunch, ProcessRun, TaskOutcome};
use crate::engine::value::{Value, ValueExpr, Variables};

/// A named, validated task graph.
#[derive(Debug)]
pub struct Process {
    name: String,
    graph: TaskGraph,
}

impl Process {
    pub fn build(name: impl Into<String>, tasks: Vec<TaskSpec>) -> Result<Self, BuildError> {
        Ok(Self {
            name: name.into(),
            graph: build_graph(tasks)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }
}

/// Processes that can be invoked by name (by jobs and by PROCESS tasks).
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    processes: BTreeMap<String, Arc<Process>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `process`, replacing any process of the same name.
    pub fn insert(&mut self, process: Process) -> Option<Arc<Process>> {
        self.processes
            .insert(process.name().to_string(), Arc::new(process))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Process>> {
        self.processes.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl FromIterator<Process> for ProcessRegistry {
    fn from_iter<I: IntoIterator<Item = Process>>(iter: I) -> Self {
        let mut registry = Self::new();
        for process in iter {
            registry.insert(process);
        }
        registry
    }
}

/// Final state of one process execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Succeeded,
    Failed,
    Stopped,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessStatus::Succeeded => "succeeded",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Everything observable about a finished process execution.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub process: String,
    pub status: ProcessStatus,
    pub return_value: Option<Value>,
    /// First failure or stop message, if any.
    pub message: Option<String>,
    results: Vec<(String, TaskResult)>,
}

impl ProcessOutcome {
    pub(crate) fn new(
        process: String,
        status: ProcessStatus,
        return_value: Option<Value>,
        message: Option<String>,
        results: Vec<(String, TaskResult)>,
    ) -> Self {
        Self {
            process,
            status,
            return_value,
            message,
            results,
        }
    }

    /// Last recorded result of the task at `path` (see
    /// [`TaskGraph::path_of`](crate::dag::TaskGraph::path_of)).
    pub fn result_of(&self, path: &str) -> Option<TaskResult> {
        self.results
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, r)| *r)
    }

    /// `(path, result)` for every task, in graph order.
    pub fn results(&self) -> &[(String, TaskResult)] {
        &self.results
    }

    pub fn succeeded(&self) -> bool {
        self.status == ProcessStatus::Succeeded
    }
}

impl ProcessRun {
    /// PROCESS and PROCESS ASYNC tasks.
    pub(crate) async fn invoke(
        self: &Arc<Self>,
        ctx: &TaskContext,
        name: &str,
        args: &[ValueExpr],
        invocation: &Invocation,
    ) -> TaskOutcome {
        let Some(process) = self.engine.processes().get(name) else {
            return TaskOutcome::failed(format!("unknown process '{name}'"));
        };
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            match ctx.eval(arg) {
                Ok(value) => values.push(value),
                Err(err) => return TaskOutcome::failed(err.to_string()),
            }
        }

        // Synchronous calls unwind with the calling scope; asynchronous
        // launches outlive it and only stop with the whole process.
        let token = match invocation {
            Invocation::Sync { .. } => ctx.cancellation().child_token(),
            Invocation::Async { .. } => self.cancel.child_token(),
        };
        let child = ProcessRun::new(self.engine.clone(), process, values, Variables::new(), token);

        match invocation {
            Invocation::Sync { into } => {
                let outcome = child.execute().await;
                if let (Some(var), Some(value)) = (into, outcome.return_value.clone()) {
                    self.vars.set(var.clone(), value);
                }
                match outcome.status {
                    ProcessStatus::Succeeded => TaskOutcome::of(TaskResult::Succeeded),
                    ProcessStatus::Failed => TaskOutcome::failed(
                        outcome
                            .message
                            .unwrap_or_else(|| format!("process '{name}' failed")),
                    ),
                    ProcessStatus::Stopped if ctx.cancellation().is_cancelled() => {
                        TaskOutcome::of(TaskResult::Orphaned)
                    }
                    ProcessStatus::Stopped => TaskOutcome::stop(format!("process '{name}' stopped")),
                }
            }
            Invocation::Async { into } => {
                let handle = tokio::spawn(child.execute());
                self.launches()
                    .entry(ctx.task_id())
                    .or_default()
                    .push(AsyncLaunch {
                        process: name.to_string(),
                        into: into.clone(),
                        handle,
                    });
                debug!(task = %ctx.task_path(), process = %name, "launched asynchronously");
                TaskOutcome::of(TaskResult::Succeeded)
            }
        }
    }

    /// WAITFOR ASYNC: join every reachable launch, then publish their
    /// return values.
    pub(crate) async fn wait_for_async(self: &Arc<Self>, ctx: &TaskContext) -> TaskOutcome {
        let targets = self.process.graph().async_launches_for(ctx.task_id());
        let launches: Vec<AsyncLaunch> = {
            let mut registered = self.launches();
            targets
                .iter()
                .filter_map(|id| registered.remove(id))
                .flatten()
                .collect()
        };
        debug!(task = %ctx.task_path(), count = launches.len(), "waiting for asynchronous launches");

        let mut returns = Vec::new();
        let mut failures = Vec::new();
        for AsyncLaunch {
            process,
            into,
            handle,
        } in launches
        {
            let joined = tokio::select! {
                _ = ctx.cancellation().cancelled() => return TaskOutcome::of(TaskResult::Orphaned),
                joined = handle => joined,
            };
            match joined {
                Ok(outcome) => {
                    if outcome.status != ProcessStatus::Succeeded {
                        failures.push(format!("process '{process}' {}", outcome.status));
                    }
                    if let (Some(var), Some(value)) = (into, outcome.return_value) {
                        returns.push((var, value));
                    }
                }
                Err(err) => failures.push(format!("process '{process}' panicked: {err}")),
            }
        }

        // Return values become visible only once every launch has finished.
        for (var, value) in returns {
            self.vars.set(var, value);
        }

        if failures.is_empty() {
            TaskOutcome::of(TaskResult::Succeeded)
        } else {
            TaskOutcome::failed(failures.join("; "))
        }
    }
}
