// src/engine/runner.rs

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{Condition, ScopeId, TaskId, TaskKind, TaskResult, Verdict, evaluate};
use crate::engine::context::{LogSink, TaskContext};
use crate::engine::process::{Process, ProcessOutcome, ProcessRegistry, ProcessStatus};
use crate::engine::value::{Value, ValueExpr, Variables};
use crate::errors::{JobdagError, Result};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Knobs shared by every process execution of an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Longest single nap of an ON SCHEDULE loop while waiting for the next
    /// occurrence.
    pub sleep_granularity: Duration,
    /// Also collect task log messages here.
    pub log_sink: Option<LogSink>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sleep_granularity: Duration::from_secs(1),
            log_sink: None,
        }
    }
}

/// Executes processes from a registry.
#[derive(Debug, Clone)]
pub struct Engine {
    processes: Arc<ProcessRegistry>,
    settings: Arc<EngineSettings>,
}

impl Engine {
    pub fn new(processes: Arc<ProcessRegistry>) -> Self {
        Self::with_settings(processes, EngineSettings::default())
    }

    pub fn with_settings(processes: Arc<ProcessRegistry>, settings: EngineSettings) -> Self {
        Self {
            processes,
            settings: Arc::new(settings),
        }
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run the registered process `name` to completion.
    pub async fn run(
        &self,
        name: &str,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<ProcessOutcome> {
        let process = self
            .processes
            .get(name)
            .ok_or_else(|| JobdagError::ProcessNotFound(name.to_string()))?;
        Ok(self.execute(process, args, Variables::new(), cancel).await)
    }

    /// Run `process` with initial variables `vars`.
    ///
    /// Cancelling `cancel` stops the process as if a STOP task had run.
    pub async fn execute(
        &self,
        process: Arc<Process>,
        args: Vec<Value>,
        vars: Variables,
        cancel: CancellationToken,
    ) -> ProcessOutcome {
        ProcessRun::new(self.clone(), process, args, vars, cancel)
            .execute()
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    None,
    Break,
    Stop,
}

/// Result of one task body, before it is recorded.
#[derive(Debug, Clone)]
pub(crate) struct TaskOutcome {
    pub result: TaskResult,
    pub signal: Signal,
    pub message: Option<String>,
}

impl TaskOutcome {
    pub fn of(result: TaskResult) -> Self {
        Self {
            result,
            signal: Signal::None,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result: TaskResult::Failed,
            signal: Signal::None,
            message: Some(message.into()),
        }
    }

    pub fn stop(message: impl Into<String>) -> Self {
        Self {
            result: TaskResult::Stopped,
            signal: Signal::Stop,
            message: Some(message.into()),
        }
    }

    pub fn brk() -> Self {
        Self {
            result: TaskResult::Broken,
            signal: Signal::Break,
            message: None,
        }
    }
}

/// How one pass over a scope ended.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScopeOutcome {
    pub broke: bool,
    /// Set when a task failed and no FAILS successor handled it.
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    result: TaskResult,
    message: Option<String>,
}

pub(crate) struct AsyncLaunch {
    pub process: String,
    pub into: Option<String>,
    pub handle: JoinHandle<ProcessOutcome>,
}

/// State of one process execution.
pub(crate) struct ProcessRun {
    pub engine: Engine,
    pub process: Arc<Process>,
    pub args: Vec<Value>,
    pub vars: Variables,
    pub cancel: CancellationToken,
    stop_raised: AtomicBool,
    slots: Mutex<Vec<Slot>>,
    return_value: Mutex<Option<Value>>,
    first_message: Mutex<Option<String>>,
    launches: Mutex<HashMap<TaskId, Vec<AsyncLaunch>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProcessRun {
    pub fn new(
        engine: Engine,
        process: Arc<Process>,
        args: Vec<Value>,
        vars: Variables,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let slots = vec![Slot::default(); process.graph().len()];
        Arc::new(Self {
            engine,
            process,
            args,
            vars,
            cancel,
            stop_raised: AtomicBool::new(false),
            slots: Mutex::new(slots),
            return_value: Mutex::new(None),
            first_message: Mutex::new(None),
            launches: Mutex::new(HashMap::new()),
        })
    }

    pub async fn execute(self: Arc<Self>) -> ProcessOutcome {
        let name = self.process.name().to_string();
        info!(process = %name, args = self.args.len(), "process started");

        let root = self.process.graph().root();
        let scope = Arc::clone(&self).run_scope(root, self.cancel.clone()).await;

        let stopped = self.stop_raised.load(Ordering::SeqCst) || self.cancel.is_cancelled();
        let status = if stopped {
            self.orphan_unfinished();
            ProcessStatus::Stopped
        } else if scope.failure.is_some() {
            ProcessStatus::Failed
        } else {
            ProcessStatus::Succeeded
        };

        let unjoined: usize = lock(&self.launches).values().map(Vec::len).sum();
        if unjoined > 0 {
            debug!(process = %name, unjoined, "asynchronous launches left running");
        }

        let message = lock(&self.first_message).clone().or(scope.failure);
        match status {
            ProcessStatus::Succeeded => info!(process = %name, "process succeeded"),
            ProcessStatus::Failed => warn!(process = %name, message = ?message, "process failed"),
            ProcessStatus::Stopped => info!(process = %name, "process stopped"),
        }

        let graph = self.process.graph();
        let results = {
            let slots = lock(&self.slots);
            graph
                .tasks()
                .map(|node| (graph.path_of(node.id), slots[node.id.index()].result))
                .collect()
        };
        let return_value = lock(&self.return_value).clone();
        ProcessOutcome::new(name, status, return_value, message, results)
    }

    /// Dispatch every task of `scope` as its predecessors allow and wait for
    /// all of them to settle.
    ///
    /// Tasks of this pass run under a child of `cancel`; a BREAK cancels it,
    /// so siblings still in flight unwind as orphans.
    pub fn run_scope(
        self: Arc<Self>,
        scope: ScopeId,
        cancel: CancellationToken,
    ) -> BoxFuture<ScopeOutcome> {
        Box::pin(async move {
            let pass = cancel.child_token();
            let graph = self.process.graph();
            let tasks = graph.tasks_in(scope);

            let mut ready = Vec::new();
            let mut orphans = Vec::new();
            for &id in tasks {
                match self.verdict(id) {
                    Verdict::Ready => ready.push(id),
                    Verdict::Orphaned => orphans.push(id),
                    Verdict::Waiting => {}
                }
            }
            self.settle(orphans, &mut ready);

            let mut in_flight: JoinSet<(TaskId, TaskOutcome)> = JoinSet::new();
            let mut broke = false;

            loop {
                let halted = broke || pass.is_cancelled();
                for id in ready.drain(..) {
                    if halted || self.result(id) != TaskResult::NotRun {
                        continue;
                    }
                    self.set_result(id, TaskResult::Running);
                    let run = Arc::clone(&self);
                    let token = pass.clone();
                    in_flight.spawn(async move {
                        // Inner spawn keeps the id even if the task panics.
                        let outcome = match tokio::spawn(run.run_task(id, token)).await {
                            Ok(outcome) => outcome,
                            Err(err) => TaskOutcome::failed(format!("task panicked: {err}")),
                        };
                        (id, outcome)
                    });
                }

                let Some(joined) = in_flight.join_next().await else {
                    break;
                };
                let (id, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(err) => {
                        error!(error = %err, "task supervisor failed");
                        continue;
                    }
                };

                self.record(id, &outcome);
                match outcome.signal {
                    Signal::Stop => self.raise_stop(),
                    Signal::Break => {
                        broke = true;
                        pass.cancel();
                    }
                    Signal::None => {}
                }

                let mut orphans = Vec::new();
                for &dep in &graph.task(id).dependents {
                    if self.result(dep) != TaskResult::NotRun {
                        continue;
                    }
                    match self.verdict(dep) {
                        Verdict::Ready => ready.push(dep),
                        Verdict::Orphaned => orphans.push(dep),
                        Verdict::Waiting => {}
                    }
                }
                self.settle(orphans, &mut ready);
            }

            for &id in tasks {
                if !self.result(id).is_terminal() {
                    self.set_result(id, TaskResult::Orphaned);
                }
            }

            let failure = {
                let slots = lock(&self.slots);
                tasks
                    .iter()
                    .copied()
                    .find(|&id| {
                        slots[id.index()].result == TaskResult::Failed
                            && !self.failure_handled(&slots, id)
                    })
                    .map(|id| {
                        slots[id.index()]
                            .message
                            .clone()
                            .unwrap_or_else(|| format!("task '{}' failed", graph.path_of(id)))
                    })
            };

            ScopeOutcome { broke, failure }
        })
    }

    fn run_task(
        self: Arc<Self>,
        id: TaskId,
        cancel: CancellationToken,
    ) -> BoxFuture<TaskOutcome> {
        Box::pin(async move {
            let graph = self.process.graph();
            let node = graph.task(id);
            let path = graph.path_of(id);
            let ctx = TaskContext::new(Arc::clone(&self), id, cancel);

            if let Some(guard) = &node.guard {
                match ctx.eval(guard) {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(task = %path, "guard is false; skipping");
                        return TaskOutcome::of(TaskResult::Skipped);
                    }
                    Err(err) => return TaskOutcome::failed(err.to_string()),
                }
            }

            debug!(
                process = %self.process.name(),
                task = %path,
                kind = node.kind.label(),
                "task started"
            );

            let outcome = match &node.kind {
                TaskKind::Action(action) => {
                    tokio::select! {
                        biased;
                        _ = ctx.cancellation().cancelled() => TaskOutcome::of(TaskResult::Orphaned),
                        res = action.run(&ctx) => match res {
                            Ok(()) => TaskOutcome::of(TaskResult::Succeeded),
                            Err(err) => TaskOutcome::failed(err.to_string()),
                        },
                    }
                }
                TaskKind::Fail(message) => {
                    let message = render(&ctx, message);
                    warn!(task = %path, "{message}");
                    TaskOutcome::failed(message)
                }
                TaskKind::Stop(message) => {
                    let message = message.as_ref().map(|m| render(&ctx, m));
                    if let Some(message) = &message {
                        ctx.log(message);
                    }
                    ctx.log("stopping");
                    TaskOutcome::stop(message.unwrap_or_else(|| format!("stopped by '{path}'")))
                }
                TaskKind::Break(message) => {
                    if let Some(message) = message {
                        ctx.log(&render(&ctx, message));
                    }
                    ctx.log("breaking");
                    TaskOutcome::brk()
                }
                TaskKind::Group
                | TaskKind::While(_)
                | TaskKind::For { .. }
                | TaskKind::OnSchedule(_) => self.run_scoped(&ctx, node).await,
                TaskKind::Process {
                    name,
                    args,
                    invocation,
                } => self.invoke(&ctx, name, args, invocation).await,
                TaskKind::WaitForAsync => self.wait_for_async(&ctx).await,
                TaskKind::Return(value) => match ctx.eval(value) {
                    Ok(value) => {
                        debug!(task = %path, value = %value, "return value set");
                        *lock(&self.return_value) = Some(value);
                        TaskOutcome::of(TaskResult::Succeeded)
                    }
                    Err(err) => TaskOutcome::failed(err.to_string()),
                },
            };

            debug!(task = %path, result = %outcome.result, "task finished");
            outcome
        })
    }

    fn verdict(&self, id: TaskId) -> Verdict {
        let node = self.process.graph().task(id);
        let slots = lock(&self.slots);
        evaluate(
            node.combinator,
            node.predecessors
                .iter()
                .map(|p| (slots[p.task.index()].result, p.condition)),
        )
    }

    /// Mark `orphans` as orphaned and re-evaluate their dependents until
    /// nothing changes. Dependents that become ready are added to `ready`.
    fn settle(&self, mut orphans: Vec<TaskId>, ready: &mut Vec<TaskId>) {
        let graph = self.process.graph();
        while let Some(id) = orphans.pop() {
            if self.result(id) != TaskResult::NotRun {
                continue;
            }
            self.set_result(id, TaskResult::Orphaned);
            debug!(task = %graph.path_of(id), "task orphaned");

            for &dep in &graph.task(id).dependents {
                if self.result(dep) != TaskResult::NotRun {
                    continue;
                }
                match self.verdict(dep) {
                    Verdict::Ready => ready.push(dep),
                    Verdict::Orphaned => orphans.push(dep),
                    Verdict::Waiting => {}
                }
            }
        }
    }

    /// A failure counts as handled once a FAILS successor of it has run.
    fn failure_handled(&self, slots: &[Slot], id: TaskId) -> bool {
        let graph = self.process.graph();
        graph.task(id).dependents.iter().any(|&dep| {
            let node = graph.task(dep);
            let ran = !matches!(
                slots[dep.index()].result,
                TaskResult::NotRun | TaskResult::Orphaned
            );
            ran && node
                .predecessors
                .iter()
                .any(|p| p.task == id && p.condition == Condition::Fails)
        })
    }

    pub(crate) fn result(&self, id: TaskId) -> TaskResult {
        lock(&self.slots)[id.index()].result
    }

    fn set_result(&self, id: TaskId, result: TaskResult) {
        lock(&self.slots)[id.index()].result = result;
    }

    fn record(&self, id: TaskId, outcome: &TaskOutcome) {
        {
            let mut slots = lock(&self.slots);
            let slot = &mut slots[id.index()];
            slot.result = outcome.result;
            slot.message = outcome.message.clone();
        }
        if matches!(outcome.result, TaskResult::Failed | TaskResult::Stopped) {
            let mut first = lock(&self.first_message);
            if first.is_none() {
                *first = outcome.message.clone();
            }
        }
    }

    /// Forget the results of every task under `scope` before a new iteration.
    pub(crate) fn reset_scope(&self, scope: ScopeId) {
        let ids = self.process.graph().subtree(scope);
        let mut slots = lock(&self.slots);
        for id in ids {
            slots[id.index()] = Slot::default();
        }
    }

    fn raise_stop(&self) {
        if !self.stop_raised.swap(true, Ordering::SeqCst) {
            info!(process = %self.process.name(), "process stopping");
        }
        self.cancel.cancel();
    }

    fn orphan_unfinished(&self) {
        for slot in lock(&self.slots).iter_mut() {
            if !slot.result.is_terminal() {
                slot.result = TaskResult::Orphaned;
            }
        }
    }

    pub(crate) fn error_message_for(&self, id: TaskId) -> Option<String> {
        let graph = self.process.graph();
        let slots = lock(&self.slots);
        let mut current = Some(id);
        while let Some(task) = current {
            let node = graph.task(task);
            for pred in &node.predecessors {
                let slot = &slots[pred.task.index()];
                if slot.result == TaskResult::Failed && slot.message.is_some() {
                    return slot.message.clone();
                }
            }
            current = node.parent;
        }
        None
    }

    pub(crate) fn launches(&self) -> MutexGuard<'_, HashMap<TaskId, Vec<AsyncLaunch>>> {
        lock(&self.launches)
    }
}

fn render(ctx: &TaskContext, message: &ValueExpr) -> String {
    match ctx.eval(message) {
        Ok(value) => value.to_string(),
        Err(err) => err.to_string(),
    }
}
