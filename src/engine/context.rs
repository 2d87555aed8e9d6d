// src/engine/context.rs

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dag::{TaskId, TaskResult};
use crate::engine::runner::ProcessRun;
use crate::engine::value::{EvalContext, Expr, Value, Variables};
use crate::engine::ActionError;

/// Collects the messages logged by tasks, in order.
///
/// Messages always go to `tracing`; a sink is only needed by callers that
/// want to look at them afterwards.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Handle given to a running task.
#[derive(Clone)]
pub struct TaskContext {
    run: Arc<ProcessRun>,
    task: TaskId,
    cancel: CancellationToken,
}

impl TaskContext {
    pub(crate) fn new(run: Arc<ProcessRun>, task: TaskId, cancel: CancellationToken) -> Self {
        Self { run, task, cancel }
    }

    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Path of the task within its process, e.g. `Loop/Breaker`.
    pub fn task_path(&self) -> String {
        self.run.process.graph().path_of(self.task)
    }

    pub fn process_name(&self) -> &str {
        self.run.process.name()
    }

    pub fn args(&self) -> &[Value] {
        &self.run.args
    }

    pub fn variables(&self) -> &Variables {
        &self.run.vars
    }

    /// Fires when the process is stopping, or when a BREAK ends the pass
    /// over the scope this task belongs to.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Message of the nearest failed predecessor.
    ///
    /// Looks at the direct predecessors first; if none of them failed with a
    /// message, continues with the predecessors of the enclosing task, and so
    /// on up to the process level.
    pub fn error_message(&self) -> Option<String> {
        self.run.error_message_for(self.task)
    }

    /// Current result of another task of this process run, looked up by path.
    pub fn result_of(&self, path: &str) -> Option<TaskResult> {
        let id = self.run.process.graph().find(path)?;
        Some(self.run.result(id))
    }

    pub fn eval_context(&self) -> EvalContext<'_> {
        EvalContext {
            vars: &self.run.vars,
            args: &self.run.args,
        }
    }

    pub fn eval<T>(&self, expr: &Expr<T>) -> Result<T, ActionError> {
        expr.eval(&self.eval_context())
    }

    /// Log a user-facing message on behalf of this task.
    pub fn log(&self, message: &str) {
        info!(
            process = %self.process_name(),
            task = %self.task_path(),
            "{message}"
        );
        if let Some(sink) = &self.run.engine.settings().log_sink {
            sink.push(message);
        }
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("process", &self.process_name())
            .field("task", &self.task_path())
            .finish_non_exhaustive()
    }
}
