use std::sync::{Arc, Mutex};
use std::time::Duration;

use jobdag::dag::TaskResult;
use jobdag::engine::{Action, ActionError, ActionFuture, TaskContext, Value};

/// Shared, ordered list of labels recorded by [`RecordAction`]s.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// An action that appends `label` to this log when it runs.
    pub fn action(&self, label: &str) -> RecordAction {
        RecordAction {
            label: label.to_string(),
            log: self.clone(),
        }
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.entries().iter().filter(|e| *e == label).count()
    }
}

#[derive(Debug, Clone)]
pub struct RecordAction {
    label: String,
    log: RecordingLog,
}

impl Action for RecordAction {
    fn run<'a>(&'a self, _ctx: &'a TaskContext) -> ActionFuture<'a> {
        self.log.push(self.label.clone());
        Box::pin(async { Ok(()) })
    }
}

/// Sleeps, then succeeds. Useful to keep a task in flight.
#[derive(Debug, Clone)]
pub struct SleepAction {
    duration: Duration,
    log: Option<(RecordingLog, String)>,
}

impl SleepAction {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            log: None,
        }
    }

    /// Record `label` once the sleep has finished.
    pub fn recording(mut self, log: &RecordingLog, label: &str) -> Self {
        self.log = Some((log.clone(), label.to_string()));
        self
    }
}

impl Action for SleepAction {
    fn run<'a>(&'a self, _ctx: &'a TaskContext) -> ActionFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.duration).await;
            if let Some((log, label)) = &self.log {
                log.push(label.clone());
            }
            Ok(())
        })
    }
}

/// Always fails with the given message.
#[derive(Debug, Clone)]
pub struct FailingAction {
    message: String,
}

impl FailingAction {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

impl Action for FailingAction {
    fn run<'a>(&'a self, _ctx: &'a TaskContext) -> ActionFuture<'a> {
        let err = ActionError::new(self.message.clone());
        Box::pin(async move { Err(err) })
    }
}

/// Adds one to an integer variable (unset counts as zero).
#[derive(Debug, Clone)]
pub struct IncrementAction {
    var: String,
}

impl IncrementAction {
    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

impl Action for IncrementAction {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> ActionFuture<'a> {
        let current = ctx
            .variables()
            .get(&self.var)
            .and_then(|v| v.as_int())
            .unwrap_or(0);
        ctx.variables().set(self.var.clone(), Value::Int(current + 1));
        Box::pin(async { Ok(()) })
    }
}

/// Records what `TaskContext::error_message` returned.
#[derive(Debug, Clone)]
pub struct ErrorMessageProbe {
    seen: Arc<Mutex<Vec<Option<String>>>>,
}

impl ErrorMessageProbe {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }
}

impl Default for ErrorMessageProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl Action for ErrorMessageProbe {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> ActionFuture<'a> {
        self.seen.lock().unwrap().push(ctx.error_message());
        Box::pin(async { Ok(()) })
    }
}

/// Sleeps, then records the result another task had at that moment.
#[derive(Debug, Clone)]
pub struct ResultWatcher {
    delay: Duration,
    watched: String,
    seen: Arc<Mutex<Vec<Option<TaskResult>>>>,
}

impl ResultWatcher {
    pub fn new(delay: Duration, watched: &str) -> Self {
        Self {
            delay,
            watched: watched.to_string(),
            seen: Arc::default(),
        }
    }

    pub fn seen(&self) -> Vec<Option<TaskResult>> {
        self.seen.lock().unwrap().clone()
    }
}

impl Action for ResultWatcher {
    fn run<'a>(&'a self, ctx: &'a TaskContext) -> ActionFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(ctx.result_of(&self.watched));
            Ok(())
        })
    }
}
