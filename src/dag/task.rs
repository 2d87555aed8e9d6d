// src/dag/task.rs

//! Task metadata: identities, predecessor conditions, kinds and results.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::calendar::ScheduleSet;
use crate::engine::{Action, BoolExpr, RowSource, ValueExpr};

/// Index of a task in its [`TaskGraph`](crate::dag::TaskGraph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Index of a scope (an ordered set of sibling tasks) in a task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) usize);

/// What a predecessor must have done for the reference to be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Condition {
    Succeeds,
    Fails,
    /// Succeeded or failed; anything else (stopped, orphaned, ...) does not count.
    #[default]
    Completes,
}

impl Condition {
    pub fn satisfied_by(self, result: TaskResult) -> bool {
        match self {
            Condition::Succeeds => result == TaskResult::Succeeded,
            Condition::Fails => result == TaskResult::Failed,
            Condition::Completes => {
                matches!(result, TaskResult::Succeeded | TaskResult::Failed)
            }
        }
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "succeeds" => Ok(Condition::Succeeds),
            "fails" => Ok(Condition::Fails),
            "completes" => Ok(Condition::Completes),
            other => Err(format!(
                "invalid condition: {other} (expected SUCCEEDS, FAILS or COMPLETES)"
            )),
        }
    }
}

/// How the predecessor references of one task are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl FromStr for Combinator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "and" => Ok(Combinator::And),
            "or" => Ok(Combinator::Or),
            other => Err(format!("invalid combinator: {other} (expected AND or OR)")),
        }
    }
}

/// Per-execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskResult {
    #[default]
    NotRun,
    Running,
    Succeeded,
    Failed,
    /// Raised STOP.
    Stopped,
    /// Raised BREAK.
    Broken,
    /// Guard evaluated false.
    Skipped,
    /// Never run because its predecessors can no longer be satisfied, or the
    /// process stopped first.
    Orphaned,
}

impl TaskResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskResult::NotRun | TaskResult::Running)
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskResult::NotRun => "not run",
            TaskResult::Running => "running",
            TaskResult::Succeeded => "succeeded",
            TaskResult::Failed => "failed",
            TaskResult::Stopped => "stopped",
            TaskResult::Broken => "broken",
            TaskResult::Skipped => "skipped",
            TaskResult::Orphaned => "orphaned",
        };
        f.write_str(s)
    }
}

/// One entry of a task's predecessor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predecessor {
    pub task: TaskId,
    pub condition: Condition,
}

/// How a sub-process is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Block until the sub-process finishes; its RETURN value lands in `into`.
    Sync { into: Option<String> },
    /// Start the sub-process and carry on; a later WAITFOR ASYNC collects it.
    Async { into: Option<String> },
}

/// What a task does when it runs.
///
/// Loop and group kinds own a child scope; everything else is a leaf.
#[derive(Debug, Clone)]
pub enum TaskKind {
    /// Opaque leaf action supplied by a collaborator.
    Action(Arc<dyn Action>),
    /// Fail locally with a message.
    Fail(ValueExpr),
    /// Stop the whole process.
    Stop(Option<ValueExpr>),
    /// Leave the innermost enclosing loop after the current iteration.
    Break(Option<ValueExpr>),
    /// Run the child scope once.
    Group,
    /// Run the child scope while the condition holds.
    While(BoolExpr),
    /// Run the child scope once per row, binding `vars` to the row's columns.
    For {
        vars: Vec<String>,
        source: Arc<dyn RowSource>,
    },
    /// Run the child scope on every occurrence of a schedule set.
    OnSchedule(ScheduleSet),
    /// Invoke another process by name.
    Process {
        name: String,
        args: Vec<ValueExpr>,
        invocation: Invocation,
    },
    /// Wait for every asynchronous launch reachable through the predecessors.
    WaitForAsync,
    /// Set the return value of the running process.
    Return(ValueExpr),
}

impl TaskKind {
    pub fn action(action: impl Action + 'static) -> Self {
        TaskKind::Action(Arc::new(action))
    }

    /// True for kinds that own a child scope.
    pub fn is_scope(&self) -> bool {
        matches!(
            self,
            TaskKind::Group | TaskKind::While(_) | TaskKind::For { .. } | TaskKind::OnSchedule(_)
        )
    }

    pub fn is_async_launch(&self) -> bool {
        matches!(
            self,
            TaskKind::Process {
                invocation: Invocation::Async { .. },
                ..
            }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Action(_) => "action",
            TaskKind::Fail(_) => "fail",
            TaskKind::Stop(_) => "stop",
            TaskKind::Break(_) => "break",
            TaskKind::Group => "do",
            TaskKind::While(_) => "do-while",
            TaskKind::For { .. } => "for",
            TaskKind::OnSchedule(_) => "on-schedule",
            TaskKind::Process {
                invocation: Invocation::Sync { .. },
                ..
            } => "process",
            TaskKind::Process { .. } => "process-async",
            TaskKind::WaitForAsync => "waitfor-async",
            TaskKind::Return(_) => "return",
        }
    }
}

/// A task as stored in the graph arena.
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: TaskId,
    /// `None` for anonymous tasks; those are identified by their ordinal.
    pub name: Option<String>,
    /// Zero-based position within the enclosing scope.
    pub ordinal: usize,
    pub scope: ScopeId,
    /// The task owning the enclosing scope, `None` at process level.
    pub parent: Option<TaskId>,
    pub predecessors: Vec<Predecessor>,
    pub combinator: Combinator,
    /// Siblings that list this task as a predecessor.
    pub dependents: Vec<TaskId>,
    pub guard: Option<BoolExpr>,
    pub kind: TaskKind,
    pub child: Option<ScopeId>,
}

impl TaskNode {
    /// Name, or `#<n>` (one-based) for anonymous tasks.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{}", self.ordinal + 1),
        }
    }
}
