// src/jobs/model.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::engine::ProcessStatus;

/// Identity of a run. Allocated by the store, unique across all jobs and
/// increasing over time.
pub type RunId = u64;

/// A named binding of a process to arguments and schedules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub process: String,
    /// Optional TOML file whose keys seed the process variables.
    pub properties: Option<PathBuf>,
    pub args: Vec<String>,
    pub enabled: bool,
    /// Names of the schedules that trigger this job.
    pub schedules: Vec<String>,
}

impl Job {
    pub fn new(name: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            process: process.into(),
            properties: None,
            args: Vec::new(),
            enabled: true,
            schedules: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedules.push(schedule.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn runs_on(&self, schedule: &str) -> bool {
        self.schedules.iter().any(|s| s == schedule)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NotRun,
    Running,
    Succeeded,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Stopped
        )
    }
}

impl From<ProcessStatus> for RunStatus {
    fn from(status: ProcessStatus) -> Self {
        match status {
            ProcessStatus::Succeeded => RunStatus::Succeeded,
            ProcessStatus::Failed => RunStatus::Failed,
            ProcessStatus::Stopped => RunStatus::Stopped,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::NotRun => "not run",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One execution of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub id: RunId,
    pub job: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl Run {
    pub fn new(id: RunId, job: impl Into<String>) -> Self {
        Self {
            id,
            job: job.into(),
            status: RunStatus::NotRun,
            started_at: None,
            ended_at: None,
            message: None,
        }
    }
}

/// Shared handle to a live [`Run`].
///
/// The executor updates the run while its process executes; everybody else
/// reads snapshots. Equality is by run id only.
#[derive(Debug, Clone)]
pub struct RunRef {
    id: RunId,
    inner: Arc<Mutex<Run>>,
}

impl RunRef {
    pub fn new(run: Run) -> Self {
        Self {
            id: run.id,
            inner: Arc::new(Mutex::new(run)),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn snapshot(&self) -> Run {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self) -> RunStatus {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    pub fn job(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .job
            .clone()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut Run)) {
        let mut run = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut run);
    }
}

impl PartialEq for RunRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RunRef {}
