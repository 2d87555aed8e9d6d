// src/jobs/manager.rs

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::loader::load_properties;
use crate::engine::{ProcessRegistry, Value, Variables};
use crate::errors::{JobdagError, Result};
use crate::exec::JobExecutor;
use crate::jobs::model::{Job, Run, RunId, RunRef};
use crate::jobs::store::JobStore;

/// Starts and stops job runs.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    processes: Arc<ProcessRegistry>,
    executor: JobExecutor,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        processes: Arc<ProcessRegistry>,
        executor: JobExecutor,
    ) -> Self {
        Self {
            store,
            processes,
            executor,
        }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Start a run of the job called `name`.
    pub fn run(&self, name: &str) -> Result<RunRef> {
        let job = self.store.load_job(name)?;
        self.run_job(&job)
    }

    /// Start a run of `job`, ignoring its `enabled` flag.
    pub fn run_job(&self, job: &Job) -> Result<RunRef> {
        let process = self
            .processes
            .get(&job.process)
            .ok_or_else(|| JobdagError::ProcessNotFound(job.process.clone()))?;

        let vars = match &job.properties {
            Some(path) => load_properties(path)?.into_iter().collect(),
            None => Variables::new(),
        };
        let args = job.args.iter().map(|a| Value::parse_literal(a)).collect();

        let id = self.store.next_run_id()?;
        let run = self.executor.submit_with(
            RunRef::new(Run::new(id, &job.name)),
            process,
            args,
            vars,
            |started| {
                // Saved before the process is spawned so the monitor's final
                // save always lands after this one.
                if let Err(err) = self.store.save_run(started) {
                    warn!(run_id = id, job = %job.name, error = %err, "failed to persist submitted run");
                }
            },
        )?;

        info!(run_id = id, job = %job.name, process = %job.process, "job started");
        Ok(run)
    }

    /// Start every enabled job bound to `schedule`. Jobs that fail to start
    /// are logged and skipped.
    pub fn run_scheduled(&self, schedule: &str) -> Result<Vec<RunRef>> {
        let jobs = self.store.jobs_for_schedule(schedule)?;
        let mut runs = Vec::with_capacity(jobs.len());
        for job in jobs {
            match self.run_job(&job) {
                Ok(run) => runs.push(run),
                Err(err) => {
                    warn!(schedule = %schedule, job = %job.name, error = %err, "failed to start scheduled job");
                }
            }
        }
        Ok(runs)
    }

    pub fn stop(&self, id: RunId) -> Result<bool> {
        Ok(self.executor.stop(id)?)
    }

    pub fn list_running(&self) -> Vec<RunRef> {
        self.executor.list_running()
    }
}
