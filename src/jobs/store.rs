// src/jobs/store.rs

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use thiserror::Error;

use crate::jobs::model::{Job, Run, RunId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence for job definitions and run history.
pub trait JobStore: Send + Sync {
    fn load_job(&self, name: &str) -> Result<Job, StoreError>;

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Enabled jobs bound to `schedule`.
    fn jobs_for_schedule(&self, schedule: &str) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|job| job.enabled && job.runs_on(schedule))
            .collect())
    }

    /// Allocate a fresh run id.
    fn next_run_id(&self) -> Result<RunId, StoreError>;

    /// Insert or overwrite the record of a run.
    fn save_run(&self, run: &Run) -> Result<(), StoreError>;
}

/// In-process store. Run history lives as long as the store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<BTreeMap<String, Job>>,
    runs: Mutex<BTreeMap<RunId, Run>>,
    last_run_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        let store = Self::new();
        for job in jobs {
            store.insert_job(job);
        }
        store
    }

    pub fn insert_job(&self, job: Job) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.name.clone(), job);
    }

    pub fn run(&self, id: RunId) -> Option<Run> {
        self.lock_runs().get(&id).cloned()
    }

    /// All recorded runs, oldest first.
    pub fn runs(&self) -> Vec<Run> {
        self.lock_runs().values().cloned().collect()
    }

    fn lock_runs(&self) -> MutexGuard<'_, BTreeMap<RunId, Run>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JobStore for MemoryStore {
    fn load_job(&self, name: &str) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(name.to_string()))
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect())
    }

    fn next_run_id(&self) -> Result<RunId, StoreError> {
        Ok(self.last_run_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.lock_runs().insert(run.id, run.clone());
        Ok(())
    }
}
