use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jobdag::jobs::{Job, JobStore, MemoryStore, Run, RunId, RunStatus, StoreError};

/// A store whose `save_run` always fails; everything else is delegated to
/// an in-memory store.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    save_attempts: AtomicUsize,
}

impl FailingStore {
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>) -> Self {
        Self {
            inner: MemoryStore::with_jobs(jobs),
            save_attempts: AtomicUsize::new(0),
        }
    }

    pub fn save_attempts(&self) -> usize {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

impl JobStore for FailingStore {
    fn load_job(&self, name: &str) -> Result<Job, StoreError> {
        self.inner.load_job(name)
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs()
    }

    fn next_run_id(&self) -> Result<RunId, StoreError> {
        self.inner.next_run_id()
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Backend(format!("refusing to save run {}", run.id)))
    }
}

/// A store that blocks for `delay` whenever it persists a running run, like
/// a slow database would. Finished runs are saved right away.
#[derive(Debug)]
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl SlowStore {
    pub fn with_jobs(jobs: impl IntoIterator<Item = Job>, delay: Duration) -> Self {
        Self {
            inner: MemoryStore::with_jobs(jobs),
            delay,
        }
    }

    pub fn run(&self, id: RunId) -> Option<Run> {
        self.inner.run(id)
    }
}

impl JobStore for SlowStore {
    fn load_job(&self, name: &str) -> Result<Job, StoreError> {
        self.inner.load_job(name)
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.inner.list_jobs()
    }

    fn next_run_id(&self) -> Result<RunId, StoreError> {
        self.inner.next_run_id()
    }

    fn save_run(&self, run: &Run) -> Result<(), StoreError> {
        if run.status == RunStatus::Running {
            std::thread::sleep(self.delay);
        }
        self.inner.save_run(run)
    }
}
