// src/jobs/scheduler.rs

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calendar::ScheduleSet;
use crate::jobs::manager::JobManager;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// Longest single nap while waiting for the next occurrence.
    pub sleep_granularity: Duration,
    /// How long [`JobScheduler::revise`] waits for the old loop to exit.
    pub join_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            sleep_granularity: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One background loop per named schedule; each occurrence starts every
/// enabled job bound to that schedule.
pub struct JobScheduler {
    manager: Arc<JobManager>,
    settings: SchedulerSettings,
    workers: Mutex<BTreeMap<String, Worker>>,
}

impl JobScheduler {
    pub fn new(manager: Arc<JobManager>, settings: SchedulerSettings) -> Self {
        Self {
            manager,
            settings,
            workers: Mutex::new(BTreeMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, BTreeMap<String, Worker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the loop for `name`. An existing loop of the same name is
    /// cancelled and replaced without waiting for it.
    pub fn start(&self, name: impl Into<String>, schedules: ScheduleSet) {
        let name = name.into();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(schedule_loop(
            name.clone(),
            schedules,
            Arc::clone(&self.manager),
            self.settings.sleep_granularity,
            cancel.clone(),
        ));
        if let Some(old) = self.workers().insert(name, Worker { cancel, handle }) {
            old.cancel.cancel();
        }
    }

    /// Replace the schedules of `name`: stop the old loop, wait a bounded
    /// time for it to exit, then start a new one.
    pub async fn revise(&self, name: &str, schedules: ScheduleSet) {
        self.stop(name).await;
        info!(schedule = %name, "schedule revised");
        self.start(name, schedules);
    }

    /// Stop the loop for `name` and wait up to the join timeout for it.
    /// Returns whether a loop was running.
    pub async fn stop(&self, name: &str) -> bool {
        let Some(worker) = self.workers().remove(name) else {
            return false;
        };
        worker.cancel.cancel();
        if tokio::time::timeout(self.settings.join_timeout, worker.handle)
            .await
            .is_err()
        {
            warn!(schedule = %name, "schedule loop did not exit in time");
        }
        true
    }

    /// Signal every loop to stop without waiting for them.
    pub fn stop_all(&self) {
        let workers = std::mem::take(&mut *self.workers());
        info!(count = workers.len(), "stopping all schedules");
        for worker in workers.into_values() {
            worker.cancel.cancel();
        }
    }

    /// Names of schedules whose loop has not exited yet.
    pub fn active(&self) -> Vec<String> {
        self.workers()
            .iter()
            .filter(|(_, w)| !w.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

async fn schedule_loop(
    name: String,
    schedules: ScheduleSet,
    manager: Arc<JobManager>,
    granularity: Duration,
    cancel: CancellationToken,
) {
    info!(schedule = %name, "schedule started");
    if schedules.is_immediate() && !cancel.is_cancelled() {
        fire(&manager, &name);
    }
    while schedules.sleep_until_next(granularity, &cancel).await {
        fire(&manager, &name);
    }
    info!(schedule = %name, "schedule finished");
}

fn fire(manager: &JobManager, schedule: &str) {
    match manager.run_scheduled(schedule) {
        Ok(runs) => debug!(schedule = %schedule, started = runs.len(), "schedule fired"),
        Err(err) => warn!(schedule = %schedule, error = %err, "schedule fired but jobs could not be listed"),
    }
}
