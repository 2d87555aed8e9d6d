// src/exec/executor.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{Engine, Process, Value, Variables};
use crate::exec::ExecutorError;
use crate::jobs::{Run, RunId, RunRef, RunStatus};

struct Entry {
    run: RunRef,
    cancel: CancellationToken,
}

struct Completion {
    id: RunId,
    result: Result<(), JoinError>,
}

struct Inner {
    engine: Engine,
    running: Mutex<HashMap<RunId, Entry>>,
    completed_tx: mpsc::UnboundedSender<Completion>,
    completed_rx: AsyncMutex<mpsc::UnboundedReceiver<Completion>>,
    accepting: AtomicBool,
    in_flight: watch::Sender<usize>,
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, HashMap<RunId, Entry>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs job processes in the background and hands finished runs back in
/// completion order.
///
/// A run stays registered from [`submit`](JobExecutor::submit) until it is
/// reaped by [`get_completed`](JobExecutor::get_completed), so a finished
/// run is observable either as running or as completed, never neither.
#[derive(Clone)]
pub struct JobExecutor {
    inner: Arc<Inner>,
}

impl JobExecutor {
    pub fn new(engine: Engine) -> Self {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        let (in_flight, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                engine,
                running: Mutex::new(HashMap::new()),
                completed_tx,
                completed_rx: AsyncMutex::new(completed_rx),
                accepting: AtomicBool::new(true),
                in_flight,
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Start executing `process` for `run`.
    ///
    /// Marks the run as running, stamps its start time and registers it.
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        run: RunRef,
        process: Arc<Process>,
        args: Vec<Value>,
        vars: Variables,
    ) -> Result<RunRef, ExecutorError> {
        self.submit_with(run, process, args, vars, |_| {})
    }

    /// Like [`submit`](JobExecutor::submit), but hands the running snapshot
    /// to `on_start` before the process is spawned.
    ///
    /// Anything `on_start` records is therefore ordered before the run can
    /// finish.
    pub fn submit_with(
        &self,
        run: RunRef,
        process: Arc<Process>,
        args: Vec<Value>,
        vars: Variables,
        on_start: impl FnOnce(&Run),
    ) -> Result<RunRef, ExecutorError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(ExecutorError::Rejected("executor is closed".to_string()));
        }

        let id = run.id();
        let mut running = self.inner.running();
        if running.contains_key(&id) {
            return Err(ExecutorError::Rejected(format!("run {id} is already running")));
        }

        run.update(|r| {
            r.status = RunStatus::Running;
            r.started_at = Some(Utc::now());
            r.ended_at = None;
            r.message = None;
        });
        on_start(&run.snapshot());

        let cancel = CancellationToken::new();
        let engine = self.inner.engine.clone();
        let work_run = run.clone();
        let token = cancel.clone();
        let work = tokio::spawn(async move {
            let outcome = engine.execute(process, args, vars, token).await;
            work_run.update(|r| {
                r.status = outcome.status.into();
                r.ended_at = Some(Utc::now());
                r.message = outcome.message;
            });
        });

        self.inner.in_flight.send_modify(|n| *n += 1);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = work.await;
            inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
            // Receiver lives in `inner`; sending cannot fail while we hold it.
            let _ = inner.completed_tx.send(Completion { id, result });
        });

        running.insert(
            id,
            Entry {
                run: run.clone(),
                cancel,
            },
        );
        drop(running);

        info!(run_id = id, job = %run.job(), "run submitted");
        Ok(run)
    }

    /// Wait for the next finished run and deregister it.
    pub async fn get_completed(&self) -> Result<RunRef, ExecutorError> {
        self.get_completed_or_interrupted(&CancellationToken::new())
            .await
    }

    /// Like [`get_completed`](Self::get_completed), but gives up with
    /// [`ExecutorError::Interrupted`] once `interrupt` fires.
    pub async fn get_completed_or_interrupted(
        &self,
        interrupt: &CancellationToken,
    ) -> Result<RunRef, ExecutorError> {
        let completion = {
            let mut rx = tokio::select! {
                _ = interrupt.cancelled() => return Err(ExecutorError::Interrupted),
                rx = self.inner.completed_rx.lock() => rx,
            };
            tokio::select! {
                _ = interrupt.cancelled() => return Err(ExecutorError::Interrupted),
                next = rx.recv() => next.ok_or(ExecutorError::Closed)?,
            }
        };

        let entry = self
            .inner
            .running()
            .remove(&completion.id)
            .ok_or(ExecutorError::NotFound(completion.id))?;

        match completion.result {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => entry.run.update(|r| {
                r.status = RunStatus::Stopped;
                r.ended_at.get_or_insert_with(Utc::now);
            }),
            Err(err) => {
                warn!(run_id = completion.id, error = %err, "run panicked");
                entry.run.update(|r| {
                    r.status = RunStatus::Failed;
                    r.ended_at = Some(Utc::now());
                    r.message = Some(format!("run panicked: {err}"));
                });
            }
        }

        debug!(run_id = completion.id, status = %entry.run.status(), "run reaped");
        Ok(entry.run)
    }

    /// Runs submitted and not yet reaped.
    pub fn list_running(&self) -> Vec<RunRef> {
        let mut runs: Vec<RunRef> = self
            .inner
            .running()
            .values()
            .map(|e| e.run.clone())
            .collect();
        runs.sort_by_key(RunRef::id);
        runs
    }

    pub fn get_running(&self, id: RunId) -> Result<RunRef, ExecutorError> {
        self.inner
            .running()
            .get(&id)
            .map(|e| e.run.clone())
            .ok_or(ExecutorError::NotFound(id))
    }

    /// Ask run `id` to stop. Returns `false` if it was already asked.
    pub fn stop(&self, id: RunId) -> Result<bool, ExecutorError> {
        let running = self.inner.running();
        let entry = running.get(&id).ok_or(ExecutorError::NotFound(id))?;
        if entry.cancel.is_cancelled() {
            return Ok(false);
        }
        info!(run_id = id, "stopping run");
        entry.cancel.cancel();
        Ok(true)
    }

    pub fn stop_all(&self) {
        let running = self.inner.running();
        info!(count = running.len(), "stopping all runs");
        for entry in running.values() {
            entry.cancel.cancel();
        }
    }

    /// True when nothing is registered, i.e. every run has been reaped.
    pub fn all_completed(&self) -> bool {
        self.inner.running().is_empty()
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Refuse new submissions and wait up to `timeout` for in-flight runs
    /// to finish. Returns whether they all did.
    pub async fn close(&self, timeout: Duration) -> bool {
        self.inner.accepting.store(false, Ordering::SeqCst);
        let mut in_flight = self.inner.in_flight.subscribe();
        let drained = tokio::time::timeout(timeout, in_flight.wait_for(|n| *n == 0))
            .await
            .is_ok_and(|r| r.is_ok());
        if drained {
            info!("executor closed");
        } else {
            warn!(
                still_running = *in_flight.borrow(),
                "executor close timed out"
            );
        }
        drained
    }
}
