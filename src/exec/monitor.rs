// src/exec/monitor.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exec::{ExecutorError, JobExecutor};
use crate::jobs::JobStore;

/// How often [`Monitor::shutdown`] checks whether the executor has drained.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Background task that reaps finished runs and persists them.
///
/// Persistence failures are logged and never end the loop.
pub struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Monitor {
    pub fn spawn(executor: JobExecutor, store: Arc<dyn JobStore>) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(executor, store, cancel.clone()));
        Self { cancel, handle }
    }

    /// Interrupt the loop without draining.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// Give the loop up to `timeout` to reap every registered run, then stop
    /// it and wait for it to exit.
    pub async fn shutdown(self, executor: &JobExecutor, timeout: Duration) {
        let drained = tokio::time::timeout(timeout, async {
            while !executor.all_completed() {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(
                unreaped = executor.list_running().len(),
                "monitor stopping before all runs were reaped"
            );
        }

        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!(error = %err, "monitor task failed");
        }
    }
}

async fn monitor_loop(executor: JobExecutor, store: Arc<dyn JobStore>, cancel: CancellationToken) {
    info!("monitor started");
    loop {
        match executor.get_completed_or_interrupted(&cancel).await {
            Ok(run) => {
                let snapshot = run.snapshot();
                info!(
                    run_id = snapshot.id,
                    job = %snapshot.job,
                    status = %snapshot.status,
                    "run finished"
                );
                if let Err(err) = store.save_run(&snapshot) {
                    error!(run_id = snapshot.id, error = %err, "failed to persist run");
                }
            }
            Err(ExecutorError::Interrupted) => {
                debug!("monitor interrupted");
                break;
            }
            Err(ExecutorError::Closed) => {
                debug!("completion channel closed");
                break;
            }
            Err(err) => {
                warn!(error = %err, "failed to reap run; continuing");
            }
        }
    }
    info!("monitor stopped");
}
