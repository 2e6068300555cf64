//! # Worker Registry
//!
//! Process-wide table of live workers, keyed by pid. One mutex serializes
//! every access; the lock is never held across an await point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{WorkerExit, WorkerProcess, WorkerState};
use crate::error::RegistryError;
use crate::metrics::{MetricsRecorder, NoOpMetrics};

/// Default interval between liveness polls in [`WorkerRegistry::wait_any`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Table of live workers.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<u32, WorkerProcess>>,
    poll_interval: Duration,
    metrics: Arc<dyn MetricsRecorder>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl WorkerRegistry {
    pub fn new(poll_interval: Duration) -> Self {
        Self::with_metrics(poll_interval, Arc::new(NoOpMetrics))
    }

    pub fn with_metrics(poll_interval: Duration, metrics: Arc<dyn MetricsRecorder>) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            poll_interval,
            metrics,
        }
    }

    /// Track `worker`. Returns `false` if its pid is already registered, in
    /// which case the table is unchanged.
    pub fn register(&self, worker: WorkerProcess) -> bool {
        let pid = worker.pid();
        let mut workers = self.workers.lock();
        if workers.contains_key(&pid) {
            debug!(worker_pid = pid, "worker already registered");
            return false;
        }
        workers.insert(pid, worker);
        drop(workers);

        self.metrics.record_worker_registered();
        debug!(worker_pid = pid, "worker registered");
        true
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.workers.lock().contains_key(&pid)
    }

    pub fn state(&self, pid: u32) -> Option<WorkerState> {
        self.workers.lock().get(&pid).map(WorkerProcess::state)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.workers.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Reap one exited worker without waiting.
    pub fn try_reap(&self) -> Result<Option<WorkerExit>, RegistryError> {
        let mut workers = self.workers.lock();
        if workers.is_empty() {
            return Err(RegistryError::NoWorkers);
        }

        let mut exited = None;
        for (&pid, worker) in workers.iter_mut() {
            match worker.try_exit() {
                Ok(Some(exit_code)) => {
                    exited = Some(WorkerExit { pid, exit_code });
                    break;
                }
                Ok(None) => {}
                Err(e) => warn!(worker_pid = pid, error = %e, "polling worker failed"),
            }
        }

        if let Some(exit) = exited {
            workers.remove(&exit.pid);
            drop(workers);
            self.metrics.record_worker_exited(exit.exit_code);
            info!(worker_pid = exit.pid, exit_code = exit.exit_code, "worker exited");
        }
        Ok(exited)
    }

    /// Wait until any registered worker exits, remove it and report it.
    ///
    /// Fails immediately with [`RegistryError::NoWorkers`] when the table is
    /// empty, and also if it becomes empty while waiting.
    pub async fn wait_any(&self) -> Result<WorkerExit, RegistryError> {
        loop {
            if let Some(exit) = self.try_reap()? {
                return Ok(exit);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Forcefully terminate worker `pid`. It stays registered until reaped
    /// by [`wait_any`](Self::wait_any).
    pub fn kill(&self, pid: u32) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock();
        let worker = workers.get_mut(&pid).ok_or(RegistryError::NotFound(pid))?;
        worker
            .start_kill()
            .map_err(|source| RegistryError::Termination { pid, source })?;
        debug!(worker_pid = pid, "worker killed");
        Ok(())
    }

    /// Terminate every worker and reap them all. Returns their exits.
    pub async fn kill_all(&self) -> Vec<WorkerExit> {
        let mut drained: Vec<WorkerProcess> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, w)| w).collect()
        };

        let mut exits = Vec::with_capacity(drained.len());
        for worker in &mut drained {
            let pid = worker.pid();
            match worker.kill_and_reap().await {
                Ok(exit_code) => {
                    self.metrics.record_worker_exited(exit_code);
                    exits.push(WorkerExit { pid, exit_code });
                }
                Err(e) => warn!(worker_pid = pid, error = %e, "failed to terminate worker"),
            }
        }
        if !exits.is_empty() {
            info!(count = exits.len(), "all workers terminated");
        }
        exits
    }
}
