//! # Handoff Orchestrator
//!
//! Drives one handoff end to end:
//!
//! ```text
//! create channel ─► prepare_spawn ─► spawn ─► duplicate_for(pid)
//!        ─► await_connection ─► send(raw, token) ─► close conn ─► close channel ─► register
//! ```
//!
//! Every failure after the spawn kills and reaps the worker before the error
//! is returned, so nothing is registered and no endpoint is left behind.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::adapters::HandoffChannel;
use crate::domain::{ChannelNamer, ConnectionHandle, HandoffConfig, WorkerCommand, WorkerProcess};
use crate::error::HandoffError;
use crate::metrics::{MetricsRecorder, NoOpMetrics};
use crate::ports::{HandoffApi, HandoffReport, SocketDuplicator, SpawnRequest, WorkerSpawner};
use crate::service::WorkerRegistry;

/// Parent-side handoff service.
pub struct HandoffOrchestrator<S: WorkerSpawner> {
    config: HandoffConfig,
    command: WorkerCommand,
    namer: ChannelNamer,
    spawner: S,
    duplicator: Arc<dyn SocketDuplicator>,
    registry: Arc<WorkerRegistry>,
    metrics: Arc<dyn MetricsRecorder>,
}

impl<S: WorkerSpawner> HandoffOrchestrator<S> {
    pub fn new(
        config: HandoffConfig,
        command: WorkerCommand,
        spawner: S,
        duplicator: Arc<dyn SocketDuplicator>,
        registry: Arc<WorkerRegistry>,
    ) -> Result<Self, HandoffError> {
        config.validate()?;
        let namer = ChannelNamer::new(&config.channel_base_name)?;
        Ok(Self {
            config,
            command,
            namer,
            spawner,
            duplicator,
            registry,
            metrics: Arc::new(NoOpMetrics),
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    async fn run(&self, conn: ConnectionHandle, started: Instant) -> Result<HandoffReport, HandoffError> {
        let peer = conn.peer_ip();
        let name = self.namer.next_name();

        // The endpoint must exist before the worker starts connecting.
        let mut channel = HandoffChannel::create(name.clone(), &self.config.channel_dir)?
            .with_transfer_timeout(self.config.transfer_timeout());

        let mut request = SpawnRequest::new(self.command.clone(), name.clone());
        self.duplicator.prepare_spawn(&conn, &mut request);
        let mut worker = self.spawner.spawn(request)?;
        let pid = worker.pid();

        let token = match self.duplicator.duplicate_for(&conn, pid) {
            Ok(token) => token,
            Err(e) => return Err(abandon(&mut worker, e).await),
        };
        let token_id = token.id();
        let strategy = token.strategy();

        if let Err(e) = channel.await_connection(pid, self.config.connect_timeout()).await {
            return Err(abandon(&mut worker, e).await);
        }
        worker.mark_running();
        if let Err(e) = channel.send(conn.raw_value(), token).await {
            return Err(abandon(&mut worker, e).await);
        }

        conn.close();
        channel.close();
        self.registry.register(worker);

        Ok(HandoffReport {
            worker_pid: pid,
            channel: name,
            token: token_id,
            strategy,
            peer,
            elapsed: started.elapsed(),
        })
    }
}

/// Kill and reap a worker whose handoff failed, then hand back the error.
async fn abandon(worker: &mut WorkerProcess, err: HandoffError) -> HandoffError {
    let pid = worker.pid();
    match worker.kill_and_reap().await {
        Ok(code) => debug!(worker_pid = pid, exit_code = code, "abandoned worker reaped"),
        Err(e) => warn!(worker_pid = pid, error = %e, "failed to kill abandoned worker"),
    }
    err
}

#[async_trait]
impl<S: WorkerSpawner> HandoffApi for HandoffOrchestrator<S> {
    async fn handoff(&self, conn: ConnectionHandle) -> Result<HandoffReport, HandoffError> {
        let started = Instant::now();
        let result = self.run(conn, started).await;
        match &result {
            Ok(report) => {
                self.metrics.record_handoff_completed(report.elapsed);
                info!(
                    worker_pid = report.worker_pid,
                    channel = %report.channel,
                    peer = %report.peer,
                    strategy = %report.strategy,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "connection handed off"
                );
            }
            Err(e) => {
                self.metrics.record_handoff_failed(e.kind());
                warn!(error = %e, kind = e.kind(), "handoff failed");
            }
        }
        result
    }
}
