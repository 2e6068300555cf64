//! # Server
//!
//! Listener side of `handoffd`: binds, hands connections off, reaps workers
//! and tears everything down on shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use handoff::{
    select_duplicator, AcceptLoop, AcceptStats, ConnectionListener, HandoffOrchestrator,
    MetricsRecorder, ProcessSpawner, RegistryError, WorkerRegistry,
};
use handoff_telemetry::{gather_text, handoff_span, log_event};
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::adapters::PrometheusMetrics;
use crate::config::RuntimeConfig;

/// Serve until `shutdown` fires, then kill and reap all workers.
pub async fn serve(config: RuntimeConfig, shutdown: watch::Receiver<bool>) -> Result<AcceptStats> {
    config.validate()?;
    let command = config.worker_command()?;

    let metrics: Arc<dyn MetricsRecorder> = Arc::new(PrometheusMetrics);
    let poll_interval = config.handoff.registry_poll_interval();
    let registry = Arc::new(WorkerRegistry::with_metrics(
        poll_interval,
        Arc::clone(&metrics),
    ));

    let orchestrator = HandoffOrchestrator::new(
        config.handoff.clone(),
        command,
        ProcessSpawner::new(&config.handoff.channel_dir),
        select_duplicator(config.handoff.strategy.requested()),
        Arc::clone(&registry),
    )?
    .with_metrics(metrics);

    let listener = ConnectionListener::bind(
        config.listener.port,
        config.listener.backlog,
        &config.listener.bind_address,
    )?;
    let address = listener.local_addr()?;
    info!(%address, backlog = config.listener.backlog, "listening");

    let supervisor = tokio::spawn(supervise(
        Arc::clone(&registry),
        shutdown.clone(),
        poll_interval,
    ));

    let span = handoff_span!("listener", %address);
    let result = AcceptLoop::new(listener, Arc::new(orchestrator))
        .with_accept_deadline(config.accept_deadline())
        .run(shutdown)
        .instrument(span)
        .await;

    // A fatal accept error ends the loop without a shutdown signal.
    supervisor.abort();
    if let Err(e) = supervisor.await {
        if !e.is_cancelled() {
            warn!(error = %e, "supervisor task failed");
        }
    }

    let exits = registry.kill_all().await;
    log_event!(info, "server", "workers terminated", count = exits.len());
    if let Ok(text) = gather_text() {
        debug!(metrics = %text, "final metrics");
    }

    Ok(result?)
}

/// Reap workers as they exit until `shutdown` fires.
pub async fn supervise(
    registry: Arc<WorkerRegistry>,
    mut shutdown: watch::Receiver<bool>,
    idle_interval: Duration,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            exit = registry.wait_any() => match exit {
                Ok(exit) => log_event!(
                    debug,
                    "supervisor",
                    "worker reaped",
                    worker_pid = exit.pid,
                    exit_code = exit.exit_code
                ),
                Err(RegistryError::NoWorkers) => tokio::time::sleep(idle_interval).await,
                Err(e) => {
                    warn!(error = %e, "waiting for workers failed");
                    tokio::time::sleep(idle_interval).await;
                }
            },
        }
    }
    debug!("supervisor stopped");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use handoff::WorkerProcess;

    #[tokio::test]
    async fn test_supervisor_reaps_exited_workers() {
        let registry = Arc::new(WorkerRegistry::new(Duration::from_millis(10)));
        let child = tokio::process::Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        registry.register(WorkerProcess::from_child(child).unwrap());

        let (tx, rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            Arc::clone(&registry),
            rx,
            Duration::from_millis(10),
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !registry.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), supervisor)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_serve_rejects_invalid_config() {
        let mut config = RuntimeConfig::default();
        config.listener.backlog = 0;
        let (_tx, rx) = watch::channel(false);
        assert!(serve(config, rx).await.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RuntimeConfig::default();
        config.listener.port = 0;
        config.listener.bind_address = "127.0.0.1".into();
        config.listener.accept_deadline_ms = 50;
        config.handoff.channel_dir = dir.path().to_path_buf();

        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(serve(config, rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stats, AcceptStats::default());
    }
}
