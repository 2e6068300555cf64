//! # Accept Loop
//!
//! Accepts connections until shutdown is signalled and hands each one off.
//! Handoffs run as independent tasks; a failed handoff is logged and the
//! loop keeps accepting. Only a fatal accept error ends the loop early.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::adapters::ConnectionListener;
use crate::error::HandoffError;
use crate::ports::{HandoffApi, HandoffReport};

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceptStats {
    pub accepted: u64,
    pub handed_off: u64,
    pub failed: u64,
}

pub struct AcceptLoop<H: HandoffApi + 'static> {
    listener: ConnectionListener,
    handoff: Arc<H>,
    accept_deadline: Option<Duration>,
}

impl<H: HandoffApi + 'static> AcceptLoop<H> {
    pub fn new(listener: ConnectionListener, handoff: Arc<H>) -> Self {
        Self {
            listener,
            handoff,
            accept_deadline: None,
        }
    }

    /// Bound each accept call; the loop re-checks shutdown when it elapses.
    #[must_use]
    pub fn with_accept_deadline(mut self, deadline: Duration) -> Self {
        self.accept_deadline = Some(deadline);
        self
    }

    pub fn listener(&self) -> &ConnectionListener {
        &self.listener
    }

    /// Run until `shutdown` turns `true` (or its sender is dropped), then
    /// wait for in-flight handoffs.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<AcceptStats, HandoffError> {
        let mut stats = AcceptStats::default();
        let mut inflight: JoinSet<Result<HandoffReport, HandoffError>> = JoinSet::new();
        let mut outcome = Ok(());

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
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    record(&mut stats, joined);
                }
                accepted = self.listener.accept(self.accept_deadline) => match accepted {
                    Ok(Some(conn)) => {
                        stats.accepted += 1;
                        debug!(peer = ?self.listener.last_remote_address(), "dispatching handoff");
                        let handoff = Arc::clone(&self.handoff);
                        inflight.spawn(async move { handoff.handoff(conn).await });
                    }
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "listener failed, stopping accept loop");
                        outcome = Err(e);
                        break;
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        while let Some(joined) = inflight.join_next().await {
            record(&mut stats, joined);
        }
        info!(
            accepted = stats.accepted,
            handed_off = stats.handed_off,
            failed = stats.failed,
            "accept loop stopped"
        );
        outcome.map(|()| stats)
    }
}

fn record(
    stats: &mut AcceptStats,
    joined: Result<Result<HandoffReport, HandoffError>, tokio::task::JoinError>,
) {
    match joined {
        Ok(Ok(_)) => stats.handed_off += 1,
        // The orchestrator already logged the failure.
        Ok(Err(_)) => stats.failed += 1,
        Err(e) => {
            stats.failed += 1;
            error!(error = %e, "handoff task panicked");
        }
    }
}
