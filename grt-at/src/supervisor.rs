//! Background task supervision
//!
//! Owns the long-running tasks (flush scheduler, sweep scheduler, the
//! reconciliation trigger worker) and a shared shutdown signal, so the
//! scheduling model is decoupled from any framework lifecycle. `shutdown`
//! flips the signal and waits for every task to finish.

use crate::ingest::ReconcileTrigger;
use crate::reconcile::{GroupDirectory, ReconcileEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Upper bound on one event-triggered reconciliation, so a stuck directory
/// call cannot wedge the trigger queue
const TRIGGER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Supervisor {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            handles: Vec::new(),
        }
    }

    /// A receiver that resolves when shutdown is requested
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a named supervised task
    pub fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.handles.push((name, tokio::spawn(future)));
    }

    /// Signal shutdown and wait for every supervised task to return
    pub async fn shutdown(self) {
        info!("Supervisor shutting down {} tasks", self.handles.len());
        // Receivers see the change; ignore the case where none are left
        let _ = self.shutdown_tx.send(true);

        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Supervised task panicked or was cancelled");
            }
        }
        info!("Supervisor shutdown complete");
    }
}

/// Drain the reconciliation trigger queue.
///
/// Triggers are fire-and-forget from the producer's perspective; each one
/// is individually bounded by `TRIGGER_TIMEOUT` and failures only log.
pub async fn run_trigger_worker<D: GroupDirectory + 'static>(
    engine: Arc<ReconcileEngine<D>>,
    mut triggers: mpsc::UnboundedReceiver<ReconcileTrigger>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Reconciliation trigger worker started");
    loop {
        tokio::select! {
            trigger = triggers.recv() => {
                let Some(ReconcileTrigger { guild_id, user_id }) = trigger else {
                    info!("Trigger channel closed, worker stopping");
                    return;
                };
                match tokio::time::timeout(
                    TRIGGER_TIMEOUT,
                    engine.reconcile_member(guild_id, user_id),
                )
                .await
                {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!(guild_id, user_id, error = %e, "Triggered reconciliation failed");
                    }
                    Err(_) => {
                        warn!(guild_id, user_id, "Triggered reconciliation timed out");
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Reconciliation trigger worker stopping");
                return;
            }
        }
    }
}
