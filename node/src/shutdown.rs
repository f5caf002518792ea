//! Shutdown signalling for the validator node.
//!
//! One [`ShutdownController`] per process. The consensus service loop and
//! any other long-running task hold a receiver from
//! [`ShutdownController::subscribe`]; an OS signal or an explicit
//! [`ShutdownController::trigger`] wakes all of them once.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Wake every subscriber. Later calls are no-ops; returns whether this
    /// call did the triggering.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!(reason, "node shutting down");
        let _ = self.tx.send(());
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Block until SIGINT or SIGTERM, then trigger.
    pub async fn wait_for_signal(&self) {
        let reason = tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for SIGINT");
                }
                "SIGINT"
            }
            _ = terminate() => "SIGTERM",
        };
        self.trigger(reason);
    }
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
