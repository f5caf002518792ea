//! Single-assignment stage completion.
//!
//! A stage resolves exactly once: with a certificate, with "escalate" (the
//! orchestrator's deadline fired first) or with "cancelled" (the height was
//! confirmed through another path). Waiters subscribe to a watch channel, so
//! they see the value even if they subscribe after it was set.

use tokio::sync::watch;

use crate::certificate::Certificate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Certified(Certificate),
    Escalate,
    Cancelled,
}

pub struct Completion {
    tx: watch::Sender<Option<StageOutcome>>,
}

impl Completion {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Set the outcome. Returns `false` if it was already resolved.
    pub fn resolve(&self, outcome: StageOutcome) -> bool {
        let mut outcome = Some(outcome);
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = outcome.take();
            true
        })
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn outcome(&self) -> Option<StageOutcome> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> CompletionWaiter {
        CompletionWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaits a [`Completion`]. Owned, so it can be held across the session lock.
pub struct CompletionWaiter {
    rx: watch::Receiver<Option<StageOutcome>>,
}

impl CompletionWaiter {
    /// Resolves when the completion is set. If the completion is dropped
    /// unresolved the stage is treated as cancelled.
    pub async fn wait(mut self) -> StageOutcome {
        match self.rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => (*outcome).clone().unwrap_or(StageOutcome::Cancelled),
            Err(_) => StageOutcome::Cancelled,
        }
    }
}
