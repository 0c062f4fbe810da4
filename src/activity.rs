// In-flight request tracking for loading indicators

use std::sync::Arc;
use tokio::sync::watch;

/// Counts requests currently running through the pipeline
#[derive(Clone)]
pub struct ActivityTracker {
    tx: Arc<watch::Sender<usize>>,
}

/// Keeps one request counted until dropped
pub struct ActivityGuard {
    tx: Arc<watch::Sender<usize>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Receiver that observes the in-flight count
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }

    pub fn in_flight(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn track(&self) -> ActivityGuard {
        self.tx.send_modify(|n| *n += 1);
        ActivityGuard {
            tx: self.tx.clone(),
        }
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.tx.send_modify(|n| *n = n.saturating_sub(1));
    }
}
