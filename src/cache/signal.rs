//! Cancellation Signals
//!
//! Single-use signals used to preempt scheduler sleeps, retire a region's
//! scheduler, and stop every scheduler when a partition shuts down.

use std::sync::Arc;

use tokio::sync::watch;

// == Signal ==
/// A one-shot, cloneable cancellation signal.
///
/// Once fired it stays fired; callers that need a fresh signal must create a
/// new one. Firing an already-fired signal is a no-op.
#[derive(Debug, Clone)]
pub struct Signal {
    tx: Arc<watch::Sender<bool>>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fires the signal, waking every pending `fired()` future.
    pub fn fire(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal has fired (immediately if it already has).
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
