//! # Shutdown Signal
//!
//! Cooperative cancellation shared by the ingest loop and the upload worker.
//!
//! Long-lived tasks check the signal at the top of every iteration and never
//! interrupt work in flight, so the time to observe a shutdown is bounded by
//! the longest single iteration:
//! - UDP ingest: the 1 s receive timeout
//! - stdin ingest: immediate (lines arrive from a reader thread over a
//!   channel that is raced against the signal)
//! - upload worker: 100 ms when idle, otherwise the HTTP timeout plus jitter

use std::sync::Arc;

use tokio::sync::watch;

/// Clonable one-way shutdown signal
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Ask every holder of this signal to stop. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Non-blocking check
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal has been triggered
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        // Sender lives in self, so wait_for cannot fail here
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}
