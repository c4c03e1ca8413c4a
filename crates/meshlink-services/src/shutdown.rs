//! Shared close signal.
//!
//! One `CloseNotify` is cloned into every long-running task and every wait
//! that has to give up when the router stops.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Clone)]
pub struct CloseNotify {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CloseNotify {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Signal every waiter. Idempotent.
    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for CloseNotify {
    fn default() -> Self {
        Self::new()
    }
}
