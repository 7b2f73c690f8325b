//! Cooperative cancellation.
//!
//! Checked at the documented suspension points: the top of each runner
//! iteration, before each tool dispatch, and before each VCS call.

use tokio::sync::watch;

/// Cloneable cancellation flag. Cancelling is one-way.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for signals with no external source.
    _keepalive: Option<std::sync::Arc<watch::Sender<bool>>>,
}

/// Owning side of a [`CancellationSignal`].
#[derive(Debug)]
pub struct CancellationSource {
    tx: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a signal observers can poll or await.
    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }

    /// Flip the flag. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSignal {
    /// Signal that can never fire; for call sites without a real source.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(std::sync::Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancelled. Returns immediately if already cancelled.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if self.is_cancelled() {
                return;
            }
        }
        // Sender dropped without cancelling: treat as never-cancelled and
        // park forever so select! arms don't spuriously win.
        std::future::pending::<()>().await;
    }
}
