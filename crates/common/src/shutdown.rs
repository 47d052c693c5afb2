//! Process shutdown signalling.
//!
//! A single [`Shutdown`] controller owns a `watch` channel; background loops
//! hold a [`ShutdownSignal`] and select on [`ShutdownSignal::cancelled`]
//! alongside their own work.

use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of the shutdown channel.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Creates a controller that has not been triggered.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Returns a signal that resolves once [`Shutdown::trigger`] is called.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }

    /// Signals every subscriber. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires. Useful for callers without a cancel source.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    /// Returns true if shutdown has already been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is requested or the controller is dropped.
    pub async fn cancelled(&mut self) {
        // A closed channel means the controller is gone; treat it as shutdown.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
