//! Cooperative cancellation for writer runs.
//!
//! Raising the handle stops the stages that pull from the input stream.
//! Work already accepted into intermediate queues is still drained into the
//! batch stores, then the trailing policy decides what happens to partial
//! batches.

use std::sync::Arc;

use futures::future::select_all;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
    /// Own receiver last; ancestors' receivers before it.
    watched: Vec<watch::Receiver<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            watched: vec![receiver],
        }
    }

    /// A handle that fires when either it or `self` is raised.
    /// Raising the child does not affect the parent.
    pub fn child(&self) -> Self {
        let (sender, receiver) = watch::channel(false);
        let mut watched = self.watched.clone();
        watched.push(receiver);
        Self {
            sender: Arc::new(sender),
            watched,
        }
    }

    /// Request cancellation.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        self.watched.iter().any(|rx| *rx.borrow())
    }

    /// Resolves once this handle or any ancestor has been raised.
    pub async fn cancelled(&self) {
        let waits = self.watched.iter().cloned().map(|mut rx| {
            Box::pin(async move {
                let closed = rx.wait_for(|raised| *raised).await.is_err();
                if closed {
                    // Every sender is gone without raising; never fires.
                    std::future::pending::<()>().await;
                }
            })
        });
        select_all(waits).await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}
