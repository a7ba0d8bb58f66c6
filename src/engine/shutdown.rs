//! Broadcast shutdown signal
//!
//! Every clone observes the same signal. Once triggered it stays triggered,
//! so tasks that start waiting late return immediately.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Signal every holder of this shutdown (idempotent).
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        // the sender lives as long as any clone, so an error cannot happen
        // while we hold `self`; treat it as shutdown anyway
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
