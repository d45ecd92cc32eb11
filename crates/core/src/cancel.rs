//! Cancellation token shared between a scenario driver and its tasks
//!
//! A token starts live and can be cancelled exactly once; every clone
//! observes the cancellation. Tasks poll [`CancellationToken::is_cancelled`]
//! between iterations or race [`CancellationToken::cancelled`] against a
//! suspension point with `tokio::select!`.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable one-way stop signal
#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    /// Create a live token
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        CancellationToken { tx: Arc::new(tx) }
    }

    /// Signal cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
