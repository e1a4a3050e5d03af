//! Cancellation tokens
//!
//! A task-level cancel flag read at every loop boundary and passed into
//! every suspension point. Built on a watch channel so waiters can park
//! on `cancelled()` inside `tokio::select!`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Grace period granted to in-flight tool calls after a cancel
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Cloneable cancellation token
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Trip the token. Idempotent.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Non-blocking check, used at loop boundaries
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the token is tripped
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without a cancel: never resolves
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken").field("cancelled", &self.is_cancelled()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        token.cancel();
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_immediately_if_tripped() {
        let token = CancelToken::new();
        token.cancel();
        // Must not hang
        token.cancelled().await;
    }
}
