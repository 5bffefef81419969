//! Shutdown coordination for test runs.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Returned by any suspension point interrupted by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Coordinator for graceful shutdown.
///
/// Wraps a root cancellation token; long-running work observes either the
/// root or a child of it.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A token cancelled with the root, but cancellable on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_cancels_children() {
        let shutdown = Shutdown::new();
        let child = shutdown.child_token();
        assert!(!shutdown.is_triggered());

        shutdown.trigger();
        assert!(shutdown.is_triggered());
        assert!(child.is_cancelled());
        shutdown.triggered().await;
    }

    #[test]
    fn test_child_cancel_does_not_propagate_up() {
        let shutdown = Shutdown::new();
        let child = shutdown.child_token();
        child.cancel();
        assert!(!shutdown.is_triggered());
    }

    #[test]
    fn test_clones_share_state() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        clone.trigger();
        assert!(shutdown.is_triggered());
    }
}
