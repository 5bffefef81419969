//! OS signal handling.

use crate::lifecycle::Shutdown;

/// Spawn a task that triggers `shutdown` on Ctrl-C.
///
/// The task exits on its own if shutdown is triggered elsewhere first.
pub fn cancel_on_ctrl_c(shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    tracing::warn!("Received Ctrl-C, cancelling outstanding requests");
                    shutdown.trigger();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
            },
            _ = shutdown.triggered() => {}
        }
    })
}
