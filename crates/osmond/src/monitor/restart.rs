//! Delayed restarts.
//!
//! Restarts are plain tokio tasks tracked by a `TaskTracker`. Each one
//! gets a child token of the scheduler's token, so a single restart can
//! be cancelled by its monitor and all of them at once by the supervisor.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Owner of all pending delayed restarts of one supervisor run.
#[derive(Debug, Clone, Default)]
pub struct RestartScheduler {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl RestartScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `restart` after `delay` unless cancelled first.
    ///
    /// Returns the token that cancels this restart, or `None` if the
    /// scheduler is already shut down. Once the delay has elapsed the
    /// restart runs to completion even if the scheduler shuts down.
    pub fn schedule<F, Fut>(
        &self,
        task: &str,
        delay: Duration,
        restart: F,
    ) -> Option<CancellationToken>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            debug!(task = %task, "Restart scheduler shut down, not scheduling");
            return None;
        }

        let cancel = self.token.child_token();
        let guard = cancel.clone();
        let task = task.to_string();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = guard.cancelled() => {
                    debug!(task = %task, "Pending restart cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    restart().await;
                }
            }
        });

        Some(cancel)
    }

    /// Number of restarts pending or in progress.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancels every pending restart and waits for in-flight ones.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Restart scheduler drained");
    }
}
