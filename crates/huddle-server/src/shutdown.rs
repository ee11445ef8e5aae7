//! Graceful shutdown: one `CancellationToken` observed by every long-lived
//! task, plus the join handles to await once it fires.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Used when the caller does not supply a drain timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates shutdown of the registry task, the bridge tasks and the HTTP
/// listener.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no tracked tasks.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Track a task to be awaited by [`Self::graceful_shutdown`].
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks.lock().push(handle);
    }

    /// Number of tracked tasks not yet drained.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel the token without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for every tracked task.
    /// Tasks still running afterwards are aborted.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();

        let handles = std::mem::take(&mut *self.tasks.lock());
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("shutdown timed out after {timeout:?}, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
        assert_eq!(coord.tracked(), 0);
    }

    #[test]
    fn token_propagation() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        assert!(!token.is_cancelled());
        coord.shutdown();
        coord.shutdown();
        assert!(token.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tracked_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        coord.track(tokio::spawn(async move {
            token.cancelled().await;
            let _ = done_tx.send(());
        }));
        assert_eq!(coord.tracked(), 1);

        coord.graceful_shutdown(None).await;
        assert!(coord.is_shutting_down());
        assert_eq!(coord.tracked(), 0);
        assert!(done_rx.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_aborts_stragglers() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let abort = handle.abort_handle();
        coord.track(handle);

        coord
            .graceful_shutdown(Some(Duration::from_millis(100)))
            .await;
        for _ in 0..10 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(abort.is_finished());
    }
}
