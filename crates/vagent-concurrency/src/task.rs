//! A future paired with a cooperative abort signal (spec §4.8, §5's
//! cancellation semantics), grounded in the teacher's
//! `AudioListenerHandle`/`CancellationToken` idiom (`audio_listener.rs`):
//! a fresh token per spawn so the task is restartable, `stop()`/
//! `gracefully_cancel()` cancels then joins, swallowing the resulting
//! cancellation error.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned task plus the token that cancels it.
///
/// `T::spawn` hands the task's body a child token to check at suspension
/// points (§5: "tasks check the signal after each suspension point"); the
/// parent `CancellableTask` owns the token that cancels the whole subtree.
pub struct CancellableTask<T> {
    token: CancellationToken,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> CancellableTask<T> {
    /// Spawn `fut`, handing its body a `CancellationToken` it is expected to
    /// poll (e.g. via `tokio::select!` against `token.cancelled()`).
    pub fn spawn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: 'static,
    {
        let token = CancellationToken::new();
        let child = token.child_token();
        let handle = tokio::spawn(f(child));
        Self { token, handle }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel the token, then wait for the task to finish. Errors from a
    /// cancelled join are swallowed: cancellation is the expected outcome,
    /// not a failure (spec §5: "`gracefullyCancel(task)` cancels then
    /// awaits, swallowing the resulting cancellation error").
    pub async fn gracefully_cancel(self) -> Option<T> {
        self.token.cancel();
        match self.handle.await {
            Ok(value) => Some(value),
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                tracing::warn!(error = %e, "cancelled task panicked");
                None
            }
        }
    }

    /// Wait for normal completion without cancelling.
    pub async fn join(self) -> Result<T, tokio::task::JoinError> {
        self.handle.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn gracefully_cancel_stops_a_looping_task() {
        let cleaned_up = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cleaned_up);

        let task = CancellableTask::spawn(move |token| async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        flag.store(true, Ordering::SeqCst);
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {}
                }
            }
            "done"
        });

        let result = task.gracefully_cancel().await;
        assert_eq!(result, Some("done"));
        assert!(cleaned_up.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn join_returns_value_on_natural_completion() {
        let task = CancellableTask::spawn(|_token| async move { 42 });
        assert_eq!(task.join().await.unwrap(), 42);
    }
}
