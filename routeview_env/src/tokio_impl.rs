//! Production implementation of PlaybackContext using Tokio.

use crate::PlaybackContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Production context backed by the Tokio clock.
///
/// Uses `tokio::time::Instant` so that tests running on a paused runtime
/// observe the same clock the timers are armed against.
pub struct TokioContext {
    /// `now()` is measured from here
    start: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// The runtime and spawned fetch tasks hold the context by `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaybackContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sleep_moves_now_forward() {
        let ctx = TokioContext::new();
        let before = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        assert!(ctx.now() - before >= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_context_follows_paused_clock() {
        let ctx = TokioContext::new();
        ctx.sleep(Duration::from_secs(3)).await;
        assert_eq!(ctx.now(), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_tokio_context_spawn_runs_task() {
        let ctx = TokioContext::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        ctx.spawn("counter", async move {
            let _ = tx.send(42u32);
        });
        assert_eq!(rx.await.ok(), Some(42));
    }
}
