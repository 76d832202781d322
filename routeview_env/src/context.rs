//! Core environment context trait for RouteView playback.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The central interface for Environment Interaction.
///
/// This trait abstracts the clock and the task spawner so that the playback
/// runtime can run against real time (tokio) or a virtual clock (simulation).
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`, `tokio::spawn`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
#[async_trait]
pub trait PlaybackContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Frame timers and retry backoffs are scheduled against this clock.
    fn now(&self) -> Duration;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances the virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Used for asset fetches; spawned tasks must only report back through
    /// channels and never touch engine state directly.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}
