//! Errors raised by the simulation harness itself.

use routeview_core::PlaybackError;
use thiserror::Error;

/// Harness failures. A scenario that runs but violates an invariant is not
/// an error; it is a failed `ScenarioResult`.
#[derive(Debug, Error)]
pub enum SimError {
    /// A simulation parameter is out of range
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),

    /// The engine rejected its configuration
    #[error(transparent)]
    Playback(#[from] PlaybackError),

    /// The simulated server side of the stream is gone
    #[error("Simulated link closed")]
    LinkClosed,
}

impl SimError {
    pub(crate) fn distribution(err: impl std::fmt::Display) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
