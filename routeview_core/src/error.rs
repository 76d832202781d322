//! Errors surfaced by the playback engine.

use routeview_env::EnvError;
use thiserror::Error;

/// Errors that can occur while ingesting or playing a pano stream.
///
/// `StreamDesync`, `Upstream` and `Protocol` are fatal to the session: the
/// engine enters `PlaybackState::Faulted` and refuses further stream input.
/// The remaining variants are returned to the caller of a single action.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// A message is inconsistent with the current sequence
    #[error("Stream desync: {reason}")]
    StreamDesync { reason: String },

    /// The server reported an error for this session
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A message could not be decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The session already failed; tear it down and start a new one
    #[error("Session faulted")]
    SessionFaulted,

    /// The requested action is disabled by the current processing status
    #[error("Action unavailable: {0}")]
    ActionUnavailable(&'static str),

    /// The stream transport is disconnected
    #[error("Transport is down")]
    TransportDown,

    /// Configuration value out of range
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Environment layer failure
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl PlaybackError {
    /// Creates a desync error.
    pub fn desync(reason: impl Into<String>) -> Self {
        Self::StreamDesync {
            reason: reason.into(),
        }
    }

    /// Returns true if this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StreamDesync { .. } | Self::Upstream(_) | Self::Protocol(_) | Self::SessionFaulted
        )
    }
}

impl From<serde_json::Error> for PlaybackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
