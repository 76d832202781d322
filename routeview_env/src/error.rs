//! Error types for the RouteView environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EnvError {
    /// Stream transport failed (socket error, handshake refused, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The stream transport is closed and will not deliver more messages
    #[error("Transport closed")]
    Closed,

    /// An image asset could not be fetched
    #[error("Asset fetch failed for {url}: {reason}")]
    AssetFetch { url: String, reason: String },

    /// The image service refused the request outright (missing pano, bad
    /// key); asking again gives the same answer
    #[error("Asset unavailable at {url}: HTTP {status}")]
    AssetUnavailable { url: String, status: u16 },

    /// Message serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates an asset fetch error.
    pub fn asset(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::AssetFetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a permanent asset error for an HTTP status.
    pub fn unavailable(url: impl Into<String>, status: u16) -> Self {
        Self::AssetUnavailable { url: url.into(), status }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AssetFetch { .. } | Self::Timeout(_) | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_error_display() {
        let err = EnvError::asset("https://img/1", "503 Service Unavailable");
        assert_eq!(
            err.to_string(),
            "Asset fetch failed for https://img/1: 503 Service Unavailable"
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_closed_is_not_transient() {
        assert!(!EnvError::Closed.is_transient());
        assert!(!EnvError::Serialization("bad".into()).is_transient());
    }

    #[test]
    fn test_unavailable_asset_is_permanent() {
        let err = EnvError::unavailable("https://img/2", 404);
        assert_eq!(err.to_string(), "Asset unavailable at https://img/2: HTTP 404");
        assert!(!err.is_transient());
    }
}
