//! Image asset fetching abstraction.

use crate::error::EnvError;
use async_trait::async_trait;

/// A successfully fetched image asset.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedAsset {
    /// Resolved location of the image, ready to display
    /// (a local file path, a cache key, or the original URL)
    pub uri: String,

    /// Size of the image payload in bytes
    pub size_bytes: usize,
}

impl FetchedAsset {
    /// Creates a fetched asset record.
    pub fn new(uri: impl Into<String>, size_bytes: usize) -> Self {
        Self {
            uri: uri.into(),
            size_bytes,
        }
    }
}

/// Abstraction over the external panorama image service.
///
/// # Implementations
///
/// - **Production**: HTTP GET against the street-level imagery endpoint
/// - **Simulation**: seeded latency and failure injection
///
/// # Failure
/// Implementations report failures as `EnvError::AssetFetch` or
/// `EnvError::Timeout`, and as `EnvError::AssetUnavailable` when asking again
/// cannot help. Retry policy is owned by the caller.
#[async_trait]
pub trait AssetFetcher: Send + Sync + 'static {
    /// Fetches the image at `url`.
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, EnvError>;
}
