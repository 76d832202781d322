//! Player configuration.

use crate::error::PlaybackError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of the external image service URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetUrlConfig {
    /// Endpoint without query string
    pub base_url: String,

    /// Requested image size in pixels
    pub width: u32,
    pub height: u32,

    /// Horizontal field of view in degrees
    pub fov: u32,
}

impl Default for AssetUrlConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com/maps/api/streetview".to_string(),
            width: 640,
            height: 480,
            fov: 110,
        }
    }
}

impl AssetUrlConfig {
    /// Builds the image URL for one pano.
    ///
    /// `api_key` is appended as `&key=` when the server has provided one.
    pub fn url_for(&self, pano_id: &str, heading: f64, api_key: Option<&str>) -> String {
        let mut url = format!(
            "{}?size={}x{}&pano={}&heading={}&sensor=false&fov={}",
            self.base_url, self.width, self.height, pano_id, heading, self.fov
        );
        if let Some(key) = api_key {
            url.push_str("&key=");
            url.push_str(key);
        }
        url
    }
}

/// Exponential backoff for failed asset loads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per asset, including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retrying after the given failed attempt (1-based).
    pub fn backoff(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

/// Configuration for a playback session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Nominal playback speed in meters per second (default: 300 km/h)
    pub desired_speed: f64,

    /// Concurrent image loads (default: 8)
    pub max_in_flight: usize,

    /// Records ahead of the cursor that may be prefetched (default: 500)
    pub lookahead: usize,

    /// Frontier advances per fill pass before yielding (default: 50)
    pub prefetch_batch: usize,

    /// Delay before a yielded fill pass resumes (default: 100ms)
    pub prefetch_yield_ms: u64,

    /// Buffer depth beyond which the estimator stops counting (default: 9s)
    pub buffer_horizon_secs: f64,

    /// Buffer depth at which playback speed stops increasing (default: 8s)
    pub speed_saturation_secs: f64,

    /// Attempts per image before showing a placeholder (default: 4)
    pub max_fetch_attempts: u32,

    pub retry_initial_ms: u64,
    pub retry_max_ms: u64,

    /// Per-request timeout for image loads (default: 15s)
    pub asset_timeout_ms: u64,

    /// Start playing as soon as the session opens
    pub autoplay: bool,

    pub asset: AssetUrlConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            desired_speed: 300.0 / 3.6,
            max_in_flight: 8,
            lookahead: 500,
            prefetch_batch: 50,
            prefetch_yield_ms: 100,
            buffer_horizon_secs: 9.0,
            speed_saturation_secs: 8.0,
            max_fetch_attempts: 4,
            retry_initial_ms: 250,
            retry_max_ms: 4_000,
            asset_timeout_ms: 15_000,
            autoplay: true,
            asset: AssetUrlConfig::default(),
        }
    }
}

impl PlayerConfig {
    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), PlaybackError> {
        if !(self.desired_speed.is_finite() && self.desired_speed > 0.0) {
            return Err(PlaybackError::InvalidConfig(format!(
                "desired_speed must be positive, got {}",
                self.desired_speed
            )));
        }
        if self.max_in_flight == 0 {
            return Err(PlaybackError::InvalidConfig("max_in_flight must be at least 1".into()));
        }
        if self.prefetch_batch == 0 {
            return Err(PlaybackError::InvalidConfig("prefetch_batch must be at least 1".into()));
        }
        if self.max_fetch_attempts == 0 {
            return Err(PlaybackError::InvalidConfig(
                "max_fetch_attempts must be at least 1".into(),
            ));
        }
        if self.buffer_horizon_secs < 0.0 || self.speed_saturation_secs < 0.0 {
            return Err(PlaybackError::InvalidConfig("buffer horizons must not be negative".into()));
        }
        Ok(())
    }

    pub fn prefetch_yield(&self) -> Duration {
        Duration::from_millis(self.prefetch_yield_ms)
    }

    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_fetch_attempts,
            initial_backoff: Duration::from_millis(self.retry_initial_ms),
            max_backoff: Duration::from_millis(self.retry_max_ms),
        }
    }
}
