//! Player config file.
//!
//! ```toml
//! url = "ws://localhost:8000/route_sock/42/"
//! frames_dir = "frames"
//!
//! [playback]
//! desired_speed = 50.0
//! max_in_flight = 6
//!
//! [playback.asset]
//! width = 800
//! ```

use anyhow::{Context, Result};
use routeview_core::PlayerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Route stream endpoint
    pub url: Option<String>,

    /// Directory for downloaded images; images are not kept when unset
    pub frames_dir: Option<PathBuf>,

    /// Stop once the last record has been shown
    pub exit_at_end: bool,

    pub playback: PlayerConfig,
}

impl FileConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
