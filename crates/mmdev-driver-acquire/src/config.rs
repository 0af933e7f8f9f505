//! `AcquireCamera` settings as found in a device's `config` table.

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::compositor::WaitPolicy;

/// Demo frame width.
pub const DEMO_IMAGE_WIDTH: u32 = 640;
/// Demo frame height.
pub const DEMO_IMAGE_HEIGHT: u32 = 480;

/// Settings from the device's `config` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquireCameraConfig {
    /// Demo geometry (fixed width/height/depth) instead of the source's own.
    #[serde(default = "default_demo")]
    pub demo: bool,

    /// Demo frame width in pixels (default: 640)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Demo frame height in pixels (default: 480)
    #[serde(default = "default_height")]
    pub height: u32,

    /// Demo bytes per pixel, 1 or 2 (default: 1)
    #[serde(default = "default_bytes_per_pixel")]
    pub bytes_per_pixel: u32,

    /// Upper bound of one wait step while a stream is empty (default: 5)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-stream read deadline; 0 waits forever (default: 5000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Regex selecting the camera of stream 0 and stream 1.
    #[serde(default = "default_camera_patterns")]
    pub camera_patterns: Vec<String>,

    /// Regex selecting the storage sink of both streams.
    #[serde(default = "default_storage_pattern")]
    pub storage_pattern: String,

    /// Fixed noise seed for the simulated runtime.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Simulated ring capacity per stream, in frames.
    #[serde(default = "default_ring_frames")]
    pub ring_frames: usize,
}

fn default_demo() -> bool {
    true
}
fn default_width() -> u32 {
    DEMO_IMAGE_WIDTH
}
fn default_height() -> u32 {
    DEMO_IMAGE_HEIGHT
}
fn default_bytes_per_pixel() -> u32 {
    1
}
fn default_poll_interval_ms() -> u64 {
    5
}
fn default_timeout_ms() -> u64 {
    5_000
}
fn default_camera_patterns() -> Vec<String> {
    vec!["simulated.*random.*".to_string(), "simulated.*sin.*".to_string()]
}
fn default_storage_pattern() -> String {
    "Trash".to_string()
}
fn default_ring_frames() -> usize {
    4
}

impl Default for AcquireCameraConfig {
    fn default() -> Self {
        Self {
            demo: default_demo(),
            width: default_width(),
            height: default_height(),
            bytes_per_pixel: default_bytes_per_pixel(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
            camera_patterns: default_camera_patterns(),
            storage_pattern: default_storage_pattern(),
            seed: None,
            ring_frames: default_ring_frames(),
        }
    }
}

impl AcquireCameraConfig {
    /// Parse a device `config` table, filling defaults.
    pub fn from_toml(config: toml::Value) -> Result<Self> {
        Ok(config.try_into()?)
    }

    /// Check geometry, wait settings and patterns.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("Image size must be non-zero");
        }
        if !matches!(self.bytes_per_pixel, 1 | 2) {
            bail!("bytes_per_pixel must be 1 or 2, got {}", self.bytes_per_pixel);
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be positive");
        }
        if self.camera_patterns.len() != 2 {
            bail!(
                "camera_patterns needs one pattern per stream (2), got {}",
                self.camera_patterns.len()
            );
        }
        for pattern in self.camera_patterns.iter().chain([&self.storage_pattern]) {
            Regex::new(pattern).map_err(|e| anyhow::anyhow!("Invalid pattern '{}': {}", pattern, e))?;
        }
        if self.ring_frames == 0 {
            bail!("ring_frames must be at least 1");
        }
        Ok(())
    }

    /// Wait settings for the compositor.
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            timeout: (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms)),
        }
    }
}
