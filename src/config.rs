//! Configuration management for animation and recording parameters
//!
//! This module provides runtime configuration loading from JSON files,
//! enabling tuning of loudness thresholds, blink cadence and recording
//! output without recompilation. Every section has defaults so a partial
//! (or missing) file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::analysis::loudness::LoudnessParams;
use crate::analysis::viseme::VisemeThresholds;
use crate::animation::blink::BlinkTimings;
use crate::error::MediaError;
use crate::sprite::sheet::grid_frame_count;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub viseme: VisemeConfig,
    #[serde(default)]
    pub blink: BlinkConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub grid: GridConfig,
}

/// Offline loudness analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Loudness frames per second
    pub fps: f64,
    /// Smoothed RMS above which the mouth is considered open
    pub threshold: f64,
    /// Seconds the mouth stays open after loudness last exceeded threshold
    pub release_time: f64,
    /// Weight of the newest RMS value in the exponential smoother
    pub smoothing: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fps: 10.0,
            threshold: 0.01,
            release_time: 0.1,
            smoothing: 0.3,
        }
    }
}

impl AnalysisConfig {
    pub fn loudness_params(&self) -> LoudnessParams {
        LoudnessParams {
            fps: self.fps,
            threshold: self.threshold,
            release_time: self.release_time,
            smoothing: self.smoothing,
        }
    }
}

/// Three-way mouth classification thresholds
///
/// Both values are optional; missing ones are derived from
/// `analysis.threshold`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisemeConfig {
    pub mid_threshold: Option<f64>,
    pub open_threshold: Option<f64>,
}

impl VisemeConfig {
    pub fn thresholds(&self, base_threshold: f64) -> VisemeThresholds {
        VisemeThresholds::from_base(base_threshold)
            .with_overrides(self.mid_threshold, self.open_threshold)
    }
}

/// Blink cadence in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    pub open_min_ms: u64,
    pub open_max_ms: u64,
    pub closed_min_ms: u64,
    pub closed_max_ms: u64,
    /// Fixed RNG seed for reproducible blinking
    pub seed: Option<u64>,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            open_min_ms: 2000,
            open_max_ms: 6000,
            closed_min_ms: 100,
            closed_max_ms: 180,
            seed: None,
        }
    }
}

impl BlinkConfig {
    pub fn timings(&self) -> BlinkTimings {
        BlinkTimings::new(
            Duration::from_millis(self.open_min_ms),
            Duration::from_millis(self.open_max_ms),
            Duration::from_millis(self.closed_min_ms),
            Duration::from_millis(self.closed_max_ms),
        )
    }
}

/// Live preview loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Preview redraws per second
    pub fps: f64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { fps: 10.0 }
    }
}

impl PreviewConfig {
    pub fn tick(&self) -> Duration {
        interval_for_fps(self.fps)
    }
}

/// Recording / muxing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Output container; only "avi" (MJPEG + PCM) is produced
    pub container: String,
    /// Surface capture rate of the video track
    pub capture_fps: u32,
    /// Wait after the last loudness frame before stopping
    pub drain_ms: u64,
    /// JPEG quality of captured frames (1-100)
    pub jpeg_quality: u8,
    /// Color used to flatten transparent sprite pixels
    pub background: [u8; 3],
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            container: "avi".to_string(),
            capture_fps: 30,
            drain_ms: 500,
            jpeg_quality: 85,
            background: [255, 255, 255],
        }
    }
}

impl RecordingConfig {
    pub fn drain(&self) -> Duration {
        Duration::from_millis(self.drain_ms)
    }
}

/// Sprite sheet grid layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    pub columns: u32,
    pub rows: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            columns: 4,
            rows: 4,
        }
    }
}

impl GridConfig {
    /// Frames per sheet; an empty or overflowing grid is an invalid sheet.
    pub fn frame_count(&self) -> Result<usize, MediaError> {
        grid_frame_count(self.columns, self.rows)
    }
}

/// Convert a rate into a tick interval, falling back to 10 Hz for
/// non-positive or non-finite rates.
pub fn interval_for_fps(fps: f64) -> Duration {
    if fps.is_finite() && fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        log::warn!("[Config] Invalid rate {}, using 10 Hz", fps);
        Duration::from_millis(100)
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file doesn't exist or
    /// its JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/animator_config.json")
    }

    pub fn viseme_thresholds(&self) -> VisemeThresholds {
        self.viseme.thresholds(self.analysis.threshold)
    }
}
