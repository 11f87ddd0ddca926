pub mod analysis;
pub mod capture;
pub mod display;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};

pub use capture::frame::{FrameShape, PixelFormat};
pub use display::annotate::OverlayMode;
pub use pipeline::{Pipeline, PipelineReport};

/// Prefix for environment overrides, e.g. `MOTION__PIPELINE__CHANNEL_CAPACITY=4`
pub const ENV_PREFIX: &str = "MOTION";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub capture: CaptureConfig,
    pub analysis: AnalysisConfig,
    pub display: DisplayConfig,
}

/// Transport and lifecycle settings shared by every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requested slots per buffer pool
    pub slot_count: usize,
    /// Depth of each control channel
    pub channel_capacity: usize,
    /// Upper bound on a single receive before the shutdown flag is re-checked
    pub receive_timeout_ms: u64,
    /// Time stages get to exit after an interrupt before they are abandoned
    pub grace_period_ms: u64,
    /// Time a pool owner waits for its reader to release the channel
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub fps_debug: bool,
    /// Pacing rate used when the source reports no usable frame rate
    pub fallback_fps: f64,
    /// Playback rate for image-directory sources
    pub image_sequence_fps: f64,
    pub fps_log_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Per-pixel difference above which a pixel counts as changed
    pub diff_threshold: u8,
    /// 3x3 dilation passes applied to the change mask
    pub dilate_iterations: u8,
    /// Smallest contour area reported as a detection
    pub min_area: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub window_title: String,
    pub quit_key: char,
    pub overlay: OverlayMode,
    pub blur_detections: bool,
    /// Gaussian kernel width, odd
    pub blur_kernel: u32,
    /// TrueType font for the on-frame clock; without one the clock goes to the window title
    pub font_path: Option<PathBuf>,
    pub headless: bool,
    pub poll_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slot_count: 3,
            channel_capacity: 10,
            receive_timeout_ms: 500,
            grace_period_ms: 2000,
            drain_timeout_ms: 1000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps_debug: false,
            fallback_fps: 30.0,
            image_sequence_fps: 30.0,
            fps_log_interval_ms: 1000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 25,
            dilate_iterations: 2,
            min_area: 500.0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            window_title: "Motion Detection Pipeline".into(),
            quit_key: 'z',
            overlay: OverlayMode::Contours,
            blur_detections: true,
            blur_kernel: 21,
            font_path: None,
            headless: false,
            poll_timeout_ms: 1,
        }
    }
}

impl Config {
    /// Load defaults, then the optional TOML file, then `MOTION__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.pipeline.validate()?;
        Ok(config)
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(eyre!("pipeline.slot_count must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(eyre!("pipeline.channel_capacity must be at least 1"));
        }
        if self.receive_timeout_ms == 0 {
            return Err(eyre!("pipeline.receive_timeout_ms must be non-zero"));
        }
        // Owners must drain and unlink their pools inside the grace period
        if self.drain_timeout_ms >= self.grace_period_ms {
            return Err(eyre!(
                "pipeline.drain_timeout_ms ({}) must be shorter than pipeline.grace_period_ms ({})",
                self.drain_timeout_ms,
                self.grace_period_ms
            ));
        }
        Ok(())
    }

    /// Slots per pool such that no slot is recycled while a message still references it.
    ///
    /// A producer can have `channel_capacity` messages queued, one frame in the
    /// reader's hands and one more written and blocked on `send`.
    pub fn effective_slot_count(&self) -> usize {
        self.slot_count.max(self.channel_capacity + 2)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
