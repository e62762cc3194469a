//! Pipeline and simulator configuration.
//!
//! The timing thresholds below are sensor-specific tuning: they were
//! measured on one platform and belong in configuration, not code.

use crate::shot::{PixelFormat, Size};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which end of a full frame queue gives way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// Evict the oldest completed frames.
    DropOldest,
    /// Evict the most recently completed frames.
    #[default]
    DropNewest,
}

/// Time the sensor takes to read out one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadoutModel {
    /// Readout time for frames up to `tall_threshold_rows` rows, in µs.
    pub short_us: u32,
    /// Readout time for taller frames, in µs.
    pub tall_us: u32,
    /// Frames taller than this many rows use `tall_us`.
    pub tall_threshold_rows: u32,
}

impl Default for ReadoutModel {
    fn default() -> Self {
        Self {
            short_us: 33_000,
            tall_us: 76_000,
            tall_threshold_rows: 1008,
        }
    }
}

impl ReadoutModel {
    /// Readout time for a frame of `size`, µs.
    pub fn readout_us(&self, size: Size) -> i64 {
        if size.height > self.tall_threshold_rows {
            self.tall_us as i64
        } else {
            self.short_us as i64
        }
    }
}

/// Time the image signal processor adds after readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IspModel {
    /// Processed (YUV) frames up to `large_threshold` in either dimension, in µs.
    pub yuv_us: u32,
    /// Processed frames larger than `large_threshold` in both dimensions, in µs.
    pub yuv_large_us: u32,
    /// Side length above which the large-frame time applies, pixels.
    pub large_threshold: u32,
    /// Raw frames bypass most of the ISP, in µs.
    pub raw_us: u32,
}

impl Default for IspModel {
    fn default() -> Self {
        Self {
            yuv_us: 10_000,
            yuv_large_us: 65_000,
            large_threshold: 1024,
            raw_us: 0,
        }
    }
}

impl IspModel {
    /// Processing time for a frame of `size` and `format`, µs.
    pub fn isp_us(&self, size: Size, format: PixelFormat) -> i64 {
        match format {
            PixelFormat::Raw => self.raw_us as i64,
            _ if size.width > self.large_threshold && size.height > self.large_threshold => {
                self.yuv_large_us as i64
            }
            _ => self.yuv_us as i64,
        }
    }
}

/// Capture daemon tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// A buffer this much later than predicted means the frame was lost, µs.
    pub late_slack_us: u32,
    /// A buffer this much earlier than predicted belongs to no request, µs.
    pub early_slack_us: u32,
    /// How long the handler waits for a record to match a fresh buffer.
    pub in_flight_grace_ms: u64,
    /// Frame queue capacity before the drop policy applies.
    pub frame_limit: usize,
    /// What happens to frames beyond `frame_limit`.
    pub drop_policy: DropPolicy,
    /// Actions are slept towards until this close, then busy-waited, µs.
    pub action_spin_us: u32,
    /// Bound on waiting for a locked caller-owned image, µs.
    pub image_lock_timeout_us: u32,
    /// Sleep between checks while the handler yields during a flush.
    pub flush_poll_ms: u64,
    /// Minimum gap between exposure end and the next frame start, µs.
    pub exposure_overhead_us: u32,
    /// Readout timing used for predictions.
    pub readout: ReadoutModel,
    /// Processing timing used for predictions.
    pub isp: IspModel,
    /// Capacity of the event channel.
    pub event_capacity: usize,
    /// How long `stop` waits for in-flight frames to drain.
    pub stop_timeout_ms: u64,
    /// Request real-time scheduling for the pipeline threads.
    pub realtime_priorities: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            late_slack_us: 25_000,
            early_slack_us: 10_000,
            in_flight_grace_ms: 40,
            frame_limit: 128,
            drop_policy: DropPolicy::DropNewest,
            action_spin_us: 500,
            image_lock_timeout_us: 10_000,
            flush_poll_ms: 10,
            exposure_overhead_us: 400,
            readout: ReadoutModel::default(),
            isp: IspModel::default(),
            event_capacity: 256,
            stop_timeout_ms: 2_000,
            realtime_priorities: false,
        }
    }
}

impl DaemonConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.late_slack_us == 0 || self.early_slack_us == 0 {
            return Err(ConfigError::InvalidSlack);
        }
        if self.frame_limit == 0 {
            return Err(ConfigError::InvalidFrameLimit);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidEventCapacity);
        }
        if self.flush_poll_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        Ok(())
    }

    /// `in_flight_grace_ms` as a duration.
    pub fn in_flight_grace(&self) -> Duration {
        Duration::from_millis(self.in_flight_grace_ms)
    }

    /// `image_lock_timeout_us` as a duration.
    pub fn image_lock_timeout(&self) -> Duration {
        Duration::from_micros(self.image_lock_timeout_us as u64)
    }

    /// `flush_poll_ms` as a duration.
    pub fn flush_poll(&self) -> Duration {
        Duration::from_millis(self.flush_poll_ms)
    }

    /// `stop_timeout_ms` as a duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Simulated sensor behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Shortest supported exposure, µs.
    pub min_exposure_us: u32,
    /// Longest supported exposure, µs.
    pub max_exposure_us: u32,
    /// Shortest supported frame time, µs.
    pub min_frame_time_us: u32,
    /// Longest supported frame time, µs.
    pub max_frame_time_us: u32,
    /// Lowest supported gain.
    pub min_gain: f32,
    /// Highest supported gain.
    pub max_gain: f32,
    /// Smallest supported image.
    pub min_size: Size,
    /// Largest supported image.
    pub max_size: Size,
    /// Readout timing the simulator reproduces.
    pub readout: ReadoutModel,
    /// Processing timing the simulator reproduces.
    pub isp: IspModel,
    /// Uniform jitter added to buffer timestamps, ± µs.
    pub timing_noise_us: u32,
    /// Seed for the jitter generator.
    pub seed: u64,
    /// Lose every n-th frame (0 never).
    pub drop_every: u32,
    /// Driver buffers; frames completing while all are held are lost.
    pub buffer_count: usize,
    /// Upper bound on a blocking buffer acquire.
    pub acquire_timeout_ms: u64,
    /// Upper bound on waiting for a vertical sync.
    pub vsync_timeout_ms: u64,
    /// Pause between idle ticks while not streaming.
    pub idle_tick_ms: u64,
    /// Statistics kept for late lookups.
    pub stats_history: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            min_exposure_us: 50,
            max_exposure_us: 1_000_000,
            min_frame_time_us: 33_333,
            max_frame_time_us: 1_000_000,
            min_gain: 1.0,
            max_gain: 32.0,
            min_size: Size::new(160, 120),
            max_size: Size::new(2592, 1968),
            readout: ReadoutModel::default(),
            isp: IspModel::default(),
            timing_noise_us: 0,
            seed: 0x5eed,
            drop_every: 0,
            buffer_count: 6,
            acquire_timeout_ms: 100,
            vsync_timeout_ms: 1_000,
            idle_tick_ms: 5,
            stats_history: 16,
        }
    }
}

impl SimConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_exposure_us > self.max_exposure_us {
            return Err(ConfigError::InvalidSensorRange("exposure".into()));
        }
        if self.min_frame_time_us == 0 || self.min_frame_time_us > self.max_frame_time_us {
            return Err(ConfigError::InvalidSensorRange("frame time".into()));
        }
        if !(self.min_gain > 0.0 && self.min_gain <= self.max_gain) {
            return Err(ConfigError::InvalidSensorRange("gain".into()));
        }
        if self.min_size.is_empty()
            || self.min_size.width > self.max_size.width
            || self.min_size.height > self.max_size.height
        {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::InvalidBufferCount);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A width or height is zero or inverted.
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    /// A timing slack is zero.
    #[error("timing slack must be positive")]
    InvalidSlack,
    /// The frame limit is zero.
    #[error("frame limit must be at least 1")]
    InvalidFrameLimit,
    /// The event channel would hold nothing.
    #[error("event capacity must be at least 1")]
    InvalidEventCapacity,
    /// The flush poll interval is zero.
    #[error("flush poll interval must be positive")]
    InvalidPollInterval,
    /// The simulator has no buffers.
    #[error("simulated sensor needs at least one buffer")]
    InvalidBufferCount,
    /// A min/max pair is inverted; names the pair.
    #[error("invalid sensor {0} range")]
    InvalidSensorRange(String),
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The file is not valid TOML for this format.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Capture daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Simulated sensor settings.
    #[serde(default)]
    pub simulator: SimConfig,
    /// Logging and output settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Frames to capture when not streaming continuously.
    pub frame_count: u32,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            frame_count: 20,
            metrics_port: 0,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.daemon.validate()?;
        config.simulator.validate()?;
        Ok(config)
    }
}
