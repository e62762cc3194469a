//! Sensor driver abstraction.
//!
//! The capture daemon only ever talks to the hardware through
//! [`SensorBackend`]. A real implementation wraps a kernel video driver;
//! [`SimulatedSensor`] reproduces the timing behavior of one in software.

mod sim;

pub use sim::{ControlWrite, SimulatedSensor};

use crate::clock::{Clock, Timestamp};
use crate::shot::{Histogram, HistogramConfig, SensorMode, SharpnessConfig, SharpnessMap, Size};
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a sensor backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No device node answered at the given path.
    #[error("sensor device not found: {0}")]
    DeviceNotFound(String),
    /// A call needed an open device.
    #[error("sensor device is not open")]
    NotOpen,
    /// A call needed a streaming sensor.
    #[error("sensor is not streaming")]
    NotStreaming,
    /// The driver rejected the requested mode.
    #[error("unsupported sensor mode: {0}")]
    UnsupportedMode(String),
    /// The driver has no such control.
    #[error("control {0:#x} is not supported")]
    UnknownControl(u32),
    /// A blocking call hit its deadline.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    /// Any other driver failure.
    #[error("driver I/O failed: {0}")]
    Io(String),
}

/// Identifier of an integer driver control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlId(pub u32);

impl ControlId {
    /// Flash intensity level.
    pub const FLASH_INTENSITY: ControlId = ControlId(0x0100_0001);
    /// Flash pulse length, µs.
    pub const FLASH_TIMEOUT: ControlId = ControlId(0x0100_0002);
    /// Triggers a flash pulse.
    pub const FLASH_STROBE: ControlId = ControlId(0x0100_0003);
    /// Ends a strobe early.
    pub const FLASH_STROBE_STOP: ControlId = ControlId(0x0100_0004);
    /// Absolute focus position, motor ticks.
    pub const FOCUS_ABSOLUTE: ControlId = ControlId(0x0100_0010);
    /// Focus ramp time, µs per tick.
    pub const FOCUS_RAMP_TIME: ControlId = ControlId(0x0100_0011);
}

/// Driver-side token for a filled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

/// A filled frame buffer on loan from the driver.
#[derive(Debug, Clone)]
pub struct RawBuffer {
    /// When the sensor finished producing the buffer.
    pub timestamp: Timestamp,
    /// Pixel bytes as streamed.
    pub data: Bytes,
    /// Token to hand back through `release_buffer`.
    pub handle: BufferHandle,
}

/// Ranges the sensor supports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorCapabilities {
    /// Shortest exposure, µs.
    pub min_exposure: u32,
    /// Longest exposure, µs.
    pub max_exposure: u32,
    /// Shortest frame time, µs.
    pub min_frame_time: u32,
    /// Longest frame time, µs.
    pub max_frame_time: u32,
    /// Lowest analog gain.
    pub min_gain: f32,
    /// Highest analog gain.
    pub max_gain: f32,
    /// Smallest image the sensor streams.
    pub min_image_size: Size,
    /// Largest image the sensor streams.
    pub max_image_size: Size,
}

/// Register-level access to an image sensor.
///
/// All methods take `&self`: the setter and handler threads use the
/// backend concurrently, so implementations synchronise internally.
/// Blocking calls must return within a bounded time so callers can
/// notice shutdown.
pub trait SensorBackend: Send + Sync {
    /// Opens the device node.
    fn open(&self) -> Result<(), BackendError>;
    /// Stops streaming if needed and closes the device.
    fn close(&self);

    /// Starts streaming in `mode` and returns the mode actually used.
    fn start_streaming(&self, mode: &SensorMode) -> Result<SensorMode, BackendError>;
    /// Stops streaming; a no-op when already stopped.
    fn stop_streaming(&self) -> Result<(), BackendError>;
    /// Whether the sensor is streaming.
    fn is_streaming(&self) -> bool;

    /// Blocks until the next vertical sync and returns its time.
    ///
    /// While not streaming, returns after a short idle period with the
    /// current time so the caller can keep ticking.
    fn wait_for_vsync(&self) -> Result<Timestamp, BackendError>;

    /// Takes the next filled buffer; `Ok(None)` on timeout or when
    /// `blocking` is false and none is ready.
    fn acquire_buffer(&self, blocking: bool) -> Result<Option<RawBuffer>, BackendError>;
    /// Returns a buffer to the driver.
    fn release_buffer(&self, handle: BufferHandle);

    /// Writes an integer control.
    fn set_control(&self, id: ControlId, value: i32) -> Result<(), BackendError>;
    /// Reads an integer control.
    fn control(&self, id: ControlId) -> Result<i32, BackendError>;

    /// Programs the exposure for the next frame, µs.
    fn set_exposure(&self, us: u32) -> Result<(), BackendError>;
    /// Exposure currently programmed, µs.
    fn exposure(&self) -> Result<u32, BackendError>;
    /// Programs the frame time for the next frame, µs; 0 means as short as possible.
    fn set_frame_time(&self, us: u32) -> Result<(), BackendError>;
    /// Frame time currently programmed, µs.
    fn frame_time(&self) -> Result<u32, BackendError>;
    /// Programs the analog gain for the next frame.
    fn set_gain(&self, gain: f32) -> Result<(), BackendError>;
    /// Gain currently programmed.
    fn gain(&self) -> Result<f32, BackendError>;
    /// Programs the 3x4 color matrix.
    fn set_white_balance(&self, matrix: &[f32; 12]) -> Result<(), BackendError>;

    /// Histogram of the frame whose exposure ended at `exposure_end`, or
    /// an invalid histogram if none was generated.
    fn histogram(&self, exposure_end: Timestamp, config: &HistogramConfig) -> Histogram;
    /// Sharpness map of the frame whose exposure ended at `exposure_end`.
    fn sharpness_map(&self, exposure_end: Timestamp, config: &SharpnessConfig) -> SharpnessMap;

    /// Supported ranges.
    fn capabilities(&self) -> SensorCapabilities;

    /// Clock the backend timestamps with.
    fn clock(&self) -> Arc<dyn Clock>;
}
