//! The application-facing sensor.
//!
//! A [`Sensor`] wraps a [`SensorBackend`] and starts the capture daemon
//! on first use. Shots go in through [`Sensor::capture`] or
//! [`Sensor::stream`], frames come out of [`Sensor::get_frame`] in the
//! order the pipeline completes them.
//!
//! # Example
//!
//! ```no_run
//! use shotline::{Sensor, SimulatedSensor, Shot};
//! use shotline::config::SimConfig;
//! use std::sync::Arc;
//!
//! let sensor = Sensor::builder(Arc::new(SimulatedSensor::new(SimConfig::default())))
//!     .build()
//!     .expect("valid configuration");
//!
//! let mut shot = Shot::new();
//! shot.exposure = 20_000;
//! sensor.capture(&shot);
//!
//! let frame = sensor.get_frame();
//! assert_eq!(frame.id(), shot.id());
//! ```

mod stream;

use crate::backend::SensorBackend;
use crate::config::{ConfigError, DaemonConfig, DropPolicy};
use crate::daemon::{CaptureDaemon, DaemonParts, LiveCounter};
use crate::device::Device;
use crate::event::{self, Event, EventKind, EventSink, EventStream};
use crate::frame::Frame;
use crate::metrics::{MetricsError, PipelineMetrics};
use crate::platform::Platform;
use crate::shot::{Shot, Size};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stream::StreamState;
use thiserror::Error;

/// Rolling shutter sweep for frames taller than this many rows, µs.
const TALL_ROLLING_SHUTTER_US: u32 = 77_000;
const SHORT_ROLLING_SHUTTER_US: u32 = 33_000;
const TALL_ROLLING_SHUTTER_ROWS: u32 = 960;

/// Errors constructing a sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The daemon configuration did not validate.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The metrics registry could not be built.
    #[error("metrics registry: {0}")]
    Metrics(#[from] MetricsError),
}

/// Whether the capture daemon is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    /// No daemon; the next capture starts one.
    Stopped,
    /// The daemon threads are running.
    Running,
}

/// Configures a [`Sensor`].
pub struct SensorBuilder {
    backend: Arc<dyn SensorBackend>,
    platform: Platform,
    config: DaemonConfig,
}

impl SensorBuilder {
    /// Starts from the default platform and configuration.
    pub fn new(backend: Arc<dyn SensorBackend>) -> Self {
        Self {
            backend,
            platform: Platform::default(),
            config: DaemonConfig::default(),
        }
    }

    /// Hardware description attached to every frame.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Daemon tuning.
    pub fn config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and creates the sensor. No thread is
    /// started until the first capture.
    pub fn build(self) -> Result<Sensor, SensorError> {
        self.config.validate()?;
        let metrics = Arc::new(PipelineMetrics::new()?);
        let (events, event_stream) = event::channel(self.config.event_capacity);
        Ok(Sensor {
            drop_policy: Mutex::new((self.config.drop_policy, self.config.frame_limit)),
            backend: self.backend,
            platform: Arc::new(self.platform),
            config: self.config,
            daemon: Mutex::new(None),
            stream: Arc::new(StreamState::new()),
            devices: RwLock::new(Vec::new()),
            events,
            event_stream,
            metrics,
            live: LiveCounter::new(),
        })
    }
}

/// A camera sensor driven by a capture daemon.
pub struct Sensor {
    backend: Arc<dyn SensorBackend>,
    platform: Arc<Platform>,
    config: DaemonConfig,
    daemon: Mutex<Option<Arc<CaptureDaemon>>>,
    stream: Arc<StreamState>,
    devices: RwLock<Vec<Arc<dyn Device>>>,
    drop_policy: Mutex<(DropPolicy, usize)>,
    events: EventSink,
    event_stream: EventStream,
    metrics: Arc<PipelineMetrics>,
    live: LiveCounter,
}

impl Sensor {
    /// Starts configuring a sensor on `backend`.
    pub fn builder(backend: Arc<dyn SensorBackend>) -> SensorBuilder {
        SensorBuilder::new(backend)
    }

    /// Starts the capture daemon if it is not already up.
    pub fn start(&self) {
        self.daemon();
    }

    fn daemon(&self) -> Arc<CaptureDaemon> {
        let mut slot = self.daemon.lock();
        if let Some(daemon) = slot.as_ref() {
            return Arc::clone(daemon);
        }
        tracing::info!("Starting sensor");
        let daemon = Arc::new(CaptureDaemon::launch(DaemonParts {
            backend: Arc::clone(&self.backend),
            platform: Arc::clone(&self.platform),
            config: self.config.clone(),
            drop_policy: *self.drop_policy.lock(),
            source: Arc::clone(&self.stream) as Arc<dyn crate::daemon::RequestSource>,
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
            live: self.live.clone(),
        }));
        *slot = Some(Arc::clone(&daemon));
        daemon
    }

    fn running_daemon(&self) -> Option<Arc<CaptureDaemon>> {
        self.daemon
            .lock()
            .as_ref()
            .filter(|d| d.is_running())
            .map(Arc::clone)
    }

    /// Whether the capture daemon is running.
    pub fn state(&self) -> SensorState {
        match self.running_daemon() {
            Some(_) => SensorState::Running,
            None => SensorState::Stopped,
        }
    }

    /// Queues a copy of `shot` for capture, starting the sensor if needed.
    pub fn capture(&self, shot: &Shot) {
        let daemon = self.daemon();
        self.stream.add_pending(1);
        daemon.submit(shot.clone());
        self.metrics.set_shots_pending(self.stream.pending());
    }

    /// Queues copies of `shots` back to back.
    pub fn capture_burst(&self, shots: &[Shot]) {
        let daemon = self.daemon();
        self.stream.add_pending(shots.len());
        for shot in shots {
            daemon.submit(shot.clone());
        }
        self.metrics.set_shots_pending(self.stream.pending());
    }

    /// Captures `shot` repeatedly whenever nothing else is queued.
    pub fn stream(&self, shot: &Shot) {
        self.stream_burst(std::slice::from_ref(shot));
    }

    /// Captures `shots` as a repeating group whenever nothing else is
    /// queued.
    pub fn stream_burst(&self, shots: &[Shot]) {
        self.stream.set_shots(shots.to_vec());
        let daemon = self.daemon();
        if daemon.requests_queued() == 0 {
            self.capture_burst(shots);
        }
    }

    /// Whether a streaming burst is set.
    pub fn is_streaming(&self) -> bool {
        self.stream.is_streaming()
    }

    /// Stops repeating; already queued shots are still captured.
    pub fn stop_streaming(&self) {
        self.stream.clear_shots();
    }

    /// Blocks for the next frame.
    ///
    /// Returns an invalid frame, and posts a `SensorStopped` event, if
    /// the sensor is not running.
    pub fn get_frame(&self) -> Frame {
        self.wait_frame(None).unwrap_or_else(Frame::invalid)
    }

    /// Like [`get_frame`](Sensor::get_frame) but gives up after `timeout`.
    pub fn get_frame_timeout(&self, timeout: Duration) -> Option<Frame> {
        self.wait_frame(Some(timeout))
    }

    fn wait_frame(&self, timeout: Option<Duration>) -> Option<Frame> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let poll = self.config.flush_poll();
        loop {
            let Some(daemon) = self.running_daemon() else {
                self.events.error(
                    EventKind::SensorStopped,
                    "Frame requested from a sensor that is not running",
                );
                return Some(Frame::invalid());
            };

            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return None;
                    }
                    left.min(poll)
                }
                None => poll,
            };

            if let Some(mut frame) = daemon.next_frame(wait) {
                self.stream.remove_pending(1);
                self.metrics.set_shots_pending(self.stream.pending());
                for device in self.devices.read().iter() {
                    device.tag_frame(&mut frame);
                }
                return Some(frame);
            }
        }
    }

    /// Frames completed and waiting in the frame queue.
    pub fn frames_pending(&self) -> usize {
        self.daemon
            .lock()
            .as_ref()
            .map_or(0, |d| d.frames_queued())
    }

    /// Requested frames not yet collected with `get_frame`.
    pub fn shots_pending(&self) -> usize {
        self.stream.pending()
    }

    /// Bounds the frame queue; excess frames are evicted by `policy`.
    pub fn set_drop_policy(&self, policy: DropPolicy, limit: usize) {
        *self.drop_policy.lock() = (policy, limit);
        if let Some(daemon) = self.daemon.lock().as_ref() {
            daemon.set_drop_policy(policy, limit);
        }
    }

    /// Current drop policy and frame limit.
    pub fn drop_policy(&self) -> (DropPolicy, usize) {
        *self.drop_policy.lock()
    }

    /// Cancels what it can, waits briefly for frames already underway,
    /// then tears the daemon down. Every outstanding record is destroyed.
    pub fn stop(&self) {
        self.stop_streaming();
        let Some(daemon) = self.daemon.lock().clone() else {
            return;
        };
        tracing::info!(pending = self.stream.pending(), "Stopping sensor");

        while let Some(wanted) = daemon.withdraw_request() {
            if wanted {
                self.stream.remove_pending(1);
            }
        }

        if daemon.is_running() {
            let deadline = Instant::now() + self.config.stop_timeout();
            while self.stream.pending() > 0 && Instant::now() < deadline {
                if daemon.next_frame(self.config.flush_poll()).is_some() {
                    self.stream.remove_pending(1);
                }
            }
        }

        self.daemon.lock().take();
        daemon.shutdown();
        self.stream.reset_pending();
        self.metrics.set_shots_pending(0);
    }

    /// Adds a device whose tags are applied to every frame.
    pub fn attach(&self, device: Arc<dyn Device>) {
        tracing::debug!(device = device.name(), "Device attached");
        self.devices.write().push(device);
    }

    /// Shortest supported exposure, µs.
    pub fn min_exposure(&self) -> u32 {
        self.backend.capabilities().min_exposure
    }

    /// Longest supported exposure, µs.
    pub fn max_exposure(&self) -> u32 {
        self.backend.capabilities().max_exposure
    }

    /// Shortest supported frame time, µs.
    pub fn min_frame_time(&self) -> u32 {
        self.backend.capabilities().min_frame_time
    }

    /// Longest supported frame time, µs.
    pub fn max_frame_time(&self) -> u32 {
        self.backend.capabilities().max_frame_time
    }

    /// Lowest supported gain.
    pub fn min_gain(&self) -> f32 {
        self.backend.capabilities().min_gain
    }

    /// Highest supported gain.
    pub fn max_gain(&self) -> f32 {
        self.backend.capabilities().max_gain
    }

    /// Smallest supported image.
    pub fn min_image_size(&self) -> Size {
        self.backend.capabilities().min_image_size
    }

    /// Largest supported image.
    pub fn max_image_size(&self) -> Size {
        self.backend.capabilities().max_image_size
    }

    /// Time between the first and last row starting to expose, µs.
    pub fn rolling_shutter_time(&self, shot: &Shot) -> u32 {
        if shot.image.size.height > TALL_ROLLING_SHUTTER_ROWS {
            TALL_ROLLING_SHUTTER_US
        } else {
            SHORT_ROLLING_SHUTTER_US
        }
    }

    /// Hardware description.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// The backend, for devices that share the sensor's driver.
    pub fn backend(&self) -> Arc<dyn SensorBackend> {
        Arc::clone(&self.backend)
    }

    /// Receiving end of the event channel.
    pub fn events(&self) -> EventStream {
        self.event_stream.clone()
    }

    /// Next queued event, if any.
    pub fn poll_event(&self) -> Option<Event> {
        self.event_stream.try_next()
    }

    /// Posting end of the event channel, for attached devices.
    pub fn event_sink(&self) -> EventSink {
        self.events.clone()
    }

    /// Pipeline counters.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Request records currently alive anywhere in the pipeline.
    pub fn records_alive(&self) -> usize {
        self.live.count()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedSensor;
    use crate::config::SimConfig;

    fn sensor() -> Sensor {
        Sensor::builder(Arc::new(SimulatedSensor::new(SimConfig::default())))
            .build()
            .unwrap()
    }

    #[test]
    fn test_get_frame_before_start_is_invalid() {
        let sensor = sensor();
        let frame = sensor.get_frame();
        assert!(!frame.is_valid());
        let event = sensor.poll_event().unwrap();
        assert_eq!(event.kind, EventKind::SensorStopped);
        assert_eq!(sensor.state(), SensorState::Stopped);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DaemonConfig {
            frame_limit: 0,
            ..Default::default()
        };
        let result = Sensor::builder(Arc::new(SimulatedSensor::new(SimConfig::default())))
            .config(config)
            .build();
        assert!(matches!(result, Err(SensorError::Config(_))));
    }

    #[test]
    fn test_rolling_shutter_by_height() {
        let sensor = sensor();
        let mut shot = Shot::new();
        assert_eq!(sensor.rolling_shutter_time(&shot), 33_000);
        shot.image.size = Size::new(2592, 1968);
        assert_eq!(sensor.rolling_shutter_time(&shot), 77_000);
    }

    #[test]
    fn test_capabilities_from_backend() {
        let sensor = sensor();
        let sim = SimConfig::default();
        assert_eq!(sensor.min_exposure(), sim.min_exposure_us);
        assert_eq!(sensor.max_image_size(), sim.max_size);
        assert_eq!(sensor.min_gain(), sim.min_gain);
    }

    #[test]
    fn test_missing_driver_reported() {
        let sensor = Sensor::builder(Arc::new(SimulatedSensor::disconnected(SimConfig::default())))
            .build()
            .unwrap();
        sensor.capture(&Shot::new());
        assert_eq!(sensor.state(), SensorState::Stopped);
        assert!(!sensor.get_frame().is_valid());

        let kinds: Vec<_> = sensor.events().drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::DriverMissing, EventKind::SensorStopped]);
        sensor.stop();
        assert_eq!(sensor.records_alive(), 0);
    }
}
