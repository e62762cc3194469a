//! Software sensor with realistic pipeline timing.
//!
//! A worker thread generates vertical syncs one frame time apart. At each
//! sync the exposure and frame-time registers are latched for the frame
//! starting there; gain is latched at the following sync, once the frame
//! has been exposed. A latched frame completes `readout + frame_time +
//! isp` after its sync and lands in a small pool of driver buffers. All
//! timestamps are the scheduled times, not the times the worker happened
//! to wake up, so with zero jitter they are exactly predictable.

use super::{BackendError, BufferHandle, ControlId, RawBuffer, SensorBackend, SensorCapabilities};
use crate::clock::{Clock, MonotonicClock, Timestamp};
use crate::config::SimConfig;
use crate::shot::{
    Histogram, HistogramConfig, Rect, SensorMode, SharpnessConfig, SharpnessMap, Size,
};
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Statistics lookups match frames whose exposure ended this close, µs.
const STATS_MATCH_US: i64 = 5_000;

const KNOWN_CONTROLS: [ControlId; 6] = [
    ControlId::FLASH_INTENSITY,
    ControlId::FLASH_TIMEOUT,
    ControlId::FLASH_STROBE,
    ControlId::FLASH_STROBE_STOP,
    ControlId::FOCUS_ABSOLUTE,
    ControlId::FOCUS_RAMP_TIME,
];

/// A register write, as recorded in the control log.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlWrite {
    /// Exposure register, µs.
    Exposure(u32),
    /// Frame time register, µs.
    FrameTime(u32),
    /// Analog gain.
    Gain(f32),
    /// Color matrix.
    WhiteBalance([f32; 12]),
    /// A device control such as the flash or lens.
    Control(ControlId, i32),
    /// Streaming started in a mode.
    StartStreaming(SensorMode),
    /// Streaming stopped.
    StopStreaming,
}

#[derive(Debug, Clone)]
struct Registers {
    exposure: u32,
    frame_time: u32,
    gain: f32,
    white_balance: [f32; 12],
    controls: BTreeMap<ControlId, i32>,
}

/// Frame latched at a sync and currently exposing.
#[derive(Debug)]
struct Exposing {
    vsync: Timestamp,
    exposure: u32,
    frame_time: u32,
    mode: SensorMode,
    index: u64,
}

/// Frame waiting in readout and processing.
#[derive(Debug)]
struct Completing {
    ready_at: Timestamp,
    mode: SensorMode,
    level: f32,
}

#[derive(Debug)]
struct FrameStats {
    exposure_end: Timestamp,
    histogram: Histogram,
    sharpness: SharpnessMap,
}

struct SimState {
    open: bool,
    streaming: bool,
    generation: u64,
    mode: Option<SensorMode>,
    regs: Registers,
    exposing: Option<Exposing>,
    completing: VecDeque<Completing>,
    ready: VecDeque<RawBuffer>,
    on_loan: HashSet<BufferHandle>,
    next_handle: u64,
    frame_index: u64,
    vsync_seq: u64,
    last_vsync: Timestamp,
    next_vsync: Timestamp,
    stats: VecDeque<FrameStats>,
    frames_lost: u64,
    rng: ChaCha8Rng,
    log: Vec<(Timestamp, ControlWrite)>,
}

struct Inner {
    config: SimConfig,
    clock: Arc<dyn Clock>,
    present: bool,
    state: Mutex<SimState>,
    changed: Condvar,
}

/// Simulated image sensor implementing [`SensorBackend`].
///
/// The worker sleeps on real time, so the clock must advance on its own;
/// use a [`MonotonicClock`] rather than a manual one.
pub struct SimulatedSensor {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedSensor {
    /// Creates a simulated sensor on the monotonic clock.
    pub fn new(config: SimConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Creates a simulated sensor reading time from `clock`.
    pub fn with_clock(config: SimConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(config, clock, true)
    }

    /// A sensor whose device node is missing: `open` always fails.
    pub fn disconnected(config: SimConfig) -> Self {
        Self::build(config, Arc::new(MonotonicClock::new()), false)
    }

    fn build(config: SimConfig, clock: Arc<dyn Clock>, present: bool) -> Self {
        let regs = Registers {
            exposure: config.min_exposure_us.max(10_000).min(config.max_exposure_us),
            frame_time: config.min_frame_time_us,
            gain: config.min_gain,
            white_balance: [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            controls: KNOWN_CONTROLS.iter().map(|id| (*id, 0)).collect(),
        };
        let state = SimState {
            open: false,
            streaming: false,
            generation: 0,
            mode: None,
            regs,
            exposing: None,
            completing: VecDeque::new(),
            ready: VecDeque::new(),
            on_loan: HashSet::new(),
            next_handle: 1,
            frame_index: 0,
            vsync_seq: 0,
            last_vsync: Timestamp::ZERO,
            next_vsync: Timestamp::ZERO,
            stats: VecDeque::new(),
            frames_lost: 0,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            log: Vec::new(),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                present,
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Configuration the simulator was built with.
    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Every register write so far, with the time it was made.
    pub fn control_log(&self) -> Vec<(Timestamp, ControlWrite)> {
        self.inner.state.lock().log.clone()
    }

    /// Frames latched but never delivered (injected drops or no free buffer).
    pub fn frames_lost(&self) -> u64 {
        self.inner.state.lock().frames_lost
    }

    /// Vertical syncs since creation.
    pub fn vsync_count(&self) -> u64 {
        self.inner.state.lock().vsync_seq
    }

    /// Buffers acquired and not yet released.
    pub fn buffers_on_loan(&self) -> usize {
        self.inner.state.lock().on_loan.len()
    }

    fn log(&self, state: &mut SimState, write: ControlWrite) {
        state.log.push((self.inner.clock.now(), write));
    }

    fn registers(&self) -> Result<parking_lot::MutexGuard<'_, SimState>, BackendError> {
        let state = self.inner.state.lock();
        if !state.open {
            return Err(BackendError::NotOpen);
        }
        Ok(state)
    }

    fn join_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Simulated sensor worker panicked");
            }
        }
    }
}

impl SensorBackend for SimulatedSensor {
    fn open(&self) -> Result<(), BackendError> {
        if !self.inner.present {
            return Err(BackendError::DeviceNotFound("simulated sensor".into()));
        }
        self.inner.state.lock().open = true;
        tracing::debug!("Simulated sensor opened");
        Ok(())
    }

    fn close(&self) {
        if let Err(e) = self.stop_streaming() {
            tracing::debug!(error = %e, "Stop on close failed");
        }
        self.inner.state.lock().open = false;
        tracing::debug!("Simulated sensor closed");
    }

    fn start_streaming(&self, mode: &SensorMode) -> Result<SensorMode, BackendError> {
        let config = &self.inner.config;
        if mode.size.width < config.min_size.width
            || mode.size.height < config.min_size.height
            || mode.size.width > config.max_size.width
            || mode.size.height > config.max_size.height
        {
            return Err(BackendError::UnsupportedMode(format!(
                "{} outside {}..{}",
                mode.size, config.min_size, config.max_size
            )));
        }
        if self.is_streaming() {
            self.stop_streaming()?;
        }

        let generation = {
            let mut state = self.registers()?;
            state.streaming = true;
            state.generation += 1;
            state.mode = Some(*mode);
            state.exposing = None;
            state.next_vsync = self.inner.clock.now() + config.min_frame_time_us as i64;
            self.log(&mut state, ControlWrite::StartStreaming(*mode));
            state.generation
        };
        self.inner.changed.notify_all();

        let inner = Arc::clone(&self.inner);
        let worker = thread::Builder::new()
            .name("sim-sensor".into())
            .spawn(move || run_worker(inner, generation))
            .map_err(|e| BackendError::Io(e.to_string()))?;
        *self.worker.lock() = Some(worker);

        tracing::debug!(size = %mode.size, format = ?mode.format, "Simulated sensor streaming");
        Ok(*mode)
    }

    fn stop_streaming(&self) -> Result<(), BackendError> {
        {
            let mut state = self.inner.state.lock();
            if state.streaming {
                self.log(&mut state, ControlWrite::StopStreaming);
            }
            state.streaming = false;
            state.generation += 1;
            state.exposing = None;
            state.completing.clear();
            state.ready.clear();
            state.on_loan.clear();
        }
        self.inner.changed.notify_all();
        self.join_worker();
        Ok(())
    }

    fn is_streaming(&self) -> bool {
        self.inner.state.lock().streaming
    }

    fn wait_for_vsync(&self) -> Result<Timestamp, BackendError> {
        let mut state = self.inner.state.lock();
        if !state.streaming {
            drop(state);
            self.inner
                .clock
                .sleep(Duration::from_millis(self.inner.config.idle_tick_ms));
            return Ok(self.inner.clock.now());
        }

        let seen = state.vsync_seq;
        let deadline = Instant::now() + Duration::from_millis(self.inner.config.vsync_timeout_ms);
        while state.vsync_seq == seen {
            if !state.streaming {
                return Err(BackendError::NotStreaming);
            }
            if self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return Err(BackendError::Timeout("vertical sync"));
            }
        }
        Ok(state.last_vsync)
    }

    fn acquire_buffer(&self, blocking: bool) -> Result<Option<RawBuffer>, BackendError> {
        let deadline = Instant::now() + Duration::from_millis(self.inner.config.acquire_timeout_ms);
        let mut state = self.inner.state.lock();
        loop {
            if let Some(buffer) = state.ready.pop_front() {
                state.on_loan.insert(buffer.handle);
                return Ok(Some(buffer));
            }
            if !blocking || self.inner.changed.wait_until(&mut state, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    fn release_buffer(&self, handle: BufferHandle) {
        let mut state = self.inner.state.lock();
        if !state.on_loan.remove(&handle) {
            tracing::debug!(handle = handle.0, "Release of unknown buffer ignored");
        }
    }

    fn set_control(&self, id: ControlId, value: i32) -> Result<(), BackendError> {
        let mut state = self.inner.state.lock();
        match state.regs.controls.get_mut(&id) {
            Some(slot) => *slot = value,
            None => return Err(BackendError::UnknownControl(id.0)),
        }
        self.log(&mut state, ControlWrite::Control(id, value));
        Ok(())
    }

    fn control(&self, id: ControlId) -> Result<i32, BackendError> {
        self.inner
            .state
            .lock()
            .regs
            .controls
            .get(&id)
            .copied()
            .ok_or(BackendError::UnknownControl(id.0))
    }

    fn set_exposure(&self, us: u32) -> Result<(), BackendError> {
        let config = &self.inner.config;
        let mut state = self.registers()?;
        state.regs.exposure = us.clamp(config.min_exposure_us, config.max_exposure_us);
        self.log(&mut state, ControlWrite::Exposure(us));
        Ok(())
    }

    fn exposure(&self) -> Result<u32, BackendError> {
        Ok(self.registers()?.regs.exposure)
    }

    fn set_frame_time(&self, us: u32) -> Result<(), BackendError> {
        let config = &self.inner.config;
        let mut state = self.registers()?;
        state.regs.frame_time = us.clamp(config.min_frame_time_us, config.max_frame_time_us);
        self.log(&mut state, ControlWrite::FrameTime(us));
        Ok(())
    }

    fn frame_time(&self) -> Result<u32, BackendError> {
        let state = self.registers()?;
        Ok(state.regs.frame_time.max(state.regs.exposure))
    }

    fn set_gain(&self, gain: f32) -> Result<(), BackendError> {
        let config = &self.inner.config;
        let mut state = self.registers()?;
        state.regs.gain = gain.clamp(config.min_gain, config.max_gain);
        self.log(&mut state, ControlWrite::Gain(gain));
        Ok(())
    }

    fn gain(&self) -> Result<f32, BackendError> {
        Ok(self.registers()?.regs.gain)
    }

    fn set_white_balance(&self, matrix: &[f32; 12]) -> Result<(), BackendError> {
        let mut state = self.registers()?;
        state.regs.white_balance = *matrix;
        self.log(&mut state, ControlWrite::WhiteBalance(*matrix));
        Ok(())
    }

    fn histogram(&self, exposure_end: Timestamp, config: &HistogramConfig) -> Histogram {
        if !config.enabled {
            return Histogram::invalid();
        }
        let state = self.inner.state.lock();
        state
            .stats_near(exposure_end)
            .map(|s| s.histogram.clone())
            .unwrap_or_default()
    }

    fn sharpness_map(&self, exposure_end: Timestamp, config: &SharpnessConfig) -> SharpnessMap {
        if !config.enabled {
            return SharpnessMap::invalid();
        }
        let state = self.inner.state.lock();
        state
            .stats_near(exposure_end)
            .map(|s| s.sharpness.clone())
            .unwrap_or_default()
    }

    fn capabilities(&self) -> SensorCapabilities {
        let config = &self.inner.config;
        SensorCapabilities {
            min_exposure: config.min_exposure_us,
            max_exposure: config.max_exposure_us,
            min_frame_time: config.min_frame_time_us,
            max_frame_time: config.max_frame_time_us,
            min_gain: config.min_gain,
            max_gain: config.max_gain,
            min_image_size: config.min_size,
            max_image_size: config.max_size,
        }
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        if let Err(e) = self.stop_streaming() {
            tracing::debug!(error = %e, "Stop on drop failed");
        }
    }
}

fn run_worker(inner: Arc<Inner>, generation: u64) {
    let config = &inner.config;
    let mut state = inner.state.lock();
    loop {
        if !state.streaming || state.generation != generation {
            break;
        }

        let now = inner.clock.now();
        let mut notify = false;
        if now >= state.next_vsync {
            let t = state.next_vsync;
            state.vsync(t, config);
            notify = true;
        }
        while state.completing.front().is_some_and(|f| f.ready_at <= now) {
            if let Some(frame) = state.completing.pop_front() {
                state.complete(frame, config);
                notify = true;
            }
        }
        if notify {
            inner.changed.notify_all();
        }

        let mut next = state.next_vsync;
        if let Some(frame) = state.completing.front() {
            next = next.min(frame.ready_at);
        }
        let wait = inner.clock.now().duration_until(next);
        if !wait.is_zero() {
            inner.changed.wait_for(&mut state, wait);
        }
    }
    tracing::trace!(generation, "Simulated sensor worker exiting");
}

impl SimState {
    fn vsync(&mut self, t: Timestamp, config: &SimConfig) {
        self.vsync_seq += 1;
        self.last_vsync = t;
        let Some(mode) = self.mode else {
            return;
        };

        if let Some(frame) = self.exposing.take() {
            let readout = config.readout.readout_us(frame.mode.size);
            let exposure_end = frame.vsync + frame.frame_time as i64 + readout;
            let level = brightness(frame.exposure, self.regs.gain);
            self.record_stats(exposure_end, &frame.mode, level, config.stats_history);

            let lost = config.drop_every > 0 && (frame.index + 1) % config.drop_every as u64 == 0;
            if lost {
                self.frames_lost += 1;
                tracing::debug!(index = frame.index, "Simulated frame dropped");
            } else {
                let isp = config.isp.isp_us(frame.mode.size, frame.mode.format);
                self.completing.push_back(Completing {
                    ready_at: frame.vsync + readout + frame.frame_time as i64 + isp,
                    mode: frame.mode,
                    level,
                });
            }
        }

        let frame_time = self.regs.frame_time.max(self.regs.exposure);
        self.exposing = Some(Exposing {
            vsync: t,
            exposure: self.regs.exposure,
            frame_time,
            mode,
            index: self.frame_index,
        });
        self.frame_index += 1;
        self.next_vsync = t + frame_time as i64;
        tracing::trace!(%t, frame_time, "Simulated vsync");
    }

    fn complete(&mut self, frame: Completing, config: &SimConfig) {
        if self.ready.len() + self.on_loan.len() >= config.buffer_count {
            self.frames_lost += 1;
            tracing::debug!("No free driver buffer, simulated frame lost");
            return;
        }
        let jitter = self.jitter(config.timing_noise_us);
        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.ready.push_back(RawBuffer {
            timestamp: frame.ready_at + jitter,
            data: synthesize_pixels(&frame.mode, frame.level),
            handle,
        });
    }

    fn jitter(&mut self, amplitude: u32) -> i64 {
        if amplitude == 0 {
            return 0;
        }
        let span = 2 * amplitude as u64 + 1;
        (self.rng.next_u64() % span) as i64 - amplitude as i64
    }

    fn record_stats(&mut self, exposure_end: Timestamp, mode: &SensorMode, level: f32, keep: usize) {
        if !mode.histogram.enabled && !mode.sharpness.enabled {
            return;
        }
        let histogram = if mode.histogram.enabled {
            synthesize_histogram(mode, level)
        } else {
            Histogram::invalid()
        };
        let sharpness = if mode.sharpness.enabled {
            synthesize_sharpness(mode, level)
        } else {
            SharpnessMap::invalid()
        };
        if self.stats.len() >= keep.max(1) {
            self.stats.pop_front();
        }
        self.stats.push_back(FrameStats {
            exposure_end,
            histogram,
            sharpness,
        });
    }

    fn stats_near(&self, exposure_end: Timestamp) -> Option<&FrameStats> {
        self.stats
            .iter()
            .filter(|s| (s.exposure_end - exposure_end).abs() <= STATS_MATCH_US)
            .min_by_key(|s| (s.exposure_end - exposure_end).abs())
    }
}

/// Mean pixel level, 0-255, for an exposure and gain.
fn brightness(exposure: u32, gain: f32) -> f32 {
    (exposure as f32 * gain / 40_000.0 * 255.0).min(255.0)
}

/// Pixel value at column `x`: a left-to-right ramp from half to full level.
fn column_value(level: f32, x: u32, width: u32) -> u8 {
    (level * (0.5 + 0.5 * x as f32 / width.max(1) as f32)) as u8
}

fn synthesize_pixels(mode: &SensorMode, level: f32) -> Bytes {
    let Size { width, height } = mode.size;
    let bpp = mode.format.bytes_per_pixel();
    let row: Vec<u8> = (0..width as usize * bpp)
        .map(|i| column_value(level, (i / bpp) as u32, width))
        .collect();
    let mut data = Vec::with_capacity(row.len() * height as usize);
    for _ in 0..height {
        data.extend_from_slice(&row);
    }
    Bytes::from(data)
}

fn clamp_region(region: Rect, size: Size) -> Rect {
    if region.width == 0 || region.height == 0 {
        return Rect::covering(size);
    }
    let x = region.x.min(size.width);
    let y = region.y.min(size.height);
    Rect::new(
        x,
        y,
        region.width.min(size.width - x),
        region.height.min(size.height - y),
    )
}

fn synthesize_histogram(mode: &SensorMode, level: f32) -> Histogram {
    const CHANNELS: u32 = 3;
    let buckets = mode.histogram.buckets.max(1);
    let region = clamp_region(mode.histogram.region, mode.size);
    let mut data = vec![0u32; (buckets * CHANNELS) as usize];
    for x in region.x..region.x + region.width {
        let value = column_value(level, x, mode.size.width) as u32;
        let bucket = (value * buckets / 256).min(buckets - 1);
        for c in 0..CHANNELS {
            data[(bucket * CHANNELS + c) as usize] += region.height;
        }
    }
    Histogram::new(buckets, CHANNELS, region, data)
}

fn synthesize_sharpness(mode: &SensorMode, level: f32) -> SharpnessMap {
    let grid = mode.sharpness.size;
    let cell_w = mode.size.width / grid.width.max(1);
    let cell_h = mode.size.height / grid.height.max(1);
    let contrast = level as f64 * 0.5 * (cell_w as f64) * (cell_h as f64) / mode.size.width.max(1) as f64;
    SharpnessMap::new(grid, 1, vec![contrast as u32; grid.area()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shot::PixelFormat;

    fn fast_config() -> SimConfig {
        SimConfig {
            min_frame_time_us: 10_000,
            readout: crate::config::ReadoutModel {
                short_us: 5_000,
                ..Default::default()
            },
            isp: crate::config::IspModel {
                yuv_us: 1_000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn mode(width: u32, height: u32) -> SensorMode {
        SensorMode {
            size: Size::new(width, height),
            format: PixelFormat::Uyvy,
            histogram: HistogramConfig {
                enabled: true,
                ..Default::default()
            },
            sharpness: SharpnessConfig::default(),
        }
    }

    #[test]
    fn test_streaming_requires_open() {
        let sensor = SimulatedSensor::new(fast_config());
        assert!(matches!(
            sensor.start_streaming(&mode(320, 240)),
            Err(BackendError::NotOpen)
        ));
    }

    #[test]
    fn test_disconnected_sensor_fails_open() {
        let sensor = SimulatedSensor::disconnected(SimConfig::default());
        assert!(matches!(sensor.open(), Err(BackendError::DeviceNotFound(_))));
    }

    #[test]
    fn test_unsupported_mode_rejected() {
        let sensor = SimulatedSensor::new(fast_config());
        sensor.open().unwrap();
        assert!(matches!(
            sensor.start_streaming(&mode(8000, 8000)),
            Err(BackendError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_vsyncs_one_frame_time_apart() {
        let sensor = SimulatedSensor::new(fast_config());
        sensor.open().unwrap();
        sensor.start_streaming(&mode(320, 240)).unwrap();
        sensor.set_frame_time(15_000).unwrap();

        let first = sensor.wait_for_vsync().unwrap();
        let second = sensor.wait_for_vsync().unwrap();
        let third = sensor.wait_for_vsync().unwrap();
        // The first sync latched the old frame time; from then on 15 ms.
        assert_eq!(third - second, 15_000);
        assert!(second > first);
        sensor.stop_streaming().unwrap();
    }

    #[test]
    fn test_buffer_arrives_at_predicted_time() {
        let config = fast_config();
        let sensor = SimulatedSensor::new(config.clone());
        sensor.open().unwrap();
        sensor.set_frame_time(12_000).unwrap();
        sensor.start_streaming(&mode(320, 240)).unwrap();

        let vsync = sensor.wait_for_vsync().unwrap();
        // Skip buffers from frames latched before this sync.
        let expected = vsync + 5_000 + 12_000 + 1_000;
        let buffer = loop {
            let buffer = sensor.acquire_buffer(true).unwrap().unwrap();
            sensor.release_buffer(buffer.handle);
            if buffer.timestamp >= expected {
                break buffer;
            }
        };
        assert_eq!(buffer.timestamp, expected);
        assert_eq!(buffer.data.len(), 320 * 240 * 2);
        sensor.stop_streaming().unwrap();
    }

    #[test]
    fn test_histogram_available_for_exposure_end() {
        let sensor = SimulatedSensor::new(fast_config());
        sensor.open().unwrap();
        sensor.set_frame_time(10_000).unwrap();
        let m = mode(320, 240);
        sensor.start_streaming(&m).unwrap();

        let vsync = sensor.wait_for_vsync().unwrap();
        sensor.wait_for_vsync().unwrap();
        let exposure_end = vsync + 10_000 + 5_000;
        let hist = sensor.histogram(exposure_end, &m.histogram);
        assert!(hist.is_valid());
        assert_eq!(hist.total(0), 320 * 240);

        let disabled = HistogramConfig::default();
        assert!(!sensor.histogram(exposure_end, &disabled).is_valid());
        sensor.stop_streaming().unwrap();
    }

    #[test]
    fn test_exhausted_pool_loses_frames() {
        let config = SimConfig {
            buffer_count: 1,
            ..fast_config()
        };
        let sensor = SimulatedSensor::new(config);
        sensor.open().unwrap();
        sensor.start_streaming(&mode(160, 120)).unwrap();

        let held = sensor.acquire_buffer(true).unwrap().unwrap();
        for _ in 0..4 {
            sensor.wait_for_vsync().unwrap();
        }
        assert!(sensor.frames_lost() > 0);
        assert!(sensor.acquire_buffer(false).unwrap().is_none());
        sensor.release_buffer(held.handle);
        assert_eq!(sensor.buffers_on_loan(), 0);
        sensor.stop_streaming().unwrap();
    }

    #[test]
    fn test_controls_logged_and_unknown_rejected() {
        let sensor = SimulatedSensor::new(SimConfig::default());
        sensor.set_control(ControlId::FLASH_INTENSITY, 12).unwrap();
        assert_eq!(sensor.control(ControlId::FLASH_INTENSITY).unwrap(), 12);
        assert!(matches!(
            sensor.set_control(ControlId(0xdead), 1),
            Err(BackendError::UnknownControl(0xdead))
        ));
        assert!(sensor
            .control_log()
            .iter()
            .any(|(_, w)| *w == ControlWrite::Control(ControlId::FLASH_INTENSITY, 12)));
    }

    #[test]
    fn test_jitter_bounded_and_seeded() {
        let mut a = SimulatedSensor::new(SimConfig::default());
        let mut b = SimulatedSensor::new(SimConfig::default());
        let sa = &mut Arc::get_mut(&mut a.inner).unwrap().state;
        let sb = &mut Arc::get_mut(&mut b.inner).unwrap().state;
        for _ in 0..100 {
            let ja = sa.get_mut().jitter(300);
            assert!((-300..=300).contains(&ja));
            assert_eq!(ja, sb.get_mut().jitter(300));
        }
    }
}
