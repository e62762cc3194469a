//! Xenon-style flash driven through sensor driver controls.

use super::Device;
use crate::backend::{BackendError, ControlId, SensorBackend};
use crate::clock::{Clock, Timestamp};
use crate::event::{EventKind, EventSink};
use crate::frame::Frame;
use crate::history::TimestampedRingBuffer;
use crate::shot::Action;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

const MIN_DURATION_US: i64 = 55_600;
const MAX_DURATION_US: i64 = 492_400;
const MIN_BRIGHTNESS: f32 = 2.0;
const MAX_BRIGHTNESS: f32 = 19.0;
const FIRE_LATENCY_US: i64 = 3_450;
const HISTORY_LEN: usize = 512;

/// Errors from the flash.
#[derive(Debug, Error)]
pub enum FlashError {
    /// A driver control failed.
    #[error("flash driver: {0}")]
    Driver(#[from] BackendError),

    /// The requested time predates the retained history.
    #[error("flash state at {0} is older than the recorded history")]
    HistoryExhausted(Timestamp),
}

/// A flash unit sharing the sensor's driver.
///
/// Brightness history is kept as a step function: every change pushes
/// the old and new level at the same instant, so interpolation between
/// samples never blends two different levels.
pub struct Flash {
    backend: Arc<dyn SensorBackend>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    history: Mutex<TimestampedRingBuffer<f32>>,
}

impl Flash {
    /// Creates a flash driven through `backend`, initially dark.
    pub fn new(backend: Arc<dyn SensorBackend>, events: EventSink) -> Self {
        let clock = backend.clock();
        Self {
            backend,
            clock,
            events,
            history: Mutex::new(TimestampedRingBuffer::new(HISTORY_LEN)),
        }
    }

    /// Shortest pulse, µs.
    pub fn min_duration(&self) -> i64 {
        MIN_DURATION_US
    }

    /// Longest pulse, µs.
    pub fn max_duration(&self) -> i64 {
        MAX_DURATION_US
    }

    /// Dimmest setting.
    pub fn min_brightness(&self) -> f32 {
        MIN_BRIGHTNESS
    }

    /// Brightest setting.
    pub fn max_brightness(&self) -> f32 {
        MAX_BRIGHTNESS
    }

    /// Time from triggering until light is emitted, µs.
    pub fn fire_latency(&self) -> i64 {
        FIRE_LATENCY_US
    }

    fn set_brightness(&self, brightness: f32) -> Result<f32, BackendError> {
        let brightness = brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS);
        self.backend
            .set_control(ControlId::FLASH_INTENSITY, brightness as i32)?;
        Ok(brightness)
    }

    fn set_duration(&self, duration: i64) -> Result<i64, BackendError> {
        let duration = duration.clamp(MIN_DURATION_US, MAX_DURATION_US);
        self.backend
            .set_control(ControlId::FLASH_TIMEOUT, duration as i32)?;
        Ok(duration)
    }

    /// Fires one pulse now; light appears after the fire latency.
    /// Brightness and duration are clamped to the supported ranges.
    pub fn fire(&self, brightness: f32, duration: i64) -> Result<(), FlashError> {
        let fire_time = self.clock.now() + FIRE_LATENCY_US;
        let brightness = self.set_brightness(brightness)?;
        let duration = self.set_duration(duration)?;
        self.backend.set_control(ControlId::FLASH_STROBE, 0)?;

        self.record_step(fire_time, brightness);
        self.record_step(fire_time + duration, 0.0);
        tracing::debug!(%fire_time, brightness, duration, "Flash fired");
        Ok(())
    }

    /// Turns the flash on until [`strobe_off`](Flash::strobe_off) or the
    /// maximum duration, whichever comes first.
    pub fn strobe_on(&self, brightness: f32) -> Result<(), FlashError> {
        let on_time = self.clock.now() + FIRE_LATENCY_US;
        let brightness = self.set_brightness(brightness)?;
        self.set_duration(MAX_DURATION_US)?;
        self.backend.set_control(ControlId::FLASH_STROBE, 0)?;
        self.record_step(on_time, brightness);
        Ok(())
    }

    /// Turns a strobe off; light stops after the fire latency.
    pub fn strobe_off(&self) -> Result<(), FlashError> {
        let off_time = self.clock.now() + FIRE_LATENCY_US;
        self.backend.set_control(ControlId::FLASH_STROBE_STOP, 0)?;
        self.record_step(off_time, 0.0);
        Ok(())
    }

    fn record_step(&self, at: Timestamp, brightness: f32) {
        let mut history = self.history.lock();
        let previous = history.newest().map_or(0.0, |(_, b)| *b);
        history.push(at, previous);
        history.push(at, brightness);
    }

    /// Brightness the flash had at time `t`.
    pub fn brightness_at(&self, t: Timestamp) -> Result<f32, FlashError> {
        let history = self.history.lock();
        match history.oldest() {
            None => Ok(0.0),
            Some((oldest, _)) if t < *oldest && history.len() == history.capacity() => {
                Err(FlashError::HistoryExhausted(t))
            }
            _ => Ok(history.value_at(t).unwrap_or(0.0)),
        }
    }

    fn report(&self, error: FlashError) {
        match error {
            FlashError::Driver(e) => self
                .events
                .error(EventKind::DriverError, format!("Flash control failed: {e}")),
            e @ FlashError::HistoryExhausted(_) => {
                self.events.warning(EventKind::FlashHistoryError, e.to_string())
            }
        }
    }
}

impl Device for Flash {
    fn name(&self) -> &str {
        "flash"
    }

    fn tag_frame(&self, frame: &mut Frame) {
        let t1 = frame.exposure_start();
        let t2 = frame.exposure_end();
        let (b1, b2) = match (self.brightness_at(t1), self.brightness_at(t2)) {
            (Ok(b1), Ok(b2)) => (b1, b2),
            (Err(e), _) | (_, Err(e)) => {
                self.report(e);
                return;
            }
        };

        // First turn-on and last turn-off inside the exposure.
        let (on, off) = {
            let history = self.history.lock();
            let window: Vec<(Timestamp, f32)> = history.samples_between(t1, t2).copied().collect();
            let on = window.iter().find(|(_, b)| *b > 0.0).copied();
            let off = window.iter().rev().find(|(_, b)| *b == 0.0).map(|(t, _)| *t);
            (on, off)
        };

        let exposure = t2 - t1;
        let (brightness, start, duration) = if b1 > 0.0 && b2 == 0.0 {
            (b1, 0, off.map_or(exposure, |t| t - t1))
        } else if b1 > 0.0 {
            ((b1 + b2) / 2.0, 0, exposure)
        } else if b2 > 0.0 {
            let start = on.map_or(0, |(t, _)| t - t1);
            (b2, start, exposure - start)
        } else {
            match (on, off) {
                (Some((on_t, b)), Some(off_t)) if off_t >= on_t => (b, on_t - t1, off_t - on_t),
                _ => return,
            }
        };

        frame.set_tag("flash.brightness", brightness);
        frame.set_tag("flash.duration", duration);
        frame.set_tag("flash.start", start);
        frame.set_tag("flash.peak", start + duration / 2);
    }
}

/// Fires the flash at `time` µs into the exposure.
#[derive(Clone)]
pub struct FireAction {
    flash: Arc<Flash>,
    time: i64,
    brightness: f32,
    duration: i64,
}

impl FireAction {
    /// Fires at `time` µs into the exposure for `duration` µs.
    pub fn new(flash: &Arc<Flash>, time: i64, brightness: f32, duration: i64) -> Self {
        Self {
            flash: Arc::clone(flash),
            time,
            brightness,
            duration,
        }
    }
}

impl std::fmt::Debug for FireAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireAction")
            .field("time", &self.time)
            .field("brightness", &self.brightness)
            .field("duration", &self.duration)
            .finish()
    }
}

impl Action for FireAction {
    fn time(&self) -> i64 {
        self.time
    }

    fn latency(&self) -> i64 {
        self.flash.fire_latency()
    }

    fn execute(&self) {
        if let Err(e) = self.flash.fire(self.brightness, self.duration) {
            self.flash.report(e);
        }
    }

    fn box_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Turns the flash on at `time` µs into the exposure.
#[derive(Clone)]
pub struct StrobeStartAction {
    flash: Arc<Flash>,
    time: i64,
    brightness: f32,
}

impl StrobeStartAction {
    /// Turns the strobe on at `time` µs into the exposure.
    pub fn new(flash: &Arc<Flash>, time: i64, brightness: f32) -> Self {
        Self {
            flash: Arc::clone(flash),
            time,
            brightness,
        }
    }
}

impl std::fmt::Debug for StrobeStartAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrobeStartAction")
            .field("time", &self.time)
            .field("brightness", &self.brightness)
            .finish()
    }
}

impl Action for StrobeStartAction {
    fn time(&self) -> i64 {
        self.time
    }

    fn latency(&self) -> i64 {
        self.flash.fire_latency()
    }

    fn execute(&self) {
        if let Err(e) = self.flash.strobe_on(self.brightness) {
            self.flash.report(e);
        }
    }

    fn box_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// Turns the flash off at `time` µs into the exposure.
#[derive(Clone)]
pub struct StrobeStopAction {
    flash: Arc<Flash>,
    time: i64,
}

impl StrobeStopAction {
    /// Turns the strobe off at `time` µs into the exposure.
    pub fn new(flash: &Arc<Flash>, time: i64) -> Self {
        Self {
            flash: Arc::clone(flash),
            time,
        }
    }
}

impl std::fmt::Debug for StrobeStopAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrobeStopAction")
            .field("time", &self.time)
            .finish()
    }
}

impl Action for StrobeStopAction {
    fn time(&self) -> i64 {
        self.time
    }

    fn latency(&self) -> i64 {
        self.flash.fire_latency()
    }

    fn execute(&self) {
        if let Err(e) = self.flash.strobe_off() {
            self.flash.report(e);
        }
    }

    fn box_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
