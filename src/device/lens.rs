//! Voice-coil focus lens driven through sensor driver controls.
//!
//! The driver takes focus positions in motor ticks and a ramp time in
//! microseconds per tick. Positions and speeds are exposed in diopters
//! and diopters per second.

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

const FAR_FOCUS: f32 = 0.0;
const NEAR_FOCUS: f32 = 20.0;
const DIOPTERS_PER_TICK: f32 = 0.0315;
const TICKS_PER_DIOPTER: f32 = 31.746;
const INFINITY_TICK: i32 = 227;
/// Slowest ramp is one tick per 3200 µs, fastest one per 50 µs.
const MIN_TICK_RATE: f32 = 312.0;
const MAX_TICK_RATE: f32 = 20_000.0;
const FOCUS_LATENCY_US: i64 = 175;
const FOCAL_LENGTH_MM: f32 = 5.2;
const APERTURE: f32 = 2.8;
const HISTORY_LEN: usize = 512;

/// Errors from the lens.
#[derive(Debug, Error)]
pub enum LensError {
    /// A driver control failed.
    #[error("lens driver: {0}")]
    Driver(#[from] BackendError),

    /// The requested time predates the retained history.
    #[error("lens position at {0} is older than the recorded history")]
    HistoryExhausted(Timestamp),
}

fn ticks_to_diopters(ticks: i32) -> f32 {
    (DIOPTERS_PER_TICK * (ticks - INFINITY_TICK) as f32).clamp(FAR_FOCUS, NEAR_FOCUS)
}

fn diopters_to_ticks(diopters: f32) -> i32 {
    (diopters * TICKS_PER_DIOPTER + INFINITY_TICK as f32 + 0.5) as i32
}

fn tick_rate_to_diopter_rate(ticks_per_s: f32) -> f32 {
    ticks_per_s * DIOPTERS_PER_TICK
}

fn diopter_rate_to_tick_rate(diopters_per_s: f32) -> f32 {
    (diopters_per_s * TICKS_PER_DIOPTER + 0.5).floor()
}

/// A fixed-focal-length lens with motorised focus.
pub struct Lens {
    backend: Arc<dyn SensorBackend>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    history: Mutex<TimestampedRingBuffer<f32>>,
}

impl Lens {
    /// Creates the lens and focuses it at infinity.
    pub fn new(backend: Arc<dyn SensorBackend>, events: EventSink) -> Self {
        let clock = backend.clock();
        let lens = Self {
            backend,
            clock,
            events,
            history: Mutex::new(TimestampedRingBuffer::new(HISTORY_LEN)),
        };
        if let Err(e) = lens.set_focus(FAR_FOCUS, None) {
            lens.report(e);
        }
        lens
    }

    /// Farthest focus, diopters.
    pub fn far_focus(&self) -> f32 {
        FAR_FOCUS
    }

    /// Nearest focus, diopters.
    pub fn near_focus(&self) -> f32 {
        NEAR_FOCUS
    }

    /// Slowest ramp, diopters per second.
    pub fn min_focus_speed(&self) -> f32 {
        tick_rate_to_diopter_rate(MIN_TICK_RATE)
    }

    /// Fastest ramp, diopters per second.
    pub fn max_focus_speed(&self) -> f32 {
        tick_rate_to_diopter_rate(MAX_TICK_RATE)
    }

    /// Delay between a focus command and the lens starting to move, µs.
    pub fn focus_latency(&self) -> i64 {
        FOCUS_LATENCY_US
    }

    /// Starts moving towards `diopters` at `speed` diopters per second
    /// (fastest if `None`). Both are clamped to what the lens supports.
    pub fn set_focus(&self, diopters: f32, speed: Option<f32>) -> Result<(), LensError> {
        let speed = speed
            .unwrap_or(self.max_focus_speed())
            .clamp(self.min_focus_speed(), self.max_focus_speed());

        let ramp_us = (1_000_000.0 / diopter_rate_to_tick_rate(speed)) as i32;
        self.backend.set_control(ControlId::FOCUS_RAMP_TIME, ramp_us)?;
        let ramp_us = self.backend.control(ControlId::FOCUS_RAMP_TIME)?.max(1);
        let actual_speed = tick_rate_to_diopter_rate(1_000_000.0 / ramp_us as f32);

        let target = diopters.clamp(FAR_FOCUS, NEAR_FOCUS);
        let old = ticks_to_diopters(self.backend.control(ControlId::FOCUS_ABSOLUTE)?);
        self.backend
            .set_control(ControlId::FOCUS_ABSOLUTE, diopters_to_ticks(target))?;
        let new = ticks_to_diopters(self.backend.control(ControlId::FOCUS_ABSOLUTE)?);

        let start = self.clock.now();
        let travel_us = (1_000_000.0 * (new - old).abs() / actual_speed) as i64;
        let end = start + travel_us;
        {
            let mut history = self.history.lock();
            history.push(start, old);
            history.push(end, new);
        }
        tracing::debug!(from = old, to = new, travel_us, "Lens moving");
        Ok(())
    }

    /// Focus position at time `t`, in diopters.
    pub fn focus_at(&self, t: Timestamp) -> Result<f32, LensError> {
        let history = self.history.lock();
        if let Some((oldest, _)) = history.oldest() {
            if t < *oldest && history.len() == history.capacity() {
                return Err(LensError::HistoryExhausted(t));
            }
        }
        history
            .value_at(t)
            .ok_or(LensError::HistoryExhausted(t))
    }

    /// Current focus position, in diopters.
    pub fn focus(&self) -> Result<f32, LensError> {
        self.focus_at(self.clock.now())
    }

    /// True while the last commanded move is still under way.
    pub fn focus_changing(&self) -> bool {
        let now = self.clock.now();
        self.history
            .lock()
            .newest()
            .is_some_and(|(end, _)| *end > now)
    }

    fn report(&self, error: LensError) {
        match error {
            LensError::Driver(e) => self
                .events
                .error(EventKind::DriverError, format!("Lens control failed: {e}")),
            e @ LensError::HistoryExhausted(_) => {
                self.events.warning(EventKind::LensHistoryError, e.to_string())
            }
        }
    }
}

impl Device for Lens {
    fn name(&self) -> &str {
        "lens"
    }

    fn tag_frame(&self, frame: &mut Frame) {
        let start = frame.exposure_start();
        let end = frame.exposure_end();
        let (initial, last) = match (self.focus_at(start), self.focus_at(end)) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => {
                self.report(e);
                return;
            }
        };
        let span = end - start;
        let speed = if span > 0 {
            1_000_000.0 * (last - initial) / span as f32
        } else {
            0.0
        };

        frame.set_tag("lens.initialFocus", initial);
        frame.set_tag("lens.finalFocus", last);
        frame.set_tag("lens.focus", (initial + last) / 2.0);
        frame.set_tag("lens.focusSpeed", speed);

        frame.set_tag("lens.zoom", FOCAL_LENGTH_MM);
        frame.set_tag("lens.initialZoom", FOCAL_LENGTH_MM);
        frame.set_tag("lens.finalZoom", FOCAL_LENGTH_MM);
        frame.set_tag("lens.zoomSpeed", 0.0f32);
        frame.set_tag("lens.minZoom", FOCAL_LENGTH_MM);
        frame.set_tag("lens.maxZoom", FOCAL_LENGTH_MM);

        frame.set_tag("lens.aperture", APERTURE);
        frame.set_tag("lens.initialAperture", APERTURE);
        frame.set_tag("lens.finalAperture", APERTURE);
        frame.set_tag("lens.apertureSpeed", 0.0f32);
        frame.set_tag("lens.wideApertureMin", APERTURE);
        frame.set_tag("lens.wideApertureMax", APERTURE);
    }
}

/// Starts a focus move at `time` µs into the exposure.
#[derive(Clone)]
pub struct FocusAction {
    lens: Arc<Lens>,
    time: i64,
    focus: f32,
    speed: Option<f32>,
}

impl FocusAction {
    /// Moves to `focus` diopters at `time` µs into the exposure, at `speed` or full speed.
    pub fn new(lens: &Arc<Lens>, time: i64, focus: f32, speed: Option<f32>) -> Self {
        Self {
            lens: Arc::clone(lens),
            time,
            focus,
            speed,
        }
    }
}

impl std::fmt::Debug for FocusAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusAction")
            .field("time", &self.time)
            .field("focus", &self.focus)
            .field("speed", &self.speed)
            .finish()
    }
}

impl Action for FocusAction {
    fn time(&self) -> i64 {
        self.time
    }

    fn latency(&self) -> i64 {
        self.lens.focus_latency()
    }

    fn execute(&self) {
        if let Err(e) = self.lens.set_focus(self.focus, self.speed) {
            self.lens.report(e);
        }
    }

    fn box_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}
