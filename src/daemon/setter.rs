//! Setter: programs the sensor one vertical sync ahead.

use super::actions::ScheduledAction;
use super::{RequestRecord, Shared};
use crate::clock::Timestamp;
use crate::shot::{SensorMode, Shot, WhiteBalance};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Highest colour temperature the white balance accepts, in kelvin.
const MAX_KELVIN: i32 = 25_000;

/// Exposure, frame time and gain of the last wanted shot.
#[derive(Debug, Clone, Copy)]
struct Settings {
    exposure: u32,
    frame_time: u32,
    gain: f32,
}

pub(super) struct Setter {
    shared: Arc<Shared>,
    /// Programmed at the previous sync; finalized at the next one.
    pending: Option<RequestRecord>,
    mode: Option<SensorMode>,
    last_readout: i64,
    last_good: Option<Settings>,
    action_seq: u64,
}

impl Setter {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            pending: None,
            mode: None,
            last_readout: 0,
            last_good: None,
            action_seq: 0,
        }
    }

    pub(super) fn run(mut self) {
        tracing::debug!("Setter started");
        while !self.shared.stopping() {
            match self.shared.backend.wait_for_vsync() {
                Ok(vsync) => self.tick(vsync),
                Err(e) => {
                    if self.shared.stopping() {
                        break;
                    }
                    self.shared.driver_error("Waiting for vertical sync failed", e);
                    self.shared.clock.sleep(self.shared.config.flush_poll());
                }
            }
        }
        self.shut_down();
        tracing::debug!("Setter exiting");
    }

    fn tick(&mut self, vsync: Timestamp) {
        tracing::trace!(%vsync, "Setter tick");
        match self.pending.take() {
            Some(record) => self.finalize(record, vsync),
            None => {
                if let Some(mode) = self.mode {
                    self.last_readout = self.shared.config.readout.readout_us(mode.size);
                }
            }
        }
        if self.shared.stopping() {
            return;
        }

        if self.shared.requests.is_empty() {
            for shot in self.shared.source.generate() {
                self.shared
                    .requests
                    .push(RequestRecord::new(shot, &self.shared.live));
                self.shared.metrics.request_submitted(1);
            }
        }

        let record = match self.shared.requests.with_front(|r| r.shot.mode()) {
            Some(needed) if Some(needed) != self.mode => {
                self.switch_mode(needed);
                return;
            }
            Some(_) => match self.shared.requests.try_pull() {
                Some(record) if Some(record.shot.mode()) == self.mode => record,
                // The queue changed under us; retry next tick.
                Some(record) => {
                    self.shared.requests.push_front(record);
                    return;
                }
                None => return,
            },
            None => match self.mode {
                Some(mode) => {
                    let exposure = self.shared.backend.capabilities().min_exposure;
                    self.shared.metrics.bubble();
                    RequestRecord::new(Shot::bubble(&mode, exposure), &self.shared.live)
                }
                None => return,
            },
        };
        self.program(record);
    }

    /// Restarts the sensor in `mode` once nothing is in flight.
    fn switch_mode(&mut self, mode: SensorMode) {
        tracing::info!(size = %mode.size, format = ?mode.format, "Switching sensor mode");
        let shared = Arc::clone(&self.shared);
        shared.flushing.store(true, Ordering::Release);
        let camera = shared.camera.lock();

        if let Err(e) = shared.backend.stop_streaming() {
            shared.driver_error("Stopping the sensor failed", e);
        }
        match shared.backend.start_streaming(&mode) {
            Ok(actual) => {
                self.mode = Some(actual);
                self.last_readout = shared.config.readout.readout_us(actual.size);
                shared.metrics.mode_switch();
                if let Err(e) = shared.backend.set_frame_time(0) {
                    shared.driver_error("Resetting the frame time failed", e);
                }
            }
            Err(e) => {
                self.mode = None;
                shared.driver_error("Starting the sensor failed", e);
                // The triggering request can never be taken; give it up.
                if let Some(record) = shared.requests.try_pull() {
                    if record.shot.mode() == mode {
                        shared.abandon([record]);
                    } else {
                        shared.requests.push_front(record);
                    }
                }
            }
        }

        shared.flushing.store(false, Ordering::Release);
        drop(camera);
    }

    /// Writes exposure and frame time for the frame starting at the next
    /// sync.
    fn program(&mut self, mut record: RequestRecord) {
        let backend = &self.shared.backend;
        let shot = &record.shot;
        let frame_time = shot
            .frame_time
            .max(shot.exposure.saturating_add(self.shared.config.exposure_overhead_us));

        let written = backend
            .set_frame_time(frame_time)
            .and_then(|()| backend.set_exposure(shot.exposure))
            .and_then(|()| Ok((backend.frame_time()?, backend.exposure()?)));
        match written {
            Ok((actual_frame_time, actual_exposure)) => {
                record.actual.frame_time = actual_frame_time;
                record.actual.exposure = actual_exposure;
            }
            Err(e) => {
                self.shared.driver_error("Programming exposure failed", e);
                if record.wanted() {
                    self.shared.requests.push_front(record);
                }
                return;
            }
        }

        if record.wanted() {
            self.last_good = Some(Settings {
                exposure: record.shot.exposure,
                frame_time,
                gain: record.shot.gain,
            });
        }
        tracing::trace!(
            id = %record.shot.id(),
            exposure = record.actual.exposure,
            frame_time = record.actual.frame_time,
            "Request programmed"
        );
        self.pending = Some(record);
    }

    /// Completes a record whose frame started at `vsync`: latches gain and
    /// white balance, predicts its timing, schedules its actions and
    /// passes it to the handler.
    fn finalize(&mut self, mut record: RequestRecord, vsync: Timestamp) {
        let shared = Arc::clone(&self.shared);

        if record.wanted() {
            match shared.backend.set_gain(record.shot.gain).and_then(|()| shared.backend.gain()) {
                Ok(gain) => record.actual.gain = gain,
                Err(e) => shared.driver_error("Setting gain failed", e),
            }

            let (white_balance, matrix) = match record.shot.white_balance {
                WhiteBalance::Kelvin(k) => {
                    let k = k.clamp(0, MAX_KELVIN);
                    (WhiteBalance::Kelvin(k), shared.platform.raw_to_rgb_color_matrix(k))
                }
                WhiteBalance::Matrix(m) => (WhiteBalance::Matrix(m), m),
            };
            match shared.backend.set_white_balance(&matrix) {
                Ok(()) => record.actual.white_balance = Some(white_balance),
                Err(e) => shared.driver_error("Setting white balance failed", e),
            }
        }

        let size = record.shot.image.size;
        let format = record.shot.image.format.streamed();
        let frame_time = record.actual.frame_time as i64;
        let exposure = record.actual.exposure as i64;
        let isp = shared.config.isp.isp_us(size, format);

        record.processing_done = vsync + self.last_readout + frame_time + isp;
        record.exposure_start = vsync + frame_time - exposure;
        self.last_readout = shared.config.readout.readout_us(size);
        record.exposure_end = record.exposure_start + exposure + self.last_readout;

        for action in record.shot.actions() {
            let fire_at = record.exposure_start + action.time() - action.latency();
            self.action_seq += 1;
            shared.actions.push(ScheduledAction {
                fire_at,
                seq: self.action_seq,
                action: action.box_clone(),
            });
        }

        tracing::trace!(
            id = %record.shot.id(),
            exposure_start = %record.exposure_start,
            processing_done = %record.processing_done,
            "Request in flight"
        );
        shared.in_flight.push(record);
        shared
            .metrics
            .set_queue_depths(shared.frames.len(), shared.in_flight.len());
    }

    /// Gives up the pending record and restores the last wanted settings
    /// so filler frames do not leave the sensor misconfigured.
    fn shut_down(&mut self) {
        if let Some(record) = self.pending.take() {
            self.shared.abandon([record]);
        }
        let Some(good) = self.last_good else {
            return;
        };
        let backend = &self.shared.backend;
        let restored = backend
            .set_exposure(good.exposure)
            .and_then(|()| backend.set_frame_time(good.frame_time))
            .and_then(|()| backend.set_gain(good.gain));
        if let Err(e) = restored {
            tracing::debug!(error = %e, "Could not restore last settings");
        }
    }
}
