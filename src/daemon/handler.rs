//! Handler: pairs driver buffers with in-flight requests.

use super::{RequestRecord, Shared};
use crate::backend::RawBuffer;
use crate::event::EventKind;
use crate::shot::{BufferMode, Image, ImageError};
use parking_lot::MutexGuard;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// How a buffer's timestamp relates to a record's prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Arrival {
    /// The record's frame never came; the buffer belongs to a later one.
    Late,
    Match,
    /// The buffer predates the record; no request accounts for it.
    Early,
}

/// Classifies `dt = predicted - actual` in µs against the slack window.
pub(super) fn classify(dt: i64, late_slack: i64, early_slack: i64) -> Arrival {
    if dt < -late_slack {
        Arrival::Late
    } else if dt < early_slack {
        Arrival::Match
    } else {
        Arrival::Early
    }
}

pub(super) struct Handler {
    shared: Arc<Shared>,
    /// Buffer carried over after a late record.
    held: Option<RawBuffer>,
    /// Record carried over after an early buffer.
    current: Option<RequestRecord>,
}

impl Handler {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            held: None,
            current: None,
        }
    }

    pub(super) fn run(mut self) {
        tracing::debug!("Handler started");
        let shared = Arc::clone(&self.shared);
        let mut camera = shared.camera.lock();

        while !shared.stopping() {
            if shared.flushing.load(Ordering::Acquire)
                && self.current.is_none()
                && shared.in_flight.is_empty()
            {
                self.yield_camera(&mut camera);
                continue;
            }

            let buffer = match self.held.take() {
                Some(buffer) => buffer,
                None => match shared.backend.acquire_buffer(true) {
                    Ok(Some(buffer)) => buffer,
                    Ok(None) => continue,
                    Err(e) => {
                        shared.driver_error("Acquiring a buffer failed", e);
                        shared.clock.sleep(shared.config.flush_poll());
                        continue;
                    }
                },
            };

            let record = match self.current.take() {
                Some(record) => record,
                None => {
                    let next = if shared.flushing.load(Ordering::Acquire) {
                        shared.in_flight.try_pull()
                    } else {
                        shared.in_flight.pull_timeout(shared.config.in_flight_grace())
                    };
                    match next {
                        Some(record) => record,
                        None => {
                            tracing::debug!(timestamp = %buffer.timestamp, "Buffer with nothing in flight");
                            shared.metrics.unexpected_buffer();
                            shared.backend.release_buffer(buffer.handle);
                            continue;
                        }
                    }
                }
            };

            self.handle(buffer, record);
        }

        if let Some(buffer) = self.held.take() {
            shared.backend.release_buffer(buffer.handle);
        }
        if let Some(record) = self.current.take() {
            shared.abandon([record]);
        }
        tracing::debug!("Handler exiting");
    }

    /// Lets the setter restart the sensor, sleeping until the flush ends.
    fn yield_camera(&mut self, camera: &mut MutexGuard<'_, ()>) {
        let shared = &self.shared;
        if let Some(buffer) = self.held.take() {
            shared.backend.release_buffer(buffer.handle);
        }
        tracing::debug!("Handler yielding the camera");
        MutexGuard::unlocked_fair(camera, || {
            while shared.flushing.load(Ordering::Acquire) && !shared.stopping() {
                shared.clock.sleep(shared.config.flush_poll());
            }
        });
    }

    fn handle(&mut self, buffer: RawBuffer, mut record: RequestRecord) {
        let shared = Arc::clone(&self.shared);
        let dt = record.processing_done - buffer.timestamp;
        let arrival = classify(
            dt,
            shared.config.late_slack_us as i64,
            shared.config.early_slack_us as i64,
        );
        tracing::debug!(id = %record.shot.id(), dt_us = dt, ?arrival, "Buffer arrived");

        match arrival {
            Arrival::Late => {
                self.held = Some(buffer);
                if !record.wanted() {
                    return;
                }
                shared.metrics.late_frame();
                shared.events.warning(
                    EventKind::ImageDropped,
                    format!(
                        "Image for shot {} expected at {} never arrived ({} µs late)",
                        record.shot.id(),
                        record.processing_done,
                        -dt
                    ),
                );
                record.image.discard();
                self.collect_statistics(&mut record);
                shared.deliver(record);
            }
            Arrival::Match => {
                if !record.wanted() {
                    shared.backend.release_buffer(buffer.handle);
                    return;
                }
                record.processing_done = buffer.timestamp;
                record.image = self.fill_image(&record, &buffer);
                shared.backend.release_buffer(buffer.handle);
                self.collect_statistics(&mut record);
                shared.deliver(record);
            }
            Arrival::Early => {
                shared.metrics.unexpected_buffer();
                shared.events.info(
                    EventKind::UnexpectedBuffer,
                    format!(
                        "Unexpected buffer at {}, {} µs before shot {}",
                        buffer.timestamp,
                        dt,
                        record.shot.id()
                    ),
                );
                shared.backend.release_buffer(buffer.handle);
                self.current = Some(record);
            }
        }
    }

    fn fill_image(&self, record: &RequestRecord, buffer: &RawBuffer) -> Image {
        let shared = &self.shared;
        let size = record.shot.image.size;
        let format = record.shot.image.format.streamed();

        match &record.shot.image.buffer {
            BufferMode::Discard => Image::discarded(size, format),
            BufferMode::AutoAllocate => {
                let len = (size.area() * format.bytes_per_pixel()).min(buffer.data.len());
                Image::owned(size, format, buffer.data.slice(..len))
            }
            BufferMode::CallerOwned(target) => {
                match target.write_from(size, format, &buffer.data, shared.config.image_lock_timeout()) {
                    Ok(()) => Image::shared(target.clone()),
                    Err(e) => {
                        let id = record.shot.id();
                        match &e {
                            ImageError::SizeMismatch { .. } => shared.events.error(
                                EventKind::ResolutionMismatch,
                                format!("Shot {id}: {e}; image discarded"),
                            ),
                            ImageError::FormatMismatch { .. } => shared.events.error(
                                EventKind::FormatMismatch,
                                format!("Shot {id}: {e}; image discarded"),
                            ),
                            ImageError::Locked(_) => shared.events.warning(
                                EventKind::ImageTargetLocked,
                                format!("Shot {id}: {e}; image discarded"),
                            ),
                        }
                        Image::discarded(size, format)
                    }
                }
            }
        }
    }

    fn collect_statistics(&self, record: &mut RequestRecord) {
        let backend = &self.shared.backend;
        record.histogram = backend.histogram(record.exposure_end, &record.shot.histogram);
        record.sharpness = backend.sharpness_map(record.exposure_end, &record.shot.sharpness);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_window() {
        assert_eq!(classify(0, 25_000, 10_000), Arrival::Match);
        assert_eq!(classify(-25_000, 25_000, 10_000), Arrival::Match);
        assert_eq!(classify(9_999, 25_000, 10_000), Arrival::Match);
        assert_eq!(classify(-25_001, 25_000, 10_000), Arrival::Late);
        assert_eq!(classify(10_000, 25_000, 10_000), Arrival::Early);
    }
}
