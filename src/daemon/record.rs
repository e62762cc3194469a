//! Pipeline-private request state.

use crate::clock::Timestamp;
use crate::frame::{ActualParams, Frame, FrameData};
use crate::platform::Platform;
use crate::shot::{Histogram, Image, SharpnessMap, Shot};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts request records currently alive.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveCounter(Arc<AtomicUsize>);

impl LiveCounter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn token(&self) -> LiveToken {
        self.0.fetch_add(1, Ordering::SeqCst);
        LiveToken(Arc::clone(&self.0))
    }

    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Held by exactly one record; decrements the counter when the record is
/// destroyed or converted into a frame.
#[derive(Debug)]
struct LiveToken(Arc<AtomicUsize>);

impl Drop for LiveToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One shot on its way through the pipeline.
///
/// Lives in exactly one queue (or one thread's hands) at a time. The
/// predicted times are filled in by the setter once the frame's sync
/// has passed.
#[derive(Debug)]
pub(crate) struct RequestRecord {
    pub shot: Shot,
    pub exposure_start: Timestamp,
    pub exposure_end: Timestamp,
    pub processing_done: Timestamp,
    pub actual: ActualParams,
    pub image: Image,
    pub histogram: Histogram,
    pub sharpness: SharpnessMap,
    _live: LiveToken,
}

impl RequestRecord {
    pub(crate) fn new(shot: Shot, live: &LiveCounter) -> Self {
        let image = Image::discarded(shot.image.size, shot.image.format);
        Self {
            shot,
            exposure_start: Timestamp::ZERO,
            exposure_end: Timestamp::ZERO,
            processing_done: Timestamp::ZERO,
            actual: ActualParams::default(),
            image,
            histogram: Histogram::invalid(),
            sharpness: SharpnessMap::invalid(),
            _live: live.token(),
        }
    }

    pub(crate) fn wanted(&self) -> bool {
        self.shot.wanted()
    }

    /// Consumes the record into the frame handed to the application.
    pub(crate) fn into_frame(self, platform: Arc<Platform>) -> Frame {
        Frame::new(FrameData {
            shot: Some(self.shot),
            exposure_start: self.exposure_start,
            exposure_end: self.exposure_end,
            processing_done: self.processing_done,
            actual: self.actual,
            image: self.image,
            histogram: self.histogram,
            sharpness: self.sharpness,
            tags: BTreeMap::new(),
            platform,
        })
    }
}
