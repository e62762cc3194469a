//! Metering helpers for closing the loop from frames to shots.
//!
//! Both helpers read the histogram the sensor computed for a frame and
//! adjust the next shot. They do nothing when the frame carries no valid
//! histogram, so a caller can run them on every frame unconditionally.

mod exposure;
mod white_balance;

pub use exposure::{auto_expose, ExposureLimits};
pub use white_balance::auto_white_balance;

use crate::shot::Histogram;

/// Histogram-weighted bucket sum for one channel.
fn weighted_sum(histogram: &Histogram, channel: u32) -> f64 {
    (0..histogram.buckets())
        .map(|b| histogram.get(b, channel) as f64 * b as f64)
        .sum()
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::frame::{ActualParams, Frame, FrameData};
    use crate::platform::Platform;
    use crate::shot::{Histogram, Rect, Shot};
    use std::sync::Arc;

    /// Builds a valid frame around a histogram given as per-bucket RGB
    /// counts.
    pub(crate) fn frame_with_histogram(counts: &[[u32; 3]], actual: ActualParams) -> Frame {
        let data = counts.iter().flatten().copied().collect();
        let histogram = Histogram::new(counts.len() as u32, 3, Rect::new(0, 0, 640, 480), data);
        Frame::new(FrameData {
            shot: Some(Shot::new()),
            actual,
            histogram,
            platform: Arc::new(Platform::default()),
            ..FrameData::default()
        })
    }
}
