//! Delivered frames.

use crate::clock::Timestamp;
use crate::platform::Platform;
use crate::shot::{Histogram, Image, SharpnessMap, Shot, ShotId, WhiteBalance};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Device metadata attached to a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagValue {
    /// Integer value, such as a time offset in µs.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Free text.
    Str(String),
}

impl TagValue {
    /// Integer value, if this is one.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TagValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            TagValue::Float(v) => Some(*v),
            TagValue::Int(v) => Some(*v as f64),
            TagValue::Str(_) => None,
        }
    }

    /// Text value, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Int(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

impl From<f32> for TagValue {
    fn from(v: f32) -> Self {
        TagValue::Float(v as f64)
    }
}

impl From<&str> for TagValue {
    fn from(v: &str) -> Self {
        TagValue::Str(v.to_string())
    }
}

/// Parameters the sensor actually used, which may differ from the
/// requested ones after hardware rounding and clamping.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActualParams {
    /// Exposure time, µs.
    pub exposure: u32,
    /// Frame time, µs.
    pub frame_time: u32,
    /// Analog gain.
    pub gain: f32,
    /// White balance, if the sensor reported one.
    pub white_balance: Option<WhiteBalance>,
}

/// Everything known about a completed capture.
#[derive(Debug, Clone, Default)]
pub struct FrameData {
    /// The shot this frame answers; `None` for invalid frames.
    pub shot: Option<Shot>,
    /// When the first row started exposing.
    pub exposure_start: Timestamp,
    /// When the last row finished reading out.
    pub exposure_end: Timestamp,
    /// When the buffer came back from the driver.
    pub processing_done: Timestamp,
    /// Parameters the sensor actually used.
    pub actual: ActualParams,
    /// Pixels, if kept.
    pub image: Image,
    /// Histogram, if requested.
    pub histogram: Histogram,
    /// Sharpness map, if requested.
    pub sharpness: SharpnessMap,
    /// Device metadata.
    pub tags: BTreeMap<String, TagValue>,
    /// Hardware description.
    pub platform: Arc<Platform>,
}

/// A captured frame, cheap to clone.
///
/// Frames returned by a sensor that was not running are invalid: they
/// carry no shot and default metadata.
#[derive(Clone, Default)]
pub struct Frame {
    data: Arc<FrameData>,
}

impl Frame {
    pub(crate) fn new(data: FrameData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// A frame standing for "no frame".
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Whether the frame came from a running sensor.
    pub fn is_valid(&self) -> bool {
        self.data.shot.is_some()
    }

    /// The shot that requested this frame.
    pub fn shot(&self) -> Option<&Shot> {
        self.data.shot.as_ref()
    }

    /// Id of the originating shot.
    pub fn id(&self) -> ShotId {
        self.data.shot.as_ref().map_or(ShotId::NONE, Shot::id)
    }

    /// When the first row started exposing.
    #[inline]
    pub fn exposure_start(&self) -> Timestamp {
        self.data.exposure_start
    }

    /// When the last row finished reading out.
    #[inline]
    pub fn exposure_end(&self) -> Timestamp {
        self.data.exposure_end
    }

    /// When the buffer came back from the driver.
    #[inline]
    pub fn processing_done(&self) -> Timestamp {
        self.data.processing_done
    }

    /// Exposure the sensor used, µs.
    pub fn exposure(&self) -> u32 {
        self.data.actual.exposure
    }

    /// Frame time the sensor used, µs.
    pub fn frame_time(&self) -> u32 {
        self.data.actual.frame_time
    }

    /// Gain the sensor used.
    pub fn gain(&self) -> f32 {
        self.data.actual.gain
    }

    /// White balance the sensor used.
    pub fn white_balance(&self) -> Option<WhiteBalance> {
        self.data.actual.white_balance
    }

    /// The frame's image.
    pub fn image(&self) -> &Image {
        &self.data.image
    }

    /// Histogram over the requested region.
    pub fn histogram(&self) -> &Histogram {
        &self.data.histogram
    }

    /// Sharpness map.
    pub fn sharpness(&self) -> &SharpnessMap {
        &self.data.sharpness
    }

    /// Hardware description.
    pub fn platform(&self) -> &Platform {
        &self.data.platform
    }

    /// Looks up one device tag.
    pub fn tag(&self, key: &str) -> Option<&TagValue> {
        self.data.tags.get(key)
    }

    /// All device tags.
    pub fn tags(&self) -> &BTreeMap<String, TagValue> {
        &self.data.tags
    }

    /// Sets a tag, copying the frame data if it is shared.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        Arc::make_mut(&mut self.data)
            .tags
            .insert(key.into(), value.into());
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id())
            .field("exposure_start", &self.data.exposure_start)
            .field("exposure", &self.data.actual.exposure)
            .field("size", &self.data.image.size())
            .field("discarded", &self.data.image.is_discarded())
            .field("tags", &self.data.tags.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_frame() {
        let frame = Frame::invalid();
        assert!(!frame.is_valid());
        assert_eq!(frame.id(), ShotId::NONE);
        assert!(frame.image().is_discarded());
    }

    #[test]
    fn test_set_tag_copies_on_write() {
        let shot = Shot::new();
        let mut frame = Frame::new(FrameData {
            shot: Some(shot.clone()),
            ..Default::default()
        });
        let original = frame.clone();

        frame.set_tag("lens.focus", 2.5f32);
        frame.set_tag("flash.duration", 1000i64);

        assert_eq!(frame.tag("lens.focus").and_then(TagValue::as_float), Some(2.5));
        assert_eq!(frame.tag("flash.duration").and_then(TagValue::as_int), Some(1000));
        assert!(original.tags().is_empty());
        assert_eq!(frame.id(), shot.id());
    }
}
