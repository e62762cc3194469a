//! Capture requests.
//!
//! A [`Shot`] describes one frame the application wants: sensor
//! parameters, where the pixels should go, which statistics to compute and
//! which timed [`Action`]s to run during the exposure. Shots are plain
//! values; submitting one copies it, so the original can be modified and
//! resubmitted.

mod action;
mod image;
mod stats;

pub use action::{Action, FnAction};
pub use image::{BufferMode, Image, ImageData, ImageError, ImageRequest, PixelFormat, SharedImage, Size};
pub use stats::{Histogram, HistogramConfig, Rect, SharpnessConfig, SharpnessMap};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SHOT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity correlating delivered frames with the shot that requested them.
///
/// Cloning a shot keeps its id; [`Shot::new`] always draws a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShotId(u64);

impl ShotId {
    fn next() -> Self {
        ShotId(NEXT_SHOT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Id of frames that came from no shot.
    pub const NONE: ShotId = ShotId(0);

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ShotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// White balance target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum WhiteBalance {
    /// Color temperature; the platform converts it to a matrix.
    Kelvin(i32),
    /// Explicit 3x4 raw-to-RGB matrix, row major.
    Matrix([f32; 12]),
}

impl Default for WhiteBalance {
    fn default() -> Self {
        WhiteBalance::Kelvin(5000)
    }
}

/// Everything that requires restarting the sensor to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SensorMode {
    /// Image size.
    pub size: Size,
    /// Streamed pixel format.
    pub format: PixelFormat,
    /// Histogram settings.
    pub histogram: HistogramConfig,
    /// Sharpness settings.
    pub sharpness: SharpnessConfig,
}

/// A request for one frame.
#[derive(Debug, Clone)]
pub struct Shot {
    id: ShotId,
    /// Exposure time in µs.
    pub exposure: u32,
    /// Time between frame starts in µs; raised to fit the exposure.
    pub frame_time: u32,
    /// Linear analog gain.
    pub gain: f32,
    /// White balance to apply.
    pub white_balance: WhiteBalance,
    /// Image size, format and destination.
    pub image: ImageRequest,
    /// Histogram to compute.
    pub histogram: HistogramConfig,
    /// Sharpness map to compute.
    pub sharpness: SharpnessConfig,
    actions: Vec<Box<dyn Action>>,
    wanted: bool,
}

impl Shot {
    /// A shot with default settings and a fresh id.
    pub fn new() -> Self {
        Self {
            id: ShotId::next(),
            exposure: 10_000,
            frame_time: 33_333,
            gain: 1.0,
            white_balance: WhiteBalance::default(),
            image: ImageRequest::default(),
            histogram: HistogramConfig::default(),
            sharpness: SharpnessConfig::default(),
            actions: Vec::new(),
            wanted: true,
        }
    }

    /// Filler shot keeping the sensor busy in `mode` while nothing is
    /// requested. Never delivered.
    pub(crate) fn bubble(mode: &SensorMode, exposure: u32) -> Self {
        Self {
            id: ShotId::NONE,
            exposure,
            frame_time: 0,
            image: ImageRequest::new(mode.size, mode.format, BufferMode::Discard),
            histogram: mode.histogram,
            sharpness: mode.sharpness,
            wanted: false,
            ..Self::new()
        }
    }

    /// This shot's id; frames carry it back.
    pub fn id(&self) -> ShotId {
        self.id
    }

    /// False only for internal filler shots.
    pub fn wanted(&self) -> bool {
        self.wanted
    }

    /// Gives the shot a fresh identity, as if newly created.
    pub fn renew_id(&mut self) {
        self.id = ShotId::next();
    }

    /// Attaches an action; it is cloned into the pipeline on submission.
    pub fn add_action(&mut self, action: impl Action + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Attached actions.
    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    /// Removes every action.
    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }

    /// Sensor mode needed to take this shot.
    pub fn mode(&self) -> SensorMode {
        SensorMode {
            size: self.image.size,
            format: self.image.format.streamed(),
            histogram: self.histogram,
            sharpness: self.sharpness,
        }
    }
}

impl Default for Shot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_keeps_id_new_draws_fresh() {
        let shot = Shot::new();
        let copy = shot.clone();
        assert_eq!(shot.id(), copy.id());
        assert_ne!(shot.id(), Shot::new().id());

        let mut renewed = shot.clone();
        renewed.renew_id();
        assert_ne!(renewed.id(), shot.id());
    }

    #[test]
    fn test_mode_normalizes_format() {
        let mut shot = Shot::new();
        shot.image.format = PixelFormat::Rgb24;
        assert_eq!(shot.mode().format, PixelFormat::Uyvy);

        let mut other = shot.clone();
        other.image.format = PixelFormat::Uyvy;
        assert_eq!(shot.mode(), other.mode());

        other.histogram.enabled = true;
        assert_ne!(shot.mode(), other.mode());
    }

    #[test]
    fn test_bubble_matches_mode() {
        let mode = Shot::new().mode();
        let bubble = Shot::bubble(&mode, 100);
        assert!(!bubble.wanted());
        assert_eq!(bubble.mode(), mode);
        assert!(matches!(bubble.image.buffer, BufferMode::Discard));
    }

    #[test]
    fn test_actions_deep_copied() {
        let mut shot = Shot::new();
        shot.add_action(FnAction::new(0, 0, || {}));
        let copy = shot.clone();
        shot.clear_actions();
        assert_eq!(copy.actions().len(), 1);
        assert!(shot.actions().is_empty());
    }
}
