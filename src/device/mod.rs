//! Peripherals synchronised with the sensor.
//!
//! A device does two things: it offers [`Action`](crate::shot::Action)s
//! that shots can carry so the device acts at a precise point during the
//! exposure, and it annotates every delivered frame with what it was
//! doing while that frame was exposed. For the second part each device
//! keeps a short history of its own state.

mod flash;
mod lens;
mod sound;

pub use flash::{FireAction, Flash, FlashError, StrobeStartAction, StrobeStopAction};
pub use lens::{FocusAction, Lens, LensError};
pub use sound::{AudioSink, SoundAction, SoundClip, SoundError, SoundPlayer};

use crate::frame::Frame;

/// A peripheral that tags frames after they are captured.
pub trait Device: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Adds this device's metadata for the frame's exposure interval.
    ///
    /// Called once per frame in attachment order, after the frame's
    /// statistics are filled in.
    fn tag_frame(&self, frame: &mut Frame);
}
