use crate::frame::Frame;
use crate::shot::Shot;
use serde::{Deserialize, Serialize};

/// Bounds and goals for [`auto_expose`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureLimits {
    /// Shortest exposure to program, µs.
    pub min_exposure: u32,
    /// Longest exposure before gain is raised instead, µs.
    pub max_exposure: u32,
    /// Highest analog gain to apply once exposure is capped.
    pub max_gain: f32,
    /// Desired mean brightness as a fraction of full scale.
    pub target_brightness: f32,
    /// Weight of the current setting when blending in the new one.
    pub smoothness: f32,
}

impl Default for ExposureLimits {
    fn default() -> Self {
        Self {
            min_exposure: 100,
            max_exposure: 80_000,
            max_gain: 32.0,
            target_brightness: 0.3,
            smoothness: 0.5,
        }
    }
}

/// Largest single-step change in total light.
const MAX_STEP: f64 = 8.0;
/// Fraction of samples in the top bucket treated as clipping.
const CLIPPED_FRACTION: f64 = 0.05;

/// Mean brightness over all channels in `0.0..1.0`, plus the fraction of
/// samples in the brightest bucket.
fn brightness(frame: &Frame) -> Option<(f64, f64)> {
    let histogram = frame.histogram();
    if !histogram.is_valid() || histogram.channels() == 0 {
        return None;
    }
    let buckets = histogram.buckets();
    let mut weighted = 0.0;
    let mut total = 0u64;
    let mut top = 0u64;
    for c in 0..histogram.channels() {
        weighted += (0..buckets)
            .map(|b| histogram.get(b, c) as f64 * (b as f64 + 0.5))
            .sum::<f64>();
        total += histogram.total(c);
        top += histogram.get(buckets - 1, c) as u64;
    }
    if total == 0 {
        return None;
    }
    Some((
        weighted / (total as f64 * buckets as f64),
        top as f64 / total as f64,
    ))
}

/// Adjusts the shot's exposure and gain towards the target brightness.
///
/// Works on the product of exposure and gain the frame was actually
/// taken with. Exposure is preferred; gain only makes up what
/// `max_exposure` cannot. While highlights are clipped the shot never
/// gets brighter.
pub fn auto_expose(shot: &mut Shot, frame: &Frame, limits: &ExposureLimits) {
    let Some((mean, clipped)) = brightness(frame) else {
        return;
    };

    let exposure = if frame.exposure() > 0 {
        frame.exposure()
    } else {
        shot.exposure
    };
    let gain = if frame.gain() > 0.0 { frame.gain() } else { shot.gain };
    let current = exposure as f64 * gain as f64;

    let mut ratio =
        (limits.target_brightness as f64 / mean.max(1e-6)).clamp(1.0 / MAX_STEP, MAX_STEP);
    if clipped > CLIPPED_FRACTION {
        ratio = ratio.min(0.75);
    }

    let s = limits.smoothness.clamp(0.0, 1.0) as f64;
    let desired = s * current + (1.0 - s) * current * ratio;

    let min_exposure = limits.min_exposure.min(limits.max_exposure);
    let next_exposure = (desired.round() as u32).clamp(min_exposure, limits.max_exposure);
    let next_gain = (desired / next_exposure.max(1) as f64) as f32;

    shot.exposure = next_exposure;
    shot.gain = next_gain.clamp(1.0, limits.max_gain.max(1.0));
    tracing::trace!(mean, clipped, exposure = shot.exposure, gain = shot.gain, "Auto exposure");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::frame_with_histogram;
    use crate::frame::ActualParams;

    fn taken_with(exposure: u32, gain: f32) -> ActualParams {
        ActualParams {
            exposure,
            frame_time: 33_333,
            gain,
            white_balance: None,
        }
    }

    fn single_bucket(bucket: usize, buckets: usize) -> Vec<[u32; 3]> {
        let mut counts = vec![[0; 3]; buckets];
        counts[bucket] = [100; 3];
        counts
    }

    fn no_smoothing() -> ExposureLimits {
        ExposureLimits {
            smoothness: 0.0,
            ..ExposureLimits::default()
        }
    }

    #[test]
    fn test_dark_frame_lengthens_exposure() {
        // Mean 1.5 / 16 of full scale.
        let frame = frame_with_histogram(&single_bucket(1, 16), taken_with(10_000, 1.0));
        let mut shot = Shot::new();
        auto_expose(&mut shot, &frame, &no_smoothing());
        assert_eq!(shot.exposure, 32_000);
        assert_eq!(shot.gain, 1.0);
    }

    #[test]
    fn test_gain_covers_exposure_cap() {
        let frame = frame_with_histogram(&single_bucket(1, 16), taken_with(10_000, 1.0));
        let mut shot = Shot::new();
        let limits = ExposureLimits {
            max_exposure: 20_000,
            ..no_smoothing()
        };
        auto_expose(&mut shot, &frame, &limits);
        assert_eq!(shot.exposure, 20_000);
        assert!((shot.gain - 1.6).abs() < 1e-3);
    }

    #[test]
    fn test_clipped_frame_darkens() {
        let frame = frame_with_histogram(&single_bucket(15, 16), taken_with(40_000, 2.0));
        let mut shot = Shot::new();
        auto_expose(&mut shot, &frame, &no_smoothing());
        assert!((shot.exposure as f32 * shot.gain) < 40_000.0 * 2.0);
    }

    #[test]
    fn test_on_target_is_stable() {
        // Mean 4.5 / 15 = 0.3 of full scale.
        let frame = frame_with_histogram(&single_bucket(4, 15), taken_with(12_000, 1.0));
        let mut shot = Shot::new();
        auto_expose(&mut shot, &frame, &ExposureLimits::default());
        assert_eq!(shot.exposure, 12_000);
        assert_eq!(shot.gain, 1.0);
    }

    #[test]
    fn test_invalid_histogram_leaves_shot() {
        let mut shot = Shot::new();
        shot.exposure = 1234;
        auto_expose(&mut shot, &Frame::invalid(), &ExposureLimits::default());
        assert_eq!(shot.exposure, 1234);
    }
}
