use super::weighted_sum;
use crate::frame::Frame;
use crate::shot::{Shot, WhiteBalance};

/// Gray-world white balance.
///
/// Picks the color temperature whose interpolated raw-to-RGB matrix
/// makes the red and blue means of the frame's histogram equal, clamps
/// it to `min_kelvin..=max_kelvin` and blends it into the shot:
/// `smoothness * current + (1 - smoothness) * estimate`. A shot with an
/// explicit matrix is switched to the estimate directly.
pub fn auto_white_balance(
    shot: &mut Shot,
    frame: &Frame,
    min_kelvin: i32,
    max_kelvin: i32,
    smoothness: f32,
) {
    let histogram = frame.histogram();
    if !histogram.is_valid() || histogram.channels() < 3 {
        return;
    }

    // Channel order follows the sensor's GRBG readout.
    let raw = [0, 1, 2].map(|c| weighted_sum(histogram, c));

    let warm = frame.platform().raw_to_rgb_color_matrix(3200);
    let cool = frame.platform().raw_to_rgb_color_matrix(7000);
    let project = |m: &[f32; 12], row: usize| -> f64 {
        (0..3).map(|j| m[row * 4 + j] as f64 * raw[j]).sum()
    };
    let (warm_r, warm_b) = (project(&warm, 0), project(&warm, 2));
    let (cool_r, cool_b) = (project(&cool, 0), project(&cool, 2));

    let alpha = (warm_b - warm_r) / (cool_r - warm_r + warm_b - cool_b);
    if !alpha.is_finite() {
        return;
    }
    let estimate = 1.0 / (alpha * (1.0 / 7000.0 - 1.0 / 3200.0) + 1.0 / 3200.0);
    if !estimate.is_finite() {
        return;
    }
    let estimate = (estimate as i32).clamp(min_kelvin, max_kelvin);

    let next = match shot.white_balance {
        WhiteBalance::Kelvin(current) => {
            let s = smoothness.clamp(0.0, 1.0);
            (s * current as f32 + (1.0 - s) * estimate as f32) as i32
        }
        WhiteBalance::Matrix(_) => estimate,
    };
    tracing::trace!(estimate, next, "Auto white balance");
    shot.white_balance = WhiteBalance::Kelvin(next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::frame_with_histogram;
    use crate::frame::ActualParams;

    fn kelvin(shot: &Shot) -> i32 {
        match shot.white_balance {
            WhiteBalance::Kelvin(k) => k,
            WhiteBalance::Matrix(_) => panic!("expected a color temperature"),
        }
    }

    #[test]
    fn test_gray_raw_estimate() {
        let frame = frame_with_histogram(&[[10, 10, 10]; 8], ActualParams::default());
        let mut shot = Shot::new();
        auto_white_balance(&mut shot, &frame, 2000, 10_000, 0.0);
        let k = kelvin(&shot);
        assert!((5900..6300).contains(&k), "estimate {k}");
    }

    #[test]
    fn test_estimate_is_clamped() {
        let frame = frame_with_histogram(&[[10, 10, 10]; 8], ActualParams::default());
        let mut shot = Shot::new();
        auto_white_balance(&mut shot, &frame, 3000, 4000, 0.0);
        assert_eq!(kelvin(&shot), 4000);
    }

    #[test]
    fn test_full_smoothness_keeps_current() {
        let frame = frame_with_histogram(&[[10, 10, 10]; 8], ActualParams::default());
        let mut shot = Shot::new();
        shot.white_balance = WhiteBalance::Kelvin(3500);
        auto_white_balance(&mut shot, &frame, 2000, 10_000, 1.0);
        assert_eq!(kelvin(&shot), 3500);
    }

    #[test]
    fn test_matrix_replaced_by_estimate() {
        let frame = frame_with_histogram(&[[10, 10, 10]; 8], ActualParams::default());
        let mut shot = Shot::new();
        shot.white_balance = WhiteBalance::Matrix([0.0; 12]);
        auto_white_balance(&mut shot, &frame, 3000, 4000, 0.5);
        assert_eq!(kelvin(&shot), 4000);
    }

    #[test]
    fn test_dark_or_missing_histogram_leaves_shot() {
        let mut shot = Shot::new();
        shot.white_balance = WhiteBalance::Kelvin(4200);

        let black = frame_with_histogram(&[[10, 10, 10], [0, 0, 0]], ActualParams::default());
        auto_white_balance(&mut shot, &black, 2000, 10_000, 0.0);
        assert_eq!(kelvin(&shot), 4200);

        auto_white_balance(&mut shot, &Frame::invalid(), 2000, 10_000, 0.0);
        assert_eq!(kelvin(&shot), 4200);
    }
}
