//! Static description of the camera hardware.
//!
//! Passed explicitly to the sensor and attached to every frame, so
//! post-processing knows how to interpret raw data.

use serde::{Deserialize, Serialize};

/// Layout of the color filter array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BayerPattern {
    /// Red in the top-left corner.
    Rggb,
    /// Blue in the top-left corner.
    Bggr,
    /// Green, then red, on the first row.
    #[default]
    Grbg,
    /// Green, then blue, on the first row.
    Gbrg,
    /// No color filter array.
    NotBayer,
}

/// Hardware properties and color calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Platform {
    /// Device maker.
    pub manufacturer: String,
    /// Device model.
    pub model: String,
    /// Color filter layout.
    pub bayer_pattern: BayerPattern,
    /// Black level.
    pub min_raw_value: u16,
    /// Saturation level.
    pub max_raw_value: u16,
    /// Raw-to-RGB matrix calibrated under 3200 K light, 3x4 row major.
    pub color_matrix_3200k: [f32; 12],
    /// Raw-to-RGB matrix calibrated under 7000 K light, 3x4 row major.
    pub color_matrix_7000k: [f32; 12],
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            manufacturer: "Nokia".to_string(),
            model: "Nokia N900".to_string(),
            bayer_pattern: BayerPattern::Grbg,
            min_raw_value: 0,
            max_raw_value: 959,
            color_matrix_3200k: [
                1.6697, -0.2693, -0.4004, -42.4346, //
                -0.3576, 1.0615, 1.5949, -37.1158, //
                -0.2175, -1.8751, 6.9640, -26.6970,
            ],
            color_matrix_7000k: [
                2.2997, -0.4478, 0.1706, -39.0923, //
                -0.3826, 1.5906, -0.2080, -25.4311, //
                -0.0888, -0.7344, 2.2832, -20.0826,
            ],
        }
    }
}

impl Platform {
    /// Color matrix for a given color temperature.
    ///
    /// Interpolates linearly in inverse temperature between the two
    /// calibrated matrices, extrapolating outside 3200..7000 K.
    pub fn raw_to_rgb_color_matrix(&self, kelvin: i32) -> [f32; 12] {
        let alpha = kelvin_alpha(kelvin);
        let mut out = [0.0f32; 12];
        for (i, o) in out.iter_mut().enumerate() {
            let a = self.color_matrix_3200k[i] as f64;
            let b = self.color_matrix_7000k[i] as f64;
            *o = ((1.0 - alpha) * a + alpha * b) as f32;
        }
        out
    }
}

/// Interpolation weight of the 7000 K matrix for `kelvin`.
pub(crate) fn kelvin_alpha(kelvin: i32) -> f64 {
    let k = kelvin.max(1) as f64;
    (1.0 / k - 1.0 / 3200.0) / (1.0 / 7000.0 - 1.0 / 3200.0)
}

/// Inverse of [`kelvin_alpha`].
pub(crate) fn alpha_kelvin(alpha: f64) -> f64 {
    1.0 / (alpha * (1.0 / 7000.0 - 1.0 / 3200.0) + 1.0 / 3200.0)
}
