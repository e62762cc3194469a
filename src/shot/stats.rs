//! Statistics the sensor computes alongside each frame.

use super::Size;
use serde::{Deserialize, Serialize};

/// Axis-aligned region of the sensor, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Region at `x`, `y` of `width` by `height`.
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole frame of the given size.
    pub fn covering(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }
}

/// Histogram generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Whether to compute a histogram.
    pub enabled: bool,
    /// Area to sample; empty means the whole frame.
    pub region: Rect,
    /// Bucket count.
    pub buckets: u32,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: Rect::default(),
            buckets: 64,
        }
    }
}

/// Sharpness map generation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharpnessConfig {
    /// Whether to compute a sharpness map.
    pub enabled: bool,
    /// Grid cells across and down the frame.
    pub size: Size,
}

impl Default for SharpnessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            size: Size::new(16, 12),
        }
    }
}

/// Per-channel intensity histogram, three channels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    buckets: u32,
    channels: u32,
    region: Rect,
    /// Bucket-major: `data[bucket * channels + channel]`.
    data: Vec<u32>,
}

impl Histogram {
    /// Wraps bucket-major counts.
    pub fn new(buckets: u32, channels: u32, region: Rect, data: Vec<u32>) -> Self {
        Self {
            buckets,
            channels,
            region,
            data,
        }
    }

    /// A histogram carrying no data.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Whether the counts match the shape.
    pub fn is_valid(&self) -> bool {
        self.buckets > 0 && self.data.len() == (self.buckets * self.channels) as usize
    }

    /// Bucket count.
    pub fn buckets(&self) -> u32 {
        self.buckets
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Sampled region.
    pub fn region(&self) -> Rect {
        self.region
    }

    /// Count in `bucket` for `channel`; zero outside the histogram.
    pub fn get(&self, bucket: u32, channel: u32) -> u32 {
        if bucket >= self.buckets || channel >= self.channels {
            return 0;
        }
        self.data[(bucket * self.channels + channel) as usize]
    }

    /// Sum over all buckets of one channel.
    pub fn total(&self, channel: u32) -> u64 {
        (0..self.buckets)
            .map(|b| self.get(b, channel) as u64)
            .sum()
    }
}

/// Grid of focus measures over the frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharpnessMap {
    size: Size,
    channels: u32,
    /// Row-major cells, `channels` values per cell.
    data: Vec<u32>,
}

impl SharpnessMap {
    /// Wraps row-major cell values.
    pub fn new(size: Size, channels: u32, data: Vec<u32>) -> Self {
        Self {
            size,
            channels,
            data,
        }
    }

    /// A map carrying no data.
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Whether the values match the shape.
    pub fn is_valid(&self) -> bool {
        !self.size.is_empty() && self.data.len() == self.size.area() * self.channels as usize
    }

    /// Grid size in cells.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Value of one cell and channel; zero outside the grid.
    pub fn get(&self, x: u32, y: u32, channel: u32) -> u32 {
        if x >= self.size.width || y >= self.size.height || channel >= self.channels {
            return 0;
        }
        let cell = (y * self.size.width + x) as usize;
        self.data[cell * self.channels as usize + channel as usize]
    }

    /// Sum of every cell and channel, a scalar focus measure.
    pub fn total(&self) -> u64 {
        self.data.iter().map(|v| *v as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_histogram() {
        let hist = Histogram::invalid();
        assert!(!hist.is_valid());
        assert_eq!(hist.get(0, 0), 0);
    }

    #[test]
    fn test_histogram_indexing() {
        // 2 buckets x 3 channels
        let hist = Histogram::new(2, 3, Rect::default(), vec![1, 2, 3, 4, 5, 6]);
        assert!(hist.is_valid());
        assert_eq!(hist.get(1, 0), 4);
        assert_eq!(hist.get(0, 2), 3);
        assert_eq!(hist.total(1), 7);
        assert_eq!(hist.get(2, 0), 0);
    }

    #[test]
    fn test_sharpness_indexing() {
        let map = SharpnessMap::new(Size::new(2, 2), 1, vec![1, 2, 3, 4]);
        assert!(map.is_valid());
        assert_eq!(map.get(1, 1, 0), 4);
        assert_eq!(map.total(), 10);
        assert!(!SharpnessMap::invalid().is_valid());
    }
}
