//! Image geometry, pixel formats and buffer ownership.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors writing into a caller-owned image.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The application held the lock past the deadline.
    #[error("image target still locked after {0:?}")]
    Locked(Duration),
    /// The target's size differs from the frame's.
    #[error("image size mismatch: target is {target}, source is {source_size}")]
    SizeMismatch {
        /// Size of the application's image.
        target: Size,
        /// Size of the streamed frame.
        source_size: Size,
    },
    /// The target's pixel format differs from the frame's.
    #[error("image format mismatch: target is {target:?}, source is {source_format:?}")]
    FormatMismatch {
        /// Format of the application's image.
        target: PixelFormat,
        /// Format of the streamed frame.
        source_format: PixelFormat,
    },
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Columns.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl Size {
    /// A `width` by `height` size.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count.
    #[inline]
    pub fn area(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Whether either side is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Packed 4:2:2 YUV, two bytes per pixel.
    #[default]
    Uyvy,
    /// Packed 8-bit YUV, three bytes per pixel.
    Yuv24,
    /// Packed 8-bit RGB.
    Rgb24,
    /// RGB 5:6:5.
    Rgb16,
    /// Bayer mosaic straight off the sensor, 16 bits per sample.
    Raw,
}

impl PixelFormat {
    /// Storage per pixel in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Uyvy | PixelFormat::Rgb16 | PixelFormat::Raw => 2,
            PixelFormat::Yuv24 | PixelFormat::Rgb24 => 3,
        }
    }

    /// The format the sensor actually streams for a requested one.
    ///
    /// The sensor produces either raw data or UYVY; every processed
    /// format is delivered as UYVY.
    pub fn streamed(self) -> PixelFormat {
        match self {
            PixelFormat::Raw => PixelFormat::Raw,
            _ => PixelFormat::Uyvy,
        }
    }
}

/// Destination image owned by the application.
///
/// The pipeline writes into it under a bounded lock; while the
/// application holds [`SharedImage::lock`] the write is abandoned.
#[derive(Clone)]
pub struct SharedImage {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    size: Size,
    format: PixelFormat,
    pixels: Mutex<Vec<u8>>,
}

impl SharedImage {
    /// Allocates a zeroed image.
    pub fn new(size: Size, format: PixelFormat) -> Self {
        Self {
            inner: Arc::new(SharedInner {
                size,
                format,
                pixels: Mutex::new(vec![0; size.area() * format.bytes_per_pixel()]),
            }),
        }
    }

    /// Image size.
    pub fn size(&self) -> Size {
        self.inner.size
    }

    /// Pixel format.
    pub fn format(&self) -> PixelFormat {
        self.inner.format
    }

    /// Locks the pixels for reading or writing by the application.
    pub fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.pixels.lock()
    }

    /// Copies a `size` x `format` frame into the image, waiting at most
    /// `timeout` for the lock.
    pub(crate) fn write_from(
        &self,
        size: Size,
        format: PixelFormat,
        src: &[u8],
        timeout: Duration,
    ) -> Result<(), ImageError> {
        if size != self.inner.size {
            return Err(ImageError::SizeMismatch {
                target: self.inner.size,
                source_size: size,
            });
        }
        if format != self.inner.format {
            return Err(ImageError::FormatMismatch {
                target: self.inner.format,
                source_format: format,
            });
        }
        let started = Instant::now();
        let mut pixels = self
            .inner
            .pixels
            .try_lock_for(timeout)
            .ok_or_else(|| ImageError::Locked(started.elapsed()))?;
        let n = src.len().min(pixels.len());
        pixels[..n].copy_from_slice(&src[..n]);
        Ok(())
    }

    /// True if both handles refer to the same pixels.
    pub fn ptr_eq(&self, other: &SharedImage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for SharedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedImage")
            .field("size", &self.inner.size)
            .field("format", &self.inner.format)
            .finish()
    }
}

/// Who provides the memory a frame's pixels land in.
#[derive(Debug, Clone, Default)]
pub enum BufferMode {
    /// Pixels are dropped; only metadata and statistics are delivered.
    Discard,
    /// The pipeline allocates a fresh buffer per frame.
    #[default]
    AutoAllocate,
    /// Pixels are copied into an application-owned image.
    CallerOwned(SharedImage),
}

/// Requested image of a shot.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Requested size.
    pub size: Size,
    /// Requested format.
    pub format: PixelFormat,
    /// Where the pixels go.
    pub buffer: BufferMode,
}

impl ImageRequest {
    /// Request for `size` pixels in `format`.
    pub fn new(size: Size, format: PixelFormat, buffer: BufferMode) -> Self {
        Self {
            size,
            format,
            buffer,
        }
    }

    /// Request for an application-owned target, taking size and format
    /// from the target.
    pub fn into_target(target: SharedImage) -> Self {
        Self {
            size: target.size(),
            format: target.format(),
            buffer: BufferMode::CallerOwned(target),
        }
    }
}

impl Default for ImageRequest {
    fn default() -> Self {
        Self::new(Size::new(640, 480), PixelFormat::Uyvy, BufferMode::AutoAllocate)
    }
}

/// Pixel payload of a delivered frame.
#[derive(Debug, Clone, Default)]
pub enum ImageData {
    /// Pixels were not kept.
    #[default]
    Discarded,
    /// Buffer allocated by the pipeline.
    Owned(Bytes),
    /// The application's own target, now holding the frame's pixels.
    Shared(SharedImage),
}

/// Image attached to a frame.
#[derive(Debug, Clone, Default)]
pub struct Image {
    size: Size,
    format: PixelFormat,
    data: ImageData,
}

impl Image {
    /// An image whose pixels were not kept.
    pub fn discarded(size: Size, format: PixelFormat) -> Self {
        Self {
            size,
            format,
            data: ImageData::Discarded,
        }
    }

    /// Image over pipeline-allocated bytes.
    pub fn owned(size: Size, format: PixelFormat, bytes: Bytes) -> Self {
        Self {
            size,
            format,
            data: ImageData::Owned(bytes),
        }
    }

    /// Image over the application's target.
    pub fn shared(target: SharedImage) -> Self {
        Self {
            size: target.size(),
            format: target.format(),
            data: ImageData::Shared(target),
        }
    }

    /// Image size.
    #[inline]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Pixel format.
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Pixel payload.
    pub fn data(&self) -> &ImageData {
        &self.data
    }

    /// Whether the pixels were dropped.
    pub fn is_discarded(&self) -> bool {
        matches!(self.data, ImageData::Discarded)
    }

    /// Pixel bytes, if the pipeline allocated them.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.data {
            ImageData::Owned(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Drops the pixels, keeping geometry.
    pub fn discard(&mut self) {
        self.data = ImageData::Discarded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_streamed_format() {
        assert_eq!(PixelFormat::Rgb24.streamed(), PixelFormat::Uyvy);
        assert_eq!(PixelFormat::Raw.streamed(), PixelFormat::Raw);
    }

    #[test]
    fn test_shared_image_write_copies_pixels() {
        let target = SharedImage::new(Size::new(4, 2), PixelFormat::Uyvy);
        target
            .write_from(Size::new(4, 2), PixelFormat::Uyvy, &[7u8; 64], Duration::from_millis(1))
            .unwrap();
        let pixels = target.lock();
        assert_eq!(pixels.len(), 16);
        assert!(pixels.iter().all(|p| *p == 7));
    }

    #[test]
    fn test_locked_target_times_out() {
        let target = SharedImage::new(Size::new(2, 2), PixelFormat::Raw);
        let held = target.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        let reader = thread::spawn(move || {
            let _guard = held.lock();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
        });
        rx.recv().unwrap();
        let result = target.write_from(
            Size::new(2, 2),
            PixelFormat::Raw,
            &[1u8; 8],
            Duration::from_millis(5),
        );
        assert!(matches!(result, Err(ImageError::Locked(_))));
        reader.join().unwrap();
    }

    #[test]
    fn test_mismatched_write_rejected() {
        let target = SharedImage::new(Size::new(4, 4), PixelFormat::Uyvy);
        let wrong_size =
            target.write_from(Size::new(8, 8), PixelFormat::Uyvy, &[0u8; 128], Duration::ZERO);
        assert!(matches!(wrong_size, Err(ImageError::SizeMismatch { .. })));
        let wrong_format =
            target.write_from(Size::new(4, 4), PixelFormat::Raw, &[0u8; 32], Duration::ZERO);
        assert!(matches!(wrong_format, Err(ImageError::FormatMismatch { .. })));
    }

    #[test]
    fn test_discarded_image_keeps_geometry() {
        let mut image = Image::owned(Size::new(8, 8), PixelFormat::Uyvy, Bytes::from(vec![0u8; 128]));
        assert!(image.bytes().is_some());
        image.discard();
        assert!(image.is_discarded());
        assert_eq!(image.size(), Size::new(8, 8));
    }
}
