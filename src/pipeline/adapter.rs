//! Conversion of arbitrary bitmaps into the classifier's fixed input buffer

use image::imageops::{self, FilterType};
use image::DynamicImage;
use tracing::trace;

use crate::capture::decode::decode_frame;
use crate::capture::Frame;
use crate::error::AdaptError;

/// Classifier input edge length in pixels.
pub const TARGET_WIDTH: u32 = 299;
pub const TARGET_HEIGHT: u32 = 299;
/// Bytes per pixel of [`ConformantImage`] (ARGB, 8 bits per channel).
pub const TARGET_CHANNELS: u32 = 4;

/// A 299×299 32-bit ARGB buffer with the alpha byte skipped (always 0xFF).
///
/// Allocated fresh for every adaptation and owned by whoever requested it.
#[derive(Debug, PartialEq, Eq)]
pub struct ConformantImage {
    data: Box<[u8]>,
}

impl ConformantImage {
    pub fn width(&self) -> u32 {
        TARGET_WIDTH
    }

    pub fn height(&self) -> u32 {
        TARGET_HEIGHT
    }

    pub fn bytes_per_row(&self) -> usize {
        (TARGET_WIDTH * TARGET_CHANNELS) as usize
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// `[a, r, g, b]` at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= TARGET_WIDTH || y >= TARGET_HEIGHT {
            return None;
        }
        let offset = y as usize * self.bytes_per_row() + (x * TARGET_CHANNELS) as usize;
        let px = &self.data[offset..offset + 4];
        Some([px[0], px[1], px[2], px[3]])
    }
}

/// Input accepted by [`adapt`].
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// An encoded still image (PNG, JPEG).
    Encoded(&'a [u8]),
    /// An already decoded bitmap.
    Bitmap(&'a DynamicImage),
    /// A live camera frame, valid for the current tap callback only.
    Frame(Frame<'a>),
}

/// Decode `source` and draw it into a fresh [`ConformantImage`].
///
/// The whole source is scaled into the full destination rectangle, so the
/// aspect ratio is not preserved. Decoding happens before the destination is
/// allocated; a source without image data never allocates.
pub fn adapt(source: ImageSource<'_>) -> Result<ConformantImage, AdaptError> {
    match source {
        ImageSource::Encoded(bytes) => {
            let bitmap =
                image::load_from_memory(bytes).map_err(|e| AdaptError::NoImageData(e.to_string()))?;
            draw(&bitmap)
        }
        ImageSource::Bitmap(bitmap) => draw(bitmap),
        ImageSource::Frame(frame) => draw(&decode_frame(&frame)?),
    }
}

fn draw(source: &DynamicImage) -> Result<ConformantImage, AdaptError> {
    let (width, height) = (source.width(), source.height());
    if width == 0 || height == 0 {
        return Err(AdaptError::DrawContext { width, height });
    }

    let bytes = (TARGET_WIDTH * TARGET_HEIGHT * TARGET_CHANNELS) as usize;
    let mut data = Vec::new();
    data.try_reserve_exact(bytes)
        .map_err(|_| AdaptError::Allocation { bytes })?;

    // Sampled straight from the source; no full-size RGB copy is made
    let scaled = imageops::resize(source, TARGET_WIDTH, TARGET_HEIGHT, FilterType::Triangle);
    data.extend_from_slice(scaled.as_raw());

    // RGBA -> ARGB with the alpha byte skipped
    for px in data.chunks_exact_mut(TARGET_CHANNELS as usize) {
        px.rotate_right(1);
        px[0] = 0xFF;
    }
    trace!(width, height, "Adapted source to classifier input");

    Ok(ConformantImage {
        data: data.into_boxed_slice(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::synthetic::solid_frame;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn encoded_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb(rgb)));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn any_aspect_ratio_fills_target() {
        for (w, h) in [(1, 1), (640, 480), (480, 640), (1000, 3), (299, 299)] {
            let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, image::Rgb([1, 2, 3])));
            let adapted = adapt(ImageSource::Bitmap(&bitmap)).unwrap();

            assert_eq!((adapted.width(), adapted.height()), (299, 299));
            assert_eq!(adapted.as_bytes().len(), 299 * 299 * 4);
            assert_eq!(adapted.bytes_per_row(), 299 * 4);
        }
    }

    #[test]
    fn no_letterboxing_on_wide_source() {
        let bitmap = DynamicImage::ImageRgb8(RgbImage::from_pixel(600, 100, image::Rgb([0, 255, 0])));
        let adapted = adapt(ImageSource::Bitmap(&bitmap)).unwrap();

        // Corners would be padding if the aspect ratio were kept
        assert_eq!(adapted.pixel(0, 0), Some([0xFF, 0, 255, 0]));
        assert_eq!(adapted.pixel(298, 298), Some([0xFF, 0, 255, 0]));
        assert_eq!(adapted.pixel(299, 0), None);
    }

    #[test]
    fn encoded_still_is_decoded() {
        let png = encoded_png(32, 16, [10, 20, 30]);
        let adapted = adapt(ImageSource::Encoded(&png)).unwrap();
        assert_eq!(adapted.pixel(150, 150), Some([0xFF, 10, 20, 30]));
    }

    #[test]
    fn undecodable_bytes_fail_before_allocation() {
        let err = adapt(ImageSource::Encoded(b"\x00\x01definitely not an image")).unwrap_err();
        assert!(matches!(err, AdaptError::NoImageData(_)));

        let err = adapt(ImageSource::Encoded(&[])).unwrap_err();
        assert!(matches!(err, AdaptError::NoImageData(_)));
    }

    #[test]
    fn empty_bitmap_has_no_drawing_context() {
        let bitmap = DynamicImage::new_rgb8(0, 10);
        assert!(matches!(
            adapt(ImageSource::Bitmap(&bitmap)),
            Err(AdaptError::DrawContext { width: 0, height: 10 })
        ));
    }

    #[test]
    fn camera_frame_adapts() {
        let frame = solid_frame(64, 48, [200, 100, 50]);
        let adapted = adapt(ImageSource::Frame(frame.as_frame())).unwrap();
        assert_eq!(adapted.pixel(10, 10), Some([0xFF, 200, 100, 50]));
    }

    #[test]
    fn transparent_source_is_opaque_argb() {
        let bitmap = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            40,
            30,
            image::Rgba([30, 60, 90, 0]),
        ));
        let adapted = adapt(ImageSource::Bitmap(&bitmap)).unwrap();
        assert_eq!(adapted.pixel(0, 0), Some([0xFF, 30, 60, 90]));
        assert_eq!(adapted.pixel(298, 150), Some([0xFF, 30, 60, 90]));
    }

    #[test]
    fn deep_colour_source_is_narrowed() {
        let bitmap = DynamicImage::ImageRgb16(image::ImageBuffer::from_pixel(
            12,
            12,
            image::Rgb([65535u16, 0, 65535]),
        ));
        let adapted = adapt(ImageSource::Bitmap(&bitmap)).unwrap();
        assert_eq!(adapted.pixel(100, 100), Some([0xFF, 255, 0, 255]));
    }

    #[test]
    fn adaptation_is_deterministic() {
        let png = encoded_png(123, 77, [5, 6, 7]);
        let a = adapt(ImageSource::Encoded(&png)).unwrap();
        let b = adapt(ImageSource::Encoded(&png)).unwrap();
        assert_eq!(a, b);
    }
}
