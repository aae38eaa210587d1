//! Frame decoding into bitmaps the adapter can draw from

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};

use super::frame::{Frame, PixelFormat};
use crate::error::AdaptError;

/// Decode a captured frame into a bitmap.
///
/// Raw formats honour the frame's row stride; `Mjpeg` is decoded as JPEG.
pub fn decode_frame(frame: &Frame<'_>) -> Result<DynamicImage, AdaptError> {
    let meta = &frame.meta;
    if meta.format != PixelFormat::Mjpeg && (meta.width == 0 || meta.height == 0) {
        return Err(AdaptError::NoImageData(format!(
            "empty {}x{} frame",
            meta.width, meta.height
        )));
    }
    match meta.format {
        PixelFormat::Mjpeg => image::load_from_memory_with_format(frame.data, ImageFormat::Jpeg)
            .map_err(|e| AdaptError::NoImageData(e.to_string())),
        PixelFormat::Rgb24 => packed_rgb(frame, [0, 1, 2]).map(DynamicImage::ImageRgb8),
        PixelFormat::Bgr24 => packed_rgb(frame, [2, 1, 0]).map(DynamicImage::ImageRgb8),
        PixelFormat::Rgba32 => packed_rgba(frame, [0, 1, 2, 3]).map(DynamicImage::ImageRgba8),
        PixelFormat::Bgra32 => packed_rgba(frame, [2, 1, 0, 3]).map(DynamicImage::ImageRgba8),
        PixelFormat::Yuyv4 => yuyv(frame).map(DynamicImage::ImageRgb8),
        PixelFormat::Nv12 => nv12(frame).map(DynamicImage::ImageRgb8),
    }
}

fn check_plane(frame: &Frame<'_>, rows: u32, row_bytes: u32) -> Result<usize, AdaptError> {
    let meta = &frame.meta;
    let stride = if meta.stride == 0 {
        row_bytes
    } else {
        meta.stride
    };
    if stride < row_bytes {
        return Err(AdaptError::NoImageData(format!(
            "stride {} shorter than row of {} bytes",
            stride, row_bytes
        )));
    }
    let needed = match rows {
        0 => 0,
        rows => stride as usize * (rows as usize - 1) + row_bytes as usize,
    };
    if frame.data.len() < needed {
        return Err(AdaptError::NoImageData(format!(
            "{:?} frame {}x{} needs {} bytes, got {}",
            meta.format,
            meta.width,
            meta.height,
            needed,
            frame.data.len()
        )));
    }
    Ok(stride.max(1) as usize)
}

fn packed_rgb(frame: &Frame<'_>, order: [usize; 3]) -> Result<RgbImage, AdaptError> {
    let (width, height) = (frame.meta.width, frame.meta.height);
    let stride = check_plane(frame, height, width * 3)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for row in frame.data.chunks(stride).take(height as usize) {
        for px in row[..width as usize * 3].chunks_exact(3) {
            pixels.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]]]);
        }
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| AdaptError::NoImageData("short RGB frame".into()))
}

fn packed_rgba(frame: &Frame<'_>, order: [usize; 4]) -> Result<RgbaImage, AdaptError> {
    let (width, height) = (frame.meta.width, frame.meta.height);
    let stride = check_plane(frame, height, width * 4)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for row in frame.data.chunks(stride).take(height as usize) {
        for px in row[..width as usize * 4].chunks_exact(4) {
            pixels.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]], px[order[3]]]);
        }
    }
    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| AdaptError::NoImageData("short RGBA frame".into()))
}

fn yuyv(frame: &Frame<'_>) -> Result<RgbImage, AdaptError> {
    let (width, height) = (frame.meta.width, frame.meta.height);
    // YUYV packs two pixels into four bytes
    let row_bytes = width.div_ceil(2) * 4;
    let stride = check_plane(frame, height, row_bytes)?;

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for row in frame.data.chunks(stride).take(height as usize) {
        let mut remaining = width as usize;
        for quad in row[..row_bytes as usize].chunks_exact(4) {
            let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
            pixels.extend_from_slice(&yuv_to_rgb(y0, u, v));
            remaining -= 1;
            if remaining == 0 {
                break;
            }
            pixels.extend_from_slice(&yuv_to_rgb(y1, u, v));
            remaining -= 1;
        }
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| AdaptError::NoImageData("short YUYV frame".into()))
}

fn nv12(frame: &Frame<'_>) -> Result<RgbImage, AdaptError> {
    let (width, height) = (frame.meta.width, frame.meta.height);
    let chroma_rows = height.div_ceil(2);
    let chroma_bytes = width.div_ceil(2) * 2;
    // Luma plane followed by interleaved UV at half vertical resolution
    let stride = check_plane(frame, height + chroma_rows, width.max(chroma_bytes))?;
    let (luma, chroma) = frame.data.split_at(stride * height as usize);

    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height as usize {
        let luma_row = &luma[y * stride..];
        let chroma_row = &chroma[(y / 2) * stride..];
        for x in 0..width as usize {
            let uv = (x / 2) * 2;
            pixels.extend_from_slice(&yuv_to_rgb(
                luma_row[x],
                chroma_row[uv],
                chroma_row[uv + 1],
            ));
        }
    }
    RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| AdaptError::NoImageData("short NV12 frame".into()))
}

/// BT.601 limited-range YCbCr to RGB
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::FrameMetadata;

    fn meta(format: PixelFormat, width: u32, height: u32, stride: u32) -> FrameMetadata {
        FrameMetadata {
            sequence: 0,
            width,
            height,
            stride,
            format,
            device_timestamp: None,
        }
    }

    #[test]
    fn bgr_rows_skip_stride_padding() {
        // 2x2 BGR with 2 bytes of padding per row
        let data = [
            1, 2, 3, 4, 5, 6, 0xEE, 0xEE, //
            7, 8, 9, 10, 11, 12, 0xEE, 0xEE,
        ];
        let frame = Frame::new(&data, meta(PixelFormat::Bgr24, 2, 2, 8));
        let image = decode_frame(&frame).unwrap().to_rgb8();

        assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(image.get_pixel(1, 1).0, [12, 11, 10]);
    }

    #[test]
    fn yuyv_grey_stays_grey() {
        let data = [128u8, 128, 128, 128];
        let frame = Frame::new(&data, meta(PixelFormat::Yuyv4, 2, 1, 4));
        let image = decode_frame(&frame).unwrap().to_rgb8();

        let [r, g, b] = image.get_pixel(1, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn nv12_decodes_full_frame() {
        let (w, h) = (4u32, 2u32);
        let mut data = vec![235u8; (w * h) as usize];
        data.extend(std::iter::repeat(128u8).take(w as usize));
        let frame = Frame::new(&data, meta(PixelFormat::Nv12, w, h, w));
        let image = decode_frame(&frame).unwrap().to_rgb8();

        assert_eq!(image.dimensions(), (4, 2));
        assert_eq!(image.get_pixel(3, 1).0, [255, 255, 255]);
    }

    #[test]
    fn truncated_frame_is_not_decodable() {
        let data = [0u8; 5];
        let frame = Frame::new(&data, meta(PixelFormat::Rgb24, 2, 2, 6));
        assert!(matches!(
            decode_frame(&frame),
            Err(AdaptError::NoImageData(_))
        ));
    }

    #[test]
    fn garbage_mjpeg_is_not_decodable() {
        let data = b"not a jpeg";
        let frame = Frame::new(data, meta(PixelFormat::Mjpeg, 640, 480, 0));
        assert!(matches!(
            decode_frame(&frame),
            Err(AdaptError::NoImageData(_))
        ));
    }
}
