use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A captured frame borrowed from the device for one tap callback.
///
/// Hardware buffers are recycled once the callback returns, so the borrow
/// cannot outlive it. Use [`Frame::to_owned_frame`] for an explicit copy.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub meta: FrameMetadata,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

/// A frame copied out of the device buffer.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    /// Immutable frame data - can be shared across threads without copying
    pub data: Bytes,
    pub meta: FrameMetadata,
    pub timestamp: Instant,
}

/// Frame metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the first plane
    pub stride: u32,
    pub format: PixelFormat,
    pub device_timestamp: Option<Duration>, // Hardware timestamp if available
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Yuyv4,
    Mjpeg,
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel in the first plane, `None` for compressed formats.
    pub fn bytes_per_pixel(self) -> Option<u32> {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => Some(3),
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => Some(4),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Nv12 => Some(1),
            PixelFormat::Mjpeg => None,
        }
    }

    /// Tightly packed row stride for `width` pixels.
    pub fn packed_stride(self, width: u32) -> u32 {
        self.bytes_per_pixel().map_or(0, |bpp| bpp * width)
    }
}

impl<'a> Frame<'a> {
    pub fn new(data: &'a [u8], meta: FrameMetadata) -> Self {
        Self {
            data,
            meta,
            timestamp: Instant::now(),
        }
    }

    /// Copy the frame out of the device buffer.
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            data: Bytes::copy_from_slice(self.data),
            meta: self.meta,
            timestamp: self.timestamp,
        }
    }
}

impl OwnedFrame {
    pub fn as_frame(&self) -> Frame<'_> {
        Frame {
            data: &self.data,
            meta: self.meta,
            timestamp: self.timestamp,
        }
    }
}
