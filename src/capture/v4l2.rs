//! V4L2 capture backend with memory-mapped buffers

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::device::{CameraBackend, CameraPosition, DeviceDescriptor, DeviceInput};
use super::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::CaptureError;
use crate::{CaptureConfig, DeviceConfig};

/// Shortest wait for a frame before the read is abandoned and retried.
const MIN_FRAME_TIMEOUT: Duration = Duration::from_millis(200);

/// Cameras reachable through `/dev/video*` nodes.
pub struct V4l2Camera {
    config: CaptureConfig,
    devices: Vec<DeviceConfig>,
}

impl V4l2Camera {
    /// Use the configured device list, or probe for capture nodes when empty.
    pub fn new(config: CaptureConfig) -> Self {
        let devices = if config.devices.is_empty() {
            auto_detect_devices()
        } else {
            config.devices.clone()
        };
        Self { config, devices }
    }
}

impl CameraBackend for V4l2Camera {
    #[instrument(skip(self))]
    fn open(&self, position: CameraPosition) -> Result<Arc<dyn DeviceInput>, CaptureError> {
        let found = self
            .devices
            .iter()
            .find(|d| d.position == position)
            .ok_or(CaptureError::DeviceUnavailable(position))?;

        let device = Device::with_path(&found.path)?;
        let caps = device.query_caps()?;
        info!("Device: {} ({}) at {}", caps.card, caps.driver, found.path);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::Stream(format!(
                "{} doesn't support video capture",
                found.path
            )));
        }

        let mut fmt = device.format()?;
        fmt.width = self.config.width;
        fmt.height = self.config.height;
        fmt.fourcc = fourcc(self.config.format)?;
        // The driver may adjust the request; keep what it actually chose
        let actual = device.set_format(&fmt)?;
        let format = pixel_format(actual.fourcc).ok_or_else(|| {
            CaptureError::Stream(format!("driver chose unsupported format {}", actual.fourcc))
        })?;

        Ok(Arc::new(V4l2Input {
            descriptor: DeviceDescriptor {
                id: found.path.clone(),
                position,
            },
            device,
            buffer_count: self.config.buffer_count,
            frame_timeout: frame_timeout(self.config.frame_interval()),
            layout: Layout {
                width: actual.width,
                height: actual.height,
                stride: actual.stride,
                format,
            },
            stream: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

struct V4l2Input {
    descriptor: DeviceDescriptor,
    device: Device,
    buffer_count: u32,
    frame_timeout: Duration,
    layout: Layout,
    stream: Mutex<Option<MmapStream<'static>>>,
    sequence: AtomicU64,
}

impl DeviceInput for V4l2Input {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn start_streaming(&self) -> Result<(), CaptureError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, Type::VideoCapture, self.buffer_count)?;
        // A stalled device must not block the delivery thread past a stop request
        stream.set_timeout(self.frame_timeout);
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| CaptureError::Stream("stream lock poisoned".into()))?;
        *slot = Some(stream);
        info!(
            device = %self.descriptor.id,
            "Capture stream started with {} buffers", self.buffer_count
        );
        Ok(())
    }

    fn stop_streaming(&self) {
        match self.stream.lock() {
            // Dropping the stream unmaps the buffers and issues STREAMOFF
            Ok(mut slot) => {
                slot.take();
            }
            Err(_) => warn!(device = %self.descriptor.id, "Stream lock poisoned on stop"),
        }
        debug!(device = %self.descriptor.id, "Capture stream stopped");
    }

    fn next_frame(&self, tap: &mut dyn FnMut(Frame<'_>)) -> Result<(), CaptureError> {
        let timestamp = Instant::now();
        let mut slot = self
            .stream
            .lock()
            .map_err(|_| CaptureError::Stream("stream lock poisoned".into()))?;
        let stream = slot
            .as_mut()
            .ok_or_else(|| CaptureError::Stream("stream not started".into()))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        tap(Frame {
            data: &buf[..used],
            meta: FrameMetadata {
                sequence,
                width: self.layout.width,
                height: self.layout.height,
                stride: self.layout.stride,
                format: self.layout.format,
                device_timestamp: Some(
                    Duration::from_secs(meta.timestamp.sec as u64)
                        + Duration::from_micros(meta.timestamp.usec as u64),
                ),
            },
            timestamp,
        });
        Ok(())
    }
}

/// A few frame periods, so a slow frame is not mistaken for a stall.
fn frame_timeout(frame_interval: Duration) -> Duration {
    (frame_interval * 4).max(MIN_FRAME_TIMEOUT)
}

fn fourcc(format: PixelFormat) -> Result<FourCC, CaptureError> {
    match format {
        PixelFormat::Mjpeg => Ok(FourCC::new(b"MJPG")),
        PixelFormat::Yuyv4 => Ok(FourCC::new(b"YUYV")),
        PixelFormat::Rgb24 => Ok(FourCC::new(b"RGB3")),
        PixelFormat::Bgr24 => Ok(FourCC::new(b"BGR3")),
        PixelFormat::Nv12 => Ok(FourCC::new(b"NV12")),
        other => Err(CaptureError::Stream(format!(
            "{:?} is not a V4L2 capture format",
            other
        ))),
    }
}

fn pixel_format(fourcc: FourCC) -> Option<PixelFormat> {
    match &fourcc.repr {
        b"MJPG" => Some(PixelFormat::Mjpeg),
        b"YUYV" => Some(PixelFormat::Yuyv4),
        b"RGB3" => Some(PixelFormat::Rgb24),
        b"BGR3" => Some(PixelFormat::Bgr24),
        b"NV12" => Some(PixelFormat::Nv12),
        _ => None,
    }
}

/// Probe `/dev/video0..9` for capture nodes.
///
/// The first node found is treated as the back camera and the second as the
/// front one.
pub fn auto_detect_devices() -> Vec<DeviceConfig> {
    info!("Auto-detecting capture devices...");

    let mut found = Vec::new();
    for i in 0..10 {
        let path = format!("/dev/video{}", i);
        if !Path::new(&path).exists() {
            continue;
        }

        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            continue;
        }

        let position = match found.len() {
            0 => CameraPosition::Back,
            1 => CameraPosition::Front,
            _ => break,
        };
        info!("Found {} camera: {} - {}", position, path, caps.card);
        found.push(DeviceConfig { path, position });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timeout_tracks_frame_rate() {
        assert_eq!(frame_timeout(Duration::from_millis(100)), Duration::from_millis(400));
        assert_eq!(frame_timeout(Duration::from_millis(33)), MIN_FRAME_TIMEOUT);
    }

    #[test]
    fn fourcc_mapping_is_symmetric() {
        for format in [
            PixelFormat::Mjpeg,
            PixelFormat::Yuyv4,
            PixelFormat::Rgb24,
            PixelFormat::Bgr24,
            PixelFormat::Nv12,
        ] {
            assert_eq!(pixel_format(fourcc(format).unwrap()), Some(format));
        }
        assert!(fourcc(PixelFormat::Rgba32).is_err());
    }
}
