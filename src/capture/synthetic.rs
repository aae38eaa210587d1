//! In-process camera backend producing test-pattern or scripted frames

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::debug;

use super::device::{CameraBackend, CameraPosition, DeviceDescriptor, DeviceInput};
use super::frame::{Frame, FrameMetadata, OwnedFrame, PixelFormat};
use crate::error::CaptureError;

/// What a synthetic device emits once streaming.
#[derive(Debug, Clone)]
pub enum SyntheticSource {
    /// Endless frames of one RGB colour.
    Solid([u8; 3]),
    /// The given frames in order, then nothing.
    Script(Vec<OwnedFrame>),
    /// A device that streams but never produces a frame; every read times out.
    Stalled,
}

#[derive(Debug, Clone)]
struct DeviceSpec {
    available: bool,
    refuses_stream: bool,
    source: SyntheticSource,
}

/// A camera rig with up to one device per position.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    frame_interval: Duration,
    devices: Mutex<HashMap<CameraPosition, DeviceSpec>>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, frame_interval: Duration) -> Self {
        Self {
            width,
            height,
            frame_interval,
            devices: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_device(self, position: CameraPosition, source: SyntheticSource) -> Self {
        if let Ok(mut devices) = self.devices.lock() {
            devices.insert(
                position,
                DeviceSpec {
                    available: true,
                    refuses_stream: false,
                    source,
                },
            );
        }
        self
    }

    /// Make the device at `position` fail (or succeed again) on open.
    pub fn set_available(&self, position: CameraPosition, available: bool) {
        if let Ok(mut devices) = self.devices.lock() {
            if let Some(spec) = devices.get_mut(&position) {
                spec.available = available;
            }
        }
    }

    /// Make inputs opened from now on at `position` fail to start streaming.
    pub fn set_refuses_stream(&self, position: CameraPosition, refuses: bool) {
        if let Ok(mut devices) = self.devices.lock() {
            if let Some(spec) = devices.get_mut(&position) {
                spec.refuses_stream = refuses;
            }
        }
    }
}

impl CameraBackend for SyntheticCamera {
    fn open(&self, position: CameraPosition) -> Result<Arc<dyn DeviceInput>, CaptureError> {
        let devices = self
            .devices
            .lock()
            .map_err(|_| CaptureError::Stream("synthetic rig poisoned".into()))?;
        let spec = devices
            .get(&position)
            .filter(|spec| spec.available)
            .ok_or(CaptureError::DeviceUnavailable(position))?;

        debug!(%position, "Opening synthetic camera");
        let source = match &spec.source {
            SyntheticSource::Solid(rgb) => Cursor::Solid(*rgb),
            SyntheticSource::Script(frames) => Cursor::Script(frames.iter().cloned().collect()),
            SyntheticSource::Stalled => Cursor::Stalled,
        };
        Ok(Arc::new(SyntheticInput {
            descriptor: DeviceDescriptor {
                id: format!("synthetic:{}", position),
                position,
            },
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            cursor: Mutex::new(source),
            refuses_stream: spec.refuses_stream,
            streaming: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }))
    }
}

enum Cursor {
    Solid([u8; 3]),
    Script(VecDeque<OwnedFrame>),
    Stalled,
}

struct SyntheticInput {
    descriptor: DeviceDescriptor,
    width: u32,
    height: u32,
    frame_interval: Duration,
    cursor: Mutex<Cursor>,
    refuses_stream: bool,
    streaming: AtomicBool,
    sequence: AtomicU64,
}

impl DeviceInput for SyntheticInput {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn start_streaming(&self) -> Result<(), CaptureError> {
        if self.refuses_stream {
            return Err(CaptureError::Stream(format!(
                "{} refused to stream",
                self.descriptor.id
            )));
        }
        self.streaming.store(true, Ordering::Release);
        Ok(())
    }

    fn stop_streaming(&self) {
        self.streaming.store(false, Ordering::Release);
    }

    fn next_frame(&self, tap: &mut dyn FnMut(Frame<'_>)) -> Result<(), CaptureError> {
        if !self.streaming.load(Ordering::Acquire) {
            return Err(CaptureError::Stream(format!(
                "{} is not streaming",
                self.descriptor.id
            )));
        }
        // Pace like hardware; an exhausted script still waits so callers don't spin
        std::thread::sleep(self.frame_interval.max(Duration::from_millis(1)));

        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| CaptureError::Stream("synthetic cursor poisoned".into()))?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        match &mut *cursor {
            Cursor::Solid(rgb) => {
                let frame = solid_frame(self.width, self.height, *rgb);
                let mut meta = frame.meta;
                meta.sequence = sequence;
                tap(Frame {
                    data: &frame.data,
                    meta,
                    timestamp: Instant::now(),
                });
            }
            Cursor::Script(frames) => {
                if let Some(frame) = frames.pop_front() {
                    tap(frame.as_frame());
                }
            }
            Cursor::Stalled => return Err(CaptureError::Timeout),
        }
        Ok(())
    }
}

/// A tightly packed RGB24 frame filled with one colour.
pub fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> OwnedFrame {
    let data: Vec<u8> = rgb
        .iter()
        .copied()
        .cycle()
        .take(width as usize * height as usize * 3)
        .collect();
    OwnedFrame {
        data: Bytes::from(data),
        meta: FrameMetadata {
            sequence: 0,
            width,
            height,
            stride: PixelFormat::Rgb24.packed_stride(width),
            format: PixelFormat::Rgb24,
            device_timestamp: None,
        },
        timestamp: Instant::now(),
    }
}
