//! Camera device abstraction shared by every capture backend

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::frame::Frame;
use crate::error::CaptureError;

/// Which way a camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
}

impl CameraPosition {
    pub fn opposite(self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Front => f.write_str("front"),
            CameraPosition::Back => f.write_str("back"),
        }
    }
}

/// Identity of an opened device input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub id: String,
    pub position: CameraPosition,
}

/// An opened camera input.
///
/// `next_frame` blocks until the device yields a frame and hands it to `tap`
/// borrowed; the buffer goes back to the device when `tap` returns.
pub trait DeviceInput: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    fn start_streaming(&self) -> Result<(), CaptureError>;

    fn stop_streaming(&self);

    fn next_frame(&self, tap: &mut dyn FnMut(Frame<'_>)) -> Result<(), CaptureError>;
}

/// Source of device inputs, one per camera position.
pub trait CameraBackend: Send + Sync {
    fn open(&self, position: CameraPosition) -> Result<Arc<dyn DeviceInput>, CaptureError>;
}

/// Consumer invoked once per captured frame on the delivery thread.
pub trait FrameTap: Send + Sync {
    fn on_frame(&self, frame: Frame<'_>);
}

impl<F> FrameTap for F
where
    F: Fn(Frame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: Frame<'_>) {
        self(frame)
    }
}
