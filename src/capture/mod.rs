pub mod decode;
pub mod device;
pub mod frame;
pub mod session;
pub mod synthetic;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use device::{CameraBackend, CameraPosition, DeviceDescriptor, DeviceInput, FrameTap};
pub use frame::{Frame, FrameMetadata, OwnedFrame, PixelFormat};
pub use session::{
    CameraState, CaptureSession, DeliverySettings, SessionEvent, SessionHandle, SessionState,
};
pub use synthetic::{SyntheticCamera, SyntheticSource};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
