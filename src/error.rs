//! Error taxonomy for the capture → adapt → infer pipeline

use thiserror::Error;

use crate::capture::{CameraPosition, SessionState};

/// Top-level error surfaced across the library boundary.
///
/// Per-frame failures (`AdaptationFailed`, `InferenceFailed`) never leave the
/// streaming path; they only reach callers of the single-shot still-image
/// entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no camera available")]
    NoCameraAvailable,

    #[error("camera switch to {target:?} failed: {source}")]
    DeviceSwitchFailed {
        target: CameraPosition,
        #[source]
        source: CaptureError,
    },

    #[error("image adaptation failed: {0}")]
    AdaptationFailed(#[from] AdaptError),

    #[error("inference failed: {0}")]
    InferenceFailed(#[from] InferenceError),

    #[error("capture session is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("a camera switch is already in progress")]
    SwitchInProgress,

    #[error("frame delivery for the {position} camera could not start: {source}")]
    DeliveryFailed {
        position: CameraPosition,
        #[source]
        source: CaptureError,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Failures converting a source image into a classifier-conformant buffer.
#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("source has no decodable image data: {0}")]
    NoImageData(String),

    #[error("could not allocate {bytes} byte destination buffer")]
    Allocation { bytes: usize },

    #[error("cannot create drawing context for {width}x{height} source")]
    DrawContext { width: u32, height: u32 },
}

/// Failures inside the classifier port.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("model could not be loaded: {0}")]
    ModelLoad(String),

    #[error("model runtime error: {0}")]
    Runtime(String),

    #[error("model produced malformed output: {0}")]
    MalformedOutput(String),

    #[error("model handle poisoned by an earlier panic")]
    Poisoned,
}

/// Failures from camera hardware or its backend.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no {0:?} camera could be opened")]
    DeviceUnavailable(CameraPosition),

    #[error("stream error: {0}")]
    Stream(String),

    /// No frame arrived within the stream timeout; the read may be retried.
    #[error("timed out waiting for a frame")]
    Timeout,

    #[error(transparent)]
    Io(std::io::Error),
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::TimedOut => CaptureError::Timeout,
            _ => CaptureError::Io(e),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn timed_out_read_is_retryable() {
        let err = CaptureError::from(io::Error::new(io::ErrorKind::TimedOut, "VIDIOC_DQBUF"));
        assert!(matches!(err, CaptureError::Timeout));

        let err = CaptureError::from(io::Error::new(io::ErrorKind::NotFound, "/dev/video9"));
        assert!(matches!(err, CaptureError::Io(_)));
    }
}
