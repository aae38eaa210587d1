pub mod capture;
pub mod classifier;
pub mod error;
pub mod pipeline;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use capture::{CameraPosition, DeliverySettings, PixelFormat};

pub use capture::{CaptureSession, SessionEvent, SessionHandle};
pub use classifier::{ClassifierPort, Prediction};
pub use error::{Error, Result};
pub use pipeline::results::{ResultChannel, ResultFeed};
pub use pipeline::{InferencePipeline, StillAnalysis};

/// Environment variable prefix for configuration overrides,
/// e.g. `SIGHTLINE__CAPTURE__FPS=15`
const ENV_PREFIX: &str = "SIGHTLINE";

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub classifier: ClassifierConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackendKind {
    /// In-process test pattern, one colour per camera position
    Synthetic,
    /// Video4Linux devices (requires the `v4l2` feature)
    V4l2,
}

/// A camera node and the way it faces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub path: String,
    pub position: CameraPosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CaptureBackendKind,
    /// Explicit device list; probed at startup when empty
    pub devices: Vec<DeviceConfig>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    /// Pause after a failed frame read before retrying
    pub error_backoff_ms: u64,
    /// Delivery thread stack size in KiB, platform default when unset
    pub delivery_stack_kib: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_path: PathBuf,
    /// Newline-delimited class names, line N naming class N
    pub labels_path: Option<PathBuf>,
    /// Model input name; the first declared input when unset
    pub input_name: Option<String>,
    /// Per-channel RGB normalization applied as `(x / 255 - mean) / std`
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub intra_threads: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Shown when a still image cannot be classified
    pub still_failure_label: String,
    /// Seconds between pipeline counter log lines, 0 disables
    pub stats_interval_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackendKind::V4l2,
            devices: Vec::new(),
            width: 640,
            height: 480,
            fps: 30,
            format: PixelFormat::Mjpeg,
            buffer_count: 4,
            error_backoff_ms: 10,
            delivery_stack_kib: None,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/classifier.onnx"),
            labels_path: Some(PathBuf::from("models/labels.txt")),
            input_name: None,
            // Inception-style inputs in [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
            intra_threads: 2,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            still_failure_label: pipeline::DEFAULT_FAILURE_LABEL.to_string(),
            stats_interval_secs: 10,
        }
    }
}

impl Config {
    /// Defaults, overlaid by the optional TOML file, overlaid by
    /// `SIGHTLINE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

impl CaptureConfig {
    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            stack_size: self.delivery_stack_kib.map(|kib| kib * 1024),
        }
    }

    /// Time between frames at the configured rate.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}
