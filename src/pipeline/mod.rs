//! Frame → conformant image → prediction → result channel

pub mod adapter;
pub mod results;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, instrument, warn};

use crate::capture::{Frame, FrameTap};
use crate::classifier::{ClassifierPort, Prediction};
use crate::error::{Error, Result};
use adapter::{adapt, ImageSource};
use results::ResultChannel;
use stats::{PipelineStats, SkipReason, StatsSnapshot};

pub use adapter::ConformantImage;

/// Text shown while a still image is being classified.
pub const ANALYZING_TEXT: &str = "Analyzing...";
/// Terminal text for a still image that could not be classified.
pub const DEFAULT_FAILURE_LABEL: &str = "Unable to identify";

/// Presentation status of a single still-image analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StillAnalysis {
    Analyzing,
    Detected(Prediction),
    Failed { label: String, reason: String },
}

impl StillAnalysis {
    pub fn display_text(&self) -> &str {
        match self {
            StillAnalysis::Analyzing => ANALYZING_TEXT,
            StillAnalysis::Detected(prediction) => &prediction.label,
            StillAnalysis::Failed { label, .. } => label,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StillAnalysis::Analyzing)
    }
}

/// Per-frame orchestration: adapt, classify, publish.
///
/// Streaming frames fail open: a frame that cannot be adapted or classified
/// is dropped and the channel keeps its previous prediction. Still images
/// report their failure instead, since there is no next frame to retry on.
pub struct InferencePipeline {
    classifier: Arc<dyn ClassifierPort>,
    results: ResultChannel,
    stats: PipelineStats,
    failure_label: String,
}

impl InferencePipeline {
    pub fn new(classifier: Arc<dyn ClassifierPort>, results: ResultChannel) -> Self {
        Self {
            classifier,
            results,
            stats: PipelineStats::default(),
            failure_label: DEFAULT_FAILURE_LABEL.to_string(),
        }
    }

    pub fn with_failure_label(mut self, label: impl Into<String>) -> Self {
        self.failure_label = label.into();
        self
    }

    pub fn results(&self) -> &ResultChannel {
        &self.results
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one live frame. Never fails; skipped frames leave the result
    /// channel untouched.
    pub fn process_frame(&self, frame: Frame<'_>) {
        self.stats.record_frame();
        let sequence = frame.meta.sequence;
        match self.classify(ImageSource::Frame(frame)) {
            Ok(prediction) => {
                self.results.publish(prediction);
                self.stats.record_published();
            }
            Err(e) => {
                let reason = match &e {
                    Error::AdaptationFailed(_) => SkipReason::Adaptation,
                    _ => SkipReason::Inference,
                };
                debug!(sequence, reason = reason.as_str(), error = %e, "Skipping frame");
                self.stats.record_skip(reason);
            }
        }
    }

    /// Classify an encoded still image (PNG, JPEG) once.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub fn analyze_still(&self, bytes: &[u8]) -> Result<Prediction> {
        self.classify(ImageSource::Encoded(bytes))
            .inspect_err(|e| warn!(error = %e, "Still image analysis failed"))
    }

    /// Classify an already decoded still image once.
    #[instrument(skip_all)]
    pub fn analyze_image(&self, image: &DynamicImage) -> Result<Prediction> {
        self.classify(ImageSource::Bitmap(image))
            .inspect_err(|e| warn!(error = %e, "Still image analysis failed"))
    }

    /// [`analyze_still`](Self::analyze_still) folded into a display status.
    pub fn describe_still(&self, bytes: &[u8]) -> StillAnalysis {
        match self.analyze_still(bytes) {
            Ok(prediction) => StillAnalysis::Detected(prediction),
            Err(e) => StillAnalysis::Failed {
                label: self.failure_label.clone(),
                reason: e.to_string(),
            },
        }
    }

    fn classify(&self, source: ImageSource<'_>) -> Result<Prediction> {
        let started = Instant::now();
        let image = adapt(source)?;
        let adapted = Instant::now();
        metrics::histogram!("sightline_adapt_time_us")
            .record((adapted - started).as_micros() as f64);

        let prediction = self.classifier.predict(&image)?;
        metrics::histogram!("sightline_inference_time_us")
            .record(adapted.elapsed().as_micros() as f64);
        Ok(prediction)
    }
}

impl FrameTap for InferencePipeline {
    fn on_frame(&self, frame: Frame<'_>) {
        self.process_frame(frame);
    }
}
