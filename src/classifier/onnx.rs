//! ONNX Runtime image classifier

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::{info, instrument, trace};

use super::{ClassifierPort, Prediction};
use crate::error::InferenceError;
use crate::pipeline::adapter::{ConformantImage, TARGET_HEIGHT, TARGET_WIDTH};
use crate::ClassifierConfig;

/// A single-input, single-output classification model.
///
/// Input is NCHW `f32` RGB scaled as `(x / 255 - mean) / std`; the label is
/// the argmax of the first output.
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    labels: Vec<String>,
    mean: [f32; 3],
    std: [f32; 3],
}

impl OnnxClassifier {
    #[instrument(skip(config), fields(model = %config.model_path.display()))]
    pub fn load(config: &ClassifierConfig) -> Result<Self, InferenceError> {
        let load_err = |e: ort::Error| InferenceError::ModelLoad(e.to_string());
        let session = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?
            .with_intra_threads(config.intra_threads)
            .map_err(load_err)?
            .commit_from_file(&config.model_path)
            .map_err(load_err)?;

        let input_name = match &config.input_name {
            Some(name) => name.clone(),
            None => session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .ok_or_else(|| InferenceError::ModelLoad("model declares no inputs".into()))?,
        };

        let labels = match &config.labels_path {
            Some(path) => read_labels(path)?,
            None => Vec::new(),
        };
        info!(input = %input_name, labels = labels.len(), "ONNX classifier loaded");

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            labels,
            mean: config.mean,
            std: config.std,
        })
    }

    fn label(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", index))
    }

    fn to_tensor(&self, image: &ConformantImage) -> Array4<f32> {
        let (w, h) = (TARGET_WIDTH as usize, TARGET_HEIGHT as usize);
        let data = image.as_bytes();
        Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
            // Skip the leading alpha byte of each ARGB pixel
            let value = data[(y * w + x) * 4 + 1 + c] as f32 / 255.0;
            (value - self.mean[c]) / self.std[c]
        })
    }
}

impl ClassifierPort for OnnxClassifier {
    fn predict(&self, image: &ConformantImage) -> Result<Prediction, InferenceError> {
        let runtime_err = |e: ort::Error| InferenceError::Runtime(e.to_string());
        let tensor = self.to_tensor(image);
        let input = ort::value::TensorRef::from_array_view(&tensor).map_err(runtime_err)?;

        let mut session = self.session.lock().map_err(|_| InferenceError::Poisoned)?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(runtime_err)?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| InferenceError::MalformedOutput("no output tensor".into()))?;
        let (_, scores) = output
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| InferenceError::MalformedOutput(e.to_string()))?;

        let best = argmax(scores)
            .ok_or_else(|| InferenceError::MalformedOutput("empty score tensor".into()))?;
        trace!(index = best, score = scores[best], "Top class");
        Ok(Prediction::new(self.label(best)))
    }
}

fn read_labels(path: &Path) -> Result<Vec<String>, InferenceError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| InferenceError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    Ok(parse_labels(&text))
}

/// One label per line; line number is the class index.
fn parse_labels(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = text.lines().map(|l| l.trim().to_string()).collect();
    while labels.last().is_some_and(|l| l.is_empty()) {
        labels.pop();
    }
    labels
}

fn argmax(scores: &[f32]) -> Option<usize> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
}
